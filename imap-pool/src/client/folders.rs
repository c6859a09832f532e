//! Folder operations of the [`MailClient`].

use tracing::{debug, instrument};

use super::MailClient;
use crate::{
    folder::{self, Folder},
    pool::ConnectionHandle,
    Error, Result,
};

impl MailClient {
    /// List all folders, flattened parent first.
    ///
    /// Selectable folders are selected to get their message counts. A
    /// folder that cannot be selected is still listed, without counts.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn get_folders(&mut self) -> Result<Vec<Folder>> {
        let conn = self.connection().await?;
        let res = list_folders(&conn, true).await;
        self.finish();
        res
    }

    /// Return the number of messages of the given folder.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn get_folder_message_count(&mut self, folder: &str) -> Result<u32> {
        let conn = self.connection().await?;

        let res = conn
            .select(folder)
            .await
            .map(|status| status.exists)
            .map_err(|err| Error::SelectFolderError(err, folder.to_owned()));

        self.finish();
        res
    }

    /// Find the drafts folder of the account.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn find_draft_folder(&mut self) -> Result<Folder> {
        let conn = self.connection().await?;

        let res = list_folders(&conn, false).await.and_then(|folders| {
            let draft = folder::find_draft_folder(&folders).cloned();
            draft.ok_or(Error::DraftFolderNotFoundError)
        });

        if let Ok(draft) = &res {
            debug!(folder = %draft.path, "drafts folder found");
        }

        self.finish();
        res
    }

    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn create_folder(&mut self, path: &str) -> Result<()> {
        let conn = self.connection().await?;

        let res = conn
            .create(path)
            .await
            .map_err(|err| Error::CreateFolderError(err, path.to_owned()));

        self.finish();
        res
    }
}

async fn list_folders(conn: &ConnectionHandle, with_counts: bool) -> Result<Vec<Folder>> {
    let entries = conn.list().await.map_err(Error::ListFoldersError)?;
    let mut folders = folder::flatten(&entries);

    if with_counts {
        for folder in folders.iter_mut().filter(|f| f.is_selectable()) {
            match conn.select(&folder.path).await {
                Ok(status) => folder.set_status(&status),
                Err(err) => {
                    debug!(folder = %folder.path, "cannot select folder, skipping counts: {err}");
                }
            }
        }
    }

    debug!(count = folders.len(), "folders listed");
    Ok(folders)
}
