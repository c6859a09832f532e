//! Message mutation operations of the [`MailClient`]: flags,
//! deletion, move and append.

use tracing::{debug, instrument, warn};

use super::{
    messages::{search_uids, select, MESSAGE_ID_HEADER},
    MailClient,
};
use crate::{
    connection::{ConnectionError, FetchQuery, SearchQuery, MOVE_CAPABILITY},
    flag::Flag,
    message::Envelope,
    pool::ConnectionHandle,
    Error, Result,
};

impl MailClient {
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn mark_as_read(&mut self, folder: &str, uid: u32) -> Result<()> {
        let conn = self.connection().await?;
        let res = store_flags(&conn, folder, uid, &[Flag::Seen], true).await;
        self.finish();
        res
    }

    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn mark_as_unread(&mut self, folder: &str, uid: u32) -> Result<()> {
        let conn = self.connection().await?;
        let res = store_flags(&conn, folder, uid, &[Flag::Seen], false).await;
        self.finish();
        res
    }

    /// Flag the message as deleted, then expunge the folder.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn delete_message(&mut self, folder: &str, uid: u32) -> Result<()> {
        let conn = self.connection().await?;
        let res = delete(&conn, folder, uid).await;
        self.finish();
        res
    }

    /// Move a message to another folder, adding the given flags
    /// first.
    ///
    /// Uses the atomic `MOVE` command when the server supports it,
    /// copy then delete otherwise. Afterwards, any copy of the
    /// message left in the source folder is deleted.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn move_message(
        &mut self,
        source: &str,
        target: &str,
        uid: u32,
        flags: Option<&[Flag]>,
    ) -> Result<()> {
        let conn = self.connection().await?;
        let res = move_message(&conn, source, target, uid, flags.unwrap_or_default()).await;
        self.finish();
        res
    }

    /// Append a raw message to the given folder, with the given flags
    /// or `\Draft`. Line endings are normalized to CRLF.
    ///
    /// Return the UID of the appended message, if reported by the
    /// server.
    #[instrument(skip(self, content), fields(key = %self.key, size = content.as_ref().len()))]
    pub async fn append_message(
        &mut self,
        folder: &str,
        content: impl AsRef<[u8]>,
        flags: Option<&[Flag]>,
    ) -> Result<Option<u32>> {
        let content = normalize_crlf(content.as_ref());
        let flags = flags.map(<[Flag]>::to_vec).unwrap_or_else(|| vec![Flag::Draft]);

        let conn = self.connection().await?;

        let res = conn
            .append(folder, &content, &flags)
            .await
            .map_err(|err| Error::AppendFailedError(err, folder.to_owned()));

        if let Ok(uid) = &res {
            debug!(folder, ?uid, "message appended");
        }

        self.finish();
        res
    }
}

async fn store_flags(
    conn: &ConnectionHandle,
    folder: &str,
    uid: u32,
    flags: &[Flag],
    add: bool,
) -> Result<()> {
    select(conn, folder).await?;

    let res = if add {
        conn.add_flags(&[uid], flags).await
    } else {
        conn.remove_flags(&[uid], flags).await
    };

    res.map_err(|err| Error::StoreFlagsError(err, folder.to_owned(), uid))
}

async fn delete(conn: &ConnectionHandle, folder: &str, uid: u32) -> Result<()> {
    store_flags(conn, folder, uid, &[Flag::Deleted], true).await?;

    conn.expunge()
        .await
        .map_err(|err| Error::ExpungeFolderError(err, folder.to_owned()))
}

async fn move_message(
    conn: &ConnectionHandle,
    source: &str,
    target: &str,
    uid: u32,
    flags: &[Flag],
) -> Result<()> {
    select(conn, source).await?;

    let message_id = match conn.fetch(uid, FetchQuery::Headers).await {
        Ok(Some(fetched)) => Envelope::from_fetched(&fetched).message_id,
        Ok(None) => return Err(Error::MessageNotFoundError(source.to_owned(), uid)),
        Err(err) => {
            debug!(source, uid, "cannot fetch message id, skipping verification: {err}");
            None
        }
    };

    if !flags.is_empty() {
        conn.add_flags(&[uid], flags)
            .await
            .map_err(|err| Error::StoreFlagsError(err, source.to_owned(), uid))?;
    }

    let move_failed =
        |err: ConnectionError| Error::MoveFailedError(err, source.to_owned(), target.to_owned(), uid);

    if conn.has_capability(MOVE_CAPABILITY) {
        debug!(source, target, uid, "moving message");
        conn.move_messages(&[uid], target).await.map_err(move_failed)?;
    } else {
        debug!(source, target, uid, "server cannot move, copying then deleting message");
        conn.copy(&[uid], target).await.map_err(move_failed)?;
        conn.add_flags(&[uid], &[Flag::Deleted])
            .await
            .map_err(move_failed)?;
        conn.expunge().await.map_err(move_failed)?;
    }

    match message_id {
        Some(_) if source == target => {
            debug!(source, uid, "message moved into its own folder, skipping verification");
        }
        Some(message_id) => remove_leftover(conn, source, uid, &message_id).await,
        None => (),
    }

    Ok(())
}

/// Delete the original message if it is still present in the source
/// folder after a move.
///
/// Other messages sharing the same Message-ID are left untouched. This
/// is best effort: failures are logged, and a concurrent change of the
/// source folder can still win.
async fn remove_leftover(conn: &ConnectionHandle, folder: &str, uid: u32, message_id: &str) {
    if let Err(err) = try_remove_leftover(conn, folder, uid, message_id).await {
        warn!(folder, uid, message_id, "cannot verify message move: {err}");
    }
}

async fn try_remove_leftover(
    conn: &ConnectionHandle,
    folder: &str,
    uid: u32,
    message_id: &str,
) -> Result<()> {
    select(conn, folder).await?;

    let query = SearchQuery::header(MESSAGE_ID_HEADER, message_id);
    let uids = search_uids(conn, folder, &query).await?;

    if !uids.contains(&uid) {
        return Ok(());
    }

    warn!(folder, uid, message_id, "message still in source folder after move, deleting it");

    conn.add_flags(&[uid], &[Flag::Deleted])
        .await
        .map_err(|err| Error::StoreFlagsError(err, folder.to_owned(), uid))?;

    conn.expunge()
        .await
        .map_err(|err| Error::ExpungeFolderError(err, folder.to_owned()))
}

/// Normalize line endings to CRLF: lone LF and lone CR become CRLF.
pub fn normalize_crlf(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() + input.len() / 32);
    let mut bytes = input.iter().copied().peekable();

    while let Some(byte) = bytes.next() {
        match byte {
            b'\r' => {
                output.extend_from_slice(b"\r\n");
                bytes.next_if_eq(&b'\n');
            }
            b'\n' => output.extend_from_slice(b"\r\n"),
            byte => output.push(byte),
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::normalize_crlf;

    #[test]
    fn crlf() {
        assert_eq!(normalize_crlf(b"a\nb\r\nc\rd"), b"a\r\nb\r\nc\r\nd");
        assert_eq!(normalize_crlf(b"\n\n"), b"\r\n\r\n");
        assert_eq!(normalize_crlf(b"a\r\n\r\n"), b"a\r\n\r\n");
        assert_eq!(normalize_crlf(b""), b"");
    }
}
