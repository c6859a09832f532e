//! Folder watching operations of the [`MailClient`].
//!
//! While watching, the connection stays checked out: operations no
//! longer release it, and the caller must stop watching then call
//! [`MailClient::release`]. Dropping a client that is still watching
//! discards its connection from the pool.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::MailClient;
use crate::{
    connection::{ConnectionEvent, SubscriptionId},
    pool::ConnectionHandle,
    Error, Result,
};

/// The event reported to watch callbacks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WatchEvent {
    /// The folder now holds `count` messages.
    NewMessages { folder: String, count: u32 },

    /// The message at the given sequence number has been removed.
    Expunged { folder: String, seq: u32 },
}

pub(super) struct WatchState {
    pub(super) folder: String,
    pub(super) subscription: SubscriptionId,
    pub(super) connection: ConnectionHandle,
}

impl MailClient {
    /// Start watching the given folder. Notifications are reported to
    /// the given callback until [`MailClient::stop_idle_monitoring`]
    /// is called.
    ///
    /// Watching another folder first stops the current watch.
    #[instrument(skip(self, callback), fields(key = %self.key))]
    pub async fn start_idle_monitoring<F>(&mut self, folder: &str, callback: F) -> Result<()>
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        if self.watch.is_some() {
            self.stop_idle_monitoring().await?;
        }

        let conn = self.connection().await?;

        if let Err(err) = conn.select(folder).await {
            self.finish();
            return Err(Error::StartIdleError(err, folder.to_owned()));
        }

        let subscription = conn.subscribe(Arc::new(move |event: &ConnectionEvent| match event {
            ConnectionEvent::Exists { folder, count } => callback(WatchEvent::NewMessages {
                folder: folder.clone(),
                count: *count,
            }),
            ConnectionEvent::Expunge { folder, seq } => callback(WatchEvent::Expunged {
                folder: folder.clone(),
                seq: *seq,
            }),
            _ => (),
        }));

        if let Err(err) = conn.idle().await {
            conn.unsubscribe(subscription);
            self.finish();
            return Err(Error::StartIdleError(err, folder.to_owned()));
        }

        debug!(folder, "watching folder");

        self.watch = Some(WatchState {
            folder: folder.to_owned(),
            subscription,
            connection: conn,
        });

        Ok(())
    }

    /// Stop watching. The connection is not released.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn stop_idle_monitoring(&mut self) -> Result<()> {
        let Some(watch) = self.watch.take() else {
            return Ok(());
        };

        watch.connection.unsubscribe(watch.subscription);

        watch
            .connection
            .idle_done()
            .await
            .map_err(|err| Error::StopIdleError(err, watch.folder.clone()))?;

        debug!(folder = %watch.folder, "folder no longer watched");
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watch.is_some()
    }
}
