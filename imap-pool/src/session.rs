//! # Mail session
//!
//! A [`MailSession`] keeps the connection of one [`MailClient`]
//! checked out across many consecutive operations, instead of one
//! checkout per operation, and records the duration of every
//! operation.
//!
//! Batch workflows (fetch hundreds of messages, mark them all as read)
//! pay the pool round trip once per session:
//!
//! ```rust,ignore
//! let mut session = MailSession::new(client);
//! session.initialize().await?;
//!
//! for uid in uids {
//!     session.mark_as_read("INBOX", uid).await?;
//! }
//!
//! let summary = session.close();
//! ```
//!
//! Calling [`MailSession::initialize`] up front is optional: the
//! first operation of a session checks out the connection itself, and
//! the time spent doing so counts in the metric of that operation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    client::{MailClient, WatchEvent},
    flag::Flag,
    folder::Folder,
    message::{Envelope, Message, RawMessage},
    search::{ListOptions, SearchCriteria},
    Error, Result,
};

/// Operations slower than this are logged as warnings.
pub const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_secs(1);

/// The timing of one session operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationMetric {
    pub name: &'static str,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
}

/// The aggregated metrics of a closed session.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionSummary {
    pub operations: usize,
    pub total: Duration,
    pub average: Duration,
    pub slowest: Option<OperationMetric>,
}

impl SessionSummary {
    fn from_metrics(metrics: &[OperationMetric]) -> Self {
        let total: Duration = metrics.iter().map(|m| m.duration).sum();
        let average = match u32::try_from(metrics.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => total / n,
        };

        Self {
            operations: metrics.len(),
            total,
            average,
            slowest: metrics.iter().max_by_key(|m| m.duration).cloned(),
        }
    }
}

/// The running timer of one operation.
struct OperationTimer {
    name: &'static str,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl OperationTimer {
    fn start(name: &'static str) -> Self {
        Self {
            name,
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    fn stop(self) -> OperationMetric {
        OperationMetric {
            name: self.name,
            started_at: self.started_at,
            ended_at: Utc::now(),
            duration: self.start.elapsed(),
        }
    }
}

/// The mail session.
pub struct MailSession {
    client: MailClient,
    initialized: bool,
    summary: Option<SessionSummary>,
    metrics: Vec<OperationMetric>,
}

impl MailSession {
    /// Wrap the given client. The client preserves its connection
    /// until the session is closed.
    pub fn new(mut client: MailClient) -> Self {
        client.set_preserve_connection(true);

        Self {
            client,
            initialized: false,
            summary: None,
            metrics: Vec::new(),
        }
    }

    pub fn client(&self) -> &MailClient {
        &self.client
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_closed(&self) -> bool {
        self.summary.is_some()
    }

    /// Check out the connection used by the whole session.
    ///
    /// Calling it more than once has no effect. Operations initialize
    /// the session themselves if needed.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosedError);
        }

        if self.initialized {
            return Ok(());
        }

        self.client.connect().await?;
        self.initialized = true;
        debug!(key = %self.client.key(), "mail session initialized");

        Ok(())
    }

    /// Return the metrics recorded so far.
    pub fn metrics(&self) -> &[OperationMetric] {
        &self.metrics
    }

    /// Release the connection and return the session summary.
    ///
    /// The connection is released once: closing again returns the
    /// same summary.
    pub fn close(&mut self) -> SessionSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }

        self.client.release();

        let summary = SessionSummary::from_metrics(&self.metrics);

        info!(
            key = %self.client.key(),
            operations = summary.operations,
            total = ?summary.total,
            average = ?summary.average,
            slowest = summary.slowest.as_ref().map(|m| m.name),
            "mail session closed",
        );

        self.summary = Some(summary.clone());
        summary
    }

    /// Start timing an operation, initializing the session first if
    /// needed. A failed initialization is recorded as part of the
    /// operation.
    async fn start(&mut self, name: &'static str) -> Result<OperationTimer> {
        if self.is_closed() {
            return Err(Error::SessionClosedError);
        }

        let timer = OperationTimer::start(name);

        if let Err(err) = self.initialize().await {
            self.record(timer);
            return Err(err);
        }

        Ok(timer)
    }

    fn record(&mut self, timer: OperationTimer) {
        let metric = timer.stop();

        if metric.duration > SLOW_OPERATION_THRESHOLD {
            warn!(
                key = %self.client.key(),
                operation = metric.name,
                duration = ?metric.duration,
                "slow mail session operation",
            );
        }

        self.metrics.push(metric);
    }

    pub async fn get_folders(&mut self) -> Result<Vec<Folder>> {
        let timer = self.start("get_folders").await?;
        let res = self.client.get_folders().await;
        self.record(timer);
        res
    }

    pub async fn get_folder_message_count(&mut self, folder: &str) -> Result<u32> {
        let timer = self.start("get_folder_message_count").await?;
        let res = self.client.get_folder_message_count(folder).await;
        self.record(timer);
        res
    }

    pub async fn get_messages(&mut self, folder: &str, opts: &ListOptions) -> Result<Vec<Envelope>> {
        let timer = self.start("get_messages").await?;
        let res = self.client.get_messages(folder, opts).await;
        self.record(timer);
        res
    }

    pub async fn search_messages(
        &mut self,
        folder: &str,
        criteria: &SearchCriteria,
        opts: &ListOptions,
    ) -> Result<Vec<Envelope>> {
        let timer = self.start("search_messages").await?;
        let res = self.client.search_messages(folder, criteria, opts).await;
        self.record(timer);
        res
    }

    pub async fn get_message(&mut self, folder: &str, uid: u32) -> Result<Message> {
        let timer = self.start("get_message").await?;
        let res = self.client.get_message(folder, uid).await;
        self.record(timer);
        res
    }

    pub async fn get_message_raw(&mut self, folder: &str, uid: u32) -> Result<RawMessage> {
        let timer = self.start("get_message_raw").await?;
        let res = self.client.get_message_raw(folder, uid).await;
        self.record(timer);
        res
    }

    pub async fn get_messages_raw(&mut self, folder: &str, uids: &[u32]) -> Result<Vec<RawMessage>> {
        let timer = self.start("get_messages_raw").await?;
        let res = self.client.get_messages_raw(folder, uids).await;
        self.record(timer);
        res
    }

    pub async fn find_message_by_message_id(
        &mut self,
        folder: &str,
        message_id: &str,
    ) -> Result<Option<Envelope>> {
        let timer = self.start("find_message_by_message_id").await?;
        let res = self.client.find_message_by_message_id(folder, message_id).await;
        self.record(timer);
        res
    }

    pub async fn mark_as_read(&mut self, folder: &str, uid: u32) -> Result<()> {
        let timer = self.start("mark_as_read").await?;
        let res = self.client.mark_as_read(folder, uid).await;
        self.record(timer);
        res
    }

    pub async fn mark_as_unread(&mut self, folder: &str, uid: u32) -> Result<()> {
        let timer = self.start("mark_as_unread").await?;
        let res = self.client.mark_as_unread(folder, uid).await;
        self.record(timer);
        res
    }

    pub async fn delete_message(&mut self, folder: &str, uid: u32) -> Result<()> {
        let timer = self.start("delete_message").await?;
        let res = self.client.delete_message(folder, uid).await;
        self.record(timer);
        res
    }

    pub async fn move_message(
        &mut self,
        source: &str,
        target: &str,
        uid: u32,
        flags: Option<&[Flag]>,
    ) -> Result<()> {
        let timer = self.start("move_message").await?;
        let res = self.client.move_message(source, target, uid, flags).await;
        self.record(timer);
        res
    }

    pub async fn append_message(
        &mut self,
        folder: &str,
        content: impl AsRef<[u8]>,
        flags: Option<&[Flag]>,
    ) -> Result<Option<u32>> {
        let timer = self.start("append_message").await?;
        let res = self.client.append_message(folder, content, flags).await;
        self.record(timer);
        res
    }

    pub async fn find_draft_folder(&mut self) -> Result<Folder> {
        let timer = self.start("find_draft_folder").await?;
        let res = self.client.find_draft_folder().await;
        self.record(timer);
        res
    }

    pub async fn create_folder(&mut self, path: &str) -> Result<()> {
        let timer = self.start("create_folder").await?;
        let res = self.client.create_folder(path).await;
        self.record(timer);
        res
    }

    pub async fn start_idle_monitoring<F>(&mut self, folder: &str, callback: F) -> Result<()>
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        let timer = self.start("start_idle_monitoring").await?;
        let res = self.client.start_idle_monitoring(folder, callback).await;
        self.record(timer);
        res
    }

    pub async fn stop_idle_monitoring(&mut self) -> Result<()> {
        let timer = self.start("stop_idle_monitoring").await?;
        let res = self.client.stop_idle_monitoring().await;
        self.record(timer);
        res
    }

    pub async fn test_connection(&mut self) -> Result<()> {
        let timer = self.start("test_connection").await?;
        let res = self.client.test_connection().await;
        self.record(timer);
        res
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::{OperationMetric, SessionSummary};

    fn metric(name: &'static str, ms: u64) -> OperationMetric {
        OperationMetric {
            name,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            duration: Duration::from_millis(ms),
        }
    }

    #[test]
    fn summary() {
        let summary = SessionSummary::from_metrics(&[
            metric("get_folders", 100),
            metric("get_messages", 400),
            metric("mark_as_read", 100),
        ]);

        assert_eq!(summary.operations, 3);
        assert_eq!(summary.total, Duration::from_millis(600));
        assert_eq!(summary.average, Duration::from_millis(200));
        assert_eq!(summary.slowest.unwrap().name, "get_messages");
    }

    #[test]
    fn empty_summary() {
        let summary = SessionSummary::from_metrics(&[]);
        assert_eq!(summary, SessionSummary::default());
    }
}
