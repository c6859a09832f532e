//! # Connection
//!
//! Module dedicated to the contract between the library and the IMAP
//! transport. A [`Connector`] establishes authenticated
//! [`Connection`]s from [`ConnectionParams`]. The wire protocol
//! itself (command encoding, response parsing) lives behind these
//! traits.
//!
//! Connections report unsolicited events (errors, server-initiated
//! close, new messages, expunges) to listeners registered with
//! [`Connection::subscribe`]. The pool relies on the
//! [`ConnectionEvent::Closed`] event to forget dead connections.

mod error;
mod types;

use std::{fmt, sync::Arc};

use async_trait::async_trait;

#[doc(inline)]
pub use self::{
    error::{ConnectionError, ConnectionResult},
    types::{FetchQuery, FetchedMessage, MailboxEntry, MailboxStatus, SearchKey, SearchQuery},
};
use crate::flag::Flag;

/// The capability advertised by servers supporting the atomic `MOVE`
/// command (RFC 6851).
pub const MOVE_CAPABILITY: &str = "MOVE";

/// The connection parameters.
///
/// Built by the client from an account configuration, with
/// credentials already decrypted.
#[derive(Clone, Eq, PartialEq)]
pub struct ConnectionParams {
    /// The IMAP server host name.
    pub host: String,

    /// The IMAP server host port.
    pub port: u16,

    /// Whether the connection should be wrapped into TLS.
    pub secure: bool,

    /// The IMAP login.
    pub login: String,

    /// The authentication material.
    pub auth: ConnectionAuth,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("login", &self.login)
            .field("auth", &self.auth)
            .finish()
    }
}

/// The authentication material of a connection.
#[derive(Clone, Eq, PartialEq)]
pub enum ConnectionAuth {
    /// Plain `LOGIN` using a decrypted password.
    Password(String),

    /// SASL `XOAUTH2` using an OAuth 2.0 access token.
    ///
    /// The bearer is the base64 encoded SASL initial response built
    /// from the login and the access token.
    XOAuth2 {
        access_token: String,
        bearer: String,
    },
}

impl fmt::Debug for ConnectionAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(***)"),
            Self::XOAuth2 { .. } => f.write_str("XOAuth2(***)"),
        }
    }
}

/// The connection event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectionEvent {
    /// An error occurred on the transport. The connection may still
    /// be usable.
    Error(String),

    /// The connection has been closed, either by the server or by a
    /// call to [`Connection::disconnect`].
    Closed,

    /// The server announced a new message count for the watched
    /// mailbox.
    Exists { folder: String, count: u32 },

    /// The server announced the removal of a message from the watched
    /// mailbox.
    Expunge { folder: String, seq: u32 },
}

/// The connection event listener.
pub type ConnectionListener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// The identifier of a listener registered on a connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionId(pub u64);

/// The connector.
///
/// Performs TCP connect, TLS handshake and authentication, and hands
/// back a ready-to-use connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> ConnectionResult<Arc<dyn Connection>>;
}

/// A single authenticated IMAP session.
///
/// Methods take `&self`: implementations serialize commands
/// internally, the pool guarantees that only one logical operation
/// uses a connection at a time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Connectivity probe. Return `false` once the transport is known
    /// to be closed.
    ///
    /// Called while the pool is locked: it must not block nor call
    /// listeners.
    fn is_usable(&self) -> bool;

    /// Return `true` if the server advertised the given capability.
    fn has_capability(&self, capability: &str) -> bool;

    /// Register an event listener.
    fn subscribe(&self, listener: ConnectionListener) -> SubscriptionId;

    /// Unregister a previously registered event listener.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Log out and close the transport.
    async fn disconnect(&self) -> ConnectionResult<()>;

    async fn noop(&self) -> ConnectionResult<()>;

    /// List all mailboxes, children nested under their parent.
    async fn list(&self) -> ConnectionResult<Vec<MailboxEntry>>;

    async fn create(&self, path: &str) -> ConnectionResult<()>;

    /// Select the given mailbox, making it the target of subsequent
    /// mailbox-scoped commands.
    async fn select(&self, path: &str) -> ConnectionResult<MailboxStatus>;

    /// Search UIDs of the selected mailbox.
    async fn search(&self, query: &SearchQuery) -> ConnectionResult<Vec<u32>>;

    /// Fetch one message of the selected mailbox by UID. Return
    /// `None` if no message has this UID.
    async fn fetch(&self, uid: u32, query: FetchQuery) -> ConnectionResult<Option<FetchedMessage>>;

    async fn add_flags(&self, uids: &[u32], flags: &[Flag]) -> ConnectionResult<()>;

    async fn remove_flags(&self, uids: &[u32], flags: &[Flag]) -> ConnectionResult<()>;

    /// Permanently remove messages flagged as deleted from the
    /// selected mailbox.
    async fn expunge(&self) -> ConnectionResult<()>;

    async fn copy(&self, uids: &[u32], dest: &str) -> ConnectionResult<()>;

    /// Atomic move. Only available when [`MOVE_CAPABILITY`] is
    /// advertised.
    async fn move_messages(&self, uids: &[u32], dest: &str) -> ConnectionResult<()>;

    /// Append a raw message. Return the UID of the appended message
    /// if the server reports it.
    async fn append(&self, path: &str, content: &[u8], flags: &[Flag])
        -> ConnectionResult<Option<u32>>;

    /// Enter watch mode on the selected mailbox. Notifications are
    /// delivered to listeners as [`ConnectionEvent::Exists`] and
    /// [`ConnectionEvent::Expunge`].
    async fn idle(&self) -> ConnectionResult<()>;

    /// Leave watch mode.
    async fn idle_done(&self) -> ConnectionResult<()>;
}
