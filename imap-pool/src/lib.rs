//! Rust library to share authenticated IMAP sessions between many
//! users and accounts.
//!
//! Establishing an IMAP session is expensive: TCP handshake, TLS,
//! authentication, folder selection. This library keeps those
//! sessions alive and multiplexes them over identities, an identity
//! being the pair `(user_id, account_id)`.
//!
//! The main pieces are:
//!
//! - [`ConnectionPool`](crate::pool::ConnectionPool): owns a bounded
//!   set of [`Connection`](crate::connection::Connection)s per
//!   identity, retries connects with backoff and reaps idle
//!   connections.
//!
//! - [`MailClient`](crate::client::MailClient): translates mail
//!   operations (list folders, fetch, move, append, watch…) into
//!   protocol calls against one borrowed connection.
//!
//! - [`MailSession`](crate::session::MailSession): keeps the
//!   connection of one client checked out across many calls and
//!   records per-call timings.
//!
//! - [`ConnectionContext`](crate::context::ConnectionContext): lets
//!   independently constructed clients of the same identity share one
//!   checked-out connection for the duration of a workflow.
//!
//! The wire protocol itself is not implemented here: it is plugged in
//! through the [`Connector`](crate::connection::Connector) and
//! [`Connection`](crate::connection::Connection) traits.

pub mod account;
pub mod client;
pub mod connection;
pub mod context;
pub mod credentials;
mod error;
pub mod flag;
pub mod folder;
pub mod message;
pub mod pool;
pub mod search;
pub mod session;

#[doc(inline)]
pub use self::{
    account::{config::AccountConfig, AccountStore},
    client::MailClient,
    connection::{Connection, Connector},
    context::{with_connection_context, ConnectionContext},
    credentials::CredentialResolver,
    error::{AnyBoxedError, Error, ErrorCode, Result},
    pool::{config::PoolConfig, ConnectionPool, IdentityKey},
    session::MailSession,
};
