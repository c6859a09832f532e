//! # Account
//!
//! Module dedicated to accounts: their configuration, and the
//! [`AccountStore`] they are loaded from.

pub mod config;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use self::config::AccountConfig;
use crate::Result;

/// The account storage.
///
/// Implementations usually sit on top of a database. Errors should be
/// wrapped into [`crate::Error::StorageError`].
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Find the account matching the given identifiers. Return `None`
    /// if the account does not exist or does not belong to the user.
    async fn find_account(&self, account_id: &str, user_id: &str)
        -> Result<Option<AccountConfig>>;

    /// Record the time of the last successful synchronization.
    async fn update_last_sync(&self, account_id: &str, user_id: &str, at: DateTime<Utc>)
        -> Result<()>;

    /// Persist refreshed OAuth 2.0 tokens. Tokens are given
    /// encrypted.
    async fn update_tokens(
        &self,
        account_id: &str,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
}
