//! In-memory account store.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imap_pool::{AccountConfig, AccountStore, Error, Result};

/// The in-memory account store.
///
/// Accounts are keyed by `(user_id, account_id)`.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<(String, String), AccountConfig>>,
    last_syncs: Mutex<HashMap<(String, String), DateTime<Utc>>>,
    token_updates: AtomicUsize,
    failing: bool,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a storage error.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn with_account(self, account: AccountConfig) -> Self {
        self.insert(account);
        self
    }

    pub fn insert(&self, account: AccountConfig) {
        let key = (account.user_id.clone(), account.id.clone());
        lock(&self.accounts).insert(key, account);
    }

    pub fn account(&self, user_id: &str, account_id: &str) -> Option<AccountConfig> {
        lock(&self.accounts)
            .get(&(user_id.to_owned(), account_id.to_owned()))
            .cloned()
    }

    pub fn last_sync(&self, user_id: &str, account_id: &str) -> Option<DateTime<Utc>> {
        lock(&self.last_syncs)
            .get(&(user_id.to_owned(), account_id.to_owned()))
            .copied()
    }

    /// Return how many times refreshed tokens have been persisted.
    pub fn token_updates(&self) -> usize {
        self.token_updates.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.failing {
            Err(Error::StorageError("account store is read-only".into()))
        } else {
            Ok(())
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_account(&self, account_id: &str, user_id: &str) -> Result<Option<AccountConfig>> {
        Ok(self.account(user_id, account_id))
    }

    async fn update_last_sync(&self, account_id: &str, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        lock(&self.last_syncs).insert((user_id.to_owned(), account_id.to_owned()), at);
        Ok(())
    }

    async fn update_tokens(
        &self,
        account_id: &str,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.token_updates.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let mut accounts = lock(&self.accounts);
        let oauth2 = accounts
            .get_mut(&(user_id.to_owned(), account_id.to_owned()))
            .and_then(|account| account.auth.oauth2.as_mut());

        if let Some(oauth2) = oauth2 {
            oauth2.access_token = Some(access_token.to_owned());
            oauth2.expires_at = Some(expires_at);

            if let Some(token) = refresh_token {
                oauth2.refresh_token = Some(token.to_owned());
            }
        }

        Ok(())
    }
}
