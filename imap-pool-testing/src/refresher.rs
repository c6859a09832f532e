//! Token refresher counting its calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use imap_pool::{
    account::config::OAuth2Provider,
    credentials::{TokenRefresher, TokenSet},
    Error, Result,
};
use tracing::debug;

/// A token refresher issuing `access-{n}` tokens valid for one hour,
/// `n` being the number of calls so far.
#[derive(Debug, Default)]
pub struct CountingRefresher {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every refresh fail, as a revoked refresh token would.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh_tokens(
        &self,
        refresh_token: &str,
        provider: OAuth2Provider,
        account_id: &str,
    ) -> Result<TokenSet> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(%provider, account_id, n, "refreshing tokens");

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::AuthRefreshFailedError(
                format!("refresh token {refresh_token} revoked").into(),
                account_id.to_owned(),
            ));
        }

        Ok(TokenSet {
            access_token: format!("access-{n}"),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
        })
    }
}
