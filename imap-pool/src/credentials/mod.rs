//! # Credentials
//!
//! Module dedicated to credentials: decryption of stored secrets,
//! OAuth 2.0 access token refresh and SASL `XOAUTH2` bearer
//! generation. The [`CredentialResolver`] bundles a [`SecretCipher`]
//! and a [`TokenRefresher`] and is shared by every client.

pub mod cipher;
#[cfg(feature = "oauth2")]
pub mod google;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};

#[doc(inline)]
pub use self::cipher::AesGcmCipher;
#[cfg(feature = "oauth2")]
#[doc(inline)]
pub use self::google::GoogleTokenRefresher;
use crate::{account::config::OAuth2Provider, Result};

/// How long before its expiry an access token gets refreshed.
pub const REFRESH_LEAD_SECS: i64 = 5 * 60;

/// The secret cipher, used to decrypt stored passwords and tokens
/// and to encrypt refreshed tokens.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// The OAuth 2.0 token refresher.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange the given refresh token for a new access token.
    ///
    /// Providers that are not supported must fail with
    /// [`crate::Error::UnsupportedProviderError`].
    async fn refresh_tokens(
        &self,
        refresh_token: &str,
        provider: OAuth2Provider,
        account_id: &str,
    ) -> Result<TokenSet>;
}

/// The plaintext result of a token refresh.
#[derive(Clone, Eq, PartialEq)]
pub struct TokenSet {
    pub access_token: String,

    /// The new refresh token, if the provider rotated it.
    pub refresh_token: Option<String>,

    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Return `true` if an access token expiring at the given time should
/// be refreshed now.
///
/// A token is refreshed when it expires in less than
/// [`REFRESH_LEAD_SECS`], or when its expiry is unknown.
pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        None => true,
        Some(expires_at) => (expires_at - now).num_seconds() < REFRESH_LEAD_SECS,
    }
}

/// Build the SASL `XOAUTH2` initial response for the given identity.
pub fn xoauth2_bearer(user: &str, access_token: &str) -> String {
    let auth = format!("user={user}\x01auth=Bearer {access_token}\x01\x01");
    BASE64.encode(auth)
}

/// The credential resolver.
#[derive(Clone)]
pub struct CredentialResolver {
    cipher: Arc<dyn SecretCipher>,
    refresher: Arc<dyn TokenRefresher>,
}

impl CredentialResolver {
    pub fn new(cipher: Arc<dyn SecretCipher>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { cipher, refresher }
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        self.cipher.decrypt(ciphertext)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        self.cipher.encrypt(plaintext)
    }

    pub fn needs_refresh(&self, expires_at: Option<DateTime<Utc>>) -> bool {
        needs_refresh(expires_at, Utc::now())
    }

    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
        provider: OAuth2Provider,
        account_id: &str,
    ) -> Result<TokenSet> {
        self.refresher
            .refresh_tokens(refresh_token, provider, account_id)
            .await
    }

    pub fn generate_bearer_token(&self, user: &str, access_token: &str) -> String {
        xoauth2_bearer(user, access_token)
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{needs_refresh, xoauth2_bearer};

    #[test]
    fn refresh_lead_window() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        assert!(needs_refresh(None, now));
        assert!(needs_refresh(Some(now - Duration::minutes(1)), now));
        assert!(needs_refresh(Some(now + Duration::minutes(4)), now));
        assert!(!needs_refresh(Some(now + Duration::minutes(5)), now));
        assert!(!needs_refresh(Some(now + Duration::hours(1)), now));
    }

    #[test]
    fn bearer() {
        // base64("user=a@b.c\x01auth=Bearer tok\x01\x01")
        assert_eq!(
            xoauth2_bearer("a@b.c", "tok"),
            "dXNlcj1hQGIuYwFhdXRoPUJlYXJlciB0b2sBAQ=="
        );
    }
}
