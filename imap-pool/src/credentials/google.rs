//! Module dedicated to the Google OAuth 2.0 token refresher.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::{
    basic::BasicClient, reqwest, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl,
};
use tracing::debug;

use super::{TokenRefresher, TokenSet};
use crate::{account::config::OAuth2Provider, Error, Result};

/// The Google token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// The lifetime assumed when the token endpoint does not return one.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// The Google token refresher.
///
/// Exchanges refresh tokens using the OAuth 2.0 refresh token grant.
/// Any other provider fails with
/// [`Error::UnsupportedProviderError`].
#[derive(Clone, Debug)]
pub struct GoogleTokenRefresher {
    client_id: String,
    client_secret: Option<String>,
    token_url: String,
    http: reqwest::Client,
}

impl GoogleTokenRefresher {
    pub fn new(client_id: impl ToString, client_secret: Option<impl ToString>) -> Self {
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();

        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.map(|s| s.to_string()),
            token_url: GOOGLE_TOKEN_URL.to_owned(),
            http,
        }
    }

    /// Override the token endpoint.
    pub fn with_token_url(mut self, url: impl ToString) -> Self {
        self.token_url = url.to_string();
        self
    }
}

#[async_trait]
impl TokenRefresher for GoogleTokenRefresher {
    async fn refresh_tokens(
        &self,
        refresh_token: &str,
        provider: OAuth2Provider,
        account_id: &str,
    ) -> Result<TokenSet> {
        if provider != OAuth2Provider::Google {
            return Err(Error::UnsupportedProviderError(provider.to_string()));
        }

        let token_url = TokenUrl::new(self.token_url.clone())
            .map_err(|err| Error::AuthRefreshFailedError(Box::new(err), account_id.to_owned()))?;

        let mut client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_token_uri(token_url);

        if let Some(secret) = &self.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        debug!(account_id, "refreshing google access token");

        let res = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_owned()))
            .request_async(&self.http)
            .await
            .map_err(|err| Error::AuthRefreshFailedError(Box::new(err), account_id.to_owned()))?;

        let expires_in = res
            .expires_in()
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or_else(|| Duration::seconds(DEFAULT_EXPIRES_IN));

        Ok(TokenSet {
            access_token: res.access_token().secret().to_owned(),
            refresh_token: res.refresh_token().map(|t| t.secret().to_owned()),
            expires_at: Utc::now() + expires_in,
        })
    }
}
