//! Module dedicated to account configuration.
//!
//! This module contains the representation of a stored mail account
//! named [`AccountConfig`]. Secrets (password, tokens) are kept
//! encrypted and are only decrypted when connection parameters are
//! built.

use std::fmt;

use chrono::{DateTime, Utc};

/// The account configuration.
///
/// A snapshot of how to authenticate against the IMAP server of one
/// account. The OAuth 2.0 access token and expiry are updated in
/// place when a refresh occurs, so that a later connection attempt
/// made with the same snapshot does not refresh twice.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct AccountConfig {
    /// The account identifier.
    pub id: String,

    /// The identifier of the user owning the account.
    pub user_id: String,

    /// The email address of the account, if different from the
    /// IMAP login.
    pub email: Option<String>,

    /// The IMAP server configuration.
    pub imap: ImapConfig,

    /// The authentication configuration.
    pub auth: AuthConfig,
}

impl AccountConfig {
    /// Return the identity used for SASL `XOAUTH2`: the email address
    /// if defined, the IMAP login otherwise.
    pub fn identity(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.imap.login)
    }
}

/// The IMAP server configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct ImapConfig {
    /// The IMAP server host name.
    pub host: String,

    /// The IMAP server host port.
    pub port: u16,

    /// Whether the connection should be wrapped into TLS.
    pub secure: bool,

    /// The IMAP server login.
    ///
    /// Usually, the login is either the email address or its left
    /// part (before @).
    pub login: String,
}

/// The authentication configuration.
///
/// OAuth 2.0 is preferred over the password when both are defined.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct AuthConfig {
    /// The encrypted password.
    pub password: Option<String>,

    /// The OAuth 2.0 material.
    pub oauth2: Option<OAuth2Config>,
}

impl AuthConfig {
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.oauth2.is_none()
    }
}

/// The OAuth 2.0 material of an account.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct OAuth2Config {
    pub provider: OAuth2Provider,

    /// The encrypted refresh token.
    pub refresh_token: Option<String>,

    /// The encrypted access token.
    pub access_token: Option<String>,

    /// When the access token expires. An unknown expiry is treated as
    /// already expired.
    pub expires_at: Option<DateTime<Utc>>,
}

/// The OAuth 2.0 provider an account authenticates against.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum OAuth2Provider {
    Google,
    Microsoft,
    Yahoo,
    Fastmail,
}

impl OAuth2Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Yahoo => "yahoo",
            Self::Fastmail => "fastmail",
        }
    }
}

impl fmt::Display for OAuth2Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
