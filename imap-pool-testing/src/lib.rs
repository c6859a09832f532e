//! In-memory IMAP backend used to test `imap-pool-lib` without a
//! real mail server.
//!
//! The [`MailServer`] keeps mailboxes in memory and hands out
//! [`MemoryConnection`]s through its [`MemoryConnector`]. It can be
//! told to refuse connects, fail fetches or selects, and to misbehave
//! on `MOVE`, so that retry and verification paths can be exercised.

mod refresher;
mod server;
mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use imap_pool::{
    account::config::{AuthConfig, ImapConfig, OAuth2Config, OAuth2Provider},
    connection::{ConnectionAuth, ConnectionParams},
    credentials::{AesGcmCipher, SecretCipher},
    AccountConfig, ConnectionPool, CredentialResolver, MailClient, PoolConfig,
};

#[doc(inline)]
pub use self::{
    refresher::CountingRefresher,
    server::{MailServer, MemoryConnection, MemoryConnector},
    store::MemoryAccountStore,
};

/// The AES-256 key secrets of test accounts are encrypted with.
pub const TEST_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";

/// The plaintext password of test accounts.
pub const PASSWORD: &str = "password";

pub fn cipher() -> AesGcmCipher {
    match AesGcmCipher::new(&TEST_KEY) {
        Ok(cipher) => cipher,
        Err(err) => panic!("cannot build test cipher: {err}"),
    }
}

/// Encrypt the given secret with the test key.
pub fn encrypt(plaintext: &str) -> String {
    match cipher().encrypt(plaintext) {
        Ok(ciphertext) => ciphertext,
        Err(err) => panic!("cannot encrypt test secret: {err}"),
    }
}

/// Build a credential resolver using the test key and the given
/// refresher.
pub fn credentials(refresher: Arc<CountingRefresher>) -> CredentialResolver {
    CredentialResolver::new(Arc::new(cipher()), refresher)
}

fn account(user_id: &str, account_id: &str, auth: AuthConfig) -> AccountConfig {
    AccountConfig {
        id: account_id.to_owned(),
        user_id: user_id.to_owned(),
        email: Some(format!("{account_id}@localhost")),
        imap: ImapConfig {
            host: "localhost".into(),
            port: 993,
            secure: true,
            login: account_id.to_owned(),
        },
        auth,
    }
}

/// Build an account authenticating with [`PASSWORD`].
pub fn password_account(user_id: &str, account_id: &str) -> AccountConfig {
    account(
        user_id,
        account_id,
        AuthConfig {
            password: Some(encrypt(PASSWORD)),
            oauth2: None,
        },
    )
}

/// Build a Google account authenticating with OAuth 2.0.
///
/// The access token is `access-0` and expires at the given time.
pub fn oauth2_account(
    user_id: &str,
    account_id: &str,
    expires_at: Option<DateTime<Utc>>,
) -> AccountConfig {
    account(
        user_id,
        account_id,
        AuthConfig {
            password: None,
            oauth2: Some(OAuth2Config {
                provider: OAuth2Provider::Google,
                refresh_token: Some(encrypt("refresh-0")),
                access_token: Some(encrypt("access-0")),
                expires_at,
            }),
        },
    )
}

/// Build password connection parameters, for tests driving the pool
/// directly.
pub fn password_params() -> ConnectionParams {
    ConnectionParams {
        host: "localhost".into(),
        port: 993,
        secure: true,
        login: "alice".into(),
        auth: ConnectionAuth::Password(PASSWORD.into()),
    }
}

/// A mail server, a pool connected to it and the credentials clients
/// need.
pub struct TestEnv {
    pub server: MailServer,
    pub pool: ConnectionPool,
    pub refresher: Arc<CountingRefresher>,
    pub credentials: CredentialResolver,
}

impl TestEnv {
    pub fn new(server: MailServer) -> Self {
        Self::with_config(server, PoolConfig::default())
    }

    pub fn with_config(server: MailServer, config: PoolConfig) -> Self {
        let refresher = Arc::new(CountingRefresher::new());

        Self {
            pool: ConnectionPool::new(config, server.connector()),
            credentials: credentials(refresher.clone()),
            refresher,
            server,
        }
    }

    pub fn client(&self, account: AccountConfig) -> MailClient {
        MailClient::new(&self.pool, &self.credentials, account)
    }

    /// Build a client for a password account of the given identity.
    pub fn password_client(&self, user_id: &str, account_id: &str) -> MailClient {
        self.client(password_account(user_id, account_id))
    }
}
