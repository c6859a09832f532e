//! # Mail client
//!
//! The [`MailClient`] translates mail operations into protocol calls
//! against one connection borrowed from the
//! [`ConnectionPool`](crate::pool::ConnectionPool).
//!
//! Every operation follows the same shape: acquire a connection,
//! select the target folder if needed, perform the protocol calls,
//! map the result into a domain record, then release the connection
//! unless the client preserves it or a
//! [`ConnectionContext`](crate::context::ConnectionContext) owns it.
//!
//! Operations live in their own modules: [`folders`], [`messages`],
//! [`mutations`] and [`watch`].

pub mod folders;
pub mod messages;
pub mod mutations;
pub mod watch;

use std::{fmt, sync::Arc};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

#[doc(inline)]
pub use self::watch::WatchEvent;
use self::watch::WatchState;
use crate::{
    account::{
        config::{AccountConfig, OAuth2Config},
        AccountStore,
    },
    connection::{ConnectionAuth, ConnectionParams},
    context::ConnectionContext,
    credentials::CredentialResolver,
    pool::{ConnectionHandle, ConnectionPool, IdentityKey},
    Error, Result,
};

/// The mail client of one account.
///
/// A client holds at most one checked-out connection, lazily
/// obtained on first use.
pub struct MailClient {
    key: IdentityKey,
    account: AccountConfig,
    pool: ConnectionPool,
    credentials: CredentialResolver,
    store: Option<Arc<dyn AccountStore>>,

    /// The context passed explicitly, if any. The ambient context of
    /// the current task is looked up on every acquisition.
    context: Option<ConnectionContext>,

    /// The connection checked out by this client, when not owned by
    /// a context.
    connection: Option<ConnectionHandle>,

    /// When `true`, operations keep the connection checked out.
    preserve_connection: bool,

    watch: Option<WatchState>,
}

impl MailClient {
    pub fn new(pool: &ConnectionPool, credentials: &CredentialResolver, account: AccountConfig) -> Self {
        Self {
            key: IdentityKey::new(&account.user_id, &account.id),
            account,
            pool: pool.clone(),
            credentials: credentials.clone(),
            store: None,
            context: None,
            connection: None,
            preserve_connection: false,
            watch: None,
        }
    }

    /// Load the account from the given store, then build a client
    /// for it.
    pub async fn load(
        pool: &ConnectionPool,
        credentials: &CredentialResolver,
        store: Arc<dyn AccountStore>,
        user_id: &str,
        account_id: &str,
    ) -> Result<Self> {
        let account = store
            .find_account(account_id, user_id)
            .await?
            .ok_or_else(|| Error::AccountNotFoundError(user_id.to_owned(), account_id.to_owned()))?;

        Ok(Self::new(pool, credentials, account).with_store(store))
    }

    pub fn with_store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a context explicitly. A context of another identity is
    /// ignored.
    pub fn with_context(mut self, context: &ConnectionContext) -> Self {
        self.context = Some(context.clone());
        self
    }

    pub fn with_preserve_connection(mut self, preserve: bool) -> Self {
        self.preserve_connection = preserve;
        self
    }

    pub fn set_preserve_connection(&mut self, preserve: bool) {
        self.preserve_connection = preserve;
    }

    pub fn preserves_connection(&self) -> bool {
        self.preserve_connection
    }

    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// Return the account configuration, including tokens refreshed
    /// by this client.
    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    /// Return `true` if this client currently holds a connection of
    /// its own, not one owned by a context.
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Acquire a connection without running any operation.
    ///
    /// The connection stays checked out until [`MailClient::release`]
    /// is called.
    pub async fn connect(&mut self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    /// Give the connection back to the pool.
    ///
    /// Does nothing while a context of the same identity is active:
    /// the context releases its connection when torn down.
    pub fn release(&mut self) {
        if self.active_context().is_some() {
            debug!(key = %self.key, "connection owned by active context, deferring release");
            return;
        }

        if let Some(handle) = self.connection.take() {
            self.pool.release_connection(&handle);
        }
    }

    /// Check that the server answers.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn test_connection(&mut self) -> Result<()> {
        let conn = self.connection().await?;
        let res = conn.noop().await.map_err(Error::NoopError);
        self.finish();
        res
    }

    /// Record a successful synchronization of the account.
    ///
    /// Does nothing if the client has no account store.
    pub async fn update_last_sync(&self) -> Result<()> {
        let Some(store) = &self.store else {
            debug!(key = %self.key, "no account store, skipping last sync update");
            return Ok(());
        };

        store
            .update_last_sync(&self.key.account_id, &self.key.user_id, Utc::now())
            .await
    }

    /// Return the context this client should share its connection
    /// with, if any.
    fn active_context(&self) -> Option<ConnectionContext> {
        self.context
            .clone()
            .filter(|ctx| ctx.key() == &self.key)
            .or_else(|| ConnectionContext::current_for(&self.key))
            .filter(ConnectionContext::is_active)
    }

    /// Acquire the connection operations run against.
    async fn connection(&mut self) -> Result<ConnectionHandle> {
        let context = self.active_context();

        if let Some(handle) = context.as_ref().and_then(ConnectionContext::connection) {
            debug!(key = %self.key, id = handle.id(), "reusing connection of active context");
            return Ok(handle);
        }

        let handle = match self.connection.take() {
            Some(handle) if handle.is_usable() => handle,
            stale => {
                if let Some(stale) = stale {
                    self.pool.release_connection(&stale);
                }

                let params = self.connection_params().await?;
                self.pool.get_connection(&params, &self.key).await?
            }
        };

        if let Some(shared) = context.and_then(|ctx| ctx.register(handle.clone())) {
            return Ok(shared);
        }

        self.connection = Some(handle.clone());
        Ok(handle)
    }

    /// End an operation: release the connection unless it should be
    /// preserved.
    fn finish(&mut self) {
        if self.preserve_connection || self.watch.is_some() {
            return;
        }

        self.release();
    }

    /// Build the connection parameters, OAuth 2.0 first, password
    /// otherwise.
    async fn connection_params(&mut self) -> Result<ConnectionParams> {
        let auth = if let Some(oauth2) = self.account.auth.oauth2.clone() {
            self.oauth2_auth(&oauth2).await?
        } else if let Some(password) = &self.account.auth.password {
            debug!(key = %self.key, "using password authentication");
            ConnectionAuth::Password(self.credentials.decrypt(password)?)
        } else {
            return Err(Error::AuthMissingError(self.account.id.clone()));
        };

        Ok(ConnectionParams {
            host: self.account.imap.host.clone(),
            port: self.account.imap.port,
            secure: self.account.imap.secure,
            login: self.account.imap.login.clone(),
            auth,
        })
    }

    async fn oauth2_auth(&mut self, oauth2: &OAuth2Config) -> Result<ConnectionAuth> {
        debug!(key = %self.key, "using oauth 2.0 authentication");

        let access_token = if self.credentials.needs_refresh(oauth2.expires_at) {
            self.refresh_access_token(oauth2).await?
        } else {
            match oauth2.access_token.as_deref() {
                Some(token) => self.credentials.decrypt(token)?,
                None => return Err(Error::AuthMissingError(self.account.id.clone())),
            }
        };

        let bearer = self
            .credentials
            .generate_bearer_token(self.account.identity(), &access_token);

        Ok(ConnectionAuth::XOAuth2 {
            access_token,
            bearer,
        })
    }

    /// Refresh the access token, update the in-memory account, then
    /// persist the new tokens if the client has a store.
    async fn refresh_access_token(&mut self, oauth2: &OAuth2Config) -> Result<String> {
        let account_id = self.account.id.clone();

        let refresh_token = match oauth2.refresh_token.as_deref() {
            Some(token) => self.credentials.decrypt(token)?,
            None => return Err(Error::AuthRefreshTokenMissingError(account_id)),
        };

        info!(key = %self.key, provider = %oauth2.provider, "refreshing oauth 2.0 access token");

        let tokens = self
            .credentials
            .refresh_tokens(&refresh_token, oauth2.provider, &account_id)
            .await?;

        let access_token = self.credentials.encrypt(&tokens.access_token)?;
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .map(|token| self.credentials.encrypt(token))
            .transpose()?;

        if let Some(config) = self.account.auth.oauth2.as_mut() {
            config.access_token = Some(access_token.clone());
            config.expires_at = Some(tokens.expires_at);

            if let Some(token) = &refresh_token {
                config.refresh_token = Some(token.clone());
            }
        }

        if let Some(store) = &self.store {
            let res = store
                .update_tokens(
                    &account_id,
                    &self.key.user_id,
                    &access_token,
                    refresh_token.as_deref(),
                    tokens.expires_at,
                )
                .await;

            if let Err(err) = res {
                warn!(key = %self.key, "cannot persist refreshed oauth 2.0 tokens: {err}");
            }
        }

        Ok(tokens.access_token)
    }
}

impl Drop for MailClient {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.take() {
            warn!(key = %self.key, folder = %watch.folder, "mail client dropped while watching, discarding connection");
            watch.connection.unsubscribe(watch.subscription);

            if let Some(ctx) = self.active_context() {
                ctx.forget(&watch.connection);
            }

            self.pool.discard_connection(&watch.connection);
            self.connection = None;
            return;
        }

        if let Some(handle) = self.connection.take() {
            self.pool.release_connection(&handle);
        }
    }
}

impl fmt::Debug for MailClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailClient")
            .field("key", &self.key)
            .field("connection", &self.connection)
            .field("preserve_connection", &self.preserve_connection)
            .finish_non_exhaustive()
    }
}
