use std::{error, fmt, result, time::Duration};

use thiserror::Error;

use crate::connection::ConnectionError;

/// The global any boxed `Error` alias of the library.
pub type AnyBoxedError = Box<dyn error::Error + Send + Sync + 'static>;

/// The global `Result` alias of the library.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the library.
///
/// Every variant maps to a stable [`ErrorCode`], so callers can
/// branch on the cause without matching on variants.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find account {1} of user {0}")]
    AccountNotFoundError(String, String),
    #[error("cannot access account storage")]
    StorageError(#[source] AnyBoxedError),

    #[error("cannot authenticate account {0}: neither password nor OAuth 2.0 tokens are defined")]
    AuthMissingError(String),
    #[error("cannot refresh OAuth 2.0 access token of account {0}: refresh token is missing")]
    AuthRefreshTokenMissingError(String),
    #[error("cannot refresh OAuth 2.0 access token of account {1}")]
    AuthRefreshFailedError(#[source] AnyBoxedError, String),
    #[error("cannot refresh OAuth 2.0 access token: unsupported provider {0}")]
    UnsupportedProviderError(String),
    #[error("cannot decrypt account credentials")]
    DecryptCredentialsError(#[source] AnyBoxedError),
    #[error("cannot encrypt account credentials")]
    EncryptCredentialsError(#[source] AnyBoxedError),

    #[error("cannot connect to IMAP server {1}:{2} after {3} attempt(s)")]
    ConnectionFailedError(#[source] ConnectionError, String, u16, u32),
    #[error("cannot get pooled connection for {0}: timed out after {1:?}")]
    PoolTimeoutError(String, Duration),

    #[error("cannot list IMAP mailboxes")]
    ListFoldersError(#[source] ConnectionError),
    #[error("cannot create IMAP mailbox {1}")]
    CreateFolderError(#[source] ConnectionError, String),
    #[error("cannot select IMAP mailbox {1}")]
    SelectFolderError(#[source] ConnectionError, String),
    #[error("cannot search messages in IMAP mailbox {1}")]
    SearchMessagesError(#[source] ConnectionError, String),
    #[error("cannot fetch message {2} from IMAP mailbox {1}")]
    FetchMessageError(#[source] ConnectionError, String, u32),
    #[error("cannot update flags of message {2} in IMAP mailbox {1}")]
    StoreFlagsError(#[source] ConnectionError, String, u32),
    #[error("cannot expunge IMAP mailbox {1}")]
    ExpungeFolderError(#[source] ConnectionError, String),
    #[error("cannot check IMAP connection")]
    NoopError(#[source] ConnectionError),
    #[error("cannot start watching IMAP mailbox {1}")]
    StartIdleError(#[source] ConnectionError, String),
    #[error("cannot stop watching IMAP mailbox {1}")]
    StopIdleError(#[source] ConnectionError, String),

    #[error("cannot find message {1} in IMAP mailbox {0}")]
    MessageNotFoundError(String, u32),
    #[error("cannot find body of message {1} in IMAP mailbox {0}")]
    BodyNotFoundError(String, u32),
    #[error("cannot parse body of message {1} in IMAP mailbox {0}")]
    InvalidBodyTypeError(String, u32),
    #[error("cannot find drafts folder")]
    DraftFolderNotFoundError,
    #[error("cannot append message to IMAP mailbox {1}")]
    AppendFailedError(#[source] ConnectionError, String),
    #[error("cannot move message {3} from IMAP mailbox {1} to {2}")]
    MoveFailedError(#[source] ConnectionError, String, String, u32),

    #[error("cannot use mail session: session already closed")]
    SessionClosedError,
}

impl Error {
    /// Return the stable code of the current error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AccountNotFoundError(..) => ErrorCode::AccountNotFound,
            Self::StorageError(_) => ErrorCode::StorageError,
            Self::AuthMissingError(_) => ErrorCode::AuthMissing,
            Self::AuthRefreshTokenMissingError(_) => ErrorCode::AuthRefreshTokenMissing,
            Self::AuthRefreshFailedError(..) => ErrorCode::AuthRefreshFailed,
            Self::UnsupportedProviderError(_) => ErrorCode::UnsupportedProvider,
            Self::DecryptCredentialsError(_) | Self::EncryptCredentialsError(_) => {
                ErrorCode::CredentialsError
            }
            Self::ConnectionFailedError(..) => ErrorCode::ConnectionFailed,
            Self::PoolTimeoutError(..) => ErrorCode::PoolTimeout,
            Self::MessageNotFoundError(..) => ErrorCode::MessageNotFound,
            Self::BodyNotFoundError(..) => ErrorCode::BodyNotFound,
            Self::InvalidBodyTypeError(..) => ErrorCode::InvalidBodyType,
            Self::DraftFolderNotFoundError => ErrorCode::DraftFolderNotFound,
            Self::AppendFailedError(..) => ErrorCode::AppendFailed,
            Self::MoveFailedError(..) => ErrorCode::MoveFailed,
            Self::SessionClosedError => ErrorCode::SessionClosed,
            Self::ListFoldersError(_)
            | Self::CreateFolderError(..)
            | Self::SelectFolderError(..)
            | Self::SearchMessagesError(..)
            | Self::FetchMessageError(..)
            | Self::StoreFlagsError(..)
            | Self::ExpungeFolderError(..)
            | Self::NoopError(_)
            | Self::StartIdleError(..)
            | Self::StopIdleError(..) => ErrorCode::ProtocolError,
        }
    }

    /// Return `true` if the user needs to authenticate again.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::AuthMissing
                | ErrorCode::AuthRefreshTokenMissing
                | ErrorCode::AuthRefreshFailed
                | ErrorCode::UnsupportedProvider
        )
    }

    /// Return `true` if the mail server could not be reached in time.
    ///
    /// The mail state is unaffected: the caller should report the
    /// account as temporarily offline.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ConnectionFailed | ErrorCode::PoolTimeout
        )
    }
}

/// The stable error codes exposed at the library boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    AccountNotFound,
    AuthMissing,
    AuthRefreshTokenMissing,
    AuthRefreshFailed,
    ConnectionFailed,
    PoolTimeout,
    MessageNotFound,
    BodyNotFound,
    InvalidBodyType,
    DraftFolderNotFound,
    AppendFailed,
    MoveFailed,
    ProtocolError,
    CredentialsError,
    UnsupportedProvider,
    StorageError,
    SessionClosed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::AuthMissing => "AUTH_MISSING",
            Self::AuthRefreshTokenMissing => "AUTH_REFRESH_TOKEN_MISSING",
            Self::AuthRefreshFailed => "AUTH_REFRESH_FAILED",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::PoolTimeout => "POOL_TIMEOUT",
            Self::MessageNotFound => "MESSAGE_NOT_FOUND",
            Self::BodyNotFound => "BODY_NOT_FOUND",
            Self::InvalidBodyType => "INVALID_BODY_TYPE",
            Self::DraftFolderNotFound => "DRAFT_FOLDER_NOT_FOUND",
            Self::AppendFailed => "APPEND_FAILED",
            Self::MoveFailed => "MOVE_FAILED",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::CredentialsError => "CREDENTIALS_ERROR",
            Self::UnsupportedProvider => "UNSUPPORTED_PROVIDER",
            Self::StorageError => "STORAGE_ERROR",
            Self::SessionClosed => "SESSION_CLOSED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Error, ErrorCode};
    use crate::connection::ConnectionError;

    #[test]
    fn boundary_codes() {
        let err = Error::PoolTimeoutError("u/a".into(), Duration::from_millis(200));
        assert_eq!(err.code(), ErrorCode::PoolTimeout);
        assert_eq!(err.code().to_string(), "POOL_TIMEOUT");
        assert!(err.is_unavailable());
        assert!(!err.is_auth_error());

        let err = Error::AuthRefreshTokenMissingError("a".into());
        assert_eq!(err.code().as_str(), "AUTH_REFRESH_TOKEN_MISSING");
        assert!(err.is_auth_error());

        let err = Error::MoveFailedError(ConnectionError::Closed, "INBOX".into(), "Trash".into(), 1);
        assert_eq!(err.code().as_str(), "MOVE_FAILED");

        let err = Error::SelectFolderError(ConnectionError::Closed, "INBOX".into());
        assert_eq!(err.code(), ErrorCode::ProtocolError);
    }
}
