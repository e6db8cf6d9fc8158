use thiserror::Error;

/// Missing or unusable configuration. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("secret store backend '{0}' is not implemented")]
    UnsupportedBackend(String),
}

impl ConfigError {
    pub fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Failure reading or writing the secret store. Callers treat it as "no token".
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt secret record: {0}")]
    Corrupt(String),

    #[error("secret store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of one of the OAuth exchanges or of the interactive code capture.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("invalid authorization code: {0}")]
    InvalidCode(String),

    #[error("authorization state does not match the request")]
    InvalidState,

    #[error("access denied by user: {0}")]
    AccessDenied(String),

    #[error("timed out waiting for the authorization code")]
    Timeout,

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("console input error: {0}")]
    Input(#[from] std::io::Error),
}

impl AuthError {
    /// HTTP status of the failed exchange, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Why an access token was rejected by the validation query.
#[derive(Error, Debug)]
pub enum ValidationFailure {
    #[error("no access token to validate")]
    NoAccessToken,

    #[error("validation query returned HTTP {status}")]
    Status { status: u16 },

    #[error("validation query returned totalSize {0}, expected 1")]
    UnexpectedResult(i64),

    #[error("validation response could not be read: {0}")]
    Body(String),

    #[error("validation request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// Terminal result of controller initialization.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("authorization failed after {attempts} attempt(s): {source}")]
    AuthorizationFailed {
        attempts: u8,
        #[source]
        source: AuthError,
    },

    #[error("authorization failed and retry was declined: {source}")]
    RetryDeclined {
        #[source]
        source: AuthError,
    },
}

pub type AuthResult<T> = Result<T, AuthError>;
pub type StoreResult<T> = Result<T, StoreError>;
