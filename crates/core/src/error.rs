//! Crate-wide error type.

use thiserror::Error;

/// Errors surfaced anywhere in the gateway.
///
/// Most of these are recoverable (see [`AgentError::is_fatal`]): a bad frame or a
/// rejected session action is reported back to the offending client, not the process.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("authentication timeout")]
    AuthTimeout,

    #[error("invalid authentication token")]
    InvalidToken,

    #[error("invalid token format")]
    InvalidTokenFormat,

    #[error("origin not allowed: {0}")]
    OriginRejected(String),

    #[error("access denied")]
    AccessDenied,

    #[error("unknown session: {0}")]
    UnknownSession(uuid::Uuid),

    #[error("service not registered: {0}")]
    ServiceNotRegistered(String),

    #[error("service already registered: {0}")]
    ServiceAlreadyRegistered(String),

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("no data directory available on this platform")]
    NoDataDir,

    #[error("secret store error: {0}")]
    SecretStore(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cannot bind listener: {0}")]
    BindFailed(std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Whether this error should terminate the process rather than just the
    /// connection or request that triggered it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::BindFailed(_) | AgentError::Certificate(_) | AgentError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
