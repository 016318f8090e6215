use miette::Diagnostic;
use thiserror::Error;

use crate::secrets;

#[derive(Debug, Error, Diagnostic)]
pub enum GatehouseError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(gatehouse::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(gatehouse::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(gatehouse::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(gatehouse::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("JOSE error: {0}")]
    #[diagnostic(code(gatehouse::jose))]
    Jose(String),

    #[error(transparent)]
    #[diagnostic(code(gatehouse::protocol))]
    Protocol(#[from] ProtocolError),

    #[error("Bad request: {0}")]
    #[diagnostic(code(gatehouse::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(gatehouse::other))]
    Other(String),
}

impl From<josekit::JoseError> for GatehouseError {
    fn from(value: josekit::JoseError) -> Self {
        GatehouseError::Jose(value.to_string())
    }
}

impl GatehouseError {
    pub fn protocol(kind: ProtocolErrorKind) -> Self {
        GatehouseError::Protocol(ProtocolError::new(kind))
    }

    pub fn protocol_retry_after(kind: ProtocolErrorKind, retry_after_ms: i64) -> Self {
        GatehouseError::Protocol(ProtocolError::new(kind).with_retry_after(retry_after_ms))
    }
}

/// Protocol-level failure taxonomy. Every value carries a stable machine code
/// and an opaque trace id; messages never contain internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolErrorKind {
    InvalidRequest,
    UnauthorizedClient,
    InvalidGrant,
    PkceFailure,
    RateLimited,
    AccountLocked,
    AccountPaused,
    UpstreamProvider,
    ServerError,
}

impl ProtocolErrorKind {
    /// OAuth `error` field value.
    pub fn oauth_error(self) -> &'static str {
        match self {
            ProtocolErrorKind::InvalidRequest => "invalid_request",
            ProtocolErrorKind::UnauthorizedClient => "unauthorized_client",
            ProtocolErrorKind::InvalidGrant => "invalid_grant",
            ProtocolErrorKind::PkceFailure => "invalid_grant",
            ProtocolErrorKind::RateLimited => "rate_limited",
            ProtocolErrorKind::AccountLocked => "access_denied",
            ProtocolErrorKind::AccountPaused => "access_denied",
            ProtocolErrorKind::UpstreamProvider => "temporarily_unavailable",
            ProtocolErrorKind::ServerError => "server_error",
        }
    }

    /// Stable machine-readable code, finer-grained than the OAuth error field.
    pub fn code(self) -> &'static str {
        match self {
            ProtocolErrorKind::InvalidRequest => "invalid_request",
            ProtocolErrorKind::UnauthorizedClient => "unauthorized_client",
            ProtocolErrorKind::InvalidGrant => "invalid_grant",
            ProtocolErrorKind::PkceFailure => "pkce_failure",
            ProtocolErrorKind::RateLimited => "rate_limited",
            ProtocolErrorKind::AccountLocked => "account_locked",
            ProtocolErrorKind::AccountPaused => "account_paused",
            ProtocolErrorKind::UpstreamProvider => "upstream_provider_error",
            ProtocolErrorKind::ServerError => "server_error",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ProtocolErrorKind::InvalidRequest => "The request is missing a required parameter or is otherwise malformed",
            ProtocolErrorKind::UnauthorizedClient => "The client is unknown, disabled, or not authorized for this tenant",
            ProtocolErrorKind::InvalidGrant => "The grant is invalid, expired, or already used",
            ProtocolErrorKind::PkceFailure => "PKCE verification failed",
            ProtocolErrorKind::RateLimited => "The tenant rate limit has been exceeded",
            ProtocolErrorKind::AccountLocked => "The account is locked",
            ProtocolErrorKind::AccountPaused => "Login is temporarily paused for this account",
            ProtocolErrorKind::UpstreamProvider => "The federated identity provider did not complete the request",
            ProtocolErrorKind::ServerError => "An internal error occurred",
        }
    }
}

#[derive(Debug, Clone, Error, Diagnostic)]
#[error("{} [trace {trace_id}]", .kind.code())]
#[diagnostic(code(gatehouse::protocol))]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub trace_id: String,
    /// Epoch ms after which the caller may retry (paused accounts, rate limits).
    pub retry_after_ms: Option<i64>,
}

impl ProtocolError {
    pub fn new(kind: ProtocolErrorKind) -> Self {
        Self {
            kind,
            trace_id: secrets::random_id(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after_ms: i64) -> Self {
        self.retry_after_ms = Some(retry_after_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_codes_are_stable() {
        assert_eq!(ProtocolErrorKind::InvalidGrant.code(), "invalid_grant");
        assert_eq!(ProtocolErrorKind::PkceFailure.code(), "pkce_failure");
        assert_eq!(ProtocolErrorKind::PkceFailure.oauth_error(), "invalid_grant");
        assert_eq!(ProtocolErrorKind::AccountPaused.code(), "account_paused");
    }

    #[test]
    fn trace_ids_are_unique_and_opaque() {
        let a = ProtocolError::new(ProtocolErrorKind::InvalidGrant);
        let b = ProtocolError::new(ProtocolErrorKind::InvalidGrant);
        assert_ne!(a.trace_id, b.trace_id);
        // message exposes code and trace id, nothing else
        assert!(a.to_string().contains("invalid_grant"));
        assert!(a.to_string().contains(&a.trace_id));
    }
}
