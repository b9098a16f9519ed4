//! Error types of the core.
//!
//! [`ServiceError`] is what a peer gets back from an operation; its
//! variants map one-to-one onto the client-visible [`ErrorKind`]s.
//! [`EchelonError`] is the façade error for everything else (startup,
//! connection handling), wrapping the errors of every sub-crate.

use echelon_protocol::{ErrorKind, ProtocolError};
use echelon_session::SessionError;
use echelon_store::StoreError;
use echelon_transport::TransportError;

/// Message of every rejected login, whatever the actual reason.
pub const BAD_CREDENTIALS: &str = "bad username or password";

/// Failure of an operation requested by a peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Malformed input. Not retryable; the caller must fix the request.
    #[error("bad information: {0}")]
    BadInformation(String),

    /// Authorization or availability failure. Not retryable without a
    /// change of state.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The session is not in a state that allows the call (no tank
    /// selected, for instance).
    #[error("invalid state: {0}")]
    State(String),

    /// Storage or other unexpected failure. Details are logged, never sent.
    #[error("internal error")]
    Internal,
}

impl ServiceError {
    pub fn bad_information(msg: impl Into<String>) -> Self {
        ServiceError::BadInformation(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        ServiceError::PermissionDenied(msg.into())
    }

    /// The single error returned for every failed login.
    pub fn bad_credentials() -> Self {
        ServiceError::PermissionDenied(BAD_CREDENTIALS.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::BadInformation(_) => ErrorKind::BadInformation,
            // State errors are a refusal as far as the peer is concerned.
            ServiceError::PermissionDenied(_) | ServiceError::State(_) => {
                ErrorKind::PermissionDenied
            }
            ServiceError::Internal => ErrorKind::Internal,
        }
    }

    /// The text sent to the peer.
    pub fn client_message(&self) -> String {
        match self {
            ServiceError::BadInformation(m)
            | ServiceError::PermissionDenied(m)
            | ServiceError::State(m) => m.clone(),
            ServiceError::Internal => "internal server error".into(),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "storage failure");
        ServiceError::Internal
    }
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ServiceError::permission_denied("session expired"),
            SessionError::WrongVariant { .. } => {
                ServiceError::permission_denied("operation not allowed for this session")
            }
            SessionError::RegistryFull(_) => {
                ServiceError::permission_denied("server is at capacity")
            }
            SessionError::AlreadyInGame(_) => ServiceError::permission_denied("already in a game"),
            SessionError::ServerFull { .. } => ServiceError::permission_denied("server is full"),
        }
    }
}

/// Top-level error that wraps all crate-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum EchelonError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A login or request was refused.
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use echelon_protocol::SessionId;

    use super::*;

    #[test]
    fn test_kind_maps_state_to_permission_denied() {
        assert_eq!(
            ServiceError::State("no tank selected".into()).kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(ServiceError::Internal.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_internal_client_message_hides_detail() {
        let err: ServiceError = StoreError::Notify("smtp down".into()).into();
        assert_eq!(err, ServiceError::Internal);
        assert!(!err.client_message().contains("smtp"));
    }

    #[test]
    fn test_from_session_error_not_found_is_session_expired() {
        let err: ServiceError = SessionError::NotFound(SessionId(3)).into();
        assert_eq!(err, ServiceError::PermissionDenied("session expired".into()));
    }

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let echelon_err: EchelonError = err.into();
        assert!(matches!(echelon_err, EchelonError::Transport(_)));
        assert!(echelon_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let echelon_err: EchelonError = err.into();
        assert!(matches!(echelon_err, EchelonError::Protocol(_)));
    }
}
