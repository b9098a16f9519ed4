//! Error types for the protocol layer.

/// Failures turning frames into messages or back.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A value could not be serialized.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A frame was malformed, truncated, or of an unknown type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A well-formed frame arrived where the protocol doesn't allow it,
    /// e.g. a `Request` before the peer logged in.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
