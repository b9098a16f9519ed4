//! Conversion between messages and the bytes carried by a connection.
//!
//! The front end is written against the [`Codec`] trait, not against a
//! concrete format. [`JsonCodec`] is the one shipped today; peers and
//! operators can read its frames directly in a packet capture.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Encodes values to bytes and decodes them back.
///
/// Shared by every connection task, hence `Send + Sync + 'static`.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a frame.
    ///
    /// # Errors
    /// [`ProtocolError::Encode`] if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Parses a frame.
    ///
    /// # Errors
    /// [`ProtocolError::Decode`] on malformed or unexpected input.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use echelon_protocol::{ClientMessage, Codec, JsonCodec, Request};
///
/// let codec = JsonCodec;
/// let msg = ClientMessage::Request { call_id: 1, request: Request::KeepAlive };
///
/// let bytes = codec.encode(&msg).unwrap();
/// let back: ClientMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, back);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientMessage, ServerMessage, SessionId};

    #[test]
    fn test_decode_garbage_returns_decode_error() {
        let result: Result<ClientMessage, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_unknown_type_returns_decode_error() {
        let result: Result<ClientMessage, _> =
            JsonCodec.decode(br#"{"type":"Teleport"}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_encode_login_ack() {
        let bytes = JsonCodec
            .encode(&ServerMessage::LoginAck {
                session_id: SessionId(5),
            })
            .unwrap();
        assert_eq!(bytes, br#"{"type":"LoginAck","session_id":5}"#.to_vec());
    }
}
