//! Pluggable wire codecs.
//!
//! The engine only depends on [`Codec`]; swapping the wire format means
//! providing another implementation.

use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage, PROTOCOL_VERSION};

pub trait Codec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, ProtocolError>;

    /// Whether encoded frames are UTF-8 and travel as WebSocket text.
    fn is_text(&self) -> bool {
        false
    }
}

/// Both directions of the relay protocol. Client and relay must be
/// configured with the same one.
pub trait WireCodec: Codec<ClientMessage> + Codec<ServerMessage> + Send + Sync + Debug {
    fn encode_client(&self, msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
        Codec::<ClientMessage>::encode(self, msg)
    }

    fn decode_client(&self, bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
        Codec::<ClientMessage>::decode(self, bytes)
    }

    fn encode_server(&self, msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
        Codec::<ServerMessage>::encode(self, msg)
    }

    fn decode_server(&self, bytes: &[u8]) -> Result<ServerMessage, ProtocolError> {
        Codec::<ServerMessage>::decode(self, bytes)
    }

    fn text_frames(&self) -> bool {
        Codec::<ClientMessage>::is_text(self)
    }

    /// Wrap encoded bytes in the WebSocket frame type this codec uses.
    fn frame(&self, bytes: Vec<u8>) -> Result<Message, ProtocolError> {
        if self.text_frames() {
            let text = String::from_utf8(bytes).map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
            Ok(Message::Text(text.into()))
        } else {
            Ok(Message::Binary(bytes.into()))
        }
    }
}

impl<C> WireCodec for C where C: Codec<ClientMessage> + Codec<ServerMessage> + Send + Sync + Debug {}

/// Versioned bincode, the default wire format.
pub fn default_codec() -> Arc<dyn WireCodec> {
    Arc::new(BincodeCodec)
}

/// Versioned bincode frames: one version byte, then the bincode body
/// (standard config, variable-length integers).
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for BincodeCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![PROTOCOL_VERSION];
        let body = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, ProtocolError> {
        let (&version, body) = bytes.split_first().ok_or(ProtocolError::EmptyFrame)?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let (value, _) = bincode::serde::decode_from_slice(body, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(value)
    }
}

/// Human-readable JSON frames, `{ "<MessageType>": payload }`. Useful for
/// debugging tools and browser clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    fn is_text(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, ServerMessage, UndoRedoAction};

    #[test]
    fn test_json_envelope_shape() {
        let msg = ClientMessage::UndoRedo {
            action: UndoRedoAction::Undo,
            id: "e1".into(),
        };
        let bytes = JsonCodec.encode(&msg).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(text, r#"{"UndoRedo":{"action":"Undo","id":"e1"}}"#);

        let back: ClientMessage = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_empty_frame() {
        let bin: Result<ServerMessage, _> = BincodeCodec.decode(&[]);
        assert_eq!(bin, Err(ProtocolError::EmptyFrame));
        let json: Result<ServerMessage, _> = JsonCodec.decode(&[]);
        assert_eq!(json, Err(ProtocolError::EmptyFrame));
    }

    #[test]
    fn test_codecs_are_interchangeable() {
        fn roundtrip<C: Codec<ClientMessage>>(codec: &C, msg: &ClientMessage) -> ClientMessage {
            codec.decode(&codec.encode(msg).unwrap()).unwrap()
        }
        let msg = ClientMessage::SetTitle { title: "Sprint board".into() };
        assert_eq!(roundtrip(&BincodeCodec, &msg), msg);
        assert_eq!(roundtrip(&JsonCodec, &msg), msg);
    }

    #[test]
    fn test_frame_type_follows_codec() {
        let msg = ServerMessage::TitleData { title: "plan".into() };

        let json: Arc<dyn WireCodec> = Arc::new(JsonCodec);
        let frame = json.frame(json.encode_server(&msg).unwrap()).unwrap();
        assert!(matches!(frame, Message::Text(_)));
        assert_eq!(json.decode_server(&frame.into_data()).unwrap(), msg);

        let bin = default_codec();
        let frame = bin.frame(bin.encode_server(&msg).unwrap()).unwrap();
        assert!(matches!(frame, Message::Binary(_)));
        assert_eq!(bin.decode_server(&frame.into_data()).unwrap(), msg);
    }

    #[test]
    fn test_bincode_rejects_json_text() {
        let bin = default_codec();
        let err = bin.decode_client(br#"{"Invite":null}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(_) | ProtocolError::DeserializationError(_)));
    }

    #[test]
    fn test_json_rejects_garbage() {
        let r: Result<ClientMessage, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(r, Err(ProtocolError::DeserializationError(_))));
    }
}
