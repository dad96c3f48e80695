use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// One push-channel message: an event-type key plus its JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Builds a frame from any serializable payload.
    pub fn from_payload<T: Serialize + ?Sized>(
        event: impl Into<String>,
        payload: &T,
    ) -> Result<Self, FrameError> {
        let payload =
            serde_json::to_value(payload).map_err(|err| FrameError::Encode(err.to_string()))?;
        Ok(Self::new(event, payload))
    }

    /// Integer `organizationId` of the payload, if it carries one.
    pub fn organization_id(&self) -> Option<i64> {
        self.payload.get("organizationId").and_then(Value::as_i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame has an empty event type")]
    MissingEvent,
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame(frame: &Frame, max_frame_bytes: usize) -> Result<String, FrameError> {
    if frame.event.trim().is_empty() {
        return Err(FrameError::MissingEvent);
    }
    let encoded = serde_json::to_string(frame).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame(bytes: &[u8], max_frame_bytes: usize) -> Result<Frame, FrameError> {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let frame: Frame =
        serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))?;
    if frame.event.trim().is_empty() {
        return Err(FrameError::MissingEvent);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{OrganizationRoom, JOIN_ORGANIZATION};

    #[test]
    fn join_frame_matches_wire_shape() {
        let frame = Frame::from_payload(JOIN_ORGANIZATION, &OrganizationRoom { organization_id: 1 })
            .expect("build frame");
        let text = encode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let raw: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(
            raw,
            serde_json::json!({"event": "join-organization", "payload": {"organizationId": 1}})
        );
        assert_eq!(frame.organization_id(), Some(1));
    }

    #[test]
    fn decode_accepts_missing_payload_and_trailing_newline() {
        let frame = decode_frame(b"{\"event\":\"ping\"}\r\n", DEFAULT_MAX_FRAME_BYTES)
            .expect("decode");
        assert_eq!(frame.event, "ping");
        assert_eq!(frame.payload, Value::Null);
        assert_eq!(frame.organization_id(), None);
    }

    #[test]
    fn decode_rejects_malformed_and_empty_event() {
        assert!(matches!(
            decode_frame(b"{\"event\":", DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::Decode(_))
        ));
        assert_eq!(
            decode_frame(b"{\"event\":\"  \",\"payload\":{}}", DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::MissingEvent)
        );
    }

    #[test]
    fn size_limit_applies_both_ways() {
        let frame = Frame::new("notification", serde_json::json!({"blob": "x".repeat(128)}));
        assert!(matches!(
            encode_frame(&frame, 64),
            Err(FrameError::OversizedFrame { max: 64, .. })
        ));

        let text = encode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        assert!(matches!(
            decode_frame(text.as_bytes(), 64),
            Err(FrameError::OversizedFrame { .. })
        ));
    }
}
