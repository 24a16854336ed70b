//! Wire frames pushed by the server on a streaming subscription

use json_patch::Patch;
use serde::{Deserialize, Serialize};

/// One discrete message on a log or document subscription.
///
/// Externally tagged so the wire shapes are `{"json_patch": [...]}`,
/// `{"stdout": "..."}`, `{"stderr": "..."}` and `{"finished": true}`.
/// Unrecognized tags fail deserialization and are dropped by the client
/// as protocol errors; the stream itself continues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StreamFrame {
    /// Ordered batch of RFC 6902 operations against the subject's document
    JsonPatch(Patch),
    /// Raw stdout chunk (log subjects only)
    Stdout(String),
    /// Raw stderr chunk (log subjects only)
    Stderr(String),
    /// Server-side terminator; the client closes intentionally, not as a failure
    Finished(bool),
}

impl StreamFrame {
    pub fn is_terminator(&self) -> bool {
        matches!(self, StreamFrame::Finished(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_frame_wire_shape() {
        let json = serde_json::to_string(&StreamFrame::Finished(true)).expect("serialize");
        assert_eq!(json, r#"{"finished":true}"#);
    }

    #[test]
    fn json_patch_frame_roundtrip() {
        let raw = r#"{"json_patch":[{"op":"add","path":"/entries/0","value":{"x":1}}]}"#;
        let frame: StreamFrame = serde_json::from_str(raw).expect("deserialize");
        match &frame {
            StreamFrame::JsonPatch(patch) => assert_eq!(patch.0.len(), 1),
            other => panic!("unexpected frame: {other:?}"),
        }
        let rewired = serde_json::to_string(&frame).expect("serialize");
        let reparsed: StreamFrame = serde_json::from_str(&rewired).expect("reparse");
        assert_eq!(frame, reparsed);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let raw = r#"{"telemetry":{"cpu":93}}"#;
        assert!(serde_json::from_str::<StreamFrame>(raw).is_err());
    }
}
