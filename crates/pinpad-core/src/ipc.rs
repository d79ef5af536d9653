use serde::{Deserialize, Serialize};

use crate::keypad::Key;
use crate::view::{Feedback, Phase, View};

/// Messages from daemon to displays/clients (JSON-lines over Unix socket).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DaemonMsg {
    /// Redraw the dot row.
    #[serde(rename = "view")]
    View(View),
    /// Both entries matched; leave for the success destination.
    #[serde(rename = "navigate")]
    Navigate { target: String },
    /// Status response.
    #[serde(rename = "status")]
    Status {
        phase: Phase,
        feedback: Feedback,
        filled: usize,
        version: String,
    },
    /// Acknowledgement for commands.
    #[serde(rename = "ack")]
    Ack { ok: bool, message: String },
}

/// Messages from keypads/clients to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    /// A keypad button was pressed.
    #[serde(rename = "press")]
    Press { key: Key },
    /// Display client announcing itself (for routing views and navigation).
    #[serde(rename = "register_display")]
    RegisterDisplay,
    /// Drop the current session and start over.
    #[serde(rename = "reset")]
    Reset,
    /// Request current status.
    #[serde(rename = "get_status")]
    GetStatus,
}

/// Serialize a message as a JSON line (with trailing newline).
pub fn encode(msg: &impl Serialize) -> String {
    // Every message type here is plain data with string keys.
    let mut s = serde_json::to_string(msg).unwrap_or_default();
    s.push('\n');
    s
}

/// Deserialize a JSON line. Returns None on empty/whitespace or malformed input.
pub fn decode_daemon(line: &str) -> Option<DaemonMsg> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

pub fn decode_client(line: &str) -> Option<ClientMsg> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_single_trailing_newline() {
        let encoded = encode(&ClientMsg::Reset);
        assert!(encoded.ends_with('\n'));
        assert_eq!(encoded.matches('\n').count(), 1);
    }

    #[test]
    fn press_uses_plain_key_string() {
        let encoded = encode(&ClientMsg::Press { key: Key::digit(5).unwrap() });
        assert_eq!(encoded, "{\"type\":\"press\",\"key\":\"5\"}\n");
    }

    #[test]
    fn press_backspace_decodes() {
        let msg = decode_client(r#"{"type":"press","key":"backspace"}"#).expect("should decode");
        assert!(matches!(msg, ClientMsg::Press { key: Key::Backspace }));
    }

    #[test]
    fn press_with_invalid_key_is_rejected() {
        assert!(decode_client(r#"{"type":"press","key":"x"}"#).is_none());
        assert!(decode_client(r#"{"type":"press","key":"10"}"#).is_none());
    }

    #[test]
    fn view_is_flattened_under_type_tag() {
        let msg = DaemonMsg::View(View {
            filled: 3,
            length: 4,
            feedback: Feedback::Idle,
            phase: Phase::Confirming,
            prompt: Some("Confirma tu PIN".into()),
        });
        let encoded = encode(&msg);
        assert!(encoded.contains("\"type\":\"view\""));
        assert!(encoded.contains("\"filled\":3"));
        assert!(encoded.contains("\"phase\":\"confirming\""));

        match decode_daemon(&encoded).expect("should decode") {
            DaemonMsg::View(view) => {
                assert_eq!(view.filled, 3);
                assert_eq!(view.prompt.as_deref(), Some("Confirma tu PIN"));
            }
            other => panic!("expected View, got {:?}", other),
        }
    }

    #[test]
    fn navigate_decodes() {
        let msg = decode_daemon(r#"{"type":"navigate","target":"success.html"}"#)
            .expect("should decode");
        match msg {
            DaemonMsg::Navigate { target } => assert_eq!(target, "success.html"),
            other => panic!("expected Navigate, got {:?}", other),
        }
    }

    #[test]
    fn decode_returns_none_for_empty() {
        assert!(decode_daemon("").is_none());
        assert!(decode_client("   ").is_none());
        assert!(decode_client("\n").is_none());
    }

    #[test]
    fn decode_returns_none_for_garbage() {
        assert!(decode_daemon("not json").is_none());
        assert!(decode_daemon("{\"type\":\"unknown_variant\"}").is_none());
        assert!(decode_client("{\"type\":\"select\",\"index\":1}").is_none());
    }
}
