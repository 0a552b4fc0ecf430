use serde::{Deserialize, Serialize};

/// Inbound handshake frame. Must be the first line on a new connection.
#[derive(Debug, Deserialize)]
pub struct AuthFrame {
    pub data: AuthData,
}

#[derive(Debug, Deserialize)]
pub struct AuthData {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponseFrame {
    pub r#type: &'static str,
    pub success: bool,
}

impl AuthResponseFrame {
    pub fn new(success: bool) -> Self {
        Self {
            r#type: "auth_response",
            success,
        }
    }
}

/// `progress_update{user_id, manga_id, chapter}`, validated against the
/// connection's bound identity before being applied.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressUpdateFrame {
    pub user_id: i32,
    pub manga_id: i32,
    pub chapter: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressBroadcastFrame {
    pub r#type: &'static str,
    pub user_id: i32,
    pub manga_id: i32,
    pub chapter: i32,
}

impl ProgressBroadcastFrame {
    pub fn new(user_id: i32, manga_id: i32, chapter: i32) -> Self {
        Self {
            r#type: "progress_broadcast",
            user_id,
            manga_id,
            chapter,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorFrame {
    pub r#type: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            r#type: "error",
            code,
            message: message.into(),
        }
    }
}

/// Reads just the `type` discriminator out of a raw inbound line without
/// committing to a concrete frame shape, so the caller can decide whether
/// to deserialize further (`progress_update`) or broadcast the line
/// verbatim (any other valid JSON, per the opaque presence/typing path).
pub fn peek_frame_type(raw: &serde_json::Value) -> Option<&str> {
    raw.get("type").and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_frame_type_reads_the_discriminator() {
        let value: serde_json::Value = serde_json::from_str(r#"{"type":"auth","data":{"token":"x"}}"#).unwrap();
        assert_eq!(peek_frame_type(&value), Some("auth"));
    }

    #[test]
    fn peek_frame_type_is_none_without_a_type_field() {
        let value: serde_json::Value = serde_json::from_str(r#"{"foo":"bar"}"#).unwrap();
        assert_eq!(peek_frame_type(&value), None);
    }

    #[test]
    fn auth_frame_extracts_the_token() {
        let frame: AuthFrame = serde_json::from_str(r#"{"type":"auth","data":{"token":"abc123"}}"#).unwrap();
        assert_eq!(frame.data.token, "abc123");
    }

    #[test]
    fn progress_update_frame_parses_required_fields() {
        let frame: ProgressUpdateFrame =
            serde_json::from_str(r#"{"type":"progress_update","user_id":1,"manga_id":10,"chapter":5}"#).unwrap();
        assert_eq!(frame.user_id, 1);
        assert_eq!(frame.manga_id, 10);
        assert_eq!(frame.chapter, 5);
    }

    #[test]
    fn error_frame_serializes_with_its_type_tag() {
        let frame = ErrorFrame::new("rate_limited", "too many messages");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "rate_limited");
    }
}
