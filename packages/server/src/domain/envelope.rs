//! Application message envelope.
//!
//! Every text frame exchanged with a client carries one JSON object of the
//! form `{"type": "<string>", "payload": <any JSON value>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::UserId;

/// Event type broadcast when a user's first connection opens.
pub const USER_ONLINE: &str = "user:online";
/// Event type broadcast when a user's last connection closes.
pub const USER_OFFLINE: &str = "user:offline";

/// Immutable `{type, payload}` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub r#type: String,
    /// Opaque to the gateway; handed to handlers untouched. `null` when absent.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(r#type: impl Into<String>, payload: Value) -> Self {
        Self {
            r#type: r#type.into(),
            payload,
        }
    }

    /// Parse a client frame payload.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn user_online(user_id: UserId) -> Self {
        Self::new(USER_ONLINE, serde_json::json!({ "user_id": user_id }))
    }

    pub fn user_offline(user_id: UserId) -> Self {
        Self::new(USER_OFFLINE, serde_json::json!({ "user_id": user_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_envelope_with_payload() {
        // テスト項目: type と payload を持つ JSON がパースされる
        // given (前提条件):
        let text = r#"{"type":"chat:send","payload":{"content":"Hello"}}"#;

        // when (操作):
        let envelope = Envelope::parse(text).unwrap();

        // then (期待する結果):
        assert_eq!(envelope.r#type, "chat:send");
        assert_eq!(envelope.payload, json!({"content": "Hello"}));
    }

    #[test]
    fn test_parse_envelope_without_payload_defaults_to_null() {
        // テスト項目: payload が無い場合は null として扱われる
        // given (前提条件):
        let text = r#"{"type":"presence:list"}"#;

        // when (操作):
        let envelope = Envelope::parse(text).unwrap();

        // then (期待する結果):
        assert_eq!(envelope.payload, Value::Null);
    }

    #[test]
    fn test_parse_envelope_rejects_missing_or_non_string_type() {
        // テスト項目: type が無い、または文字列でない場合はエラーになる
        // given (前提条件):
        let missing = r#"{"payload":1}"#;
        let numeric = r#"{"type":5,"payload":1}"#;
        let not_json = "hello";

        // when (操作):
        let results = [
            Envelope::parse(missing),
            Envelope::parse(numeric),
            Envelope::parse(not_json),
        ];

        // then (期待する結果):
        assert!(results.iter().all(Result::is_err));
    }

    #[test]
    fn test_presence_events_carry_integer_user_id() {
        // テスト項目: プレゼンスイベントは整数の user_id を持つ
        // given (前提条件):
        let user_id = UserId::new(7);

        // when (操作):
        let online = Envelope::user_online(user_id).to_json().unwrap();
        let offline = Envelope::user_offline(user_id).to_json().unwrap();

        // then (期待する結果):
        assert_eq!(online, r#"{"type":"user:online","payload":{"user_id":7}}"#);
        assert_eq!(offline, r#"{"type":"user:offline","payload":{"user_id":7}}"#);
    }
}
