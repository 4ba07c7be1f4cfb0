//! Wire envelope for script-to-script messages

use crate::error::RoutingError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `{"seq": <optional u64>, "body": {...}}`, UTF-8 JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub body: Map<String, Value>,
}

impl Envelope {
    pub fn new(body: Map<String, Value>) -> Self {
        Self { seq: None, body }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Wrap a JSON value, which must be an object
    pub fn from_value(body: Value) -> Result<Self, RoutingError> {
        match body {
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(RoutingError::Malformed(format!(
                "body must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RoutingError> {
        serde_json::from_slice(bytes).map_err(|e| RoutingError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, RoutingError> {
        serde_json::to_vec(self).map_err(|e| RoutingError::Malformed(e.to_string()))
    }

    pub fn into_body(self) -> Value {
        Value::Object(self.body)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_accepts_missing_seq() {
        let envelope = Envelope::decode(br#"{"body":{"kind":"ping"}}"#).unwrap();
        assert_eq!(envelope.seq, None);
        assert_eq!(envelope.into_body(), json!({"kind": "ping"}));
    }

    #[test]
    fn decode_rejects_non_object_body() {
        let err = Envelope::decode(br#"{"seq":1,"body":[1,2]}"#).unwrap_err();
        assert!(matches!(err, RoutingError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Envelope::decode(b"\xff\x00").is_err());
        assert!(Envelope::decode(b"{}").is_err());
    }

    #[test]
    fn encode_omits_absent_seq() {
        let envelope = Envelope::from_value(json!({"a": 1})).unwrap();
        let text = String::from_utf8(envelope.encode().unwrap()).unwrap();
        assert_eq!(text, r#"{"body":{"a":1}}"#);

        let sequenced = envelope.with_seq(9);
        let back = Envelope::decode(&sequenced.encode().unwrap()).unwrap();
        assert_eq!(back.seq, Some(9));
    }

    #[test]
    fn from_value_names_the_offending_kind() {
        let err = Envelope::from_value(json!("hello")).unwrap_err();
        assert_eq!(
            err,
            RoutingError::Malformed("body must be an object, got string".into())
        );
    }
}
