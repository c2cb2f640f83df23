//! Wire envelope codec.
//!
//! Every frame on the socket is a JSON object carrying a `method` tag next to
//! the operation payload: `{"method": "subscribe", ...payload}`. Decoding is a
//! hard boundary: anything that is not an object with a string `method` is
//! classified as [`Frame::Invalid`] rather than guessed at.

use serde_json::{Map, Value};

/// A decoded inbound frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed envelope: the `method` tag plus the remaining payload.
    Valid { method: String, payload: Value },
    /// Anything else. Dropped by the dispatcher.
    Invalid,
}

/// Encodes an outgoing envelope.
///
/// Object payloads are flattened next to the `method` tag. A non-object,
/// non-null payload is nested under a `data` key so nothing is lost.
pub fn encode(method: &str, payload: Value) -> String {
    let mut envelope = match payload {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        other => {
            let mut fields = Map::new();
            fields.insert("data".to_owned(), other);
            fields
        }
    };
    envelope.insert("method".to_owned(), Value::String(method.to_owned()));

    Value::Object(envelope).to_string()
}

/// Decodes an inbound text frame.
pub fn decode(text: &str) -> Frame {
    let Ok(Value::Object(mut envelope)) = serde_json::from_str::<Value>(text) else {
        return Frame::Invalid;
    };

    match envelope.remove("method") {
        Some(Value::String(method)) => Frame::Valid {
            method,
            payload: Value::Object(envelope),
        },
        _ => Frame::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn encode_flattens_object_payload() {
        let text = encode("subscribe", json!({"channel": "trades"}));
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value, json!({"method": "subscribe", "channel": "trades"}));
    }

    #[test]
    fn encode_null_payload_is_bare_method() {
        let text = encode("ping", Value::Null);

        assert_eq!(text, r#"{"method":"ping"}"#);
    }

    #[test]
    fn encode_wraps_scalar_payload() {
        let text = encode("seq", json!(7));
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value, json!({"method": "seq", "data": 7}));
    }

    #[test]
    fn decode_round_trips_encode() {
        let payload = json!({"channel": "trades", "depth": 5});
        let text = encode("subscribe", payload.clone());

        assert_eq!(
            decode(&text),
            Frame::Valid {
                method: "subscribe".to_owned(),
                payload,
            }
        );
    }

    #[test]
    fn decode_rejects_malformed_frames() {
        assert_eq!(decode("not json"), Frame::Invalid);
        assert_eq!(decode("[1,2,3]"), Frame::Invalid);
        assert_eq!(decode(r#"{"channel":"trades"}"#), Frame::Invalid);
        assert_eq!(decode(r#"{"method":42}"#), Frame::Invalid);
    }
}
