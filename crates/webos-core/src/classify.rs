//! Response classification.
//!
//! Turns a terminal message from the device into success or a
//! [`ProtocolError`]. Shared by calls and the pairing handshake.

use crate::error::ProtocolError;
use crate::message::{Message, MessageType, Payload};
use serde_json::Value;

/// Classify a terminal message.
///
/// - `error`: always a failure; a `returnValue` in its payload adds detail.
/// - `response`: success iff the payload reports `returnValue: true`.
/// - `registered`: success iff a payload is present.
/// - anything else is an unexpected type.
pub fn check_response(msg: &Message) -> Result<(), ProtocolError> {
    match &msg.kind {
        MessageType::Error => {
            let detail = msg
                .payload
                .as_ref()
                .filter(|p| p.contains_key("returnValue"))
                .and_then(|p| check_return_value(Some(p)).err());
            Err(ProtocolError::Api {
                error: msg.error.clone().unwrap_or_default(),
                detail: detail.map(Box::new),
            })
        }
        MessageType::Response => check_return_value(msg.payload.as_ref()),
        MessageType::Registered => match msg.payload {
            Some(_) => Ok(()),
            None => Err(ProtocolError::NilPayload),
        },
        other => Err(ProtocolError::UnexpectedType(other.to_string())),
    }
}

/// Check the `returnValue` convention of a response payload.
pub fn check_return_value(payload: Option<&Payload>) -> Result<(), ProtocolError> {
    let payload = payload.ok_or(ProtocolError::NilPayload)?;

    match payload.get("returnValue") {
        None => Err(ProtocolError::ReturnValueMissing),
        Some(Value::Bool(true)) => Ok(()),
        Some(Value::Bool(false)) => match payload.get("errorCode") {
            Some(code) if !code.is_null() => Err(ProtocolError::Failed {
                error_code: code.clone(),
                error_text: payload.get("errorText").and_then(text_of),
            }),
            _ => Err(ProtocolError::FailedWithoutCode),
        },
        Some(_) => Err(ProtocolError::ReturnValueNotBool),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(raw: Value) -> Message {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_response_success() {
        let msg = message(json!({"type": "response", "id": "a", "payload": {"returnValue": true, "x": 1}}));
        assert_eq!(check_response(&msg), Ok(()));
    }

    #[test]
    fn test_return_value_false_with_code() {
        let msg = message(json!({
            "type": "response",
            "id": "a",
            "payload": {"returnValue": false, "errorCode": 5, "errorText": "bad"}
        }));
        assert_eq!(
            check_response(&msg),
            Err(ProtocolError::Failed {
                error_code: json!(5),
                error_text: Some("bad".into()),
            })
        );
    }

    #[test]
    fn test_return_value_false_without_code() {
        let msg = message(json!({"type": "response", "id": "a", "payload": {"returnValue": false}}));
        assert_eq!(check_response(&msg), Err(ProtocolError::FailedWithoutCode));

        let msg = message(json!({
            "type": "response",
            "id": "a",
            "payload": {"returnValue": false, "errorCode": null}
        }));
        assert_eq!(check_response(&msg), Err(ProtocolError::FailedWithoutCode));
    }

    #[test]
    fn test_return_value_missing_is_distinct() {
        let msg = message(json!({"type": "response", "id": "a", "payload": {"x": 1}}));
        assert_eq!(check_response(&msg), Err(ProtocolError::ReturnValueMissing));
    }

    #[test]
    fn test_return_value_wrong_type() {
        let msg = message(json!({"type": "response", "id": "a", "payload": {"returnValue": "yes"}}));
        assert_eq!(check_response(&msg), Err(ProtocolError::ReturnValueNotBool));
    }

    #[test]
    fn test_response_without_payload() {
        let msg = message(json!({"type": "response", "id": "a"}));
        assert_eq!(check_response(&msg), Err(ProtocolError::NilPayload));
    }

    #[test]
    fn test_error_type() {
        let msg = message(json!({"type": "error", "id": "a", "error": "404 no such service or method"}));
        assert_eq!(
            check_response(&msg),
            Err(ProtocolError::Api {
                error: "404 no such service or method".into(),
                detail: None,
            })
        );

        let msg = message(json!({
            "type": "error",
            "id": "a",
            "error": "500",
            "payload": {"returnValue": false, "errorCode": -1, "errorText": "busy"}
        }));
        match check_response(&msg) {
            Err(ProtocolError::Api { error, detail: Some(detail) }) => {
                assert_eq!(error, "500");
                assert!(matches!(*detail, ProtocolError::Failed { .. }));
            }
            other => panic!("Expected Api error with detail, got: {:?}", other),
        }
    }

    #[test]
    fn test_registered() {
        let msg = message(json!({"type": "registered", "id": "a", "payload": {"client-key": "k"}}));
        assert_eq!(check_response(&msg), Ok(()));

        let msg = message(json!({"type": "registered", "id": "a"}));
        assert_eq!(check_response(&msg), Err(ProtocolError::NilPayload));
    }

    #[test]
    fn test_unexpected_type() {
        let msg = message(json!({"type": "hello", "id": "a", "payload": {}}));
        assert_eq!(
            check_response(&msg),
            Err(ProtocolError::UnexpectedType("hello".into()))
        );
    }
}
