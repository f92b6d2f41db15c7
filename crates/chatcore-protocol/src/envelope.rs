use serde::Deserialize;
use serde_json::Value;

use crate::request::{parse_request, Request};
use crate::ProtocolError;

/// Upper bound on a single frame's ciphertext, sized for a 1 MiB media
/// chunk base64-inflated (~1.37x) plus JSON/envelope overhead. See
/// SPEC_FULL.md §6.
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

/// The two fields every request carries, regardless of `type`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    pub r#type: String,
    pub request_id: String,
}

/// Parse a decrypted JSON payload into an envelope plus typed request.
///
/// Returns `Ok((envelope, request))` only when both the common envelope
/// fields and the type-specific fields are present and well formed.
/// Any failure — invalid JSON, missing `type`/`request_id`, or a
/// type-specific field mismatch — is reported as [`ProtocolError`];
/// the caller is responsible for echoing `request_id` in the error
/// response when an envelope was at least partially recovered.
pub fn decode_request(payload: &[u8]) -> Result<(RequestEnvelope, Request), ProtocolError> {
    let value: Value = serde_json::from_slice(payload).map_err(|_| ProtocolError::MalformedPayload)?;
    let envelope: RequestEnvelope =
        serde_json::from_value(value.clone()).map_err(|_| ProtocolError::MalformedPayload)?;
    let request = parse_request(&envelope.r#type, &value)?;
    Ok((envelope, request))
}

/// Best-effort `request_id` recovery for a payload that failed
/// [`decode_request`], so the error response can still echo it when the
/// JSON was at least well-formed enough to carry one (SPEC_FULL.md §4.1).
#[must_use]
pub fn extract_request_id(payload: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    value.get("request_id")?.as_str().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::decode_request;
    use crate::Request;

    #[test]
    fn decodes_authenticate_request() {
        let payload = br#"{"type":"authenticate","request_id":"r1","username":"alice","password":"secret1A"}"#;
        let (envelope, request) = decode_request(payload).unwrap();
        assert_eq!(envelope.request_id, "r1");
        assert!(matches!(request, Request::Authenticate(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = decode_request(b"not json").unwrap_err();
        assert_eq!(err, crate::ProtocolError::MalformedPayload);
    }

    #[test]
    fn rejects_missing_request_id() {
        let payload = br#"{"type":"authenticate","username":"a","password":"b"}"#;
        let err = decode_request(payload).unwrap_err();
        assert_eq!(err, crate::ProtocolError::MalformedPayload);
    }

    #[test]
    fn rejects_unknown_type() {
        let payload = br#"{"type":"frobnicate","request_id":"r1"}"#;
        let err = decode_request(payload).unwrap_err();
        assert_eq!(err, crate::ProtocolError::UnknownType(String::from("frobnicate")));
    }
}
