use serde::Serialize;

/// Coarse outcome tag every response carries (SPEC_FULL.md §6): `success`
/// for a completed operation, `fail` for a well-formed request the
/// handler refused (bad credentials, duplicate friend, ...), `error` for
/// a protocol- or infrastructure-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Fail,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyPreviewWire {
    pub sender: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageResponse {
    pub r#type: &'static str,
    pub request_id: String,
    pub status: Status,
    pub rowid: i64,
    pub timestamp: String,
    pub reply_preview: Option<ReplyPreviewWire>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMediaChunkAck {
    pub r#type: &'static str,
    pub request_id: String,
    pub status: Status,
    pub received_bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMediaFinalResponse {
    pub r#type: &'static str,
    pub request_id: String,
    pub status: Status,
    pub file_id: String,
    pub rowid: i64,
    pub timestamp: String,
    pub file_size: i64,
    pub duration: Option<f64>,
    pub thumbnail_data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadMediaResponse {
    pub r#type: &'static str,
    pub request_id: String,
    pub status: Status,
    pub file_data: String,
    pub offset: i64,
    pub file_size: i64,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub rowid: i64,
    pub from: String,
    pub to: String,
    pub message: String,
    pub timestamp: String,
    pub reply_to: Option<i64>,
    pub reply_preview: Option<ReplyPreviewWire>,
    pub attachment_type: Option<&'static str>,
    pub file_id: Option<String>,
    pub original_file_name: Option<String>,
    pub file_size: Option<i64>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatHistoryResponse {
    pub r#type: &'static str,
    pub request_id: String,
    pub status: Status,
    pub messages: Vec<MessageRecord>,
    pub page: i64,
    pub page_size: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddFriendResponse {
    pub r#type: &'static str,
    pub request_id: String,
    pub status: Status,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteMessagesResponse {
    pub r#type: &'static str,
    pub request_id: String,
    pub status: Status,
    pub deleted_rowids: Vec<i64>,
    pub content: String,
    pub write_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRegisterResponse {
    pub r#type: &'static str,
    pub request_id: String,
    pub status: Status,
    pub subtype: String,
    pub message: String,
    pub username: Option<String>,
    pub session_id: Option<String>,
    pub captcha_image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserInfoResponse {
    pub r#type: &'static str,
    pub request_id: String,
    pub status: Status,
    pub username: String,
    pub nickname: String,
    pub sign: String,
    pub avatar: Option<String>,
}

/// Catch-all acknowledgement for requests whose only interesting
/// outcome is success/failure (update_sign, update_name, exit, ...).
#[derive(Debug, Clone, Serialize)]
pub struct SimpleStatusResponse {
    pub r#type: String,
    pub request_id: String,
    pub status: Status,
    pub message: String,
}

impl SimpleStatusResponse {
    #[must_use]
    pub fn ok(type_: impl Into<String>, request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { r#type: type_.into(), request_id: request_id.into(), status: Status::Success, message: message.into() }
    }

    #[must_use]
    pub fn fail(type_: impl Into<String>, request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { r#type: type_.into(), request_id: request_id.into(), status: Status::Fail, message: message.into() }
    }

    #[must_use]
    pub fn error(type_: impl Into<String>, request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { r#type: type_.into(), request_id: request_id.into(), status: Status::Error, message: message.into() }
    }
}

/// Reply sent when a request never made it past envelope decoding, so
/// no type-specific response shape applies. `request_id` is present only
/// when decoding got far enough to recover it.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub r#type: &'static str,
    pub request_id: Option<String>,
    pub status: Status,
    pub message: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self { r#type: "error", request_id, status: Status::Error, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorResponse, SimpleStatusResponse, Status};

    #[test]
    fn error_response_serializes_lowercase_status() {
        let response = ErrorResponse::new(Some(String::from("r1")), "invalid request format");
        let encoded = serde_json::to_string(&response).unwrap();
        assert!(encoded.contains("\"status\":\"error\""));
        assert!(encoded.contains("\"request_id\":\"r1\""));
    }

    #[test]
    fn simple_status_response_variants() {
        let ok = SimpleStatusResponse::ok("update_sign", "r1", "updated");
        let fail = SimpleStatusResponse::fail("authenticate", "r2", "该账号已登录");
        assert_eq!(ok.status, Status::Success);
        assert_eq!(fail.status, Status::Fail);
    }
}
