use serde::Deserialize;
use serde_json::Value;

use crate::ProtocolError;

fn from_value<T: for<'de> Deserialize<'de>>(value: &Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value.clone()).map_err(|_| ProtocolError::MalformedPayload)
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reply_to: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMediaRequest {
    pub from: String,
    pub to: String,
    pub file_name: String,
    pub file_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reply_to: Option<i64>,
    #[serde(default)]
    pub file_data: String,
    #[serde(default)]
    pub total_size: i64,
}

impl SendMediaRequest {
    /// A request carrying no `file_data` is the chunk terminator
    /// (SPEC_FULL.md §4.6).
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.file_data.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadMediaRequest {
    pub file_id: String,
    pub download_type: String,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatHistoryRequest {
    pub username: String,
    pub friend: String,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddFriendRequest {
    pub username: String,
    pub friend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRemarksRequest {
    pub username: String,
    pub friend: String,
    pub remarks: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSignRequest {
    pub username: String,
    pub sign: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateNameRequest {
    pub username: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadAvatarRequest {
    pub username: String,
    pub file_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetUserInfoRequest {
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMessagesRequest {
    pub username: String,
    #[serde(default)]
    pub rowids: Vec<i64>,
    #[serde(default)]
    pub rowid: Option<i64>,
}

impl DeleteMessagesRequest {
    /// Normalizes the single-id and batch-id request shapes the source
    /// accepts into one list.
    #[must_use]
    pub fn target_ids(&self) -> Vec<i64> {
        if !self.rowids.is_empty() {
            self.rowids.clone()
        } else {
            self.rowid.into_iter().collect()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRegisterRequest {
    pub subtype: String,
    pub session_id: Option<String>,
    pub captcha_input: Option<String>,
    pub password: Option<String>,
    pub avatar_data: Option<String>,
    pub nickname: Option<String>,
    pub sign: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExitRequest {
    #[serde(default)]
    pub username: Option<String>,
}

/// One parsed request, tagged by the wire `type` string. See
/// SPEC_FULL.md §4.7's dispatch table for the full set.
#[derive(Debug, Clone)]
pub enum Request {
    Authenticate(AuthenticateRequest),
    SendMessage(SendMessageRequest),
    SendMedia(SendMediaRequest),
    DownloadMedia(DownloadMediaRequest),
    ChatHistory(ChatHistoryRequest),
    AddFriend(AddFriendRequest),
    UpdateRemarks(UpdateRemarksRequest),
    UpdateSign(UpdateSignRequest),
    UpdateName(UpdateNameRequest),
    UploadAvatar(UploadAvatarRequest),
    GetUserInfo(GetUserInfoRequest),
    DeleteMessages(DeleteMessagesRequest),
    UserRegister(UserRegisterRequest),
    Exit(ExitRequest),
}

pub(crate) fn parse_request(type_: &str, value: &Value) -> Result<Request, ProtocolError> {
    Ok(match type_ {
        "authenticate" => Request::Authenticate(from_value(value)?),
        "send_message" => Request::SendMessage(from_value(value)?),
        "send_media" => Request::SendMedia(from_value(value)?),
        "download_media" => Request::DownloadMedia(from_value(value)?),
        "get_chat_history_paginated" => Request::ChatHistory(from_value(value)?),
        "add_friend" => Request::AddFriend(from_value(value)?),
        "Update_Remarks" => Request::UpdateRemarks(from_value(value)?),
        "update_sign" => Request::UpdateSign(from_value(value)?),
        "update_name" => Request::UpdateName(from_value(value)?),
        "upload_avatar" => Request::UploadAvatar(from_value(value)?),
        "get_user_info" => Request::GetUserInfo(from_value(value)?),
        "delete_messages" => Request::DeleteMessages(from_value(value)?),
        "user_register" => Request::UserRegister(from_value(value)?),
        "exit" => Request::Exit(from_value(value)?),
        other => return Err(ProtocolError::UnknownType(other.to_owned())),
    })
}

#[cfg(test)]
mod tests {
    use super::DeleteMessagesRequest;

    #[test]
    fn target_ids_prefers_batch_field() {
        let request = DeleteMessagesRequest {
            username: String::from("alice"),
            rowids: vec![1, 2],
            rowid: Some(3),
        };
        assert_eq!(request.target_ids(), vec![1, 2]);
    }

    #[test]
    fn target_ids_falls_back_to_single_field() {
        let request = DeleteMessagesRequest {
            username: String::from("alice"),
            rowids: vec![],
            rowid: Some(3),
        };
        assert_eq!(request.target_ids(), vec![3]);
    }
}
