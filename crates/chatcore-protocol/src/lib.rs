#![forbid(unsafe_code)]

mod envelope;
mod push;
mod request;
mod response;

pub use envelope::{decode_request, extract_request_id, RequestEnvelope, MAX_FRAME_BYTES};
pub use push::{
    DeletedMessagesPush, FriendListUpdatePush, FriendProjection, FriendUpdatePush, NewMediaPush, NewMessagePush,
};
pub use request::{
    AddFriendRequest, AuthenticateRequest, ChatHistoryRequest, DeleteMessagesRequest, DownloadMediaRequest,
    ExitRequest, GetUserInfoRequest, Request, SendMediaRequest, SendMessageRequest, UpdateNameRequest,
    UpdateRemarksRequest, UpdateSignRequest, UploadAvatarRequest, UserRegisterRequest,
};
pub use response::{
    AddFriendResponse, ChatHistoryResponse, DeleteMessagesResponse, DownloadMediaResponse, ErrorResponse,
    MessageRecord, ReplyPreviewWire, SendMediaChunkAck, SendMediaFinalResponse, SendMessageResponse,
    SimpleStatusResponse, Status, UserInfoResponse, UserRegisterResponse,
};

/// Failures that can occur while turning wire bytes into a typed
/// [`Request`], before any handler runs. These always collapse to the
/// single `{status:"error", message:"invalid request format"}` reply
/// described in SPEC_FULL.md §4.1, except `UnknownType` which gets its
/// own "unknown type" message per §4.7.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid request format")]
    MalformedPayload,
    #[error("unknown type: {0}")]
    UnknownType(String),
}
