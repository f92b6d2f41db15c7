use base64::Engine;

use chatcore_core::{canonical_pair, AttachmentType, ConversationHead, Username};
use chatcore_protocol::{
    ChatHistoryRequest, ChatHistoryResponse, DeleteMessagesRequest, DeleteMessagesResponse,
    DeletedMessagesPush, DownloadMediaRequest, DownloadMediaResponse, MessageRecord, NewMediaPush,
    NewMessagePush, ReplyPreviewWire, SendMediaChunkAck, SendMediaFinalResponse, SendMediaRequest,
    SendMessageRequest, SendMessageResponse, SimpleStatusResponse, Status,
};

use super::super::clock::{format_now, now_unix};
use super::super::core::AppState;
use super::super::media::MediaStore;
use super::super::metrics;
use super::super::store::MessageDraft;
use super::super::uploads::UploadSession;

const DOWNLOAD_WINDOW_BYTES: usize = 1024 * 1024;

fn invalid_username(type_: &'static str, request_id: &str) -> SimpleStatusResponse {
    SimpleStatusResponse::error(type_, request_id, "invalid username")
}

/// The caller must be the request's own `from` — a connection never sends
/// as another user (SPEC_FULL.md §4.8).
fn require_caller_is_sender(caller: &str, from: &str, type_: &'static str, request_id: &str) -> Result<(), SimpleStatusResponse> {
    if caller != from {
        return Err(SimpleStatusResponse::fail(type_, request_id, "未登录"));
    }
    Ok(())
}

pub(crate) async fn send_message(
    state: &AppState,
    caller: &str,
    request: &SendMessageRequest,
    request_id: &str,
) -> Result<SendMessageResponse, SimpleStatusResponse> {
    require_caller_is_sender(caller, &request.from, "send_message", request_id)?;
    let sender: Username = request.from.parse().map_err(|_| invalid_username("send_message", request_id))?;
    let receiver: Username = request.to.parse().map_err(|_| invalid_username("send_message", request_id))?;

    let draft = MessageDraft {
        sender,
        receiver,
        text: request.message.clone(),
        write_time: format_now(),
        attachment_type: None,
        attachment_path: None,
        original_file_name: None,
        thumbnail_path: None,
        file_size: None,
        duration: None,
        reply_to: request.reply_to,
        file_id: None,
    };

    let message = state
        .store()
        .insert_message(draft)
        .await
        .map_err(|_| SimpleStatusResponse::error("send_message", request_id, "internal error"))?;

    put_head_for(state, message.sender.as_str(), message.receiver.as_str(), message.id, &message.write_time).await;
    metrics::record_message_sent("text");

    state
        .presence()
        .push(
            message.receiver.as_str(),
            &NewMessagePush {
                r#type: "new_message",
                from: message.sender.to_string(),
                to: message.receiver.to_string(),
                message: message.text.clone(),
                rowid: message.id,
                timestamp: message.write_time.clone(),
                reply_to: message.reply_to,
            },
        )
        .await;

    Ok(SendMessageResponse {
        r#type: "send_message",
        request_id: request_id.to_owned(),
        status: Status::Success,
        rowid: message.id,
        timestamp: message.write_time,
        reply_preview: message.reply_preview.map(|preview| ReplyPreviewWire { sender: preview.sender, content: preview.content }),
    })
}

pub(crate) enum SendMediaOutcome {
    Chunk(SendMediaChunkAck),
    Final(Box<SendMediaFinalResponse>),
}

pub(crate) async fn send_media(
    state: &AppState,
    caller: &str,
    request: &SendMediaRequest,
    request_id: &str,
) -> Result<SendMediaOutcome, SimpleStatusResponse> {
    require_caller_is_sender(caller, &request.from, "send_media", request_id)?;

    if request.is_terminator() {
        return finish_media_upload(state, request_id).await;
    }

    let attachment_type = AttachmentType::parse(&request.file_type)
        .ok_or_else(|| SimpleStatusResponse::error("send_media", request_id, "unknown file_type"))?;

    let now = now_unix();
    if !state.uploads().contains(request_id).await {
        let unique_file_name = MediaStore::unique_file_name(&request.file_name);
        let temp_path = state.media().original_path(attachment_type, &unique_file_name);
        state
            .uploads()
            .begin(
                request_id,
                UploadSession {
                    sender: request.from.clone(),
                    receiver: request.to.clone(),
                    file_name: request.file_name.clone(),
                    file_type: attachment_type,
                    message: request.message.clone(),
                    reply_to: request.reply_to,
                    unique_file_name,
                    temp_path,
                    total_size: request.total_size,
                    received_bytes: 0,
                    last_chunk_at_unix: now,
                },
            )
            .await;
    }

    let chunk = base64::engine::general_purpose::STANDARD
        .decode(&request.file_data)
        .map_err(|_| SimpleStatusResponse::error("send_media", request_id, "invalid file_data"))?;

    let received_bytes = state
        .uploads()
        .append_chunk(request_id, &chunk, now)
        .await
        .map_err(|_| SimpleStatusResponse::error("send_media", request_id, "unknown upload session"))?;

    Ok(SendMediaOutcome::Chunk(SendMediaChunkAck {
        r#type: "send_media",
        request_id: request_id.to_owned(),
        status: Status::Success,
        received_bytes,
    }))
}

async fn finish_media_upload(state: &AppState, request_id: &str) -> Result<SendMediaOutcome, SimpleStatusResponse> {
    let session = state
        .uploads()
        .finish(request_id)
        .await
        .map_err(|_| SimpleStatusResponse::error("send_media", request_id, "unknown upload session"))?;

    let thumbnail = state.media().derive_thumbnail(session.file_type, &session.unique_file_name).await;

    let sender: Username = session.sender.parse().map_err(|_| invalid_username("send_media", request_id))?;
    let receiver: Username = session.receiver.parse().map_err(|_| invalid_username("send_media", request_id))?;
    let attachment_path = state.media().original_path(session.file_type, &session.unique_file_name);

    let draft = MessageDraft {
        sender,
        receiver,
        text: session.message.clone(),
        write_time: format_now(),
        attachment_type: Some(session.file_type),
        attachment_path: Some(attachment_path.to_string_lossy().into_owned()),
        original_file_name: Some(session.file_name.clone()),
        thumbnail_path: thumbnail.thumbnail_path.clone(),
        file_size: Some(session.received_bytes),
        duration: thumbnail.duration,
        reply_to: session.reply_to,
        file_id: Some(session.unique_file_name.clone()),
    };

    let message = state
        .store()
        .insert_message(draft)
        .await
        .map_err(|_| SimpleStatusResponse::error("send_media", request_id, "internal error"))?;

    put_head_for(state, message.sender.as_str(), message.receiver.as_str(), message.id, &message.write_time).await;
    metrics::record_message_sent("media");

    let thumbnail_data = match &thumbnail.thumbnail_path {
        Some(path) => tokio::fs::read(path).await.ok().map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
        None => None,
    };

    state
        .presence()
        .push(
            message.receiver.as_str(),
            &NewMediaPush {
                r#type: "new_media",
                from: message.sender.to_string(),
                to: message.receiver.to_string(),
                file_id: session.unique_file_name.clone(),
                file_type: session.file_type.as_str().to_owned(),
                file_name: session.file_name,
                rowid: message.id,
                timestamp: message.write_time.clone(),
            },
        )
        .await;

    Ok(SendMediaOutcome::Final(Box::new(SendMediaFinalResponse {
        r#type: "send_media",
        request_id: request_id.to_owned(),
        status: Status::Success,
        file_id: session.unique_file_name,
        rowid: message.id,
        timestamp: message.write_time,
        file_size: message.file_size.unwrap_or_default(),
        duration: thumbnail.duration,
        thumbnail_data,
    })))
}

pub(crate) async fn download_media(
    state: &AppState,
    request: &DownloadMediaRequest,
    request_id: &str,
) -> Result<DownloadMediaResponse, SimpleStatusResponse> {
    let resolved = match request.download_type.as_str() {
        "avatar" => state.store().avatar_path_for(&request.file_id).await,
        "image" => state.store().attachment_path_for(&request.file_id, AttachmentType::Image).await,
        "video" => state.store().attachment_path_for(&request.file_id, AttachmentType::Video).await,
        "file" => state.store().attachment_path_for(&request.file_id, AttachmentType::File).await,
        "thumbnail" => state.store().thumbnail_path_for(&request.file_id).await,
        other => {
            return Err(SimpleStatusResponse::error(
                "download_media",
                request_id,
                format!("unknown download_type: {other}"),
            ))
        }
    };
    let path = resolved
        .map_err(|_| SimpleStatusResponse::error("download_media", request_id, "internal error"))?
        .ok_or_else(|| SimpleStatusResponse::error("download_media", request_id, "file not found"))?;

    let (bytes, file_size, is_complete) = state
        .media()
        .read_window(std::path::Path::new(&path), request.offset, DOWNLOAD_WINDOW_BYTES)
        .await
        .map_err(|_| SimpleStatusResponse::error("download_media", request_id, "file not found"))?;

    Ok(DownloadMediaResponse {
        r#type: "download_media",
        request_id: request_id.to_owned(),
        status: Status::Success,
        file_data: base64::engine::general_purpose::STANDARD.encode(bytes),
        offset: request.offset,
        file_size,
        is_complete,
    })
}

pub(crate) async fn get_chat_history_paginated(
    state: &AppState,
    caller: &str,
    request: &ChatHistoryRequest,
    request_id: &str,
) -> Result<ChatHistoryResponse, SimpleStatusResponse> {
    if caller != request.username {
        return Err(SimpleStatusResponse::fail("get_chat_history_paginated", request_id, "未登录"));
    }
    let page_size = request.page_size.max(1);
    let mut messages = state
        .store()
        .messages_page(&request.username, &request.friend, request.page, page_size, page_size + 1)
        .await
        .map_err(|_| SimpleStatusResponse::error("get_chat_history_paginated", request_id, "internal error"))?;

    let has_more = messages.len() as i64 > page_size;
    messages.truncate(page_size as usize);

    let records = messages
        .into_iter()
        .map(|message| MessageRecord {
            rowid: message.id,
            from: message.sender.to_string(),
            to: message.receiver.to_string(),
            message: message.text,
            timestamp: message.write_time,
            reply_to: message.reply_to,
            reply_preview: message.reply_preview.map(|preview| ReplyPreviewWire { sender: preview.sender, content: preview.content }),
            attachment_type: message.attachment_type.map(AttachmentType::as_str),
            file_id: message.file_id,
            original_file_name: message.original_file_name,
            file_size: message.file_size,
            duration: message.duration,
        })
        .collect();

    Ok(ChatHistoryResponse {
        r#type: "chat_history",
        request_id: request_id.to_owned(),
        status: Status::Success,
        messages: records,
        page: request.page,
        page_size: request.page_size,
        has_more,
    })
}

pub(crate) async fn delete_messages(
    state: &AppState,
    caller: &str,
    request: &DeleteMessagesRequest,
    request_id: &str,
) -> Result<DeleteMessagesResponse, SimpleStatusResponse> {
    if caller != request.username {
        return Err(SimpleStatusResponse::fail("delete_messages", request_id, "未登录"));
    }
    let ids = request.target_ids();
    if ids.is_empty() {
        return Err(SimpleStatusResponse::fail("delete_messages", request_id, "no message ids supplied"));
    }

    let (deleted, heads) = state.store().delete_owned_messages(caller, &ids).await.map_err(|_| {
        SimpleStatusResponse::fail("delete_messages", request_id, "no permission to delete one or more messages")
    })?;

    for head in &heads {
        state.conversations().put(head.clone()).await;
    }

    let mut peer_rowids: std::collections::HashMap<String, Vec<i64>> = std::collections::HashMap::new();
    for message in &deleted {
        let peer = if message.sender.as_str() == caller { message.receiver.as_str() } else { message.sender.as_str() };
        peer_rowids.entry(peer.to_owned()).or_default().push(message.id);
    }
    for (peer, rowids) in peer_rowids {
        state.presence().push(&peer, &DeletedMessagesPush::new(rowids)).await;
    }

    let (content, write_time) = match heads.first() {
        Some(ConversationHead { last_message_id: Some(last_id), last_update_time, .. }) => {
            match state.store().get_message(*last_id).await {
                Ok(Some(message)) => (message.conversation_content(), last_update_time.clone()),
                _ => (String::new(), last_update_time.clone()),
            }
        }
        Some(head) => (String::new(), head.last_update_time.clone()),
        None => (String::new(), None),
    };

    Ok(DeleteMessagesResponse {
        r#type: "messages_deleted",
        request_id: request_id.to_owned(),
        status: Status::Success,
        deleted_rowids: deleted.iter().map(|message| message.id).collect(),
        content,
        write_time,
    })
}

async fn put_head_for(state: &AppState, sender: &str, receiver: &str, message_id: i64, write_time: &str) {
    let (user_a, user_b) = canonical_pair(sender, receiver);
    state
        .conversations()
        .put(ConversationHead {
            user_a,
            user_b,
            last_message_id: Some(message_id),
            last_update_time: Some(write_time.to_owned()),
        })
        .await;
}
