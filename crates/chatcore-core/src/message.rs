use serde::{Deserialize, Serialize};

use crate::attachment::AttachmentType;
use crate::user::Username;

/// A snapshot of the referenced message taken at send time, embedded
/// verbatim in the replying message so it survives later edits or
/// deletes of the original. See SPEC_FULL.md §4.8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub sender: String,
    pub content: String,
}

impl ReplyPreview {
    pub const UNAVAILABLE_CONTENT: &'static str = "消息不可用";
    pub const UNKNOWN_SENDER: &'static str = "未知用户";
    pub const EMPTY_CONTENT: &'static str = "空消息";

    /// The referenced message could not be found at all (e.g. deleted).
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            sender: Self::UNKNOWN_SENDER.to_owned(),
            content: Self::UNAVAILABLE_CONTENT.to_owned(),
        }
    }

    /// The referenced message was found; `text` may be empty (a media
    /// message with no caption and no attachment info), which renders as
    /// `空消息` rather than `消息不可用` — the latter is reserved for the
    /// not-found case handled by [`Self::unavailable`].
    #[must_use]
    pub fn for_message(sender: &str, text: &str, attachment: Option<(AttachmentType, &str)>) -> Self {
        let content = match attachment {
            Some((kind, original_file_name)) => format!("[{}]: {original_file_name}", kind.as_str()),
            None if text.is_empty() => Self::EMPTY_CONTENT.to_owned(),
            None => text.to_owned(),
        };
        Self {
            sender: sender.to_owned(),
            content,
        }
    }
}

/// A durable message row. `id` is assigned by the store on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender: Username,
    pub receiver: Username,
    pub text: String,
    pub write_time: String,
    pub attachment_type: Option<AttachmentType>,
    pub attachment_path: Option<String>,
    pub original_file_name: Option<String>,
    pub thumbnail_path: Option<String>,
    pub file_size: Option<i64>,
    pub duration: Option<f64>,
    pub reply_to: Option<i64>,
    pub reply_preview: Option<ReplyPreview>,
    pub file_id: Option<String>,
}

impl Message {
    /// The string shown in a conversation-list preview for this
    /// message: a localized attachment tag, or the literal text.
    #[must_use]
    pub fn conversation_content(&self) -> String {
        match self.attachment_type {
            Some(AttachmentType::File) => "[文件]".to_owned(),
            Some(AttachmentType::Image) => "[图片]".to_owned(),
            Some(AttachmentType::Video) => "[视频]".to_owned(),
            None => self.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, ReplyPreview};
    use crate::attachment::AttachmentType;

    fn sample(attachment_type: Option<AttachmentType>, text: &str) -> Message {
        Message {
            id: 1,
            sender: "alice".parse().unwrap(),
            receiver: "bob".parse().unwrap(),
            text: text.to_owned(),
            write_time: "2026-08-01 12:00:00".to_owned(),
            attachment_type,
            attachment_path: None,
            original_file_name: None,
            thumbnail_path: None,
            file_size: None,
            duration: None,
            reply_to: None,
            reply_preview: None,
            file_id: None,
        }
    }

    #[test]
    fn conversation_content_prefers_attachment_tag() {
        assert_eq!(sample(Some(AttachmentType::Image), "ignored").conversation_content(), "[图片]");
        assert_eq!(sample(None, "hi").conversation_content(), "hi");
    }

    #[test]
    fn reply_preview_for_media_uses_bracket_format() {
        let preview = ReplyPreview::for_message("alice", "", Some((AttachmentType::File, "report.pdf")));
        assert_eq!(preview.content, "[file]: report.pdf");
    }

    #[test]
    fn reply_preview_for_missing_message_is_unavailable() {
        let preview = ReplyPreview::unavailable();
        assert_eq!(preview.content, ReplyPreview::UNAVAILABLE_CONTENT);
    }

    #[test]
    fn reply_preview_for_found_but_blank_message_is_distinct_from_unavailable() {
        let preview = ReplyPreview::for_message("alice", "", None);
        assert_eq!(preview.content, ReplyPreview::EMPTY_CONTENT);
        assert_ne!(preview.content, ReplyPreview::UNAVAILABLE_CONTENT);
    }
}
