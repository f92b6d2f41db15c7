use serde::{Deserialize, Serialize};

/// The three media kinds a message may carry. `Non-goals` excludes rich
/// text and group chat, not attachment variety, so this stays a closed
/// three-way enum rather than a free-form mime string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    File,
    Image,
    Video,
}

impl AttachmentType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(Self::File),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    /// Directory segment under the media root that holds originals of
    /// this attachment kind. See SPEC_FULL.md §4.3.
    #[must_use]
    pub fn directory(self) -> &'static str {
        match self {
            Self::File => "files",
            Self::Image => "images",
            Self::Video => "videos",
        }
    }

    #[must_use]
    pub fn has_thumbnail(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

#[cfg(test)]
mod tests {
    use super::AttachmentType;

    #[test]
    fn round_trips_through_wire_string() {
        for kind in [AttachmentType::File, AttachmentType::Image, AttachmentType::Video] {
            assert_eq!(AttachmentType::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        assert_eq!(AttachmentType::parse("audio"), None);
    }
}
