use serde::Serialize;

/// One friend's projection as embedded in friend-list pushes
/// (SPEC_FULL.md §4.9).
#[derive(Debug, Clone, Serialize)]
pub struct FriendProjection {
    pub username: String,
    pub remarks: String,
    pub sign: String,
    pub online: bool,
}

/// Sent to a user whenever their friend graph changes shape (a friend
/// added or removed), carrying the whole current list.
#[derive(Debug, Clone, Serialize)]
pub struct FriendListUpdatePush {
    pub r#type: &'static str,
    pub friends: Vec<FriendProjection>,
}

impl FriendListUpdatePush {
    #[must_use]
    pub fn new(friends: Vec<FriendProjection>) -> Self {
        Self { r#type: "friend_list_update", friends }
    }
}

/// Sent to a user's own connection when one friend's presence or
/// profile fields change, avoiding a full list resend.
#[derive(Debug, Clone, Serialize)]
pub struct FriendUpdatePush {
    pub r#type: &'static str,
    pub friend: FriendProjection,
}

impl FriendUpdatePush {
    #[must_use]
    pub fn new(friend: FriendProjection) -> Self {
        Self { r#type: "friend_update", friend }
    }
}

/// Real-time delivery of a text message to an online recipient.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessagePush {
    pub r#type: &'static str,
    pub from: String,
    pub to: String,
    pub message: String,
    pub rowid: i64,
    pub timestamp: String,
    pub reply_to: Option<i64>,
}

/// Real-time delivery of a completed media attachment.
#[derive(Debug, Clone, Serialize)]
pub struct NewMediaPush {
    pub r#type: &'static str,
    pub from: String,
    pub to: String,
    pub file_id: String,
    pub file_type: String,
    pub file_name: String,
    pub rowid: i64,
    pub timestamp: String,
}

/// Notifies the other party in a conversation that rows were deleted
/// locally, so their client can drop the same rows if cached.
#[derive(Debug, Clone, Serialize)]
pub struct DeletedMessagesPush {
    pub r#type: &'static str,
    pub rowids: Vec<i64>,
}

impl DeletedMessagesPush {
    #[must_use]
    pub fn new(rowids: Vec<i64>) -> Self {
        Self { r#type: "deleted_messages", rowids }
    }
}

#[cfg(test)]
mod tests {
    use super::{FriendListUpdatePush, FriendProjection};

    #[test]
    fn friend_list_push_carries_type_tag() {
        let push = FriendListUpdatePush::new(vec![FriendProjection {
            username: String::from("bob"),
            remarks: String::new(),
            sign: String::new(),
            online: true,
        }]);
        let encoded = serde_json::to_string(&push).unwrap();
        assert!(encoded.contains("\"type\":\"friend_list_update\""));
    }
}
