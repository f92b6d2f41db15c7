use serde::{Deserialize, Serialize};

/// The lexicographically-sorted `(min, max)` tuple used to key a
/// conversation head so `{a,b}` and `{b,a}` always map to one entry.
#[must_use]
pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_owned(), b.to_owned())
    } else {
        (b.to_owned(), a.to_owned())
    }
}

/// The `(last_message_id, last_update_time)` summary for a canonical
/// pair. `last_message_id = None` means the pair has no surviving
/// messages; the row itself is still kept so readers can distinguish
/// "never messaged" from "messaged, then deleted everything".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHead {
    pub user_a: String,
    pub user_b: String,
    pub last_message_id: Option<i64>,
    pub last_update_time: Option<String>,
}

impl ConversationHead {
    #[must_use]
    pub fn empty(a: &str, b: &str) -> Self {
        let (user_a, user_b) = canonical_pair(a, b);
        Self {
            user_a,
            user_b,
            last_message_id: None,
            last_update_time: None,
        }
    }

    #[must_use]
    pub fn other(&self, username: &str) -> Option<&str> {
        if self.user_a == username {
            Some(&self.user_b)
        } else if self.user_b == username {
            Some(&self.user_a)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{canonical_pair, ConversationHead};

    #[test]
    fn canonical_pair_sorts_lexicographically() {
        assert_eq!(canonical_pair("bob", "alice"), (String::from("alice"), String::from("bob")));
    }

    #[test]
    fn other_returns_none_for_unrelated_user() {
        let head = ConversationHead::empty("alice", "bob");
        assert_eq!(head.other("alice"), Some("bob"));
        assert_eq!(head.other("carol"), None);
    }
}
