use serde::{Deserialize, Serialize};

use crate::user::Username;

/// One directed edge in the friend graph. The graph invariant (symmetric
/// closure) is enforced by the store gateway, not by this type: a
/// `FriendEdge` on its own does not know whether its mirror exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendEdge {
    pub owner: Username,
    pub other: Username,
    pub remark: Option<String>,
}

impl FriendEdge {
    #[must_use]
    pub fn mirror(&self) -> FriendEdge {
        FriendEdge {
            owner: self.other.clone(),
            other: self.owner.clone(),
            remark: None,
        }
    }

    #[must_use]
    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.remark.as_deref().filter(|r| !r.is_empty()).unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::FriendEdge;

    #[test]
    fn mirror_swaps_owner_and_other_and_drops_remark() {
        let edge = FriendEdge {
            owner: "alice".parse().unwrap(),
            other: "bob".parse().unwrap(),
            remark: Some(String::from("bestie")),
        };
        let mirror = edge.mirror();
        assert_eq!(mirror.owner.as_str(), "bob");
        assert_eq!(mirror.other.as_str(), "alice");
        assert_eq!(mirror.remark, None);
    }

    #[test]
    fn display_name_prefers_remark() {
        let edge = FriendEdge {
            owner: "alice".parse().unwrap(),
            other: "bob".parse().unwrap(),
            remark: Some(String::from("bestie")),
        };
        assert_eq!(edge.display_name("bob"), "bestie");
    }
}
