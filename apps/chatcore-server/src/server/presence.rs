use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::codec::FrameWriter;

/// A unique handle to one bound connection, so a racing unbind from a
/// stale connection never evicts a newer login for the same username
/// (SPEC_FULL.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn next_token() -> SessionToken {
    SessionToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
}

struct BoundSession {
    token: SessionToken,
    writer: Arc<FrameWriter>,
}

/// Process-wide `username -> LiveSession` table. At most one session per
/// username at any instant.
#[derive(Default)]
pub(crate) struct PresenceTable {
    sessions: RwLock<HashMap<String, BoundSession>>,
}

impl PresenceTable {
    /// Binds `username` to `writer`, returning the token to present to
    /// `unbind` later. Fails if the username is already bound.
    pub(crate) async fn bind(&self, username: &str, writer: Arc<FrameWriter>) -> Result<SessionToken, ()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(username) {
            return Err(());
        }
        let token = next_token();
        sessions.insert(username.to_owned(), BoundSession { token, writer });
        Ok(token)
    }

    /// No-op unless the bound session is exactly the one identified by
    /// `token`.
    pub(crate) async fn unbind(&self, username: &str, token: SessionToken) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(username).is_some_and(|bound| bound.token == token) {
            sessions.remove(username);
        }
    }

    pub(crate) async fn is_online(&self, username: &str) -> bool {
        self.sessions.read().await.contains_key(username)
    }

    /// Looks up the session and writes an encrypted frame through its
    /// write mutex. Failures are logged and swallowed (SPEC_FULL.md §4.4).
    pub(crate) async fn push<T: serde::Serialize>(&self, username: &str, payload: &T) {
        let writer = {
            let sessions = self.sessions.read().await;
            sessions.get(username).map(|bound| Arc::clone(&bound.writer))
        };
        if let Some(writer) = writer {
            if let Err(error) = writer.write_json(payload).await {
                tracing::warn!(event = "presence.push_failed", %username, %error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PresenceTable;
    use crate::server::codec::{FrameKey, FrameWriter};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn loopback_writer() -> Arc<FrameWriter> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, _) = listener.accept().await.unwrap();
        let client = connect.await.unwrap();
        drop(accepted);
        let (_read_half, write_half) = client.into_split();
        Arc::new(FrameWriter::new(FrameKey::from_bytes([1_u8; 32]), write_half))
    }

    #[tokio::test]
    async fn second_bind_for_same_username_is_rejected() {
        let table = PresenceTable::default();
        let writer = loopback_writer().await;
        assert!(table.bind("alice", Arc::clone(&writer)).await.is_ok());
        assert!(table.bind("alice", writer).await.is_err());
        assert!(table.is_online("alice").await);
    }

    #[tokio::test]
    async fn unbind_is_noop_for_a_stale_token() {
        let table = PresenceTable::default();
        let writer = loopback_writer().await;
        let stale_token = table.bind("alice", Arc::clone(&writer)).await.unwrap();
        table.unbind("alice", stale_token).await;
        let fresh_token = table.bind("alice", writer).await.unwrap();
        table.unbind("alice", stale_token).await;
        assert!(table.is_online("alice").await);
        table.unbind("alice", fresh_token).await;
        assert!(!table.is_online("alice").await);
    }
}
