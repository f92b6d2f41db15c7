use std::collections::HashMap;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use chatcore_core::AttachmentType;

use super::errors::ServerError;

/// An in-flight chunked upload, keyed by `request_id` (SPEC_FULL.md §4.6).
pub(crate) struct UploadSession {
    pub(crate) sender: String,
    pub(crate) receiver: String,
    pub(crate) file_name: String,
    pub(crate) file_type: AttachmentType,
    pub(crate) message: String,
    pub(crate) reply_to: Option<i64>,
    pub(crate) unique_file_name: String,
    pub(crate) temp_path: PathBuf,
    pub(crate) total_size: i64,
    pub(crate) received_bytes: i64,
    pub(crate) last_chunk_at_unix: i64,
}

#[derive(Default)]
pub(crate) struct UploadTable {
    sessions: RwLock<HashMap<String, UploadSession>>,
}

impl UploadTable {
    pub(crate) async fn begin(&self, request_id: &str, session: UploadSession) {
        self.sessions.write().await.insert(request_id.to_owned(), session);
    }

    pub(crate) async fn contains(&self, request_id: &str) -> bool {
        self.sessions.read().await.contains_key(request_id)
    }

    /// Appends `chunk` to the session's temp file, bumps its counter, and
    /// refreshes `last_chunk_at_unix` so an idle (not merely slow) upload is
    /// what `sweep_idle` reclaims.
    pub(crate) async fn append_chunk(&self, request_id: &str, chunk: &[u8], now_unix: i64) -> Result<i64, ServerError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(request_id).ok_or(ServerError::UnknownUploadSession)?;
        let mut file = tokio::fs::OpenOptions::new().append(true).create(true).open(&session.temp_path).await?;
        file.write_all(chunk).await?;
        session.received_bytes += chunk.len() as i64;
        session.last_chunk_at_unix = now_unix;
        Ok(session.received_bytes)
    }

    /// Removes and returns the session for finalization (the terminator
    /// chunk).
    pub(crate) async fn finish(&self, request_id: &str) -> Result<UploadSession, ServerError> {
        self.sessions.write().await.remove(request_id).ok_or(ServerError::UnknownUploadSession)
    }

    /// Drops every session belonging to `request_ids`, best-effort removing
    /// their partial temp files (SPEC_FULL.md §9 decision 3).
    pub(crate) async fn abandon(&self, request_ids: &[String]) {
        let mut sessions = self.sessions.write().await;
        for request_id in request_ids {
            if let Some(session) = sessions.remove(request_id) {
                let _ = tokio::fs::remove_file(&session.temp_path).await;
            }
        }
    }

    pub(crate) async fn request_ids_for_connection(&self, sender: &str) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, session)| session.sender == sender)
            .map(|(request_id, _)| request_id.clone())
            .collect()
    }

    /// Drops sessions that haven't received a chunk in over `grace_secs`,
    /// best-effort removing their partial temp files. A dead sender's
    /// disconnect already triggers `abandon` synchronously (§9 decision 3);
    /// this timer catches a sender that stays connected but stops sending.
    pub(crate) async fn sweep_idle(&self, now_unix: i64, grace_secs: i64) {
        let mut sessions = self.sessions.write().await;
        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| now_unix - session.last_chunk_at_unix > grace_secs)
            .map(|(request_id, _)| request_id.clone())
            .collect();
        for request_id in idle {
            if let Some(session) = sessions.remove(&request_id) {
                let _ = tokio::fs::remove_file(&session.temp_path).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{UploadSession, UploadTable};
    use chatcore_core::AttachmentType;

    fn sample_session(temp_path: std::path::PathBuf) -> UploadSession {
        UploadSession {
            sender: String::from("alice"),
            receiver: String::from("bob"),
            file_name: String::from("a.png"),
            file_type: AttachmentType::Image,
            message: String::new(),
            reply_to: None,
            unique_file_name: String::from("unique_a.png"),
            temp_path,
            total_size: 10,
            received_bytes: 0,
            last_chunk_at_unix: 0,
        }
    }

    #[tokio::test]
    async fn append_chunk_accumulates_received_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("upload.part");
        let table = UploadTable::default();
        table.begin("r1", sample_session(temp_path)).await;
        let received = table.append_chunk("r1", b"hello", 1_000).await.unwrap();
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn finish_removes_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("upload.part");
        let table = UploadTable::default();
        table.begin("r1", sample_session(temp_path)).await;
        assert!(table.finish("r1").await.is_ok());
        assert!(!table.contains("r1").await);
    }

    #[tokio::test]
    async fn sweep_idle_drops_sessions_past_the_grace_period_and_keeps_recent_ones() {
        let dir = tempfile::tempdir().unwrap();
        let table = UploadTable::default();

        let mut stale = sample_session(dir.path().join("stale.part"));
        stale.last_chunk_at_unix = 0;
        table.begin("stale", stale).await;

        let mut fresh = sample_session(dir.path().join("fresh.part"));
        fresh.last_chunk_at_unix = 990;
        table.begin("fresh", fresh).await;

        table.sweep_idle(1_000, 300).await;

        assert!(!table.contains("stale").await);
        assert!(table.contains("fresh").await);
    }
}
