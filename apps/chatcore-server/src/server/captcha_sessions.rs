use std::collections::HashMap;

use tokio::sync::RwLock;

use chatcore_core::{CaptchaState, CAPTCHA_SESSION_TTL_SECS};

use super::errors::ServerError;

struct CaptchaSession {
    username_candidate: String,
    captcha_text: String,
    created_at_unix: i64,
    state: CaptchaState,
}

/// The C10 captcha session table, keyed by a short opaque session token.
pub(crate) struct CaptchaSessionTable {
    sessions: RwLock<HashMap<String, CaptchaSession>>,
    ttl_secs: i64,
}

impl Default for CaptchaSessionTable {
    fn default() -> Self {
        Self::new(CAPTCHA_SESSION_TTL_SECS)
    }
}

impl CaptchaSessionTable {
    pub(crate) fn new(ttl_secs: i64) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl_secs }
    }

    pub(crate) async fn create(&self, session_id: String, username_candidate: String, captcha_text: String, now_unix: i64) {
        self.sessions.write().await.insert(
            session_id,
            CaptchaSession { username_candidate, captcha_text, created_at_unix: now_unix, state: CaptchaState::Fresh },
        );
    }

    /// Evicts every session older than the TTL (SPEC_FULL.md §4.10, §9
    /// decision 5: run both inline and on a background timer).
    pub(crate) async fn sweep_expired(&self, now_unix: i64) {
        let ttl_secs = self.ttl_secs;
        self.sessions.write().await.retain(|_, session| now_unix - session.created_at_unix <= ttl_secs);
    }

    fn expired(&self, session: &CaptchaSession, now_unix: i64) -> bool {
        now_unix - session.created_at_unix > self.ttl_secs
    }

    pub(crate) async fn username_candidate(&self, session_id: &str) -> Result<String, ServerError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(session_id).ok_or(ServerError::CaptchaSessionInvalid)?;
        Ok(session.username_candidate.clone())
    }

    /// register_2: compares case-insensitively; on match transitions to
    /// Verified, on mismatch regenerates and stays Fresh.
    pub(crate) async fn verify(&self, session_id: &str, input: &str, now_unix: i64, new_captcha_text: impl FnOnce() -> String) -> Result<bool, ServerError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id).ok_or(ServerError::CaptchaSessionInvalid)?;
        if self.expired(session, now_unix) || !session.state.can_verify() {
            return Err(ServerError::CaptchaSessionInvalid);
        }
        if session.captcha_text.eq_ignore_ascii_case(input) {
            session.state = CaptchaState::Verified;
            Ok(true)
        } else {
            session.captcha_text = new_captcha_text();
            session.created_at_unix = now_unix;
            Ok(false)
        }
    }

    /// register_3: requires Verified, consumes the session on success.
    pub(crate) async fn complete(&self, session_id: &str, now_unix: i64) -> Result<String, ServerError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get(session_id).ok_or(ServerError::CaptchaSessionInvalid)?;
        if self.expired(session, now_unix) || !session.state.can_complete() {
            return Err(ServerError::CaptchaSessionInvalid);
        }
        let username = session.username_candidate.clone();
        sessions.remove(session_id);
        Ok(username)
    }

    /// register_4: regenerate the captcha image, reset the TTL clock, stay
    /// Fresh.
    pub(crate) async fn refresh(&self, session_id: &str, now_unix: i64, new_captcha_text: impl FnOnce() -> String) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id).ok_or(ServerError::CaptchaSessionInvalid)?;
        session.captcha_text = new_captcha_text();
        session.created_at_unix = now_unix;
        session.state = CaptchaState::Fresh;
        Ok(())
    }

    pub(crate) async fn captcha_text(&self, session_id: &str) -> Result<String, ServerError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).ok_or(ServerError::CaptchaSessionInvalid)?.captcha_text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::CaptchaSessionTable;

    #[tokio::test]
    async fn verify_transitions_to_verified_on_match() {
        let table = CaptchaSessionTable::default();
        table.create(String::from("s1"), String::from("048213907"), String::from("AB12CD"), 1000).await;
        let ok = table.verify("s1", "ab12cd", 1001, || String::new()).await.unwrap();
        assert!(ok);
        assert!(table.complete("s1", 1002).await.is_ok());
    }

    #[tokio::test]
    async fn verify_rejects_expired_session() {
        let table = CaptchaSessionTable::default();
        table.create(String::from("s1"), String::from("048213907"), String::from("AB12CD"), 1000).await;
        let err = table.verify("s1", "AB12CD", 1000 + 301, || String::new()).await.unwrap_err();
        assert!(matches!(err, super::ServerError::CaptchaSessionInvalid));
    }

    #[tokio::test]
    async fn complete_requires_verified_state() {
        let table = CaptchaSessionTable::default();
        table.create(String::from("s1"), String::from("048213907"), String::from("AB12CD"), 1000).await;
        let err = table.complete("s1", 1001).await.unwrap_err();
        assert!(matches!(err, super::ServerError::CaptchaSessionInvalid));
    }
}
