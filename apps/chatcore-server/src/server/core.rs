use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::{OnceCell, RwLock};

use chatcore_core::ConversationHead;

use super::captcha_image::{BlockCaptchaRenderer, CaptchaRenderer};
use super::captcha_sessions::CaptchaSessionTable;
use super::clock::now_unix;
use super::codec::FrameKey;
use super::media::MediaStore;
use super::presence::PresenceTable;
use super::store::Store;
use super::uploads::UploadTable;
use super::video_probe::{FfmpegVideoProbe, VideoProbe};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_MEDIA_ROOT: &str = "./data/media";
pub const DEFAULT_CAPTCHA_TTL_SECS: i64 = chatcore_core::CAPTCHA_SESSION_TTL_SECS;
pub const DEFAULT_UPLOAD_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_FRAME_BYTES: usize = chatcore_protocol::MAX_FRAME_BYTES;

/// Process configuration (SPEC_FULL.md §10.2), env-driven with local-dev
/// defaults. No command-line flag parser: the environment is the only
/// configuration surface this ambient layer adds.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub media_root: PathBuf,
    pub frame_key: [u8; 32],
    pub captcha_ttl_secs: i64,
    pub upload_sweep_interval_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: String::from(DEFAULT_HOST),
            port: DEFAULT_PORT,
            database_url: None,
            media_root: PathBuf::from(DEFAULT_MEDIA_ROOT),
            frame_key: [0_u8; 32],
            captcha_ttl_secs: DEFAULT_CAPTCHA_TTL_SECS,
            upload_sweep_interval_secs: DEFAULT_UPLOAD_SWEEP_INTERVAL_SECS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl AppConfig {
    /// Reads `CHATCORE_*` environment variables, falling back to
    /// [`AppConfig::default`] for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("CHATCORE_HOST").unwrap_or(defaults.host),
            port: std::env::var("CHATCORE_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.port),
            database_url: std::env::var("CHATCORE_DATABASE_URL").ok(),
            media_root: std::env::var("CHATCORE_MEDIA_ROOT").map(PathBuf::from).unwrap_or(defaults.media_root),
            frame_key: std::env::var("CHATCORE_FRAME_KEY")
                .ok()
                .and_then(|hex| parse_frame_key_hex(&hex))
                .unwrap_or(defaults.frame_key),
            captcha_ttl_secs: std::env::var("CHATCORE_CAPTCHA_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.captcha_ttl_secs),
            upload_sweep_interval_secs: std::env::var("CHATCORE_UPLOAD_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.upload_sweep_interval_secs),
            max_frame_bytes: std::env::var("CHATCORE_MAX_FRAME_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_frame_bytes),
        }
    }
}

fn parse_frame_key_hex(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 {
        return None;
    }
    let mut key = [0_u8; 32];
    for (index, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16).ok()?;
    }
    Some(key)
}

/// In-process cache of conversation heads, hydrated once at startup from
/// [`Store::all_conversation_heads`] and kept current write-through by
/// every send/delete (SPEC_FULL.md §4.5). The persistent `conversations`
/// table remains the source of truth; this is purely a read accelerator.
#[derive(Default)]
pub(crate) struct ConversationIndex {
    heads: RwLock<HashMap<(String, String), ConversationHead>>,
}

impl ConversationIndex {
    async fn hydrate(&self, heads: Vec<ConversationHead>) {
        let mut table = self.heads.write().await;
        for head in heads {
            table.insert((head.user_a.clone(), head.user_b.clone()), head);
        }
    }

    pub(crate) async fn put(&self, head: ConversationHead) {
        self.heads.write().await.insert((head.user_a.clone(), head.user_b.clone()), head);
    }

    pub(crate) async fn get(&self, a: &str, b: &str) -> Option<ConversationHead> {
        let (user_a, user_b) = chatcore_core::canonical_pair(a, b);
        self.heads.read().await.get(&(user_a, user_b)).cloned()
    }
}

/// All process-wide state a connection handler needs, assembled once at
/// startup and shared behind an `Arc` across every spawned connection task
/// (mirrors the teacher's single-`AppState`-per-process shape).
#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
    presence: Arc<PresenceTable>,
    uploads: Arc<UploadTable>,
    captcha_sessions: Arc<CaptchaSessionTable>,
    conversations: Arc<ConversationIndex>,
    media: Arc<MediaStore>,
    video_probe: Arc<dyn VideoProbe>,
    captcha_renderer: Arc<dyn CaptchaRenderer>,
    frame_key: FrameKey,
    max_frame_bytes: usize,
    db_pool: Option<PgPool>,
    db_init: Arc<OnceCell<()>>,
}

impl AppState {
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let db_pool = match &config.database_url {
            Some(database_url) => Some(
                PgPoolOptions::new()
                    .max_connections(10)
                    .connect_lazy(database_url)
                    .map_err(|e| anyhow!("postgres pool init failed: {e}"))?,
            ),
            None => None,
        };

        let video_probe: Arc<dyn VideoProbe> = Arc::new(FfmpegVideoProbe);
        let media = MediaStore::new(config.media_root.clone(), Arc::clone(&video_probe))
            .context("media root init failed")?;

        let store = Arc::new(Store::new(db_pool.clone()));
        let conversations = Arc::new(ConversationIndex::default());
        conversations
            .hydrate(store.all_conversation_heads().await.map_err(|_| anyhow!("conversation head hydration failed"))?)
            .await;

        Ok(Self {
            store,
            presence: Arc::new(PresenceTable::default()),
            uploads: Arc::new(UploadTable::default()),
            captcha_sessions: Arc::new(CaptchaSessionTable::new(config.captcha_ttl_secs)),
            conversations,
            media: Arc::new(media),
            video_probe,
            captcha_renderer: Arc::new(BlockCaptchaRenderer),
            frame_key: FrameKey::from_bytes(config.frame_key),
            max_frame_bytes: config.max_frame_bytes,
            db_pool,
            db_init: Arc::new(OnceCell::new()),
        })
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub(crate) fn uploads(&self) -> &UploadTable {
        &self.uploads
    }

    pub(crate) fn captcha_sessions(&self) -> &CaptchaSessionTable {
        &self.captcha_sessions
    }

    pub(crate) fn conversations(&self) -> &ConversationIndex {
        &self.conversations
    }

    pub(crate) fn media(&self) -> &MediaStore {
        &self.media
    }

    pub(crate) fn video_probe(&self) -> &Arc<dyn VideoProbe> {
        &self.video_probe
    }

    pub(crate) fn captcha_renderer(&self) -> &Arc<dyn CaptchaRenderer> {
        &self.captcha_renderer
    }

    pub(crate) fn frame_key(&self) -> FrameKey {
        self.frame_key.clone()
    }

    pub(crate) fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub(crate) fn db_pool(&self) -> Option<&PgPool> {
        self.db_pool.as_ref()
    }

    pub(crate) fn db_init(&self) -> &OnceCell<()> {
        &self.db_init
    }

    /// Evicts expired captcha sessions. Called inline on every
    /// `user_register` request and from the binary's background sweep
    /// timer (SPEC_FULL.md §9 decision 5).
    pub async fn sweep_expired_captcha_sessions(&self) {
        self.captcha_sessions.sweep_expired(now_unix()).await;
    }

    /// Reclaims upload sessions idle past `grace_secs` — a sender that
    /// stays connected but stops chunking, as opposed to the disconnect
    /// path in `dispatcher::on_disconnect` (SPEC_FULL.md §9 decision 3).
    pub async fn sweep_idle_uploads(&self, grace_secs: i64) {
        self.uploads.sweep_idle(now_unix(), grace_secs).await;
    }

    /// Applies the persistent schema, a no-op when running without a
    /// database pool (in-memory mode).
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        super::db::ensure_db_schema(self).await.map_err(|e| anyhow!("schema init failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, AppState};

    #[tokio::test]
    async fn new_state_hydrates_empty_conversation_index_without_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.media_root = dir.path().to_path_buf();
        let state = AppState::new(&config).await.unwrap();
        assert!(state.conversations().get("alice", "bob").await.is_none());
        assert!(state.db_pool().is_none());
    }

    #[test]
    fn frame_key_env_hex_must_be_64_chars() {
        assert!(super::parse_frame_key_hex("ab").is_none());
        assert!(super::parse_frame_key_hex(&"ab".repeat(32)).is_some());
    }
}
