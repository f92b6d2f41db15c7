/// Failures a handler or the dispatcher loop can hit. Unlike the wire
/// [`chatcore_protocol::ProtocolError`], these never cross the wire directly —
/// each call site turns one into the `{status:"error", message:...}`
/// response shape appropriate for its request type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("user not found")]
    UserNotFound,
    #[error("username already registered")]
    UsernameTaken,
    #[error("invalid username or password")]
    BadCredentials,
    #[error("not friends")]
    NotFriends,
    #[error("already friends")]
    AlreadyFriends,
    #[error("no permission / not found")]
    NotOwned,
    #[error("upload session not found")]
    UnknownUploadSession,
    #[error("captcha session not found or expired")]
    CaptchaSessionInvalid,
    #[error("captcha answer incorrect")]
    CaptchaMismatch,
    #[error("file not found")]
    FileNotFound,
    #[error("internal error")]
    Internal,
}

impl From<sqlx::Error> for ServerError {
    fn from(error: sqlx::Error) -> Self {
        tracing::error!(event = "db.query", error = %error);
        Self::Internal
    }
}

impl From<std::io::Error> for ServerError {
    fn from(error: std::io::Error) -> Self {
        tracing::error!(event = "io", error = %error);
        Self::Internal
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
