use base64::Engine;
use rand::Rng;
use rand::RngExt;

use chatcore_core::{Username, CAPTCHA_TEXT_LEN};
use chatcore_protocol::{Status, UserRegisterRequest, UserRegisterResponse};

use super::super::clock::now_unix;
use super::super::core::AppState;
use super::super::errors::ServerError;
use super::super::metrics;
use super::super::store::ProfileField;

const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;
const CAPTCHA_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CANDIDATE_GENERATION_ATTEMPTS: u32 = 20;

/// Dispatches `user_register`'s four subtypes through the captcha session
/// state machine (SPEC_FULL.md §4.10), sweeping expired sessions first.
pub(crate) async fn user_register(state: &AppState, request: &UserRegisterRequest, request_id: &str) -> UserRegisterResponse {
    let now = now_unix();
    state.captcha_sessions().sweep_expired(now).await;

    match request.subtype.as_str() {
        "1" => register_1(state, request_id, now).await,
        "2" => register_2(state, request, request_id, now).await,
        "3" => register_3(state, request, request_id, now).await,
        "4" => register_4(state, request, request_id, now).await,
        other => error(request_id, other, format!("unknown register subtype: {other}")),
    }
}

async fn register_1(state: &AppState, request_id: &str, now: i64) -> UserRegisterResponse {
    let username_candidate = match generate_unique_candidate(state).await {
        Ok(candidate) => candidate,
        Err(_) => return error(request_id, "1", "internal error"),
    };
    let captcha_text = random_captcha_text();
    let session_id = ulid::Ulid::new().to_string();
    let captcha_image = encode_captcha(state, &captcha_text);

    state.captcha_sessions().create(session_id.clone(), username_candidate.clone(), captcha_text, now).await;
    metrics::record_captcha_session("issued");

    UserRegisterResponse {
        r#type: "user_register",
        request_id: request_id.to_owned(),
        status: Status::Success,
        subtype: String::from("1"),
        message: String::new(),
        username: Some(username_candidate),
        session_id: Some(session_id),
        captcha_image: Some(captcha_image),
    }
}

async fn register_2(state: &AppState, request: &UserRegisterRequest, request_id: &str, now: i64) -> UserRegisterResponse {
    let Some(session_id) = request.session_id.as_deref() else {
        return error(request_id, "2", "missing session_id");
    };
    let Some(captcha_input) = request.captcha_input.as_deref() else {
        return error(request_id, "2", "missing captcha_input");
    };

    match state.captcha_sessions().verify(session_id, captcha_input, now, random_captcha_text).await {
        Ok(true) => UserRegisterResponse {
            r#type: "user_register",
            request_id: request_id.to_owned(),
            status: Status::Success,
            subtype: String::from("2"),
            message: String::from("验证码正确"),
            username: None,
            session_id: Some(session_id.to_owned()),
            captcha_image: None,
        },
        Ok(false) => match state.captcha_sessions().captcha_text(session_id).await {
            Ok(captcha_text) => UserRegisterResponse {
                r#type: "user_register",
                request_id: request_id.to_owned(),
                status: Status::Fail,
                subtype: String::from("2"),
                message: String::from("验证码错误"),
                username: None,
                session_id: Some(session_id.to_owned()),
                captcha_image: Some(encode_captcha(state, &captcha_text)),
            },
            Err(_) => error(request_id, "2", "captcha session invalid or expired"),
        },
        Err(_) => error(request_id, "2", "captcha session invalid or expired"),
    }
}

async fn register_3(state: &AppState, request: &UserRegisterRequest, request_id: &str, now: i64) -> UserRegisterResponse {
    let Some(session_id) = request.session_id.as_deref() else {
        return error(request_id, "3", "missing session_id");
    };
    let Some(password) = request.password.as_deref() else {
        return error(request_id, "3", "missing password");
    };
    if !password_is_valid(password) {
        return fail(request_id, "3", "密码至少8位且包含大写字母和数字");
    }

    let avatar_bytes = match request.avatar_data.as_deref() {
        Some(data) if !data.is_empty() => match base64::engine::general_purpose::STANDARD.decode(data) {
            Ok(bytes) if bytes.len() <= MAX_AVATAR_BYTES => Some(bytes),
            Ok(_) => return fail(request_id, "3", "头像文件过大"),
            Err(_) => return error(request_id, "3", "invalid avatar_data"),
        },
        _ => None,
    };

    let username_candidate = match state.captcha_sessions().complete(session_id, now).await {
        Ok(username) => username,
        Err(_) => return error(request_id, "3", "captcha session invalid or not verified"),
    };
    let username: Username = match username_candidate.parse() {
        Ok(username) => username,
        Err(_) => return error(request_id, "3", "internal error"),
    };

    if let Err(store_error) = state.store().create_user(&username, password).await {
        return match store_error {
            ServerError::UsernameTaken => fail(request_id, "3", "用户名已被占用"),
            _ => error(request_id, "3", "internal error"),
        };
    }

    if let Some(nickname) = request.nickname.clone().filter(|value| !value.is_empty()) {
        let _ = state.store().update_profile_field(username.as_str(), ProfileField::Nickname(nickname)).await;
    }
    if let Some(sign) = request.sign.clone().filter(|value| !value.is_empty()) {
        let _ = state.store().update_profile_field(username.as_str(), ProfileField::Signature(sign)).await;
    }
    if let Some(bytes) = avatar_bytes {
        let path = state.media().avatar_path(username.as_str(), now);
        if tokio::fs::write(&path, &bytes).await.is_ok() {
            let avatar_id = format!("{}_avatar_{now}", username.as_str());
            let _ = state
                .store()
                .update_profile_field(username.as_str(), ProfileField::Avatar { id: avatar_id, path: path.to_string_lossy().into_owned() })
                .await;
        }
    }

    UserRegisterResponse {
        r#type: "user_register",
        request_id: request_id.to_owned(),
        status: Status::Success,
        subtype: String::from("3"),
        message: String::from("注册成功"),
        username: Some(username.as_str().to_owned()),
        session_id: None,
        captcha_image: None,
    }
}

async fn register_4(state: &AppState, request: &UserRegisterRequest, request_id: &str, now: i64) -> UserRegisterResponse {
    let Some(session_id) = request.session_id.as_deref() else {
        return error(request_id, "4", "missing session_id");
    };

    match state.captcha_sessions().refresh(session_id, now, random_captcha_text).await {
        Ok(()) => match state.captcha_sessions().captcha_text(session_id).await {
            Ok(captcha_text) => UserRegisterResponse {
                r#type: "user_register",
                request_id: request_id.to_owned(),
                status: Status::Success,
                subtype: String::from("4"),
                message: String::new(),
                username: None,
                session_id: Some(session_id.to_owned()),
                captcha_image: Some(encode_captcha(state, &captcha_text)),
            },
            Err(_) => error(request_id, "4", "captcha session invalid"),
        },
        Err(_) => error(request_id, "4", "captcha session invalid or expired"),
    }
}

fn encode_captcha(state: &AppState, captcha_text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(state.captcha_renderer().render(captcha_text))
}

fn password_is_valid(password: &str) -> bool {
    password.chars().count() >= 8 && password.chars().any(|c| c.is_ascii_uppercase()) && password.chars().any(|c| c.is_ascii_digit())
}

async fn generate_unique_candidate(state: &AppState) -> Result<String, ServerError> {
    for _ in 0..CANDIDATE_GENERATION_ATTEMPTS {
        let candidate = random_candidate();
        if state.store().get_user(&candidate).await?.is_none() {
            return Ok(candidate);
        }
    }
    Err(ServerError::Internal)
}

fn random_candidate() -> String {
    let mut rng = rand::rng();
    let digits = rng.random_range(8..=10);
    (0..digits).map(|_| char::from(b'0' + rng.random_range(0..10_u8))).collect()
}

fn random_captcha_text() -> String {
    let mut rng = rand::rng();
    (0..CAPTCHA_TEXT_LEN).map(|_| CAPTCHA_ALPHABET[rng.random_range(0..CAPTCHA_ALPHABET.len())] as char).collect()
}

fn fail(request_id: &str, subtype: &str, message: impl Into<String>) -> UserRegisterResponse {
    UserRegisterResponse {
        r#type: "user_register",
        request_id: request_id.to_owned(),
        status: Status::Fail,
        subtype: subtype.to_owned(),
        message: message.into(),
        username: None,
        session_id: None,
        captcha_image: None,
    }
}

fn error(request_id: &str, subtype: &str, message: impl Into<String>) -> UserRegisterResponse {
    UserRegisterResponse {
        r#type: "user_register",
        request_id: request_id.to_owned(),
        status: Status::Error,
        subtype: subtype.to_owned(),
        message: message.into(),
        username: None,
        session_id: None,
        captcha_image: None,
    }
}
