use std::sync::Arc;

use base64::Engine;

use chatcore_protocol::{
    AddFriendRequest, AddFriendResponse, AuthenticateRequest, FriendListUpdatePush, FriendProjection,
    FriendUpdatePush, GetUserInfoRequest, SimpleStatusResponse, Status, UpdateNameRequest, UpdateRemarksRequest,
    UpdateSignRequest, UploadAvatarRequest, UserInfoResponse,
};

use super::super::clock::now_unix;
use super::super::codec::FrameWriter;
use super::super::core::AppState;
use super::super::errors::ServerError;
use super::super::presence::SessionToken;
use super::super::store::ProfileField;

const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;

/// What `authenticate` did, beyond the wire response: the dispatcher needs
/// the bound username/token pair to unbind on disconnect (SPEC_FULL.md §4.4).
pub(crate) struct AuthenticateOutcome {
    pub(crate) response: SimpleStatusResponse,
    pub(crate) bound: Option<(String, SessionToken)>,
}

pub(crate) async fn authenticate(
    state: &AppState,
    writer: Arc<FrameWriter>,
    request: &AuthenticateRequest,
    request_id: &str,
) -> AuthenticateOutcome {
    let user = match state.store().authenticate(&request.username, &request.password).await {
        Ok(user) => user,
        Err(_) => {
            return AuthenticateOutcome {
                response: SimpleStatusResponse::fail("authenticate", request_id, "账号或密码错误"),
                bound: None,
            }
        }
    };

    let token = match state.presence().bind(user.username.as_str(), writer).await {
        Ok(token) => token,
        Err(()) => {
            return AuthenticateOutcome {
                response: SimpleStatusResponse::fail("authenticate", request_id, "该账号已登录"),
                bound: None,
            }
        }
    };

    let username = user.username.as_str().to_owned();
    if let Ok(friends) = full_friend_list(state, &username).await {
        state.presence().push(&username, &FriendListUpdatePush::new(friends)).await;
    }
    notify_friends_changed(state, &username, Some(&username)).await;

    AuthenticateOutcome { response: SimpleStatusResponse::ok("authenticate", request_id, ""), bound: Some((username, token)) }
}

pub(crate) async fn add_friend(
    state: &AppState,
    caller: &str,
    request: &AddFriendRequest,
    request_id: &str,
) -> Result<AddFriendResponse, SimpleStatusResponse> {
    if caller != request.username {
        return Err(SimpleStatusResponse::fail("add_friend", request_id, "未登录"));
    }
    if request.username == request.friend {
        return Err(SimpleStatusResponse::fail("add_friend", request_id, "不能添加自己为好友"));
    }
    let candidate_exists = state
        .store()
        .get_user(&request.friend)
        .await
        .map_err(|_| SimpleStatusResponse::error("add_friend", request_id, "internal error"))?
        .is_some();
    if !candidate_exists {
        return Err(SimpleStatusResponse::error("add_friend", request_id, "user not found"));
    }

    state.store().add_friend(&request.username, &request.friend).await.map_err(|error| match error {
        ServerError::AlreadyFriends => SimpleStatusResponse::fail("add_friend", request_id, "已经是好友"),
        _ => SimpleStatusResponse::error("add_friend", request_id, "internal error"),
    })?;

    push_scoped_update(state, &request.username, &request.friend).await;
    push_scoped_update(state, &request.friend, &request.username).await;

    Ok(AddFriendResponse {
        r#type: "add_friend",
        request_id: request_id.to_owned(),
        status: Status::Success,
        message: String::from("好友添加成功"),
    })
}

pub(crate) async fn update_remarks(
    state: &AppState,
    caller: &str,
    request: &UpdateRemarksRequest,
    request_id: &str,
) -> SimpleStatusResponse {
    if caller != request.username {
        return SimpleStatusResponse::fail("Update_Remarks", request_id, "未登录");
    }
    match state.store().update_remark(&request.username, &request.friend, request.remarks.clone()).await {
        Ok(()) => {
            push_scoped_update(state, &request.username, &request.friend).await;
            SimpleStatusResponse::ok("Update_Remarks", request_id, "备注更新成功")
        }
        Err(ServerError::NotFriends) => SimpleStatusResponse::fail("Update_Remarks", request_id, "不是好友关系"),
        Err(_) => SimpleStatusResponse::error("Update_Remarks", request_id, "internal error"),
    }
}

pub(crate) async fn update_sign(state: &AppState, caller: &str, request: &UpdateSignRequest, request_id: &str) -> SimpleStatusResponse {
    if caller != request.username {
        return SimpleStatusResponse::fail("update_sign", request_id, "未登录");
    }
    match state.store().update_profile_field(&request.username, ProfileField::Signature(request.sign.clone())).await {
        Ok(()) => {
            notify_friends_changed(state, &request.username, Some(&request.username)).await;
            SimpleStatusResponse::ok("update_sign", request_id, "签名更新成功")
        }
        Err(_) => SimpleStatusResponse::error("update_sign", request_id, "internal error"),
    }
}

pub(crate) async fn update_name(state: &AppState, caller: &str, request: &UpdateNameRequest, request_id: &str) -> SimpleStatusResponse {
    if caller != request.username {
        return SimpleStatusResponse::fail("update_name", request_id, "未登录");
    }
    match state.store().update_profile_field(&request.username, ProfileField::Nickname(request.new_name.clone())).await {
        Ok(()) => {
            notify_friends_changed(state, &request.username, Some(&request.username)).await;
            SimpleStatusResponse::ok("update_name", request_id, "昵称更新成功")
        }
        Err(_) => SimpleStatusResponse::error("update_name", request_id, "internal error"),
    }
}

pub(crate) async fn upload_avatar(state: &AppState, caller: &str, request: &UploadAvatarRequest, request_id: &str) -> SimpleStatusResponse {
    if caller != request.username {
        return SimpleStatusResponse::fail("upload_avatar", request_id, "未登录");
    }
    let bytes = match base64::engine::general_purpose::STANDARD.decode(&request.file_data) {
        Ok(bytes) => bytes,
        Err(_) => return SimpleStatusResponse::error("upload_avatar", request_id, "invalid file_data"),
    };
    if bytes.len() > MAX_AVATAR_BYTES {
        return SimpleStatusResponse::fail("upload_avatar", request_id, "头像文件过大");
    }

    let now = now_unix();
    let path = state.media().avatar_path(&request.username, now);
    if let Err(error) = tokio::fs::write(&path, &bytes).await {
        tracing::warn!(event = "social.avatar_write_failed", %error);
        return SimpleStatusResponse::error("upload_avatar", request_id, "internal error");
    }

    let avatar_id = format!("{}_avatar_{now}", request.username);
    match state
        .store()
        .update_profile_field(&request.username, ProfileField::Avatar { id: avatar_id, path: path.to_string_lossy().into_owned() })
        .await
    {
        Ok(()) => {
            notify_friends_changed(state, &request.username, Some(&request.username)).await;
            SimpleStatusResponse::ok("upload_avatar", request_id, "头像更新成功")
        }
        Err(_) => SimpleStatusResponse::error("upload_avatar", request_id, "internal error"),
    }
}

pub(crate) async fn get_user_info(
    state: &AppState,
    request: &GetUserInfoRequest,
    request_id: &str,
) -> Result<UserInfoResponse, SimpleStatusResponse> {
    let user = state
        .store()
        .get_user(&request.username)
        .await
        .map_err(|_| SimpleStatusResponse::error("get_user_info", request_id, "internal error"))?
        .ok_or_else(|| SimpleStatusResponse::error("get_user_info", request_id, "user not found"))?;

    Ok(UserInfoResponse {
        r#type: "get_user_info",
        request_id: request_id.to_owned(),
        status: Status::Success,
        username: user.username.as_str().to_owned(),
        nickname: user.nickname.unwrap_or_default(),
        sign: user.signature.unwrap_or_default(),
        avatar: user.avatar_id,
    })
}

async fn push_scoped_update(state: &AppState, viewer: &str, other: &str) {
    if let Ok(projection) = projection_for(state, viewer, other).await {
        state.presence().push(viewer, &FriendUpdatePush::new(projection)).await;
    }
}

async fn projection_for(state: &AppState, viewer: &str, other: &str) -> Result<FriendProjection, ServerError> {
    let edges = state.store().friends_of(viewer).await?;
    let remark = edges.iter().find(|edge| edge.other.as_str() == other).and_then(|edge| edge.remark.clone()).unwrap_or_default();
    let other_user = state.store().get_user(other).await?;
    let sign = other_user.and_then(|user| user.signature).unwrap_or_default();
    let online = state.presence().is_online(other).await;
    Ok(FriendProjection { username: other.to_owned(), remarks: remark, sign, online })
}

async fn full_friend_list(state: &AppState, viewer: &str) -> Result<Vec<FriendProjection>, ServerError> {
    let edges = state.store().friends_of(viewer).await?;
    let mut projections = Vec::with_capacity(edges.len());
    for edge in edges {
        let other_user = state.store().get_user(edge.other.as_str()).await?;
        let sign = other_user.and_then(|user| user.signature).unwrap_or_default();
        let online = state.presence().is_online(edge.other.as_str()).await;
        projections.push(FriendProjection { username: edge.other.as_str().to_owned(), remarks: edge.remark.unwrap_or_default(), sign, online });
    }
    Ok(projections)
}

/// Fans a `friend_update` (or, with no `changed_peer`, a full friend list)
/// out to `friends(username) ∪ {username}` (SPEC_FULL.md §4.4).
pub(crate) async fn notify_friends_changed(state: &AppState, username: &str, changed_peer: Option<&str>) {
    let mut affected: Vec<String> = match state.store().friends_of(username).await {
        Ok(edges) => edges.into_iter().map(|edge| edge.other.as_str().to_owned()).collect(),
        Err(error) => {
            tracing::warn!(event = "social.fanout_lookup_failed", %error);
            Vec::new()
        }
    };
    affected.push(username.to_owned());

    for member in affected {
        if !state.presence().is_online(&member).await {
            continue;
        }
        match changed_peer {
            Some(peer) => push_scoped_update(state, &member, peer).await,
            None => match full_friend_list(state, &member).await {
                Ok(friends) => state.presence().push(&member, &FriendListUpdatePush::new(friends)).await,
                Err(error) => tracing::warn!(event = "social.friend_list_failed", %error),
            },
        }
    }
}
