use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;

use chatcore_core::{canonical_pair, AttachmentType, ConversationHead, FriendEdge, Message, ReplyPreview, User, Username};

use super::errors::ServerError;

/// Typed accessors over the relational schema (SPEC_FULL.md §4.2), dual-mode:
/// a real `PgPool` when configured, an in-memory fallback otherwise so the
/// whole handler suite runs without a live database (§10.5).
pub(crate) struct Store {
    pool: Option<PgPool>,
    memory: InMemoryStore,
}

#[derive(Default)]
struct InMemoryStore {
    users: RwLock<HashMap<String, User>>,
    friends: RwLock<HashMap<String, Vec<FriendEdge>>>,
    messages: RwLock<HashMap<i64, Message>>,
    next_message_id: std::sync::atomic::AtomicI64,
    heads: RwLock<HashMap<(String, String), ConversationHead>>,
}

impl Store {
    pub(crate) fn new(pool: Option<PgPool>) -> Self {
        Self { pool, memory: InMemoryStore::default() }
    }

    fn in_memory(&self) -> bool {
        self.pool.is_none()
    }

    pub(crate) async fn create_user(&self, username: &Username, password: &str) -> Result<(), ServerError> {
        if self.in_memory() {
            let mut users = self.memory.users.write().await;
            if users.contains_key(username.as_str()) {
                return Err(ServerError::UsernameTaken);
            }
            users.insert(
                username.as_str().to_owned(),
                User {
                    username: username.clone(),
                    password: password.to_owned(),
                    nickname: None,
                    signature: None,
                    avatar_id: None,
                    avatar_path: None,
                },
            );
            return Ok(());
        }

        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let created_at = now_unix();
        let result = sqlx::query(
            "INSERT INTO users (username, password, created_at_unix) VALUES ($1, $2, $3)
             ON CONFLICT (username) DO NOTHING",
        )
        .bind(username.as_str())
        .bind(password)
        .bind(created_at)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServerError::UsernameTaken);
        }
        Ok(())
    }

    pub(crate) async fn get_user(&self, username: &str) -> Result<Option<User>, ServerError> {
        if self.in_memory() {
            return Ok(self.memory.users.read().await.get(username).cloned());
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT username, password, nickname, signature, avatar_id, avatar_path
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(UserRow::into_user).transpose()?)
    }

    // Passwords are stored and compared in plaintext to match the wire
    // contract exactly (see DESIGN.md) — not a recommendation.
    pub(crate) async fn authenticate(&self, username: &str, password: &str) -> Result<User, ServerError> {
        let user = self.get_user(username).await?.ok_or(ServerError::BadCredentials)?;
        if user.password != password {
            return Err(ServerError::BadCredentials);
        }
        Ok(user)
    }

    pub(crate) async fn update_profile_field(&self, username: &str, field: ProfileField) -> Result<(), ServerError> {
        if self.in_memory() {
            let mut users = self.memory.users.write().await;
            let user = users.get_mut(username).ok_or(ServerError::UserNotFound)?;
            match field {
                ProfileField::Nickname(value) => user.nickname = Some(value),
                ProfileField::Signature(value) => user.signature = Some(value),
                ProfileField::Avatar { id, path } => {
                    user.avatar_id = Some(id);
                    user.avatar_path = Some(path);
                }
            }
            return Ok(());
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let result = match field {
            ProfileField::Nickname(value) => {
                sqlx::query("UPDATE users SET nickname = $1 WHERE username = $2")
                    .bind(value)
                    .bind(username)
                    .execute(pool)
                    .await?
            }
            ProfileField::Signature(value) => {
                sqlx::query("UPDATE users SET signature = $1 WHERE username = $2")
                    .bind(value)
                    .bind(username)
                    .execute(pool)
                    .await?
            }
            ProfileField::Avatar { id, path } => {
                sqlx::query("UPDATE users SET avatar_id = $1, avatar_path = $2 WHERE username = $3")
                    .bind(id)
                    .bind(path)
                    .bind(username)
                    .execute(pool)
                    .await?
            }
        };
        if result.rows_affected() == 0 {
            return Err(ServerError::UserNotFound);
        }
        Ok(())
    }

    /// Inserts both direction edges in one transaction (symmetric closure,
    /// SPEC_FULL.md §3).
    pub(crate) async fn add_friend(&self, a: &str, b: &str) -> Result<(), ServerError> {
        if self.are_friends(a, b).await? {
            return Err(ServerError::AlreadyFriends);
        }
        if self.in_memory() {
            let mut friends = self.memory.friends.write().await;
            friends.entry(a.to_owned()).or_default().push(FriendEdge {
                owner: a.parse().map_err(|_| ServerError::Internal)?,
                other: b.parse().map_err(|_| ServerError::Internal)?,
                remark: None,
            });
            friends.entry(b.to_owned()).or_default().push(FriendEdge {
                owner: b.parse().map_err(|_| ServerError::Internal)?,
                other: a.parse().map_err(|_| ServerError::Internal)?,
                remark: None,
            });
            return Ok(());
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let (user_a, user_b) = canonical_pair(a, b);
        let created_at = now_unix();
        let mut tx = pool.begin().await?;
        sqlx::query(
            "INSERT INTO friendships (user_a, user_b, created_at_unix) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(&user_a)
        .bind(&user_b)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn are_friends(&self, a: &str, b: &str) -> Result<bool, ServerError> {
        if self.in_memory() {
            let friends = self.memory.friends.read().await;
            return Ok(friends.get(a).is_some_and(|edges| edges.iter().any(|e| e.other.as_str() == b)));
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let (user_a, user_b) = canonical_pair(a, b);
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM friendships WHERE user_a = $1 AND user_b = $2")
            .bind(user_a)
            .bind(user_b)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    pub(crate) async fn friends_of(&self, owner: &str) -> Result<Vec<FriendEdge>, ServerError> {
        if self.in_memory() {
            return Ok(self.memory.friends.read().await.get(owner).cloned().unwrap_or_default());
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT user_a, user_b, remarks_for_a FROM friendships WHERE user_a = $1
             UNION ALL
             SELECT user_b, user_a, remarks_for_b FROM friendships WHERE user_b = $1",
        )
        .bind(owner)
        .fetch_all(pool)
        .await?;
        rows.into_iter()
            .map(|(a, b, remark)| {
                Ok(FriendEdge {
                    owner: a.parse().map_err(|_| ServerError::Internal)?,
                    other: b.parse().map_err(|_| ServerError::Internal)?,
                    remark,
                })
            })
            .collect()
    }

    pub(crate) async fn update_remark(&self, owner: &str, other: &str, remark: String) -> Result<(), ServerError> {
        if !self.are_friends(owner, other).await? {
            return Err(ServerError::NotFriends);
        }
        if self.in_memory() {
            let mut friends = self.memory.friends.write().await;
            let edges = friends.get_mut(owner).ok_or(ServerError::NotFriends)?;
            let edge = edges.iter_mut().find(|e| e.other.as_str() == other).ok_or(ServerError::NotFriends)?;
            edge.remark = Some(remark);
            return Ok(());
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let (user_a, user_b) = canonical_pair(owner, other);
        let column = if owner == user_a { "remarks_for_a" } else { "remarks_for_b" };
        let sql = format!("UPDATE friendships SET {column} = $1 WHERE user_a = $2 AND user_b = $3");
        sqlx::query(&sql).bind(remark).bind(user_a).bind(user_b).execute(pool).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn insert_message(&self, draft: MessageDraft) -> Result<Message, ServerError> {
        let reply_preview = match draft.reply_to {
            Some(reply_id) => Some(self.reply_preview_for(reply_id).await?),
            None => None,
        };

        if self.in_memory() {
            let id = self.memory.next_message_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            let message = Message {
                id,
                sender: draft.sender,
                receiver: draft.receiver,
                text: draft.text,
                write_time: draft.write_time,
                attachment_type: draft.attachment_type,
                attachment_path: draft.attachment_path,
                original_file_name: draft.original_file_name,
                thumbnail_path: draft.thumbnail_path,
                file_size: draft.file_size,
                duration: draft.duration,
                reply_to: draft.reply_to,
                reply_preview,
                file_id: draft.file_id,
            };
            self.memory.messages.write().await.insert(id, message.clone());
            self.upsert_head_for(&message).await?;
            return Ok(message);
        }

        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO messages
                (sender, receiver, text, write_time, attachment_type, attachment_path,
                 original_file_name, thumbnail_path, file_size, duration, reply_to,
                 reply_preview_sender, reply_preview_content, file_id)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
             RETURNING id",
        )
        .bind(draft.sender.as_str())
        .bind(draft.receiver.as_str())
        .bind(&draft.text)
        .bind(&draft.write_time)
        .bind(draft.attachment_type.map(AttachmentType::as_str))
        .bind(&draft.attachment_path)
        .bind(&draft.original_file_name)
        .bind(&draft.thumbnail_path)
        .bind(draft.file_size)
        .bind(draft.duration)
        .bind(draft.reply_to)
        .bind(reply_preview.as_ref().map(|p| p.sender.clone()))
        .bind(reply_preview.as_ref().map(|p| p.content.clone()))
        .bind(&draft.file_id)
        .fetch_one(pool)
        .await?;

        let message = Message {
            id: row.0,
            sender: draft.sender,
            receiver: draft.receiver,
            text: draft.text,
            write_time: draft.write_time,
            attachment_type: draft.attachment_type,
            attachment_path: draft.attachment_path,
            original_file_name: draft.original_file_name,
            thumbnail_path: draft.thumbnail_path,
            file_size: draft.file_size,
            duration: draft.duration,
            reply_to: draft.reply_to,
            reply_preview,
            file_id: draft.file_id,
        };
        self.upsert_head_for(&message).await?;
        Ok(message)
    }

    async fn reply_preview_for(&self, reply_id: i64) -> Result<ReplyPreview, ServerError> {
        match self.get_message(reply_id).await? {
            Some(original) => {
                let attachment = original
                    .attachment_type
                    .zip(original.original_file_name.as_deref());
                Ok(ReplyPreview::for_message(original.sender.as_str(), &original.text, attachment))
            }
            None => Ok(ReplyPreview::unavailable()),
        }
    }

    pub(crate) async fn get_message(&self, id: i64) -> Result<Option<Message>, ServerError> {
        if self.in_memory() {
            return Ok(self.memory.messages.read().await.get(&id).cloned());
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(MessageRow::into_message).transpose()?)
    }

    /// `page`/`page_size` compute the offset; `limit` is the row count to
    /// fetch from that offset, which callers pad past `page_size` (e.g.
    /// `page_size + 1`) to detect `has_more` without affecting the offset.
    pub(crate) async fn messages_page(
        &self,
        a: &str,
        b: &str,
        page: i64,
        page_size: i64,
        limit: i64,
    ) -> Result<Vec<Message>, ServerError> {
        let offset = (page.max(1) - 1) * page_size.max(1);
        let limit = limit.max(1);
        if self.in_memory() {
            let mut messages: Vec<Message> = self
                .memory
                .messages
                .read()
                .await
                .values()
                .filter(|m| {
                    (m.sender.as_str() == a && m.receiver.as_str() == b)
                        || (m.sender.as_str() == b && m.receiver.as_str() == a)
                })
                .cloned()
                .collect();
            messages.sort_by(|x, y| y.write_time.cmp(&x.write_time).then(y.id.cmp(&x.id)));
            return Ok(messages.into_iter().skip(offset as usize).take(limit as usize).collect());
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages
             WHERE (sender = $1 AND receiver = $2) OR (sender = $2 AND receiver = $1)
             ORDER BY write_time DESC, id DESC
             OFFSET $3 LIMIT $4",
        )
        .bind(a)
        .bind(b)
        .bind(offset)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Deletes only ids the caller owns (sender or receiver); aborts the
    /// whole batch if any id fails that check (SPEC_FULL.md §4.8). Returns
    /// the deleted rows plus the recomputed head for every affected pair,
    /// so the caller can write the in-process cache through without a
    /// second round trip.
    pub(crate) async fn delete_owned_messages(
        &self,
        caller: &str,
        ids: &[i64],
    ) -> Result<(Vec<Message>, Vec<ConversationHead>), ServerError> {
        if ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let mut deleted = Vec::with_capacity(ids.len());
        if self.in_memory() {
            let mut messages = self.memory.messages.write().await;
            for id in ids {
                let owned = messages.get(id).is_some_and(|m| m.sender.as_str() == caller || m.receiver.as_str() == caller);
                if !owned {
                    return Err(ServerError::NotOwned);
                }
            }
            for id in ids {
                if let Some(message) = messages.remove(id) {
                    deleted.push(message);
                }
            }
            drop(messages);
            let pairs: std::collections::HashSet<(String, String)> =
                deleted.iter().map(|m| canonical_pair(m.sender.as_str(), m.receiver.as_str())).collect();
            let mut heads = Vec::with_capacity(pairs.len());
            for (a, b) in pairs {
                heads.push(self.recompute_head(&a, &b).await?);
            }
            return Ok((deleted, heads));
        }

        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let mut tx = pool.begin().await?;
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE id = ANY($1) AND (sender = $2 OR receiver = $2)",
        )
        .bind(ids)
        .bind(caller)
        .fetch_all(&mut *tx)
        .await?;
        if rows.len() != ids.len() {
            return Err(ServerError::NotOwned);
        }
        for row in &rows {
            deleted.push(row.clone().into_message()?);
        }
        sqlx::query("UPDATE conversations SET last_message_id = NULL WHERE last_message_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE id = ANY($1)").bind(ids).execute(&mut *tx).await?;
        tx.commit().await?;

        let pairs: std::collections::HashSet<(String, String)> =
            deleted.iter().map(|m| canonical_pair(m.sender.as_str(), m.receiver.as_str())).collect();
        let mut heads = Vec::with_capacity(pairs.len());
        for (a, b) in pairs {
            heads.push(self.recompute_head(&a, &b).await?);
        }
        Ok((deleted, heads))
    }

    async fn upsert_head_for(&self, message: &Message) -> Result<(), ServerError> {
        let (a, b) = canonical_pair(message.sender.as_str(), message.receiver.as_str());
        let head = ConversationHead {
            user_a: a.clone(),
            user_b: b.clone(),
            last_message_id: Some(message.id),
            last_update_time: Some(message.write_time.clone()),
        };
        self.put_head(head).await
    }

    /// Recomputes a pair's head from the latest surviving message and
    /// upserts (or nulls) it — SPEC_FULL.md §4.5.
    pub(crate) async fn recompute_head(&self, a: &str, b: &str) -> Result<ConversationHead, ServerError> {
        let latest = self.messages_page(a, b, 1, 1, 1).await?.into_iter().next();
        let (user_a, user_b) = canonical_pair(a, b);
        let head = match latest {
            Some(message) => ConversationHead {
                user_a,
                user_b,
                last_message_id: Some(message.id),
                last_update_time: Some(message.write_time),
            },
            None => ConversationHead { user_a, user_b, last_message_id: None, last_update_time: None },
        };
        self.put_head(head.clone()).await?;
        Ok(head)
    }

    async fn put_head(&self, head: ConversationHead) -> Result<(), ServerError> {
        if self.in_memory() {
            self.memory.heads.write().await.insert((head.user_a.clone(), head.user_b.clone()), head);
            return Ok(());
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        sqlx::query(
            "INSERT INTO conversations (user_a, user_b, last_message_id, last_update_time)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_a, user_b)
             DO UPDATE SET last_message_id = EXCLUDED.last_message_id, last_update_time = EXCLUDED.last_update_time",
        )
        .bind(&head.user_a)
        .bind(&head.user_b)
        .bind(head.last_message_id)
        .bind(&head.last_update_time)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Bulk load used to hydrate the in-process conversation index at
    /// startup (SPEC_FULL.md §4.5).
    pub(crate) async fn all_conversation_heads(&self) -> Result<Vec<ConversationHead>, ServerError> {
        if self.in_memory() {
            return Ok(self.memory.heads.read().await.values().cloned().collect());
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let rows: Vec<(String, String, Option<i64>, Option<String>)> =
            sqlx::query_as("SELECT user_a, user_b, last_message_id, last_update_time FROM conversations")
                .fetch_all(pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(user_a, user_b, last_message_id, last_update_time)| ConversationHead {
                user_a,
                user_b,
                last_message_id,
                last_update_time,
            })
            .collect())
    }

    pub(crate) async fn avatar_path_for(&self, file_id: &str) -> Result<Option<String>, ServerError> {
        if self.in_memory() {
            return Ok(self
                .memory
                .users
                .read()
                .await
                .values()
                .find(|u| u.avatar_id.as_deref() == Some(file_id))
                .and_then(|u| u.avatar_path.clone()));
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT avatar_path FROM users WHERE avatar_id = $1").bind(file_id).fetch_optional(pool).await?;
        Ok(row.and_then(|r| r.0))
    }

    pub(crate) async fn attachment_path_for(
        &self,
        file_id: &str,
        kind: AttachmentType,
    ) -> Result<Option<String>, ServerError> {
        if self.in_memory() {
            return Ok(self
                .memory
                .messages
                .read()
                .await
                .values()
                .find(|m| m.file_id.as_deref() == Some(file_id) && m.attachment_type == Some(kind))
                .and_then(|m| m.attachment_path.clone()));
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT attachment_path FROM messages WHERE file_id = $1 AND attachment_type = $2",
        )
        .bind(file_id)
        .bind(kind.as_str())
        .fetch_optional(pool)
        .await?;
        Ok(row.and_then(|r| r.0))
    }

    pub(crate) async fn thumbnail_path_for(&self, file_id: &str) -> Result<Option<String>, ServerError> {
        if self.in_memory() {
            return Ok(self
                .memory
                .messages
                .read()
                .await
                .values()
                .find(|m| m.file_id.as_deref() == Some(file_id))
                .and_then(|m| m.thumbnail_path.clone()));
        }
        let pool = self.pool.as_ref().expect("pool present when not in-memory");
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT thumbnail_path FROM messages WHERE file_id = $1").bind(file_id).fetch_optional(pool).await?;
        Ok(row.and_then(|r| r.0))
    }
}

pub(crate) enum ProfileField {
    Nickname(String),
    Signature(String),
    Avatar { id: String, path: String },
}

pub(crate) struct MessageDraft {
    pub(crate) sender: Username,
    pub(crate) receiver: Username,
    pub(crate) text: String,
    pub(crate) write_time: String,
    pub(crate) attachment_type: Option<AttachmentType>,
    pub(crate) attachment_path: Option<String>,
    pub(crate) original_file_name: Option<String>,
    pub(crate) thumbnail_path: Option<String>,
    pub(crate) file_size: Option<i64>,
    pub(crate) duration: Option<f64>,
    pub(crate) reply_to: Option<i64>,
    pub(crate) file_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    username: String,
    password: String,
    nickname: Option<String>,
    signature: Option<String>,
    avatar_id: Option<String>,
    avatar_path: Option<String>,
}

impl UserRow {
    fn into_user(self) -> Result<User, ServerError> {
        Ok(User {
            username: self.username.parse().map_err(|_| ServerError::Internal)?,
            password: self.password,
            nickname: self.nickname,
            signature: self.signature,
            avatar_id: self.avatar_id,
            avatar_path: self.avatar_path,
        })
    }
}

#[derive(sqlx::FromRow, Clone)]
struct MessageRow {
    id: i64,
    sender: String,
    receiver: String,
    text: String,
    write_time: String,
    attachment_type: Option<String>,
    attachment_path: Option<String>,
    original_file_name: Option<String>,
    thumbnail_path: Option<String>,
    file_size: Option<i64>,
    duration: Option<f64>,
    reply_to: Option<i64>,
    reply_preview_sender: Option<String>,
    reply_preview_content: Option<String>,
    file_id: Option<String>,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, ServerError> {
        let reply_preview = match (self.reply_preview_sender, self.reply_preview_content) {
            (Some(sender), Some(content)) => Some(ReplyPreview { sender, content }),
            _ => None,
        };
        Ok(Message {
            id: self.id,
            sender: self.sender.parse().map_err(|_| ServerError::Internal)?,
            receiver: self.receiver.parse().map_err(|_| ServerError::Internal)?,
            text: self.text,
            write_time: self.write_time,
            attachment_type: self.attachment_type.as_deref().and_then(AttachmentType::parse),
            attachment_path: self.attachment_path,
            original_file_name: self.original_file_name,
            thumbnail_path: self.thumbnail_path,
            file_size: self.file_size,
            duration: self.duration,
            reply_to: self.reply_to,
            reply_preview,
            file_id: self.file_id,
        })
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{MessageDraft, Store};

    fn draft(sender: &str, receiver: &str, text: &str) -> MessageDraft {
        MessageDraft {
            sender: sender.parse().unwrap(),
            receiver: receiver.parse().unwrap(),
            text: text.to_owned(),
            write_time: String::from("2026-08-01 12:00:00"),
            attachment_type: None,
            attachment_path: None,
            original_file_name: None,
            thumbnail_path: None,
            file_size: None,
            duration: None,
            reply_to: None,
            file_id: None,
        }
    }

    #[tokio::test]
    async fn send_message_updates_conversation_head() {
        let store = Store::new(None);
        let message = store.insert_message(draft("alice", "bob", "hi")).await.unwrap();
        let heads = store.all_conversation_heads().await.unwrap();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].last_message_id, Some(message.id));
    }

    #[tokio::test]
    async fn delete_recomputes_head_to_latest_survivor() {
        let store = Store::new(None);
        let first = store.insert_message(draft("alice", "bob", "one")).await.unwrap();
        let second = store.insert_message(draft("alice", "bob", "two")).await.unwrap();
        store.delete_owned_messages("alice", &[second.id]).await.unwrap();
        let heads = store.all_conversation_heads().await.unwrap();
        assert_eq!(heads[0].last_message_id, Some(first.id));
    }

    #[tokio::test]
    async fn delete_rejects_unowned_ids_atomically() {
        let store = Store::new(None);
        let message = store.insert_message(draft("alice", "bob", "one")).await.unwrap();
        let err = store.delete_owned_messages("carol", &[message.id]).await.unwrap_err();
        assert!(matches!(err, super::ServerError::NotOwned));
        assert!(store.get_message(message.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn messages_page_offset_ignores_the_inflated_has_more_limit() {
        let store = Store::new(None);
        store.insert_message(draft("alice", "bob", "one")).await.unwrap();
        store.insert_message(draft("alice", "bob", "two")).await.unwrap();
        store.insert_message(draft("alice", "bob", "three")).await.unwrap();

        let page_size = 1;
        let first_page = store.messages_page("alice", "bob", 1, page_size, page_size + 1).await.unwrap();
        assert_eq!(first_page[0].text, "three");

        let second_page = store.messages_page("alice", "bob", 2, page_size, page_size + 1).await.unwrap();
        assert_eq!(second_page[0].text, "two");
    }

    #[tokio::test]
    async fn add_friend_is_symmetric_and_rejects_duplicate() {
        let store = Store::new(None);
        store.create_user(&"alice".parse().unwrap(), "secret1A").await.unwrap();
        store.create_user(&"bob".parse().unwrap(), "secret1A").await.unwrap();
        store.add_friend("alice", "bob").await.unwrap();
        assert!(store.are_friends("alice", "bob").await.unwrap());
        assert!(store.are_friends("bob", "alice").await.unwrap());
        let err = store.add_friend("alice", "bob").await.unwrap_err();
        assert!(matches!(err, super::ServerError::AlreadyFriends));
    }
}
