use sqlx::{Postgres, Transaction};

const CREATE_MESSAGES_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS messages (
                    id BIGSERIAL PRIMARY KEY,
                    sender TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                    receiver TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                    text TEXT NOT NULL DEFAULT '',
                    write_time TEXT NOT NULL,
                    attachment_type TEXT NULL,
                    attachment_path TEXT NULL,
                    original_file_name TEXT NULL,
                    thumbnail_path TEXT NULL,
                    file_size BIGINT NULL,
                    duration DOUBLE PRECISION NULL,
                    reply_to BIGINT NULL REFERENCES messages(id) ON DELETE SET NULL,
                    reply_preview_sender TEXT NULL,
                    reply_preview_content TEXT NULL,
                    file_id TEXT NULL
                )";
const CREATE_MESSAGES_PAIR_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender, receiver, id DESC)";
const CREATE_CONVERSATIONS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS conversations (
                    user_a TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                    user_b TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                    last_message_id BIGINT NULL,
                    last_update_time TEXT NULL,
                    CHECK (user_a < user_b),
                    PRIMARY KEY(user_a, user_b)
                )";

pub(crate) async fn apply_message_schema(tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_MESSAGES_TABLE_SQL).execute(&mut **tx).await?;
    sqlx::query(CREATE_MESSAGES_PAIR_INDEX_SQL).execute(&mut **tx).await?;
    sqlx::query(CREATE_CONVERSATIONS_TABLE_SQL).execute(&mut **tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CREATE_CONVERSATIONS_TABLE_SQL, CREATE_MESSAGES_PAIR_INDEX_SQL, CREATE_MESSAGES_TABLE_SQL};

    #[test]
    fn message_schema_defines_messages_and_conversation_heads() {
        assert!(CREATE_MESSAGES_TABLE_SQL.contains("CREATE TABLE IF NOT EXISTS messages"));
        assert!(CREATE_MESSAGES_PAIR_INDEX_SQL.contains("idx_messages_pair"));
        assert!(CREATE_CONVERSATIONS_TABLE_SQL.contains("CHECK (user_a < user_b)"));
    }
}
