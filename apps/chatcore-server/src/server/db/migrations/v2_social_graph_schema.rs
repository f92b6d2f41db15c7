use sqlx::{Postgres, Transaction};

const CREATE_FRIENDSHIPS_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS friendships (
                    user_a TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                    user_b TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
                    remarks_for_a TEXT NOT NULL DEFAULT '',
                    remarks_for_b TEXT NOT NULL DEFAULT '',
                    created_at_unix BIGINT NOT NULL,
                    CHECK (user_a < user_b),
                    PRIMARY KEY(user_a, user_b)
                )";
const CREATE_FRIENDSHIPS_USER_B_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_friendships_user_b ON friendships(user_b)";

pub(crate) async fn apply_social_graph_schema(tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_FRIENDSHIPS_TABLE_SQL).execute(&mut **tx).await?;
    sqlx::query(CREATE_FRIENDSHIPS_USER_B_INDEX_SQL).execute(&mut **tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CREATE_FRIENDSHIPS_TABLE_SQL, CREATE_FRIENDSHIPS_USER_B_INDEX_SQL};

    #[test]
    fn social_graph_schema_defines_canonically_ordered_friendships() {
        assert!(CREATE_FRIENDSHIPS_TABLE_SQL.contains("CREATE TABLE IF NOT EXISTS friendships"));
        assert!(CREATE_FRIENDSHIPS_TABLE_SQL.contains("CHECK (user_a < user_b)"));
        assert!(CREATE_FRIENDSHIPS_USER_B_INDEX_SQL.contains("idx_friendships_user_b"));
    }
}
