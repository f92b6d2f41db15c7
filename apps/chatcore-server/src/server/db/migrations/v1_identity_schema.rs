use sqlx::{Postgres, Transaction};

const CREATE_USERS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS users (
                    username TEXT PRIMARY KEY,
                    password TEXT NOT NULL,
                    nickname TEXT NULL,
                    signature TEXT NULL,
                    avatar_id TEXT NULL,
                    avatar_path TEXT NULL,
                    created_at_unix BIGINT NOT NULL
                )";

pub(crate) async fn apply_identity_schema(tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_USERS_TABLE_SQL).execute(&mut **tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::CREATE_USERS_TABLE_SQL;

    #[test]
    fn identity_schema_defines_users_table() {
        assert!(CREATE_USERS_TABLE_SQL.contains("CREATE TABLE IF NOT EXISTS users"));
        assert!(CREATE_USERS_TABLE_SQL.contains("username TEXT PRIMARY KEY"));
    }
}
