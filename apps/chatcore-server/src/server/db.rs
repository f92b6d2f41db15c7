mod migrations;

use self::migrations::v1_identity_schema::apply_identity_schema;
use self::migrations::v2_social_graph_schema::apply_social_graph_schema;
use self::migrations::v3_message_schema::apply_message_schema;

use super::core::AppState;
use super::errors::ServerError;

pub(crate) async fn ensure_db_schema(state: &AppState) -> Result<(), ServerError> {
    const SCHEMA_INIT_LOCK_ID: i64 = 0x6368_6174_636f_7265;
    let Some(pool) = state.db_pool() else {
        return Ok(());
    };

    state
        .db_init()
        .get_or_try_init(|| async move {
            let mut tx = pool.begin().await?;
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(SCHEMA_INIT_LOCK_ID)
                .execute(&mut *tx)
                .await?;

            apply_identity_schema(&mut tx).await?;
            apply_social_graph_schema(&mut tx).await?;
            apply_message_schema(&mut tx).await?;

            tx.commit().await?;

            Ok::<(), sqlx::Error>(())
        })
        .await
        .map_err(|e| {
            tracing::error!(event = "db.init", error = %e);
            ServerError::Internal
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::ensure_db_schema;
    use crate::server::core::{AppConfig, AppState};

    #[tokio::test]
    async fn schema_init_is_noop_and_idempotent_without_database_pool() {
        let state = AppState::new(&AppConfig::default()).await.expect("app state should initialize");
        ensure_db_schema(&state).await.expect("schema init without database should succeed");
        ensure_db_schema(&state).await.expect("schema init should be idempotent");
    }
}
