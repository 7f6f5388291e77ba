//! Room state: the latest value per state type.

use sqlx::PgPool;

pub async fn get_state(
    pool: &PgPool,
    room_id: &str,
    state_type: &str,
) -> Result<Option<serde_json::Value>, sqlx::Error> {
    let row: Option<(serde_json::Value,)> = sqlx::query_as(
        r#"SELECT content FROM room_state WHERE room_id = $1 AND state_type = $2"#,
    )
    .bind(room_id)
    .bind(state_type)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(content,)| content))
}

/// Replace the value of a state type.
pub async fn put_state(
    pool: &PgPool,
    room_id: &str,
    state_type: &str,
    content: &serde_json::Value,
    sender: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO room_state (room_id, state_type, content, sender)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (room_id, state_type) DO UPDATE SET
            content = EXCLUDED.content,
            sender = EXCLUDED.sender,
            updated_at = now()
        "#,
    )
    .bind(room_id)
    .bind(state_type)
    .bind(content)
    .bind(sender)
    .execute(pool)
    .await?;

    Ok(())
}
