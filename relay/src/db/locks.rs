//! Expiring named locks scoped to a room.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Take `lock_key` unless another holder's lock is still live.
///
/// Returns the expiry on success and `None` on contention. An expired lock is
/// taken over in the same statement.
pub async fn try_acquire_lock(
    pool: &PgPool,
    room_id: &str,
    lock_key: &str,
    holder: &str,
    token: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        INSERT INTO locks (room_id, lock_key, holder, token, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (room_id, lock_key) DO UPDATE SET
            holder = EXCLUDED.holder,
            token = EXCLUDED.token,
            expires_at = EXCLUDED.expires_at
        WHERE locks.expires_at <= $6
        RETURNING expires_at
        "#,
    )
    .bind(room_id)
    .bind(lock_key)
    .bind(holder)
    .bind(token)
    .bind(expires_at)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(expires_at,)| expires_at))
}

/// Release a lock if `token` still owns it. Returns whether a row was removed.
pub async fn release_lock(
    pool: &PgPool,
    room_id: &str,
    lock_key: &str,
    token: &str,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query(r#"DELETE FROM locks WHERE room_id = $1 AND lock_key = $2 AND token = $3"#)
            .bind(room_id)
            .bind(lock_key)
            .bind(token)
            .execute(pool)
            .await?;

    Ok(result.rows_affected() > 0)
}
