//! Named room locks.

use chrono::{TimeDelta, Utc};
use tessera_engine::protocol::relay::{LockRequest, LockResponse, ReleaseLockRequest};

use crate::auth::AuthMember;
use crate::db;
use crate::error::{AppError, Result};
use crate::AppState;

use super::require_member;

/// Take a lock for at most the configured maximum TTL.
///
/// A live lock held by anyone, the caller included, is a `Conflict`.
pub async fn handle_acquire_lock(
    state: &AppState,
    room_id: &str,
    member: &AuthMember,
    request: LockRequest,
) -> Result<LockResponse> {
    require_member(&state.pool, room_id, &member.member_id).await?;
    if request.key.is_empty() {
        return Err(AppError::BadRequest("lock key is empty".into()));
    }
    let ttl_ms = effective_ttl(request.ttl_ms, state.config.max_lock_ttl_ms)?;

    let token = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires_at = now + TimeDelta::milliseconds(ttl_ms);

    let acquired = db::try_acquire_lock(
        &state.pool,
        room_id,
        &request.key,
        &member.member_id,
        &token,
        now,
        expires_at,
    )
    .await?;

    match acquired {
        Some(expires_at) => {
            tracing::debug!(room_id = %room_id, key = %request.key, holder = %member.member_id, "lock acquired");
            Ok(LockResponse {
                token,
                expires_at: expires_at.timestamp_millis().max(0) as u64,
            })
        }
        None => Err(AppError::Conflict(format!("lock {} is held", request.key))),
    }
}

/// Release a lock. Releasing a lock that expired or was taken over succeeds.
pub async fn handle_release_lock(
    state: &AppState,
    room_id: &str,
    member: &AuthMember,
    request: ReleaseLockRequest,
) -> Result<()> {
    require_member(&state.pool, room_id, &member.member_id).await?;
    let released = db::release_lock(&state.pool, room_id, &request.key, &request.token).await?;
    if released {
        tracing::debug!(room_id = %room_id, key = %request.key, holder = %member.member_id, "lock released");
    } else {
        tracing::debug!(room_id = %room_id, key = %request.key, "lock already expired or taken over");
    }
    Ok(())
}

fn effective_ttl(requested_ms: u64, max_ms: u64) -> Result<i64> {
    if requested_ms == 0 {
        return Err(AppError::BadRequest("lock ttl must be positive".into()));
    }
    Ok(i64::try_from(requested_ms.min(max_ms)).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_capped() {
        assert_eq!(effective_ttl(30_000, 60_000).unwrap(), 30_000);
        assert_eq!(effective_ttl(600_000, 60_000).unwrap(), 60_000);
        assert!(effective_ttl(0, 60_000).is_err());
    }
}
