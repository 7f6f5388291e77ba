//! Member registration.

use tessera_engine::protocol::relay::{RegisterMemberRequest, RegisterMemberResponse};

use crate::db;
use crate::error::{AppError, Result};
use crate::AppState;

const MAX_USERNAME_LEN: usize = 128;

/// Register a member and hand out its access token.
pub async fn handle_register(
    state: &AppState,
    request: RegisterMemberRequest,
) -> Result<RegisterMemberResponse> {
    validate_username(&request.username)?;

    let member_id = state.config.member_id(&request.username);
    let access_token = format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );

    match db::insert_member(
        &state.pool,
        &member_id,
        &request.username,
        request.display_name.as_deref(),
        &access_token,
    )
    .await
    {
        Ok(()) => {}
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(AppError::Conflict(format!(
                "username {} is taken",
                request.username
            )));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(member_id = %member_id, "member registered");
    Ok(RegisterMemberResponse {
        member_id,
        access_token,
    })
}

fn validate_username(username: &str) -> Result<()> {
    let valid = !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '='));
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid username '{username}'")))
    }
}
