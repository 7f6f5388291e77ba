//! Request handlers.
//!
//! Each handler takes the application state and the authenticated member and
//! returns wire types from `tessera_engine::protocol`. Routes only extract.

mod events;
mod locks;
mod members;
mod rooms;
mod state;
mod websocket;

pub use events::*;
pub use locks::*;
pub use members::*;
pub use rooms::*;
pub use state::*;
pub use websocket::*;

use sqlx::PgPool;

use crate::db;
use crate::error::{AppError, Result};

/// Fail unless `member_id` belongs to an existing `room_id`.
pub async fn require_member(pool: &PgPool, room_id: &str, member_id: &str) -> Result<()> {
    if db::is_member(pool, room_id, member_id).await? {
        return Ok(());
    }
    if db::room_exists(pool, room_id).await? {
        Err(AppError::Forbidden(format!("{member_id} is not in {room_id}")))
    } else {
        Err(AppError::NotFound(format!("room {room_id}")))
    }
}
