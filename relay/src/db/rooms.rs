//! Rooms, memberships and invites.

use sqlx::PgPool;

/// How a join request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinResult {
    Joined,
    AlreadyMember,
    NotInvited,
}

/// Create a room with its creator as the first member.
pub async fn create_room(
    pool: &PgPool,
    room_id: &str,
    creator: &str,
    name: Option<&str>,
    topic: Option<&str>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO rooms (room_id, name, topic, creator)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(room_id)
    .bind(name)
    .bind(topic)
    .bind(creator)
    .execute(&mut *tx)
    .await?;

    sqlx::query(r#"INSERT INTO room_members (room_id, member_id) VALUES ($1, $2)"#)
        .bind(room_id)
        .bind(creator)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

pub async fn room_exists(pool: &PgPool, room_id: &str) -> Result<bool, sqlx::Error> {
    let result: (bool,) =
        sqlx::query_as(r#"SELECT EXISTS(SELECT 1 FROM rooms WHERE room_id = $1)"#)
            .bind(room_id)
            .fetch_one(pool)
            .await?;

    Ok(result.0)
}

pub async fn is_member(pool: &PgPool, room_id: &str, member_id: &str) -> Result<bool, sqlx::Error> {
    let result: (bool,) = sqlx::query_as(
        r#"SELECT EXISTS(SELECT 1 FROM room_members WHERE room_id = $1 AND member_id = $2)"#,
    )
    .bind(room_id)
    .bind(member_id)
    .fetch_one(pool)
    .await?;

    Ok(result.0)
}

/// Record an invite. Inviting twice, or inviting a member, is a no-op.
pub async fn invite_member(
    pool: &PgPool,
    room_id: &str,
    member_id: &str,
    invited_by: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO room_invites (room_id, member_id, invited_by)
        SELECT $1, $2, $3
        WHERE NOT EXISTS (
            SELECT 1 FROM room_members WHERE room_id = $1 AND member_id = $2
        )
        ON CONFLICT (room_id, member_id) DO NOTHING
        "#,
    )
    .bind(room_id)
    .bind(member_id)
    .bind(invited_by)
    .execute(pool)
    .await?;

    Ok(())
}

/// Turn a pending invite into a membership.
pub async fn join_room(
    pool: &PgPool,
    room_id: &str,
    member_id: &str,
) -> Result<JoinResult, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let invite = sqlx::query(r#"DELETE FROM room_invites WHERE room_id = $1 AND member_id = $2"#)
        .bind(room_id)
        .bind(member_id)
        .execute(&mut *tx)
        .await?;

    let joined = sqlx::query(
        r#"
        INSERT INTO room_members (room_id, member_id)
        SELECT $1, $2
        WHERE $3
        ON CONFLICT (room_id, member_id) DO NOTHING
        "#,
    )
    .bind(room_id)
    .bind(member_id)
    .bind(invite.rows_affected() > 0)
    .execute(&mut *tx)
    .await?;

    let result = if joined.rows_affected() > 0 {
        JoinResult::Joined
    } else {
        let member: (bool,) = sqlx::query_as(
            r#"SELECT EXISTS(SELECT 1 FROM room_members WHERE room_id = $1 AND member_id = $2)"#,
        )
        .bind(room_id)
        .bind(member_id)
        .fetch_one(&mut *tx)
        .await?;
        if member.0 {
            JoinResult::AlreadyMember
        } else {
            JoinResult::NotInvited
        }
    };

    tx.commit().await?;
    Ok(result)
}
