//! Members and their access tokens.

use sqlx::{PgPool, Row};

/// A registered member.
#[derive(Debug, Clone)]
pub struct StoredMember {
    pub member_id: String,
    pub username: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredMember {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredMember {
            member_id: row.try_get("member_id")?,
            username: row.try_get("username")?,
        })
    }
}

/// Insert a member. Fails with a unique violation when the username or id is taken.
pub async fn insert_member(
    pool: &PgPool,
    member_id: &str,
    username: &str,
    display_name: Option<&str>,
    access_token: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO members (member_id, username, display_name, access_token)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(member_id)
    .bind(username)
    .bind(display_name)
    .bind(access_token)
    .execute(pool)
    .await?;

    Ok(())
}

/// Resolve the member owning an access token.
pub async fn member_by_token(
    pool: &PgPool,
    access_token: &str,
) -> Result<Option<StoredMember>, sqlx::Error> {
    sqlx::query_as::<_, StoredMember>(
        r#"
        SELECT member_id, username
        FROM members
        WHERE access_token = $1
        "#,
    )
    .bind(access_token)
    .fetch_optional(pool)
    .await
}

pub async fn member_exists(pool: &PgPool, member_id: &str) -> Result<bool, sqlx::Error> {
    let result: (bool,) =
        sqlx::query_as(r#"SELECT EXISTS(SELECT 1 FROM members WHERE member_id = $1)"#)
            .bind(member_id)
            .fetch_one(pool)
            .await?;

    Ok(result.0)
}
