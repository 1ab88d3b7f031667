use sqlx::{PgPool, Result};
use uuid::Uuid;

use crate::db::models::User;

/// Retrieves a user by id.
pub async fn get_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}
