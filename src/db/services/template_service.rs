use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::Template;
use crate::db::services::CampaignServiceError;

#[derive(Clone)]
pub struct TemplateService {
    pool: PgPool,
}

impl TemplateService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolves a template by any of its gateway identifiers or its name,
    /// restricted to what the user may use: public templates, the user's own,
    /// and system-owned ones (NULL user_id).
    pub async fn find_for_user(
        &self,
        identifier: &str,
        user_id: Uuid,
    ) -> Result<Option<Template>, CampaignServiceError> {
        let template = sqlx::query_as::<_, Template>(
            r#"
            SELECT * FROM templates
            WHERE (content_sid = $1 OR whatsapp_sid = $1 OR legacy_sid = $1 OR name = $1)
              AND (is_public OR user_id = $2 OR user_id IS NULL)
            ORDER BY (content_sid = $1) DESC, (whatsapp_sid = $1) DESC, (legacy_sid = $1) DESC
            LIMIT 1
            "#,
        )
        .bind(identifier)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(template)
    }
}
