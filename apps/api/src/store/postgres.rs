use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::document::ResumeDocument;
use crate::models::resume::ResumeDocumentRow;
use crate::store::{DocumentStore, StoreError};

/// `resume_documents` table over a shared pool.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn load_document(&self, id: Uuid) -> Result<Option<ResumeDocument>, StoreError> {
        let row = sqlx::query_as::<_, ResumeDocumentRow>(
            r#"
            SELECT id, title, template_id, sections, revision, status, created_at, updated_at
            FROM resume_documents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ResumeDocument::try_from).transpose()
    }

    async fn save_document(&self, document: &ResumeDocument) -> Result<ResumeDocument, StoreError> {
        let sections = serde_json::to_value(&document.sections)?;
        let revision = i64::try_from(document.revision)
            .map_err(|_| StoreError::RevisionOutOfRange(document.revision))?;

        // Upsert keyed by id: replaying a revision rewrites the same row.
        let row = sqlx::query_as::<_, ResumeDocumentRow>(
            r#"
            INSERT INTO resume_documents
                (id, title, template_id, sections, revision, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'saved', $6, NOW())
            ON CONFLICT (id) DO UPDATE SET
                title       = EXCLUDED.title,
                template_id = EXCLUDED.template_id,
                sections    = EXCLUDED.sections,
                revision    = EXCLUDED.revision,
                status      = 'saved',
                updated_at  = NOW()
            RETURNING id, title, template_id, sections, revision, status, created_at, updated_at
            "#,
        )
        .bind(document.id)
        .bind(&document.title)
        .bind(&document.template_id)
        .bind(&sections)
        .bind(revision)
        .bind(document.created_at)
        .fetch_one(&self.pool)
        .await?;

        debug!(resume_id = %document.id, revision, "Saved resume document");
        ResumeDocument::try_from(row)
    }
}
