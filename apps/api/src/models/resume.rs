use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::document::{DocumentStatus, ResumeDocument, Sections};
use crate::store::StoreError;

/// One row of `resume_documents`. Sections are stored as a JSONB object keyed by wire name.
#[derive(Debug, Clone, FromRow)]
pub struct ResumeDocumentRow {
    pub id: Uuid,
    pub title: String,
    pub template_id: Option<String>,
    pub sections: Value,
    pub revision: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ResumeDocumentRow> for ResumeDocument {
    type Error = StoreError;

    fn try_from(row: ResumeDocumentRow) -> Result<Self, Self::Error> {
        let sections: Sections = match row.sections {
            Value::Null => Sections::new(),
            value => serde_json::from_value(value).map_err(|source| {
                StoreError::CorruptSections { id: row.id, source }
            })?,
        };

        Ok(ResumeDocument {
            id: row.id,
            title: row.title,
            template_id: row.template_id,
            sections,
            revision: u64::try_from(row.revision).map_err(|_| StoreError::NegativeRevision {
                id: row.id,
                revision: row.revision,
            })?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            status: DocumentStatus::from_db(&row.status),
        })
    }
}
