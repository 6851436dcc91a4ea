//! Persistence backend contract.
//!
//! The session controller holds an `Arc<dyn DocumentStore>`; the production
//! backend is [`postgres::PgDocumentStore`].

pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::document::ResumeDocument;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored sections of resume {id} are malformed: {source}")]
    CorruptSections {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode sections: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Revision {0} exceeds the storable range")]
    RevisionOutOfRange(u64),

    #[error("Stored revision {revision} of resume {id} is negative")]
    NegativeRevision { id: Uuid, revision: i64 },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Called once when a session opens. `None` when no such resume exists.
    async fn load_document(&self, id: Uuid) -> Result<Option<ResumeDocument>, StoreError>;

    /// Persists the full document. Saving the same revision twice is harmless.
    async fn save_document(&self, document: &ResumeDocument) -> Result<ResumeDocument, StoreError>;
}
