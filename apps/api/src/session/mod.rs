//! Editing sessions.
//!
//! Each open session is a [`controller`] task that exclusively owns the Document
//! Model and every state machine around it. Callers talk to it through a
//! [`SessionHandle`]: commands go in over an `mpsc` channel, state comes back as
//! `watch` snapshots.

pub mod controller;
pub mod handlers;
pub mod history;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::autosave::{AutosavePhase, SaveOperation};
use crate::collab::presence::Collaborator;
use crate::collab::ConnectionState;
use crate::document::{ResumeDocument, SectionId, UnknownSection};
use crate::scoring::CompletionSummary;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Resume {0} not found")]
    DocumentNotFound(Uuid),

    #[error("Session {0} not found")]
    UnknownSession(Uuid),

    #[error(transparent)]
    UnknownSection(#[from] UnknownSection),

    #[error("Session has been closed")]
    Closed,

    #[error("Failed to load resume: {0}")]
    Store(#[from] StoreError),
}

// ────────────────────────────────────────────────────────────────────────────
// Observable state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// Transient, non-blocking message for the editor UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub resume_id: Uuid,
    pub user_id: Uuid,
    pub revision: u64,
    pub autosave: AutosavePhase,
    pub has_unsaved_changes: bool,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub save_count: u64,
    pub last_save: Option<SaveOperation>,
    pub connection: ConnectionState,
    pub can_undo: bool,
    pub can_redo: bool,
    pub notices: Vec<Notice>,
}

/// Result of an accepted local mutation, returned once scoring has caught up.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationAck {
    pub revision: u64,
    pub completion: Arc<CompletionSummary>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

pub(crate) enum Command {
    ApplyLocal {
        section: SectionId,
        value: Value,
        reply: oneshot::Sender<MutationAck>,
    },
    SaveNow {
        reply: oneshot::Sender<SaveOperation>,
    },
    Undo {
        reply: oneshot::Sender<Option<MutationAck>>,
    },
    Redo {
        reply: oneshot::Sender<Option<MutationAck>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap to clone; every clone talks to the same controller task.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resume_id: Uuid,
    commands: mpsc::Sender<Command>,
    document: watch::Receiver<Arc<ResumeDocument>>,
    completion: watch::Receiver<Arc<CompletionSummary>>,
    collaborators: watch::Receiver<Arc<Vec<Collaborator>>>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Entry point for section editors. Resolves after the mutation is applied
    /// and the completion summary recomputed.
    pub async fn on_section_change(
        &self,
        section: SectionId,
        value: Value,
    ) -> Result<MutationAck, SessionError> {
        self.request(|reply| Command::ApplyLocal {
            section,
            value,
            reply,
        })
        .await
    }

    /// Saves now, bypassing the debounce. Resolves when a save covering the
    /// current revision has finished, or immediately if nothing is unsaved.
    pub async fn save_now(&self) -> Result<SaveOperation, SessionError> {
        self.request(|reply| Command::SaveNow { reply }).await
    }

    pub async fn undo(&self) -> Result<Option<MutationAck>, SessionError> {
        self.request(|reply| Command::Undo { reply }).await
    }

    pub async fn redo(&self) -> Result<Option<MutationAck>, SessionError> {
        self.request(|reply| Command::Redo { reply }).await
    }

    /// Tears the session down. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }

    pub fn document(&self) -> Arc<ResumeDocument> {
        Arc::clone(&self.document.borrow())
    }

    pub fn completion(&self) -> Arc<CompletionSummary> {
        Arc::clone(&self.completion.borrow())
    }

    pub fn collaborators(&self) -> Arc<Vec<Collaborator>> {
        Arc::clone(&self.collaborators.borrow())
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
