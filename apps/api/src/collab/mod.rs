//! Collaboration layer: wire envelope, transport contract, and the per-session
//! policies that decide which remote events reach the Document Model.

pub mod manager;
pub mod presence;
pub mod redis_transport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::collab::presence::Collaborator;
use crate::document::SectionId;

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

/// Section update broadcast to everyone editing the same resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationEvent {
    pub resume_id: Uuid,
    pub origin_user_id: Uuid,
    pub section_id: SectionId,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything a transport reports back to its session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Remote(CollaborationEvent),
    Roster(Vec<Collaborator>),
    Connection(ConnectionState),
    Fault(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to encode collaboration message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Transport channel closed")]
    Closed,
}

// ────────────────────────────────────────────────────────────────────────────
// Transport contract
// ────────────────────────────────────────────────────────────────────────────

/// Realtime channel between editors of the same resume.
///
/// Incoming traffic and connection changes are delivered on the `events` sender
/// handed to [`connect`](RealtimeTransport::connect). Calling `connect` again
/// replaces the previous link. After [`leave_room`](RealtimeTransport::leave_room)
/// the transport refuses to connect or join.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(
        &self,
        user_id: Uuid,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError>;

    async fn join_room(&self, resume_id: Uuid, presence: &Collaborator) -> Result<(), TransportError>;

    /// Removes `user_id` from the room and closes the transport for good. Must work
    /// whether or not a link is currently up.
    async fn leave_room(&self, resume_id: Uuid, user_id: Uuid) -> Result<(), TransportError>;

    /// Enqueues an event for broadcast without waiting on the network.
    /// Events are published in the order they were enqueued.
    fn send(&self, event: &CollaborationEvent) -> Result<(), TransportError>;
}
