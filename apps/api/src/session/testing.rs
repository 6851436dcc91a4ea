//! In-memory fakes shared by session, registry and router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::clock::Clock;
use crate::collab::presence::Collaborator;
use crate::collab::{CollaborationEvent, RealtimeTransport, TransportError, TransportEvent};
use crate::document::{DocumentStatus, ResumeDocument, SectionId};
use crate::store::{DocumentStore, StoreError};

/// Lets spawned tasks run until the runtime has nothing left to do right now.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

pub fn document_with(sections: &[(SectionId, Value)]) -> ResumeDocument {
    let mut doc = ResumeDocument::new(Uuid::new_v4(), "My resume", Utc::now());
    for (id, value) in sections {
        doc.sections.insert(*id, value.clone());
    }
    doc
}

// ────────────────────────────────────────────────────────────────────────────
// Store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<Uuid, ResumeDocument>>,
    saves: Mutex<Vec<ResumeDocument>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    in_flight_max: AtomicUsize,
    fail: AtomicBool,
    latency: Duration,
    load_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn with_document(document: ResumeDocument) -> Self {
        let store = Self::default();
        store.insert(document);
        store
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn insert(&self, document: ResumeDocument) {
        self.documents.lock().unwrap().insert(document.id, document);
    }

    pub fn only_id(&self) -> Uuid {
        let docs = self.documents.lock().unwrap();
        assert_eq!(docs.len(), 1, "store holds more than one document");
        *docs.keys().next().unwrap()
    }

    /// Makes every later `load_document` take this long.
    pub fn delay_loads(&self, delay: Duration) {
        self.load_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Successfully persisted snapshots, in order.
    pub fn saves(&self) -> Vec<ResumeDocument> {
        self.saves.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn in_flight_max(&self) -> usize {
        self.in_flight_max.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load_document(&self, id: Uuid) -> Result<Option<ResumeDocument>, StoreError> {
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.documents.lock().unwrap().get(&id).cloned())
    }

    async fn save_document(&self, document: &ResumeDocument) -> Result<ResumeDocument, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight_max.fetch_max(now_in_flight, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut saved = document.clone();
        saved.status = DocumentStatus::Saved;
        self.saves.lock().unwrap().push(saved.clone());
        self.insert(saved.clone());
        Ok(saved)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryTransport {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    sent: Mutex<Vec<CollaborationEvent>>,
    connects: AtomicUsize,
    leaves: Mutex<Vec<(Uuid, Uuid)>>,
    fail_connects: AtomicBool,
}

impl MemoryTransport {
    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Delivers an event as if it came off the wire.
    pub async fn inject(&self, event: TransportEvent) {
        let tx = self.events.lock().unwrap().clone();
        tx.expect("transport was never connected")
            .send(event)
            .await
            .expect("session stopped listening");
    }

    pub fn sent(&self) -> Vec<CollaborationEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn leaves(&self) -> usize {
        self.leaves.lock().unwrap().len()
    }

    /// (resume, user) pairs passed to `leave_room`.
    pub fn left(&self) -> Vec<(Uuid, Uuid)> {
        self.leaves.lock().unwrap().clone()
    }
}

#[async_trait]
impl RealtimeTransport for MemoryTransport {
    async fn connect(
        &self,
        _user_id: Uuid,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn join_room(&self, _resume_id: Uuid, _presence: &Collaborator) -> Result<(), TransportError> {
        Ok(())
    }

    async fn leave_room(&self, resume_id: Uuid, user_id: Uuid) -> Result<(), TransportError> {
        self.leaves.lock().unwrap().push((resume_id, user_id));
        Ok(())
    }

    fn send(&self, event: &CollaborationEvent) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Clock
// ────────────────────────────────────────────────────────────────────────────

/// Wall clock that advances with (possibly paused) tokio time.
pub struct TestClock {
    start: DateTime<Utc>,
    origin: Instant,
}

impl Default for TestClock {
    fn default() -> Self {
        Self {
            start: Utc::now(),
            origin: Instant::now(),
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        self.start + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
