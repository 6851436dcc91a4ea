use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::collab::RealtimeTransport;
use crate::config::SessionSettings;
use crate::session::controller::{open_session, SessionDeps, SessionUser};
use crate::session::{SessionError, SessionHandle};
use crate::store::DocumentStore;

/// Builds a fresh transport for every new session.
pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn RealtimeTransport> + Send + Sync>;

#[derive(Default)]
struct Sessions {
    by_id: HashMap<Uuid, SessionHandle>,
    /// (user_id, resume_id) → session id
    by_key: HashMap<(Uuid, Uuid), Uuid>,
}

impl Sessions {
    /// The open session for (user, resume). A closed one is forgotten.
    fn live(&mut self, user_id: Uuid, resume_id: Uuid) -> Option<SessionHandle> {
        let id = self.by_key.get(&(user_id, resume_id)).copied()?;
        match self.by_id.get(&id) {
            Some(handle) if !handle.is_closed() => Some(handle.clone()),
            _ => {
                self.by_id.remove(&id);
                self.by_key.remove(&(user_id, resume_id));
                None
            }
        }
    }
}

/// Every open editing session in this process.
pub struct SessionRegistry {
    sessions: RwLock<Sessions>,
    store: Arc<dyn DocumentStore>,
    transports: TransportFactory,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        transports: TransportFactory,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: RwLock::new(Sessions::default()),
            store,
            transports,
            clock,
            settings,
        }
    }

    /// Returns the live session for (user, resume), opening one if needed.
    ///
    /// The registry is not locked while the document loads. If another caller
    /// opened the same pair in the meantime, theirs wins and ours is shut down.
    pub async fn open(
        &self,
        user_id: Uuid,
        resume_id: Uuid,
        display_name: String,
    ) -> Result<SessionHandle, SessionError> {
        if let Some(existing) = self.sessions.write().await.live(user_id, resume_id) {
            return Ok(existing);
        }

        let deps = SessionDeps {
            store: Arc::clone(&self.store),
            transport: (self.transports)(),
            clock: Arc::clone(&self.clock),
            settings: self.settings,
        };
        let handle = open_session(
            Uuid::new_v4(),
            SessionUser {
                user_id,
                display_name,
            },
            resume_id,
            deps,
        )
        .await?;

        let raced = {
            let mut sessions = self.sessions.write().await;
            match sessions.live(user_id, resume_id) {
                Some(existing) => Some(existing),
                None => {
                    sessions.by_key.insert((user_id, resume_id), handle.id);
                    sessions.by_id.insert(handle.id, handle.clone());
                    None
                }
            }
        };

        match raced {
            Some(existing) => {
                debug!(%user_id, %resume_id, "Session opened concurrently; keeping the first");
                handle.shutdown().await;
                Ok(existing)
            }
            None => Ok(handle),
        }
    }

    pub async fn get(&self, session_id: Uuid) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .by_id
            .get(&session_id)
            .filter(|h| !h.is_closed())
            .cloned()
            .ok_or(SessionError::UnknownSession(session_id))
    }

    /// Tears down and forgets one session.
    pub async fn close(&self, session_id: Uuid) -> Result<(), SessionError> {
        let handle = {
            let mut sessions = self.sessions.write().await;
            let handle = sessions
                .by_id
                .remove(&session_id)
                .ok_or(SessionError::UnknownSession(session_id))?;
            sessions.by_key.remove(&(handle.user_id, handle.resume_id));
            handle
        };
        handle.shutdown().await;
        Ok(())
    }

    /// Tears down every session; used on process shutdown.
    pub async fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write().await;
            sessions.by_key.clear();
            sessions.by_id.drain().map(|(_, h)| h).collect()
        };
        info!(count = handles.len(), "Closing all editing sessions");
        futures::future::join_all(handles.iter().map(|h| h.shutdown())).await;
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::session::testing::{document_with, settle, MemoryStore, MemoryTransport, TestClock};

    fn registry(store: Arc<MemoryStore>) -> SessionRegistry {
        SessionRegistry::new(
            store,
            Arc::new(|| Arc::new(MemoryTransport::default()) as Arc<dyn RealtimeTransport>),
            Arc::new(TestClock::default()),
            SessionSettings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_user_and_resume_reuses_session() {
        let store = Arc::new(MemoryStore::with_document(document_with(&[])));
        let resume_id = store.only_id();
        let reg = registry(store);
        let user = Uuid::new_v4();

        let a = reg.open(user, resume_id, "Jo".into()).await.unwrap();
        let b = reg.open(user, resume_id, "Jo".into()).await.unwrap();
        assert_eq!(a.id, b.id);

        let other = reg.open(Uuid::new_v4(), resume_id, "Ana".into()).await.unwrap();
        assert_ne!(other.id, a.id);
        assert_eq!(reg.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_resume_is_not_registered() {
        let reg = registry(Arc::new(MemoryStore::default()));
        let err = reg
            .open(Uuid::new_v4(), Uuid::new_v4(), "Jo".into())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::DocumentNotFound(_)));
        assert_eq!(reg.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_forgets_session() {
        let store = Arc::new(MemoryStore::with_document(document_with(&[])));
        let resume_id = store.only_id();
        let reg = registry(store);
        let user = Uuid::new_v4();

        let handle = reg.open(user, resume_id, "Jo".into()).await.unwrap();
        settle().await;
        reg.close(handle.id).await.unwrap();

        assert!(handle.is_closed());
        assert!(matches!(
            reg.get(handle.id).await.err(),
            Some(SessionError::UnknownSession(_))
        ));
        assert!(matches!(
            reg.close(handle.id).await,
            Err(SessionError::UnknownSession(_))
        ));

        let reopened = reg.open(user, resume_id, "Jo".into()).await.unwrap();
        assert_ne!(reopened.id, handle.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_all_closes_everything() {
        let store = Arc::new(MemoryStore::with_document(document_with(&[])));
        let resume_id = store.only_id();
        let reg = registry(store);
        let a = reg.open(Uuid::new_v4(), resume_id, "A".into()).await.unwrap();
        let b = reg.open(Uuid::new_v4(), resume_id, "B".into()).await.unwrap();

        reg.shutdown_all().await;
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(reg.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_load_does_not_block_other_sessions() {
        let store = Arc::new(MemoryStore::with_document(document_with(&[])));
        let resume_id = store.only_id();
        let reg = Arc::new(registry(Arc::clone(&store)));
        let live = reg.open(Uuid::new_v4(), resume_id, "Jo".into()).await.unwrap();

        store.delay_loads(Duration::from_secs(30));
        let opening = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.open(Uuid::new_v4(), resume_id, "Ana".into()).await })
        };
        settle().await;

        let found = tokio::time::timeout(Duration::from_secs(1), reg.get(live.id))
            .await
            .expect("lookup waited on another session's load")
            .unwrap();
        assert_eq!(found.id, live.id);
        assert!(!opening.is_finished());

        let opened = opening.await.unwrap().unwrap();
        assert_ne!(opened.id, live.id);
        assert_eq!(reg.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_opens_of_same_pair_share_one_session() {
        let store = Arc::new(MemoryStore::with_document(document_with(&[])));
        let resume_id = store.only_id();
        store.delay_loads(Duration::from_millis(200));
        let reg = Arc::new(registry(store));
        let user = Uuid::new_v4();

        let (a, b) = tokio::join!(
            reg.open(user, resume_id, "Jo".into()),
            reg.open(user, resume_id, "Jo".into())
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id, b.id);
        assert!(!a.is_closed());
        assert_eq!(reg.len().await, 1);
    }
}
