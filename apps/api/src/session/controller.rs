//! Session controller task.
//!
//! One task per open session. It is the only writer of the Document Model: local
//! commands, remote events, save completions and timer expiries are all handled
//! one at a time inside a single `select!` loop, so no mutation can interleave
//! with another. Saves and connects run in spawned tasks and report back over
//! an internal channel; the loop never awaits them.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::autosave::{
    AutosavePhase, AutosaveScheduler, ManualSave, SaveOperation, SaveOutcome, SaveTrigger,
};
use crate::clock::Clock;
use crate::collab::manager::{CollaborationManager, ReconnectPlan, ReconnectPolicy, Verdict};
use crate::collab::presence::{Collaborator, PresenceTracker};
use crate::collab::{ConnectionState, RealtimeTransport, TransportError, TransportEvent};
use crate::config::SessionSettings;
use crate::document::{DocumentModel, MutationOrigin, ResumeDocument, SectionId, Sections};
use crate::scoring::{compute_completion, CompletionSummary};
use crate::session::history::{Edit, EditHistory};
use crate::session::{
    Command, MutationAck, Notice, NoticeLevel, SessionError, SessionHandle, SessionStatus,
};
use crate::store::{DocumentStore, StoreError};

const COMMAND_BUFFER: usize = 64;
const TRANSPORT_BUFFER: usize = 256;
const MAX_NOTICES: usize = 10;
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Collaborators every session needs.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn DocumentStore>,
    pub transport: Arc<dyn RealtimeTransport>,
    pub clock: Arc<dyn Clock>,
    pub settings: SessionSettings,
}

/// Who is editing.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Completions reported by spawned tasks.
enum Internal {
    SaveFinished(Result<ResumeDocument, StoreError>),
    ConnectFinished(Result<(), TransportError>),
}

/// Loads the document once and starts the controller task.
pub async fn open_session(
    session_id: Uuid,
    user: SessionUser,
    resume_id: Uuid,
    deps: SessionDeps,
) -> Result<SessionHandle, SessionError> {
    let document = deps
        .store
        .load_document(resume_id)
        .await?
        .ok_or(SessionError::DocumentNotFound(resume_id))?;

    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_BUFFER);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let model = DocumentModel::new(document);
    let snapshot = model.snapshot();
    let completion = Arc::new(compute_completion(&snapshot));

    let (document_tx, document_rx) = watch::channel(Arc::clone(&snapshot));
    let (completion_tx, completion_rx) = watch::channel(Arc::clone(&completion));
    let (collaborators_tx, collaborators_rx) = watch::channel(Arc::new(Vec::new()));

    let presence = Collaborator {
        user_id: user.user_id,
        display_name: user.display_name,
        joined_at: deps.clock.now(),
    };
    let settings = deps.settings;

    // Replaced by the controller's first publish.
    let (status_tx, status_rx) = watch::channel(SessionStatus {
        session_id,
        resume_id,
        user_id: user.user_id,
        revision: snapshot.revision,
        autosave: AutosavePhase::Idle,
        has_unsaved_changes: false,
        last_saved_at: None,
        save_count: 0,
        last_save: None,
        connection: ConnectionState::Disconnected,
        can_undo: false,
        can_redo: false,
        notices: Vec::new(),
    });

    let controller = SessionController {
        session_id,
        resume_id,
        presence,
        last_saved: snapshot.sections.clone(),
        model,
        scheduler: AutosaveScheduler::new(settings.autosave_debounce, settings.autosave_cooldown),
        collab: CollaborationManager::new(
            user.user_id,
            resume_id,
            settings.collab_throttle,
            ReconnectPolicy::new(settings.reconnect_max_attempts, settings.reconnect_base_delay),
        ),
        roster: PresenceTracker::new(),
        history: EditHistory::default(),
        in_flight: None,
        connect_task: None,
        save_waiters: Vec::new(),
        save_count: 0,
        last_saved_at: None,
        last_save: None,
        notices: VecDeque::new(),
        completion,
        store: deps.store,
        transport: deps.transport,
        clock: deps.clock,
        commands: command_rx,
        transport_tx,
        transport_rx,
        internal_tx,
        internal_rx,
        document_tx,
        completion_tx,
        collaborators_tx,
        status_tx,
    };

    info!(%session_id, %resume_id, user_id = %user.user_id, "Opened editing session");
    tokio::spawn(controller.run());

    Ok(SessionHandle {
        id: session_id,
        user_id: user.user_id,
        resume_id,
        commands: command_tx,
        document: document_rx,
        completion: completion_rx,
        collaborators: collaborators_rx,
        status: status_rx,
    })
}

struct SessionController {
    session_id: Uuid,
    resume_id: Uuid,
    presence: Collaborator,

    model: DocumentModel,
    /// Sections as of the last successful save.
    last_saved: Sections,
    scheduler: AutosaveScheduler,
    collab: CollaborationManager,
    roster: PresenceTracker,
    history: EditHistory,

    in_flight: Option<(Arc<ResumeDocument>, SaveTrigger)>,
    connect_task: Option<JoinHandle<()>>,
    /// Manual save callers, keyed by the revision they need persisted.
    save_waiters: Vec<(u64, oneshot::Sender<SaveOperation>)>,
    save_count: u64,
    last_saved_at: Option<chrono::DateTime<chrono::Utc>>,
    last_save: Option<SaveOperation>,
    notices: VecDeque<Notice>,
    completion: Arc<CompletionSummary>,

    store: Arc<dyn DocumentStore>,
    transport: Arc<dyn RealtimeTransport>,
    clock: Arc<dyn Clock>,

    commands: mpsc::Receiver<Command>,
    transport_tx: mpsc::Sender<TransportEvent>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    document_tx: watch::Sender<Arc<ResumeDocument>>,
    completion_tx: watch::Sender<Arc<CompletionSummary>>,
    collaborators_tx: watch::Sender<Arc<Vec<Collaborator>>>,
    status_tx: watch::Sender<SessionStatus>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

impl SessionController {
    async fn run(mut self) {
        self.start_connect();
        self.publish_status();

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(event) = self.transport_rx.recv() => self.handle_transport(event),
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                _ = sleep_until_opt(deadline) => {}
            }

            self.poll_timers();
            self.publish_status();
        }

        info!(session_id = %self.session_id, resume_id = %self.resume_id, "Closed editing session");
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.scheduler.deadline(), self.collab.reconnect_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ── commands ────────────────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::ApplyLocal {
                section,
                value,
                reply,
            } => {
                let before = self.model.section(section).cloned();
                let ack = self.apply(section, value.clone(), MutationOrigin::Local);
                self.history.record(Edit {
                    section,
                    before,
                    after: value,
                });
                let _ = reply.send(ack);
            }
            Command::SaveNow { reply } => self.request_manual_save(reply),
            Command::Undo { reply } => {
                let ack = self
                    .history
                    .undo()
                    .map(|edit| {
                        // A section that did not exist before is cleared again.
                        self.apply(edit.section, edit.before.unwrap_or(Value::Null), MutationOrigin::Local)
                    });
                let _ = reply.send(ack);
            }
            Command::Redo { reply } => {
                let ack = self
                    .history
                    .redo()
                    .map(|edit| self.apply(edit.section, edit.after, MutationOrigin::Local));
                let _ = reply.send(ack);
            }
            // Handled in the run loop.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// The single mutation path for local and remote changes.
    fn apply(&mut self, section: SectionId, value: Value, origin: MutationOrigin) -> MutationAck {
        let revision = self
            .model
            .apply_mutation(section, value, origin, self.clock.now());

        let dirty = self.is_dirty();
        self.scheduler.on_mutation(dirty, Instant::now());

        let snapshot = self.model.snapshot();
        self.completion = Arc::new(compute_completion(&snapshot));
        self.document_tx.send_replace(snapshot);
        self.completion_tx.send_replace(Arc::clone(&self.completion));

        if origin == MutationOrigin::Local {
            self.broadcast(section);
        }

        MutationAck {
            revision,
            completion: Arc::clone(&self.completion),
        }
    }

    fn broadcast(&mut self, section: SectionId) {
        let payload = self.model.section(section).unwrap_or(&Value::Null);
        let Some(event) = self.collab.outgoing(section, payload, self.clock.now()) else {
            debug!(resume_id = %self.resume_id, %section, "Channel down; mutation not broadcast");
            return;
        };
        if let Err(e) = self.transport.send(&event) {
            warn!(resume_id = %self.resume_id, %section, "Broadcast failed: {e}");
            self.notice(NoticeLevel::Warning, format!("Could not share your change: {e}"));
        }
    }

    fn is_dirty(&self) -> bool {
        self.model.sections() != &self.last_saved
    }

    // ── autosave ────────────────────────────────────────────────────────────

    fn request_manual_save(&mut self, reply: oneshot::Sender<SaveOperation>) {
        let revision = self.model.revision();
        match self.scheduler.request_manual() {
            ManualSave::UpToDate => {
                let _ = reply.send(SaveOperation {
                    target_revision: revision,
                    trigger: SaveTrigger::Manual,
                    outcome: SaveOutcome::AlreadySaved,
                    finished_at: self.clock.now(),
                });
            }
            ManualSave::Start => {
                self.save_waiters.push((revision, reply));
                self.start_save(SaveTrigger::Manual);
            }
            ManualSave::Deferred => {
                debug!(resume_id = %self.resume_id, revision, "Manual save deferred until cooldown ends");
                self.save_waiters.push((revision, reply));
            }
        }
    }

    fn start_save(&mut self, trigger: SaveTrigger) {
        let snapshot = self.model.snapshot();
        debug!(
            resume_id = %self.resume_id,
            revision = snapshot.revision,
            ?trigger,
            "Starting save"
        );
        self.in_flight = Some((Arc::clone(&snapshot), trigger));

        let store = Arc::clone(&self.store);
        let done = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = store.save_document(&snapshot).await;
            // The session may be gone; its result is then discarded.
            let _ = done.send(Internal::SaveFinished(result));
        });
    }

    fn finish_save(&mut self, result: Result<ResumeDocument, StoreError>) {
        let Some((snapshot, trigger)) = self.in_flight.take() else {
            return;
        };
        let finished_at = self.clock.now();

        let outcome = match result {
            Ok(_) => {
                self.last_saved = snapshot.sections.clone();
                self.model.mark_saved(snapshot.revision);
                self.save_count += 1;
                self.last_saved_at = Some(finished_at);
                self.document_tx.send_replace(self.model.snapshot());
                info!(resume_id = %self.resume_id, revision = snapshot.revision, ?trigger, "Saved resume");
                SaveOutcome::Saved
            }
            Err(e) => {
                warn!(resume_id = %self.resume_id, revision = snapshot.revision, "Save failed: {e}");
                self.notice(
                    NoticeLevel::Warning,
                    format!("Could not save your changes ({e}). They are kept and will be saved again on your next edit."),
                );
                SaveOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        let operation = SaveOperation {
            target_revision: snapshot.revision,
            trigger,
            outcome,
            finished_at,
        };

        let dirty = self.is_dirty();
        self.scheduler.on_save_finished(dirty, Instant::now());

        let (covered, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.save_waiters)
            .into_iter()
            .partition(|(revision, _)| *revision <= snapshot.revision);
        self.save_waiters = waiting;
        for (_, reply) in covered {
            let _ = reply.send(operation.clone());
        }

        self.last_save = Some(operation);
    }

    fn poll_timers(&mut self) {
        let now = Instant::now();

        if let Some(trigger) = self.scheduler.poll(now) {
            self.start_save(trigger);
        }

        // Nothing left to persist: whoever is still waiting is already saved.
        if !self.scheduler.is_saving() && !self.scheduler.has_unsaved_changes() {
            let revision = self.model.revision();
            for (_, reply) in self.save_waiters.drain(..) {
                let _ = reply.send(SaveOperation {
                    target_revision: revision,
                    trigger: SaveTrigger::Manual,
                    outcome: SaveOutcome::AlreadySaved,
                    finished_at: self.clock.now(),
                });
            }
        }

        if self.collab.poll_reconnect(now) {
            self.start_connect();
        }
    }

    // ── collaboration ───────────────────────────────────────────────────────

    fn start_connect(&mut self) {
        self.collab.begin_connect();

        let transport = Arc::clone(&self.transport);
        let events = self.transport_tx.clone();
        let done = self.internal_tx.clone();
        let presence = self.presence.clone();
        let resume_id = self.resume_id;
        let task = tokio::spawn(async move {
            let result = async {
                transport.connect(presence.user_id, events).await?;
                transport.join_room(resume_id, &presence).await
            }
            .await;
            let _ = done.send(Internal::ConnectFinished(result));
        });
        if let Some(previous) = self.connect_task.replace(task) {
            previous.abort();
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::SaveFinished(result) => self.finish_save(result),
            Internal::ConnectFinished(Ok(())) => {
                self.collab.on_connected();
                info!(resume_id = %self.resume_id, "Collaboration channel connected");
            }
            Internal::ConnectFinished(Err(e)) => {
                warn!(resume_id = %self.resume_id, "Collaboration connect failed: {e}");
                self.connection_lost();
            }
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Remote(event) => {
                if self.collab.evaluate(&event, Instant::now()) == Verdict::Accept {
                    debug!(
                        resume_id = %self.resume_id,
                        section = %event.section_id,
                        origin = %event.origin_user_id,
                        "Applying remote mutation"
                    );
                    self.apply(event.section_id, event.payload, MutationOrigin::Remote);
                }
            }
            TransportEvent::Roster(roster) => {
                if self.roster.replace(roster) {
                    self.publish_roster();
                }
            }
            TransportEvent::Connection(ConnectionState::Disconnected) => {
                if self.collab.state() == ConnectionState::Connected {
                    warn!(resume_id = %self.resume_id, "Collaboration channel dropped");
                    self.connection_lost();
                }
            }
            TransportEvent::Connection(state) => {
                debug!(resume_id = %self.resume_id, ?state, "Transport reported connection state");
            }
            TransportEvent::Fault(message) => {
                warn!(resume_id = %self.resume_id, "Transport fault: {message}");
                self.notice(NoticeLevel::Warning, message);
            }
        }
    }

    fn connection_lost(&mut self) {
        match self.collab.on_connection_lost(Instant::now()) {
            ReconnectPlan::RetryAt { at, attempt } => {
                info!(
                    resume_id = %self.resume_id,
                    attempt,
                    retry_in_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Scheduling collaboration reconnect"
                );
                self.notice(
                    NoticeLevel::Info,
                    format!("Connection lost. Reconnecting (attempt {attempt})..."),
                );
            }
            ReconnectPlan::GiveUp => {
                warn!(resume_id = %self.resume_id, "Giving up on collaboration channel");
                self.notice(
                    NoticeLevel::Warning,
                    "Live collaboration is unavailable. You can keep editing; changes are still saved.",
                );
                if self.roster.clear() {
                    self.publish_roster();
                }
            }
        }
    }

    async fn teardown(&mut self) {
        self.collab.shutdown();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }

        // Whatever the channel state, a membership entry may have been written.
        let leave = self
            .transport
            .leave_room(self.resume_id, self.presence.user_id);
        match timeout(LEAVE_TIMEOUT, leave).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(resume_id = %self.resume_id, "Leaving room failed: {e}"),
            Err(_) => debug!(resume_id = %self.resume_id, "Leaving room timed out"),
        }

        if self.scheduler.has_unsaved_changes() {
            warn!(
                resume_id = %self.resume_id,
                revision = self.model.revision(),
                "Session closed with unsaved changes"
            );
        }
    }

    // ── publishing ──────────────────────────────────────────────────────────

    fn notice(&mut self, level: NoticeLevel, message: impl Into<String>) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            level,
            message: message.into(),
            at: self.clock.now(),
        });
    }

    fn publish_roster(&self) {
        self.collaborators_tx
            .send_replace(Arc::new(self.roster.collaborators().to_vec()));
    }

    fn build_status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id,
            resume_id: self.resume_id,
            user_id: self.presence.user_id,
            revision: self.model.revision(),
            autosave: self.scheduler.phase(),
            has_unsaved_changes: self.scheduler.has_unsaved_changes(),
            last_saved_at: self.last_saved_at,
            save_count: self.save_count,
            last_save: self.last_save.clone(),
            connection: self.collab.state(),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
            notices: self.notices.iter().cloned().collect(),
        }
    }

    fn publish_status(&self) {
        let status = self.build_status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::CollaborationEvent;
    use crate::session::testing::{
        document_with, settle, MemoryStore, MemoryTransport, TestClock,
    };
    use chrono::Utc;
    use serde_json::json;

    struct Harness {
        handle: SessionHandle,
        store: Arc<MemoryStore>,
        transport: Arc<MemoryTransport>,
        user_id: Uuid,
        resume_id: Uuid,
    }

    async fn harness_with(store: Arc<MemoryStore>, transport: Arc<MemoryTransport>) -> Harness {
        let resume_id = store.only_id();
        let user_id = Uuid::new_v4();
        let handle = open_session(
            Uuid::new_v4(),
            SessionUser {
                user_id,
                display_name: "Jo".into(),
            },
            resume_id,
            SessionDeps {
                store: store.clone(),
                transport: transport.clone(),
                clock: Arc::new(TestClock::default()),
                settings: SessionSettings::default(),
            },
        )
        .await
        .unwrap();
        settle().await;
        Harness {
            handle,
            store,
            transport,
            user_id,
            resume_id,
        }
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::with_document(document_with(&[])));
        harness_with(store, Arc::new(MemoryTransport::default())).await
    }

    fn remote(h: &Harness, origin: Uuid, section: SectionId, payload: Value) -> TransportEvent {
        TransportEvent::Remote(CollaborationEvent {
            resume_id: h.resume_id,
            origin_user_id: origin,
            section_id: section,
            payload,
            sent_at: Utc::now(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_document_is_not_found() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::default());
        let missing = Uuid::new_v4();
        let err = open_session(
            Uuid::new_v4(),
            SessionUser {
                user_id: Uuid::new_v4(),
                display_name: "Jo".into(),
            },
            missing,
            SessionDeps {
                store,
                transport: Arc::new(MemoryTransport::default()),
                clock: Arc::new(TestClock::default()),
                settings: SessionSettings::default(),
            },
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SessionError::DocumentNotFound(id) if id == missing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skills_edit_end_to_end() {
        let h = harness().await;
        assert_eq!(h.handle.status().connection, ConnectionState::Connected);

        let skills = json!([{"name": "Rust"}, {"name": "Go"}, {"name": "SQL"}]);
        let ack = h
            .handle
            .on_section_change(SectionId::Skills, skills.clone())
            .await
            .unwrap();

        // Summary is recomputed before the call returns.
        assert_eq!(ack.revision, 1);
        assert_eq!(
            ack.completion.section(SectionId::Skills).map(|s| s.satisfied),
            Some(3)
        );
        settle().await;
        let status = h.handle.status();
        assert_eq!(status.autosave, AutosavePhase::Pending);
        assert!(status.has_unsaved_changes);
        assert!(h.store.saves().is_empty());

        tokio::time::sleep(Duration::from_millis(1999)).await;
        settle().await;
        assert!(h.store.saves().is_empty());

        tokio::time::sleep(Duration::from_millis(1)).await;
        settle().await;
        let saves = h.store.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].section(SectionId::Skills), Some(&skills));

        let status = h.handle.status();
        assert!(!status.has_unsaved_changes);
        assert!(status.last_saved_at.is_some());
        assert_eq!(status.save_count, 1);
        assert_eq!(status.autosave, AutosavePhase::Cooldown);

        // Local edits are broadcast.
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].origin_user_id, h.user_id);
        assert_eq!(sent[0].payload, skills);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_edits_saves_once_with_final_state() {
        let h = harness().await;
        for i in 0..10 {
            h.handle
                .on_section_change(SectionId::Summary, json!(format!("draft {i}")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(2000)).await;
        settle().await;

        let saves = h.store.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].section(SectionId::Summary), Some(&json!("draft 9")));
        assert_eq!(saves[0].revision, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_during_save_are_coalesced_after_cooldown() {
        let store = Arc::new(
            MemoryStore::with_document(document_with(&[])).with_latency(Duration::from_millis(500)),
        );
        let h = harness_with(store, Arc::new(MemoryTransport::default())).await;

        h.handle
            .on_section_change(SectionId::Summary, json!("one"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        settle().await;
        assert_eq!(h.handle.status().autosave, AutosavePhase::Saving);
        assert_eq!(h.store.in_flight_max(), 1);

        for text in ["two", "three", "four"] {
            h.handle
                .on_section_change(SectionId::Summary, json!(text))
                .await
                .unwrap();
        }

        // First save lands, cooldown, then a fresh debounce, then one more save.
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        settle().await;
        let saves = h.store.saves();
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[0].section(SectionId::Summary), Some(&json!("one")));
        assert_eq!(saves[1].section(SectionId::Summary), Some(&json!("four")));
        assert_eq!(h.store.in_flight_max(), 1);
        assert!(!h.handle.status().has_unsaved_changes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_save_skips_debounce() {
        let h = harness().await;
        h.handle
            .on_section_change(SectionId::Summary, json!("now"))
            .await
            .unwrap();

        let op = h.handle.save_now().await.unwrap();
        assert_eq!(op.outcome, SaveOutcome::Saved);
        assert_eq!(op.trigger, SaveTrigger::Manual);
        assert_eq!(op.target_revision, 1);
        assert_eq!(h.store.saves().len(), 1);
        assert!(!h.handle.status().has_unsaved_changes);

        // Nothing left: the debounce that was pending must not save again.
        tokio::time::sleep(Duration::from_millis(5000)).await;
        settle().await;
        assert_eq!(h.store.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_save_with_nothing_unsaved_skips_backend() {
        let h = harness().await;
        let op = h.handle.save_now().await.unwrap();
        assert_eq!(op.outcome, SaveOutcome::AlreadySaved);
        assert!(h.store.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_keeps_edits_and_does_not_retry() {
        let store = Arc::new(MemoryStore::with_document(document_with(&[])));
        store.fail_saves(true);
        let h = harness_with(store, Arc::new(MemoryTransport::default())).await;

        h.handle
            .on_section_change(SectionId::Summary, json!("keep me"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        settle().await;

        let status = h.handle.status();
        assert_eq!(h.store.attempts(), 1);
        assert!(status.has_unsaved_changes);
        assert!(matches!(
            status.last_save.as_ref().map(|op| &op.outcome),
            Some(SaveOutcome::Failed { .. })
        ));
        assert!(status
            .notices
            .iter()
            .any(|n| n.level == NoticeLevel::Warning));
        assert_eq!(
            h.handle.document().section(SectionId::Summary),
            Some(&json!("keep me"))
        );

        tokio::time::sleep(Duration::from_millis(30_000)).await;
        settle().await;
        assert_eq!(h.store.attempts(), 1);

        // A manual retry persists once the backend recovers.
        h.store.fail_saves(false);
        let op = h.handle.save_now().await.unwrap();
        assert_eq!(op.outcome, SaveOutcome::Saved);
        assert!(!h.handle.status().has_unsaved_changes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_is_never_applied() {
        let h = harness().await;
        h.transport
            .inject(remote(&h, h.user_id, SectionId::Summary, json!("mine")))
            .await;
        settle().await;
        assert_eq!(h.handle.document().revision, 0);
        assert_eq!(h.handle.document().section(SectionId::Summary), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_burst_on_one_section_is_throttled() {
        let h = harness().await;
        let peer = Uuid::new_v4();
        h.transport
            .inject(remote(&h, peer, SectionId::Skills, json!(["a"])))
            .await;
        h.transport
            .inject(remote(&h, peer, SectionId::Skills, json!(["b"])))
            .await;
        settle().await;

        let doc = h.handle.document();
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.section(SectionId::Skills), Some(&json!(["a"])));

        tokio::time::sleep(Duration::from_millis(300)).await;
        h.transport
            .inject(remote(&h, peer, SectionId::Skills, json!(["c"])))
            .await;
        settle().await;
        assert_eq!(h.handle.document().revision, 2);

        // Remote changes are not echoed back out and are not undoable.
        assert!(h.transport.sent().is_empty());
        assert!(!h.handle.status().can_undo);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_mutation_arms_autosave() {
        let h = harness().await;
        h.transport
            .inject(remote(&h, Uuid::new_v4(), SectionId::Summary, json!("theirs")))
            .await;
        settle().await;
        assert_eq!(h.handle.status().autosave, AutosavePhase::Pending);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        settle().await;
        assert_eq!(h.store.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_is_replaced_on_each_broadcast() {
        let h = harness().await;
        let ana = Collaborator {
            user_id: Uuid::new_v4(),
            display_name: "Ana".into(),
            joined_at: Utc::now(),
        };
        let ben = Collaborator {
            user_id: Uuid::new_v4(),
            display_name: "Ben".into(),
            joined_at: Utc::now(),
        };
        h.transport
            .inject(TransportEvent::Roster(vec![ana.clone(), ben.clone()]))
            .await;
        settle().await;
        assert_eq!(h.handle.collaborators().len(), 2);

        h.transport.inject(TransportEvent::Roster(vec![ben.clone()])).await;
        settle().await;
        assert_eq!(h.handle.collaborators().as_slice(), &[ben]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_reconnects_with_backoff_and_editing_continues() {
        let h = harness().await;
        assert_eq!(h.transport.connects(), 1);

        h.transport.fail_connects(true);
        h.transport
            .inject(TransportEvent::Connection(ConnectionState::Disconnected))
            .await;
        settle().await;
        assert_eq!(h.handle.status().connection, ConnectionState::Disconnected);

        // Editing is unaffected and nothing is broadcast while down.
        let ack = h
            .handle
            .on_section_change(SectionId::Summary, json!("offline"))
            .await
            .unwrap();
        assert_eq!(ack.revision, 1);
        assert!(h.transport.sent().is_empty());

        // One retry after 1s.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(h.transport.connects(), 2);

        // Then 2s, 4s, 8s and 16s apart before giving up.
        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(h.transport.connects(), 6);
        let status = h.handle.status();
        assert_eq!(status.connection, ConnectionState::Disconnected);
        assert!(status
            .notices
            .iter()
            .any(|n| n.message.starts_with("Live collaboration is unavailable")));

        // Autosave kept working throughout.
        assert_eq!(h.store.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_succeeds_and_resumes_broadcast() {
        let h = harness().await;
        h.transport
            .inject(TransportEvent::Connection(ConnectionState::Disconnected))
            .await;
        settle().await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;

        assert_eq!(h.transport.connects(), 2);
        assert_eq!(h.handle.status().connection, ConnectionState::Connected);
        h.handle
            .on_section_change(SectionId::Summary, json!("back"))
            .await
            .unwrap();
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_and_redo_are_new_local_mutations() {
        let h = harness().await;
        h.handle
            .on_section_change(SectionId::Summary, json!("first"))
            .await
            .unwrap();
        h.handle
            .on_section_change(SectionId::Summary, json!("second"))
            .await
            .unwrap();

        let undone = h.handle.undo().await.unwrap().unwrap();
        assert_eq!(undone.revision, 3);
        assert_eq!(
            h.handle.document().section(SectionId::Summary),
            Some(&json!("first"))
        );

        let redone = h.handle.redo().await.unwrap().unwrap();
        assert_eq!(redone.revision, 4);
        assert_eq!(
            h.handle.document().section(SectionId::Summary),
            Some(&json!("second"))
        );

        h.handle.undo().await.unwrap();
        h.handle.undo().await.unwrap();
        // Section did not exist before the first edit, so it is gone again.
        assert_eq!(h.handle.document().section(SectionId::Summary), None);
        assert!(h.handle.undo().await.unwrap().is_none());
        assert_eq!(h.transport.sent().len(), 6);
        assert_eq!(h.transport.sent()[5].payload, Value::Null);

        // Back to the saved content: nothing to persist.
        settle().await;
        let status = h.handle.status();
        assert!(!status.has_unsaved_changes);
        assert_eq!(status.autosave, AutosavePhase::Idle);
        tokio::time::sleep(Duration::from_millis(5000)).await;
        settle().await;
        assert!(h.store.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_discards_in_flight_save_and_leaves_room() {
        let store = Arc::new(
            MemoryStore::with_document(document_with(&[])).with_latency(Duration::from_millis(500)),
        );
        let h = harness_with(store, Arc::new(MemoryTransport::default())).await;

        h.handle
            .on_section_change(SectionId::Summary, json!("late"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        settle().await;
        assert_eq!(h.handle.status().autosave, AutosavePhase::Saving);

        h.handle.shutdown().await;
        assert!(h.handle.is_closed());
        assert_eq!(h.transport.leaves(), 1);

        // The save completes in the background but nobody applies its result.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(h.store.saves().len(), 1);
        assert_eq!(h.handle.status().save_count, 0);
        assert!(matches!(
            h.handle
                .on_section_change(SectionId::Summary, json!("x"))
                .await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_pending_debounce() {
        let h = harness().await;
        h.handle
            .on_section_change(SectionId::Summary, json!("never saved"))
            .await
            .unwrap();
        h.handle.shutdown().await;
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        settle().await;
        assert!(h.store.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_after_giving_up_still_leaves_room() {
        let h = harness().await;
        h.transport.fail_connects(true);
        h.transport
            .inject(TransportEvent::Connection(ConnectionState::Disconnected))
            .await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(h.transport.connects(), 6);
        assert_eq!(h.handle.status().connection, ConnectionState::Disconnected);

        h.handle.shutdown().await;
        assert_eq!(h.transport.left(), vec![(h.resume_id, h.user_id)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_save_during_save_waits_for_covering_save() {
        let store = Arc::new(
            MemoryStore::with_document(document_with(&[])).with_latency(Duration::from_millis(500)),
        );
        let h = harness_with(store, Arc::new(MemoryTransport::default())).await;

        h.handle
            .on_section_change(SectionId::Summary, json!("one"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        settle().await;
        assert_eq!(h.handle.status().autosave, AutosavePhase::Saving);

        h.handle
            .on_section_change(SectionId::Summary, json!("two"))
            .await
            .unwrap();
        let handle = h.handle.clone();
        let manual = tokio::spawn(async move { handle.save_now().await });
        settle().await;

        // First save (revision 1) lands at 2500ms; the caller needs revision 2.
        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(h.store.saves().len(), 1);
        assert_eq!(h.handle.status().autosave, AutosavePhase::Cooldown);
        assert!(!manual.is_finished());

        // Cooldown ends at 4500ms, the deferred manual save runs without a debounce.
        tokio::time::sleep(Duration::from_millis(1900)).await;
        settle().await;
        assert!(!manual.is_finished());
        tokio::time::sleep(Duration::from_millis(700)).await;
        settle().await;

        let op = manual.await.unwrap().unwrap();
        assert_eq!(op.outcome, SaveOutcome::Saved);
        assert_eq!(op.trigger, SaveTrigger::Manual);
        assert_eq!(op.target_revision, 2);

        let saves = h.store.saves();
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[1].section(SectionId::Summary), Some(&json!("two")));
        assert_eq!(h.store.in_flight_max(), 1);
        assert!(!h.handle.status().has_unsaved_changes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_manual_save_resolves_when_edits_return_to_saved_state() {
        let store = Arc::new(
            MemoryStore::with_document(document_with(&[])).with_latency(Duration::from_millis(500)),
        );
        let h = harness_with(store, Arc::new(MemoryTransport::default())).await;

        h.handle
            .on_section_change(SectionId::Summary, json!("one"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        settle().await;

        h.handle
            .on_section_change(SectionId::Summary, json!("two"))
            .await
            .unwrap();
        let handle = h.handle.clone();
        let manual = tokio::spawn(async move { handle.save_now().await });
        settle().await;
        h.handle
            .on_section_change(SectionId::Summary, json!("one"))
            .await
            .unwrap();

        // The in-flight save already holds the current content.
        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;
        let op = manual.await.unwrap().unwrap();
        assert_eq!(op.outcome, SaveOutcome::AlreadySaved);
        assert_eq!(op.target_revision, 3);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        settle().await;
        assert_eq!(h.store.saves().len(), 1);
        assert!(!h.handle.status().has_unsaved_changes);
    }
}
