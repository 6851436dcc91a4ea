//! Autosave Scheduler.
//!
//! A timer-free state machine: the session controller feeds it mutations, save
//! completions and the current `Instant`, and sleeps until [`AutosaveScheduler::deadline`].
//!
//! ```text
//! idle ──mutation(dirty)──▶ pending ──deadline──▶ saving ──finished──▶ cooldown ──until──▶ idle | pending | saving(manual)
//!           ▲                  │ mutation(clean)
//!           └──────────────────┘
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutosavePhase {
    Idle,
    Pending,
    Saving,
    Cooldown,
}

/// What started a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveTrigger {
    Debounce,
    Manual,
}

/// Answer to a manual save request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualSave {
    /// The caller must start a save now.
    Start,
    /// A save is in flight or cooling down; the manual save runs when the cooldown ends.
    Deferred,
    /// Nothing differs from the last saved snapshot.
    UpToDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved,
    Failed { message: String },
    /// Manual save with nothing to persist; the backend was not called.
    AlreadySaved,
}

/// Record of one finished save attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOperation {
    pub target_revision: u64,
    pub trigger: SaveTrigger,
    pub outcome: SaveOutcome,
    pub finished_at: DateTime<Utc>,
}

impl SaveOperation {
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, SaveOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pending { deadline: Instant },
    Saving { trigger: SaveTrigger },
    Cooldown { until: Instant },
}

#[derive(Debug)]
pub struct AutosaveScheduler {
    debounce: Duration,
    cooldown: Duration,
    state: State,
    /// Current document differs from the last saved snapshot.
    dirty: bool,
    /// A mutation arrived while saving or cooling down.
    captured: bool,
    manual_requested: bool,
}

impl AutosaveScheduler {
    pub fn new(debounce: Duration, cooldown: Duration) -> Self {
        Self {
            debounce,
            cooldown,
            state: State::Idle,
            dirty: false,
            captured: false,
            manual_requested: false,
        }
    }

    pub fn phase(&self) -> AutosavePhase {
        match self.state {
            State::Idle => AutosavePhase::Idle,
            State::Pending { .. } => AutosavePhase::Pending,
            State::Saving { .. } => AutosavePhase::Saving,
            State::Cooldown { .. } => AutosavePhase::Cooldown,
        }
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty
    }

    pub fn is_saving(&self) -> bool {
        matches!(self.state, State::Saving { .. })
    }

    /// Next instant at which [`poll`](Self::poll) may change state.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Pending { deadline } => Some(deadline),
            State::Cooldown { until } => Some(until),
            State::Idle | State::Saving { .. } => None,
        }
    }

    /// Records an accepted mutation. `dirty` compares the document against the
    /// last saved snapshot.
    pub fn on_mutation(&mut self, dirty: bool, now: Instant) {
        self.dirty = dirty;
        match self.state {
            State::Idle | State::Pending { .. } if dirty => {
                // Trailing edge: every mutation pushes the deadline out.
                self.state = State::Pending {
                    deadline: now + self.debounce,
                };
            }
            State::Idle | State::Pending { .. } => self.state = State::Idle,
            State::Saving { .. } | State::Cooldown { .. } => self.captured = true,
        }
    }

    pub fn request_manual(&mut self) -> ManualSave {
        match self.state {
            State::Idle | State::Pending { .. } => {
                if !self.dirty {
                    self.state = State::Idle;
                    return ManualSave::UpToDate;
                }
                self.state = State::Saving {
                    trigger: SaveTrigger::Manual,
                };
                ManualSave::Start
            }
            State::Saving { .. } | State::Cooldown { .. } => {
                self.manual_requested = true;
                ManualSave::Deferred
            }
        }
    }

    /// Advances elapsed timers. Returns a trigger when the caller must start a save.
    pub fn poll(&mut self, now: Instant) -> Option<SaveTrigger> {
        match self.state {
            State::Pending { deadline } if now >= deadline => {
                self.state = State::Saving {
                    trigger: SaveTrigger::Debounce,
                };
                Some(SaveTrigger::Debounce)
            }
            State::Cooldown { until } if now >= until => {
                let manual = std::mem::take(&mut self.manual_requested);
                let captured = std::mem::take(&mut self.captured);
                if self.dirty && manual {
                    self.state = State::Saving {
                        trigger: SaveTrigger::Manual,
                    };
                    return Some(SaveTrigger::Manual);
                }
                self.state = if self.dirty && captured {
                    State::Pending {
                        deadline: now + self.debounce,
                    }
                } else {
                    State::Idle
                };
                None
            }
            _ => None,
        }
    }

    /// Records the end of the in-flight save. `dirty` is re-evaluated by the caller
    /// against the snapshot that was actually persisted (unchanged on failure).
    pub fn on_save_finished(&mut self, dirty: bool, now: Instant) {
        self.dirty = dirty;
        if self.is_saving() {
            self.state = State::Cooldown {
                until: now + self.cooldown,
            };
        }
    }

    pub fn trigger_in_flight(&self) -> Option<SaveTrigger> {
        match self.state {
            State::Saving { trigger } => Some(trigger),
            _ => None,
        }
    }
}
