//! Collaboration Session Manager: admission of remote events and the
//! connection/reconnect state machine for one (user, resume) channel.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;
use uuid::Uuid;

use crate::collab::{CollaborationEvent, ConnectionState};
use crate::document::SectionId;

/// Decision for one incoming remote event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Originated from the local user.
    Echo,
    /// Addressed to another resume.
    ForeignDocument,
    /// Arrived inside the throttle window of the last accepted event for its section.
    Throttled,
}

/// Bounded exponential backoff: `base`, `2·base`, `4·base`, … for `max_attempts` tries.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.base_delay.saturating_mul(1u32 << self.attempts.min(16));
        self.attempts += 1;
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// What to do after the channel dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPlan {
    RetryAt { at: Instant, attempt: u32 },
    GiveUp,
}

#[derive(Debug)]
pub struct CollaborationManager {
    local_user_id: Uuid,
    resume_id: Uuid,
    throttle: Duration,
    last_accepted: HashMap<SectionId, Instant>,
    state: ConnectionState,
    reconnect: ReconnectPolicy,
    reconnect_at: Option<Instant>,
}

impl CollaborationManager {
    pub fn new(
        local_user_id: Uuid,
        resume_id: Uuid,
        throttle: Duration,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            local_user_id,
            resume_id,
            throttle,
            last_accepted: HashMap::new(),
            state: ConnectionState::Disconnected,
            reconnect,
            reconnect_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Classifies an incoming event. `now` is its local arrival time; only
    /// accepted events move the per-section window.
    pub fn evaluate(&mut self, event: &CollaborationEvent, now: Instant) -> Verdict {
        let verdict = if event.origin_user_id == self.local_user_id {
            Verdict::Echo
        } else if event.resume_id != self.resume_id {
            Verdict::ForeignDocument
        } else {
            match self.last_accepted.get(&event.section_id) {
                Some(last) if now.saturating_duration_since(*last) < self.throttle => {
                    Verdict::Throttled
                }
                _ => {
                    self.last_accepted.insert(event.section_id, now);
                    Verdict::Accept
                }
            }
        };

        if verdict != Verdict::Accept {
            trace!(
                resume_id = %self.resume_id,
                section = %event.section_id,
                origin = %event.origin_user_id,
                ?verdict,
                "Dropped collaboration event"
            );
        }
        verdict
    }

    /// Envelope for a local mutation, or `None` while the channel is down.
    pub fn outgoing(
        &self,
        section_id: SectionId,
        payload: &Value,
        sent_at: DateTime<Utc>,
    ) -> Option<CollaborationEvent> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        Some(CollaborationEvent {
            resume_id: self.resume_id,
            origin_user_id: self.local_user_id,
            section_id,
            payload: payload.clone(),
            sent_at,
        })
    }

    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.reconnect_at = None;
    }

    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.reconnect.reset();
        self.reconnect_at = None;
    }

    /// Marks the channel down and schedules the next attempt if any remain.
    pub fn on_connection_lost(&mut self, now: Instant) -> ReconnectPlan {
        self.state = ConnectionState::Disconnected;
        match self.reconnect.next_delay() {
            Some(delay) => {
                let at = now + delay;
                self.reconnect_at = Some(at);
                ReconnectPlan::RetryAt {
                    at,
                    attempt: self.reconnect.attempts(),
                }
            }
            None => {
                self.reconnect_at = None;
                ReconnectPlan::GiveUp
            }
        }
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// True exactly once when the scheduled reconnect time has passed.
    pub fn poll_reconnect(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(at) if now >= at => {
                self.reconnect_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn shutdown(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.reconnect_at = None;
    }
}
