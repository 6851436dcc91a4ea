//! Presence Tracker: the roster is whatever the last broadcast said it was.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: Uuid,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    roster: Vec<Collaborator>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the roster wholesale. Returns true when it changed.
    pub fn replace(&mut self, roster: Vec<Collaborator>) -> bool {
        if self.roster == roster {
            return false;
        }
        self.roster = roster;
        true
    }

    pub fn clear(&mut self) -> bool {
        self.replace(Vec::new())
    }

    pub fn collaborators(&self) -> &[Collaborator] {
        &self.roster
    }
}
