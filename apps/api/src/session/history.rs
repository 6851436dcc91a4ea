use std::collections::VecDeque;

use serde_json::Value;

use crate::document::SectionId;

pub const MAX_HISTORY: usize = 50;

/// One local section change.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub section: SectionId,
    /// Payload before the change; `None` when the section did not exist.
    pub before: Option<Value>,
    pub after: Value,
}

/// Bounded undo/redo stacks of local edits. Remote mutations never enter here.
#[derive(Debug)]
pub struct EditHistory {
    undo: VecDeque<Edit>,
    redo: Vec<Edit>,
    limit: usize,
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::with_limit(MAX_HISTORY)
    }
}

impl EditHistory {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            undo: VecDeque::with_capacity(limit.min(MAX_HISTORY)),
            redo: Vec::new(),
            limit,
        }
    }

    /// Records a fresh local edit. Clears anything that could be redone.
    pub fn record(&mut self, edit: Edit) {
        if self.limit == 0 {
            return;
        }
        if self.undo.len() == self.limit {
            self.undo.pop_front();
        }
        self.undo.push_back(edit);
        self.redo.clear();
    }

    /// Pops the most recent edit; the caller re-applies `before`.
    pub fn undo(&mut self) -> Option<Edit> {
        let edit = self.undo.pop_back()?;
        self.redo.push(edit.clone());
        Some(edit)
    }

    /// Pops the most recently undone edit; the caller re-applies `after`.
    pub fn redo(&mut self) -> Option<Edit> {
        let edit = self.redo.pop()?;
        self.undo.push_back(edit.clone());
        Some(edit)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}
