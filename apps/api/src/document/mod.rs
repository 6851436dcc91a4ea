//! Document Model: the canonical in-memory copy of one resume's editable sections.
//!
//! Every change, local or remote, goes through [`DocumentModel::apply_mutation`].
//! Readers receive `Arc<ResumeDocument>` snapshots; a mutation clones-on-write, so a
//! snapshot handed out earlier never changes underneath its holder.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Section identifiers
// ────────────────────────────────────────────────────────────────────────────

/// Named division of a resume. Declaration order is the display order and the
/// tie-break order used when ranking suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SectionId {
    PersonalInfo,
    Summary,
    Experience,
    Education,
    Skills,
    Projects,
    Certifications,
    Languages,
    References,
    CustomSections,
}

impl SectionId {
    pub const ALL: [SectionId; 10] = [
        SectionId::PersonalInfo,
        SectionId::Summary,
        SectionId::Experience,
        SectionId::Education,
        SectionId::Skills,
        SectionId::Projects,
        SectionId::Certifications,
        SectionId::Languages,
        SectionId::References,
        SectionId::CustomSections,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionId::PersonalInfo => "personalInfo",
            SectionId::Summary => "summary",
            SectionId::Experience => "experience",
            SectionId::Education => "education",
            SectionId::Skills => "skills",
            SectionId::Projects => "projects",
            SectionId::Certifications => "certifications",
            SectionId::Languages => "languages",
            SectionId::References => "references",
            SectionId::CustomSections => "customSections",
        }
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown section '{0}'")]
pub struct UnknownSection(pub String);

impl FromStr for SectionId {
    type Err = UnknownSection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SectionId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownSection(s.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Document
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Saved,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Saved => "saved",
        }
    }

    /// Lenient parse for stored rows: anything other than `saved` is a draft.
    pub fn from_db(value: &str) -> Self {
        if value == "saved" {
            DocumentStatus::Saved
        } else {
            DocumentStatus::Draft
        }
    }
}

/// Where an accepted mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOrigin {
    Local,
    Remote,
}

/// Section payloads are opaque JSON owned by the section editors.
pub type Sections = BTreeMap<SectionId, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeDocument {
    pub id: Uuid,
    pub title: String,
    pub template_id: Option<String>,
    pub sections: Sections,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: DocumentStatus,
}

impl ResumeDocument {
    /// An empty draft with no sections at revision 0.
    pub fn new(id: Uuid, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            template_id: None,
            sections: Sections::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
            status: DocumentStatus::Draft,
        }
    }

    pub fn section(&self, id: SectionId) -> Option<&Value> {
        self.sections.get(&id)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Model
// ────────────────────────────────────────────────────────────────────────────

/// Single-writer owner of a [`ResumeDocument`].
pub struct DocumentModel {
    current: Arc<ResumeDocument>,
}

impl DocumentModel {
    pub fn new(document: ResumeDocument) -> Self {
        Self {
            current: Arc::new(document),
        }
    }

    pub fn snapshot(&self) -> Arc<ResumeDocument> {
        Arc::clone(&self.current)
    }

    pub fn revision(&self) -> u64 {
        self.current.revision
    }

    pub fn sections(&self) -> &Sections {
        &self.current.sections
    }

    pub fn section(&self, id: SectionId) -> Option<&Value> {
        self.current.section(id)
    }

    /// Replaces one section payload and bumps the revision. Returns the new revision.
    /// A `null` payload clears the section.
    ///
    /// The replace, bump and timestamp happen on a private copy when a snapshot is
    /// outstanding, so no reader ever sees a partially applied document.
    pub fn apply_mutation(
        &mut self,
        section: SectionId,
        value: Value,
        origin: MutationOrigin,
        now: DateTime<Utc>,
    ) -> u64 {
        let doc = Arc::make_mut(&mut self.current);
        if value.is_null() {
            doc.sections.remove(&section);
        } else {
            doc.sections.insert(section, value);
        }
        doc.revision += 1;
        doc.updated_at = now;
        doc.status = DocumentStatus::Draft;

        trace!(
            resume_id = %doc.id,
            section = %section,
            ?origin,
            revision = doc.revision,
            "Applied section mutation"
        );
        doc.revision
    }

    /// Flags the document as saved if nothing changed since `revision` was persisted.
    pub fn mark_saved(&mut self, revision: u64) {
        if self.current.revision == revision && self.current.status != DocumentStatus::Saved {
            Arc::make_mut(&mut self.current).status = DocumentStatus::Saved;
        }
    }
}
