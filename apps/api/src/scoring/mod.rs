//! Completion Scoring Engine.
//!
//! Pure functions from a [`ResumeDocument`] snapshot to a [`CompletionSummary`].
//! Nothing here allocates beyond the summary itself or touches I/O, so the
//! session controller runs it after every accepted mutation.

pub mod ats;
pub mod rules;
pub mod sections;
pub mod suggestions;

use std::collections::HashSet;

use serde::Serialize;

use crate::document::{ResumeDocument, SectionId};
use crate::scoring::ats::{compute_ats, AtsBreakdown};
use crate::scoring::rules::SECTION_SPECS;
use crate::scoring::sections::{score_section, SectionScore};
use crate::scoring::suggestions::{rank_suggestions, Suggestion};

/// Overall percentage at or above which the resume counts as complete.
pub const COMPLETE_THRESHOLD: u8 = 75;
/// Section percentage at or above which a section counts as done.
pub const SECTION_DONE_THRESHOLD: u8 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionTier {
    Excellent,
    Good,
    Fair,
    NeedsWork,
    Empty,
}

impl CompletionTier {
    pub fn from_percentage(percentage: u8) -> Self {
        match percentage {
            90..=u8::MAX => CompletionTier::Excellent,
            75..=89 => CompletionTier::Good,
            50..=74 => CompletionTier::Fair,
            25..=49 => CompletionTier::NeedsWork,
            _ => CompletionTier::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub overall_percentage: u8,
    pub ats_score: u8,
    pub ats: AtsBreakdown,
    pub tier: CompletionTier,
    pub is_complete: bool,
    pub sections: Vec<SectionScore>,
    pub completed_sections: Vec<SectionId>,
    pub missing_fields: Vec<String>,
    pub suggestions: Vec<Suggestion>,
    pub next_action: String,
}

impl CompletionSummary {
    pub fn section(&self, id: SectionId) -> Option<&SectionScore> {
        self.sections.iter().find(|s| s.section == id)
    }
}

pub fn compute_completion(document: &ResumeDocument) -> CompletionSummary {
    let sections: Vec<SectionScore> = SECTION_SPECS
        .iter()
        .map(|spec| score_section(spec, document.section(spec.section)))
        .collect();

    let (weighted_sum, total_weight) = sections
        .iter()
        .filter(|s| s.counted)
        .fold((0.0_f64, 0u32), |(sum, weight), s| {
            (
                sum + f64::from(s.percentage) * f64::from(s.weight),
                weight + s.weight,
            )
        });
    let overall_percentage = if total_weight == 0 {
        0
    } else {
        (weighted_sum / f64::from(total_weight)).round().clamp(0.0, 100.0) as u8
    };

    let mut seen = HashSet::new();
    let missing_fields = sections
        .iter()
        .flat_map(|s| s.missing.iter())
        .filter(|m| seen.insert(m.as_str()))
        .cloned()
        .collect();

    let completed_sections = sections
        .iter()
        .filter(|s| s.counted && s.percentage >= SECTION_DONE_THRESHOLD)
        .map(|s| s.section)
        .collect();

    let ats = compute_ats(&sections);
    let suggestions = rank_suggestions(&sections);
    let next_action = next_action(&suggestions, overall_percentage);

    CompletionSummary {
        overall_percentage,
        ats_score: ats.score,
        ats,
        tier: CompletionTier::from_percentage(overall_percentage),
        is_complete: overall_percentage >= COMPLETE_THRESHOLD,
        sections,
        completed_sections,
        missing_fields,
        suggestions,
        next_action,
    }
}

fn next_action(suggestions: &[Suggestion], overall: u8) -> String {
    if let Some(first) = suggestions.first() {
        return first.message.clone();
    }
    if overall >= 90 {
        "Your resume is ready! Consider adding certifications or languages.".to_string()
    } else {
        "Start by completing your personal information.".to_string()
    }
}
