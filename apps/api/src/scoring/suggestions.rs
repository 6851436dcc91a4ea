//! Suggestion ranking: fixed priority classes, section declaration order within a class.

use serde::Serialize;

use crate::scoring::rules::{spec_for, SectionRule};
use crate::scoring::sections::{SectionDetail, SectionScore};
use crate::document::SectionId;

pub const MAX_SUGGESTIONS: usize = 5;

/// Summary percentage below which rewriting the summary is suggested.
const SUMMARY_THRESHOLD: u8 = 60;

/// Average entry completeness below which a populated list gets a hint.
const THIN_ENTRY_THRESHOLD: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPriority {
    MissingRequired,
    UnderPopulated,
    WeakSummary,
    Enhancement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub priority: SuggestionPriority,
    pub section: SectionId,
    pub message: String,
}

impl Suggestion {
    fn new(priority: SuggestionPriority, section: SectionId, message: impl Into<String>) -> Self {
        Self {
            priority,
            section,
            message: message.into(),
        }
    }
}

/// Builds every applicable suggestion, then keeps the top [`MAX_SUGGESTIONS`].
pub fn rank_suggestions(sections: &[SectionScore]) -> Vec<Suggestion> {
    let mut out = Vec::new();
    for score in sections {
        collect_for_section(score, &mut out);
    }
    // Stable: equal keys keep the order they were generated in.
    out.sort_by_key(|s| (s.priority, s.section));
    out.truncate(MAX_SUGGESTIONS);
    out
}

fn collect_for_section(score: &SectionScore, out: &mut Vec<Suggestion>) {
    let section = score.section;
    match &score.detail {
        SectionDetail::Fields {
            missing_required,
            unfilled_recommended,
            ..
        } => {
            if !missing_required.is_empty() {
                out.push(Suggestion::new(
                    SuggestionPriority::MissingRequired,
                    section,
                    format!(
                        "Complete your personal information ({})",
                        missing_required.join(", ")
                    ),
                ));
            } else if !unfilled_recommended.is_empty() {
                out.push(Suggestion::new(
                    SuggestionPriority::Enhancement,
                    section,
                    format!(
                        "Add your {} to round out your contact details",
                        unfilled_recommended.join(", ")
                    ),
                ));
            } else if score.percentage < 90 {
                out.push(Suggestion::new(
                    SuggestionPriority::Enhancement,
                    section,
                    "Add your LinkedIn profile, GitHub or website for better networking",
                ));
            }
        }
        SectionDetail::List {
            valid_entries,
            invalid_entries,
            minimum,
            average_entry_completeness,
        } => {
            let SectionRule::List {
                noun, enhancement, ..
            } = spec_for(section).rule
            else {
                return;
            };

            if *invalid_entries > 0 {
                out.push(Suggestion::new(
                    SuggestionPriority::MissingRequired,
                    section,
                    format!("Fill in the required fields of your {}", noun.1),
                ));
            }

            if valid_entries < minimum {
                let needed = minimum - valid_entries;
                let what = if needed == 1 { noun.0 } else { noun.1 };
                let message = if *valid_entries == 0 {
                    format!("Add {needed} {what}")
                } else {
                    format!("Add {needed} more {what}")
                };
                out.push(Suggestion::new(
                    SuggestionPriority::UnderPopulated,
                    section,
                    message,
                ));
            } else if *minimum > 0 && *average_entry_completeness < THIN_ENTRY_THRESHOLD {
                if let Some(hint) = enhancement {
                    out.push(Suggestion::new(SuggestionPriority::Enhancement, section, hint));
                }
            }
        }
        SectionDetail::FreeText { .. } => {
            if score.percentage < SUMMARY_THRESHOLD {
                out.push(Suggestion::new(
                    SuggestionPriority::WeakSummary,
                    section,
                    "Write a compelling professional summary (50+ characters)",
                ));
            } else if score.percentage < 85 {
                out.push(Suggestion::new(
                    SuggestionPriority::Enhancement,
                    section,
                    "Expand your summary toward 200 characters and mention key results",
                ));
            }
        }
        SectionDetail::Unscored => {}
    }
}
