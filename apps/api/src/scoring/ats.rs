//! ATS readiness heuristic, a rubric independent of the completion percentage.
//!
//! Two passes: five tiers accumulate a partial score, then a formatting bonus is
//! derived from that partial score. The coupling is intentional and kept explicit.

use serde::Serialize;

use crate::document::SectionId;
use crate::scoring::sections::SectionScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtsBreakdown {
    pub contact: u8,
    pub experience: u8,
    pub skills: u8,
    pub education: u8,
    pub summary: u8,
    /// Sum of the five tiers, before the formatting bonus.
    pub partial: u8,
    pub formatting: u8,
    pub score: u8,
}

/// Picks the points of the first threshold `value` reaches, else `floor`.
fn tier(value: usize, steps: &[(usize, u8)], floor: u8) -> u8 {
    steps
        .iter()
        .find(|(min, _)| value >= *min)
        .map(|(_, points)| *points)
        .unwrap_or(floor)
}

fn percentage_of(sections: &[SectionScore], id: SectionId) -> usize {
    sections
        .iter()
        .find(|s| s.section == id)
        .map(|s| usize::from(s.percentage))
        .unwrap_or(0)
}

fn satisfied_of(sections: &[SectionScore], id: SectionId) -> usize {
    sections
        .iter()
        .find(|s| s.section == id)
        .map(|s| s.satisfied)
        .unwrap_or(0)
}

pub fn compute_ats(sections: &[SectionScore]) -> AtsBreakdown {
    let contact = tier(
        percentage_of(sections, SectionId::PersonalInfo),
        &[(90, 15), (70, 10), (50, 5)],
        0,
    );
    let experience = tier(
        percentage_of(sections, SectionId::Experience),
        &[(90, 25), (70, 20), (50, 15), (30, 10)],
        5,
    );
    let skills = tier(
        satisfied_of(sections, SectionId::Skills),
        &[(10, 20), (7, 15), (5, 12), (3, 8)],
        5,
    );
    let education = tier(
        percentage_of(sections, SectionId::Education),
        &[(90, 15), (70, 12), (50, 8), (30, 5)],
        2,
    );
    let summary = tier(
        percentage_of(sections, SectionId::Summary),
        &[(90, 10), (70, 8), (50, 6), (30, 4)],
        2,
    );

    let partial = contact + experience + skills + education + summary;

    // Second pass over the partial score.
    let formatting = tier(usize::from(partial), &[(70, 15), (50, 10), (30, 5)], 2);

    AtsBreakdown {
        contact,
        experience,
        skills,
        education,
        summary,
        partial,
        formatting,
        score: partial.saturating_add(formatting).min(100),
    }
}
