//! Per-section calculators: field objects, entry lists and free text.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::SectionId;
use crate::scoring::rules::{
    is_present, FieldRule, SectionRule, SectionSpec, Tier, SUMMARY_KEYWORDS,
    SUMMARY_KEYWORD_BONUS, SUMMARY_LENGTH_STEPS,
};

/// Filled/total counts for one field tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCount {
    pub filled: usize,
    pub total: usize,
}

impl TierCount {
    fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.filled as f64 / self.total as f64
        }
    }
}

/// Rule-specific detail the suggestion ranker reads back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionDetail {
    Fields {
        required: TierCount,
        recommended: TierCount,
        optional: TierCount,
        missing_required: Vec<String>,
        unfilled_recommended: Vec<String>,
    },
    List {
        valid_entries: usize,
        invalid_entries: usize,
        minimum: usize,
        average_entry_completeness: u8,
    },
    FreeText {
        characters: usize,
        keyword_matches: usize,
    },
    Unscored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionScore {
    pub section: SectionId,
    pub percentage: u8,
    pub satisfied: usize,
    pub total: usize,
    pub weight: u32,
    /// Whether this section joins the weighted overall average.
    pub counted: bool,
    pub missing: Vec<String>,
    pub detail: SectionDetail,
}

/// Scores one section payload according to its spec.
pub fn score_section(spec: &SectionSpec, payload: Option<&Value>) -> SectionScore {
    match spec.rule {
        SectionRule::Fields(fields) => score_fields(spec, fields, payload),
        SectionRule::List {
            min_entries,
            fields,
            noun,
            ..
        } => score_list(spec, min_entries, fields, noun, payload),
        SectionRule::FreeText => score_free_text(spec, payload),
        SectionRule::Unscored => SectionScore {
            section: spec.section,
            percentage: 0,
            satisfied: 0,
            total: 0,
            weight: 0,
            counted: false,
            missing: vec![],
            detail: SectionDetail::Unscored,
        },
    }
}

fn score_fields(spec: &SectionSpec, fields: &[FieldRule], payload: Option<&Value>) -> SectionScore {
    let empty = Map::new();
    let object = payload.and_then(Value::as_object).unwrap_or(&empty);

    let mut required = TierCount::default();
    let mut recommended = TierCount::default();
    let mut optional = TierCount::default();
    let mut missing = Vec::new();
    let mut missing_required = Vec::new();
    let mut unfilled_recommended = Vec::new();

    for rule in fields {
        let value = object.get(rule.name);
        let ok = rule.check.passes(value);
        let tally = match rule.tier {
            Tier::Required => &mut required,
            Tier::Recommended => &mut recommended,
            Tier::Optional => &mut optional,
        };
        tally.total += 1;
        if ok {
            tally.filled += 1;
            continue;
        }
        match rule.tier {
            Tier::Required => {
                let present = value.is_some_and(is_present);
                missing.push(if present {
                    format!("{} is invalid", rule.name)
                } else {
                    format!("{} is required", rule.name)
                });
                missing_required.push(rule.name.to_string());
            }
            Tier::Recommended => unfilled_recommended.push(rule.name.to_string()),
            Tier::Optional => {}
        }
    }

    let raw = required.fraction() * 50.0 + recommended.fraction() * 30.0 + optional.fraction() * 20.0;

    SectionScore {
        section: spec.section,
        percentage: clamp_percent(raw),
        satisfied: required.filled + recommended.filled + optional.filled,
        total: fields.len(),
        weight: spec.weight,
        counted: spec.core,
        missing,
        detail: SectionDetail::Fields {
            required,
            recommended,
            optional,
            missing_required,
            unfilled_recommended,
        },
    }
}

fn score_list(
    spec: &SectionSpec,
    min_entries: usize,
    fields: &[FieldRule],
    noun: (&str, &str),
    payload: Option<&Value>,
) -> SectionScore {
    let entries: &[Value] = match payload {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items,
        Some(_) => {
            return SectionScore {
                section: spec.section,
                percentage: 0,
                satisfied: 0,
                total: min_entries,
                weight: spec.weight,
                counted: spec.core,
                missing: vec!["Invalid data format".to_string()],
                detail: SectionDetail::List {
                    valid_entries: 0,
                    invalid_entries: 0,
                    minimum: min_entries,
                    average_entry_completeness: 0,
                },
            };
        }
    };

    let label = capitalize(noun.0);
    let mut valid = 0usize;
    let mut invalid = 0usize;
    let mut completeness_sum = 0.0_f64;
    let mut missing = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let Some(object) = entry.as_object() else {
            continue;
        };

        let mut points = 0u32;
        let mut max_points = 0u32;
        let mut entry_ok = true;

        for rule in fields {
            let worth = if rule.tier == Tier::Required { 2 } else { 1 };
            max_points += worth;
            if rule.check.passes(object.get(rule.name)) {
                points += worth;
            } else if rule.tier == Tier::Required {
                entry_ok = false;
                missing.push(format!("{label} {}: {} is required", index + 1, rule.name));
            }
        }

        if entry_ok {
            valid += 1;
            if max_points > 0 {
                completeness_sum += f64::from(points) / f64::from(max_points) * 100.0;
            }
        } else {
            invalid += 1;
        }
    }

    let base = if min_entries > 0 {
        (valid as f64 / min_entries as f64 * 100.0).min(100.0)
    } else if valid > 0 {
        100.0
    } else {
        0.0
    };
    let average = if valid > 0 {
        completeness_sum / valid as f64
    } else {
        0.0
    };
    let bonus = average / 100.0 * 30.0;

    if valid < min_entries {
        let plural = if min_entries == 1 { noun.0 } else { noun.1 };
        missing.push(format!("At least {min_entries} {plural} required"));
    }

    SectionScore {
        section: spec.section,
        percentage: clamp_percent(base + bonus),
        satisfied: valid,
        total: min_entries,
        weight: spec.weight,
        counted: spec.core || !entries.is_empty(),
        missing,
        detail: SectionDetail::List {
            valid_entries: valid,
            invalid_entries: invalid,
            minimum: min_entries,
            average_entry_completeness: clamp_percent(average),
        },
    }
}

fn score_free_text(spec: &SectionSpec, payload: Option<&Value>) -> SectionScore {
    let text = payload.and_then(Value::as_str).map(str::trim).unwrap_or("");
    let characters = text.chars().count();

    let base = SUMMARY_LENGTH_STEPS
        .iter()
        .find(|(min, _)| characters >= *min)
        .map(|(_, score)| *score)
        .unwrap_or(0);

    let lower = text.to_lowercase();
    let keyword_matches = SUMMARY_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count();
    let score = (base + keyword_matches as u32 * SUMMARY_KEYWORD_BONUS).min(100);

    let missing = if characters == 0 {
        vec!["Add a professional summary".to_string()]
    } else if characters < 50 {
        vec!["Summary should be at least 50 characters".to_string()]
    } else {
        vec![]
    };

    SectionScore {
        section: spec.section,
        percentage: score as u8,
        satisfied: usize::from(characters > 0),
        total: 1,
        weight: spec.weight,
        counted: spec.core,
        missing,
        detail: SectionDetail::FreeText {
            characters,
            keyword_matches,
        },
    }
}

fn clamp_percent(raw: f64) -> u8 {
    raw.round().clamp(0.0, 100.0) as u8
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}
