//! Requirement tables and field predicates for every scored section.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::Value;

use crate::document::SectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Required,
    Recommended,
    Optional,
}

/// Predicate a single field value must satisfy.
#[derive(Debug, Clone, Copy)]
pub enum Check {
    /// Any non-empty value.
    Present,
    /// A string with at least this many characters after trimming.
    MinLen(usize),
    Email,
    /// At least 7 digits once spaces, dashes and parentheses are stripped.
    Phone,
    /// A parseable calendar date.
    Date,
    /// Case-insensitive member of a fixed vocabulary.
    OneOf(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub tier: Tier,
    pub check: Check,
}

const fn field(name: &'static str, tier: Tier, check: Check) -> FieldRule {
    FieldRule { name, tier, check }
}

#[derive(Debug, Clone, Copy)]
pub enum SectionRule {
    /// Object payload whose fields are tiered required/recommended/optional.
    Fields(&'static [FieldRule]),
    /// Array payload of entries.
    List {
        min_entries: usize,
        fields: &'static [FieldRule],
        /// Singular and plural noun for messages.
        noun: (&'static str, &'static str),
        /// Hint offered once the list is populated but entries are thin.
        enhancement: Option<&'static str>,
    },
    /// String payload scored by length and keywords.
    FreeText,
    /// Present in the document but not part of the completion score.
    Unscored,
}

#[derive(Debug, Clone, Copy)]
pub struct SectionSpec {
    pub section: SectionId,
    pub weight: u32,
    pub rule: SectionRule,
    /// Core sections always join the weighted average; optional ones only once populated.
    pub core: bool,
}

const SKILL_LEVELS: &[&str] = &["beginner", "intermediate", "advanced", "expert"];

const PERSONAL_INFO_FIELDS: &[FieldRule] = &[
    field("fullName", Tier::Required, Check::MinLen(2)),
    field("email", Tier::Required, Check::Email),
    field("phone", Tier::Recommended, Check::Phone),
    field("location", Tier::Recommended, Check::MinLen(2)),
    field("jobTitle", Tier::Recommended, Check::MinLen(2)),
    field("linkedin", Tier::Optional, Check::Present),
    field("github", Tier::Optional, Check::Present),
    field("website", Tier::Optional, Check::Present),
];

const EXPERIENCE_FIELDS: &[FieldRule] = &[
    field("company", Tier::Required, Check::MinLen(2)),
    field("position", Tier::Required, Check::MinLen(2)),
    field("startDate", Tier::Required, Check::Date),
    field("description", Tier::Recommended, Check::MinLen(20)),
];

const EDUCATION_FIELDS: &[FieldRule] = &[
    field("institution", Tier::Required, Check::MinLen(2)),
    field("degree", Tier::Required, Check::MinLen(2)),
    field("field", Tier::Recommended, Check::MinLen(2)),
    field("startDate", Tier::Recommended, Check::Date),
];

const SKILL_FIELDS: &[FieldRule] = &[
    field("name", Tier::Required, Check::MinLen(2)),
    field("level", Tier::Recommended, Check::OneOf(SKILL_LEVELS)),
    field("category", Tier::Optional, Check::Present),
];

const PROJECT_FIELDS: &[FieldRule] = &[
    field("name", Tier::Required, Check::MinLen(2)),
    field("description", Tier::Recommended, Check::MinLen(20)),
    field("technologies", Tier::Optional, Check::Present),
];

const CERTIFICATION_FIELDS: &[FieldRule] = &[
    field("name", Tier::Required, Check::MinLen(2)),
    field("issuer", Tier::Recommended, Check::MinLen(2)),
    field("date", Tier::Optional, Check::Date),
];

const LANGUAGE_FIELDS: &[FieldRule] = &[
    field("language", Tier::Required, Check::MinLen(2)),
    field("proficiency", Tier::Recommended, Check::Present),
];

const REFERENCE_FIELDS: &[FieldRule] = &[
    field("name", Tier::Required, Check::MinLen(2)),
    field("contact", Tier::Recommended, Check::Present),
];

/// Every section in declaration order.
pub const SECTION_SPECS: &[SectionSpec] = &[
    SectionSpec {
        section: SectionId::PersonalInfo,
        weight: 25,
        rule: SectionRule::Fields(PERSONAL_INFO_FIELDS),
        core: true,
    },
    SectionSpec {
        section: SectionId::Summary,
        weight: 10,
        rule: SectionRule::FreeText,
        core: true,
    },
    SectionSpec {
        section: SectionId::Experience,
        weight: 30,
        rule: SectionRule::List {
            min_entries: 1,
            fields: EXPERIENCE_FIELDS,
            noun: ("work experience", "work experiences"),
            enhancement: Some("Add metrics and achievements to your work experience"),
        },
        core: true,
    },
    SectionSpec {
        section: SectionId::Education,
        weight: 15,
        rule: SectionRule::List {
            min_entries: 1,
            fields: EDUCATION_FIELDS,
            noun: ("education entry", "education entries"),
            enhancement: Some("Add your field of study and start dates to your education"),
        },
        core: true,
    },
    SectionSpec {
        section: SectionId::Skills,
        weight: 20,
        rule: SectionRule::List {
            min_entries: 3,
            fields: SKILL_FIELDS,
            noun: ("skill", "skills"),
            enhancement: Some("Add proficiency levels and categories to your skills"),
        },
        core: true,
    },
    SectionSpec {
        section: SectionId::Projects,
        weight: 5,
        rule: SectionRule::List {
            min_entries: 0,
            fields: PROJECT_FIELDS,
            noun: ("project", "projects"),
            enhancement: None,
        },
        core: false,
    },
    SectionSpec {
        section: SectionId::Certifications,
        weight: 5,
        rule: SectionRule::List {
            min_entries: 0,
            fields: CERTIFICATION_FIELDS,
            noun: ("certification", "certifications"),
            enhancement: None,
        },
        core: false,
    },
    SectionSpec {
        section: SectionId::Languages,
        weight: 5,
        rule: SectionRule::List {
            min_entries: 0,
            fields: LANGUAGE_FIELDS,
            noun: ("language", "languages"),
            enhancement: None,
        },
        core: false,
    },
    SectionSpec {
        section: SectionId::References,
        weight: 5,
        rule: SectionRule::List {
            min_entries: 0,
            fields: REFERENCE_FIELDS,
            noun: ("reference", "references"),
            enhancement: None,
        },
        core: false,
    },
    SectionSpec {
        section: SectionId::CustomSections,
        weight: 0,
        rule: SectionRule::Unscored,
        core: false,
    },
];

/// Summary keywords worth a bonus, matched as lowercase substrings.
pub const SUMMARY_KEYWORDS: &[&str] = &[
    "experience",
    "skills",
    "professional",
    "expertise",
    "results",
    "achieve",
];

pub const SUMMARY_KEYWORD_BONUS: u32 = 5;

/// Length thresholds (trimmed chars) and the score reached at each.
pub const SUMMARY_LENGTH_STEPS: &[(usize, u32)] = &[(200, 100), (150, 85), (100, 70), (50, 50), (1, 25)];

impl Check {
    pub fn passes(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Check::Present => is_present(value),
            Check::MinLen(min) => trimmed(value).is_some_and(|s| s.chars().count() >= *min),
            Check::Email => trimmed(value)
                .is_some_and(|s| email_pattern().is_some_and(|re| re.is_match(s))),
            Check::Phone => trimmed(value).is_some_and(|s| {
                s.chars()
                    .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
                    .count()
                    >= 7
            }),
            Check::Date => trimmed(value).is_some_and(|s| parse_date(s).is_some()),
            Check::OneOf(options) => trimmed(value).is_some_and(|s| {
                let lower = s.to_lowercase();
                options.iter().any(|o| *o == lower)
            }),
        }
    }
}

fn trimmed(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim)
}

/// Generic non-emptiness used for optional fields and untyped values.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => true,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Compiled once. `None` only if the pattern fails to compile, in which case no email validates.
fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| match Regex::new(EMAIL_PATTERN) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!("Email pattern failed to compile: {e}");
                None
            }
        })
        .as_ref()
}

/// Accepts the date shapes section editors emit: RFC 3339, `YYYY-MM-DD`,
/// `YYYY-MM`, `MM/DD/YYYY`, `MM/YYYY` and `Month YYYY`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("01/{s}"), "%d/%m/%Y") {
        return Some(d);
    }
    NaiveDate::parse_from_str(&format!("1 {s}"), "%d %B %Y")
        .or_else(|_| NaiveDate::parse_from_str(&format!("1 {s}"), "%d %b %Y"))
        .ok()
}

pub fn spec_for(section: SectionId) -> &'static SectionSpec {
    SECTION_SPECS
        .iter()
        .find(|s| s.section == section)
        .unwrap_or(&SECTION_SPECS[SECTION_SPECS.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_specs_cover_every_section_in_declaration_order() {
        let ids: Vec<_> = SECTION_SPECS.iter().map(|s| s.section).collect();
        assert_eq!(ids, SectionId::ALL.to_vec());
    }

    #[test]
    fn test_core_weights_sum_to_100() {
        let core: u32 = SECTION_SPECS.iter().filter(|s| s.core).map(|s| s.weight).sum();
        assert_eq!(core, 100);
    }

    #[test]
    fn test_email_check() {
        assert!(email_pattern().is_some());
        assert!(Check::Email.passes(Some(&json!("jo@x.com"))));
        assert!(Check::Email.passes(Some(&json!("  jo@x.com "))));
        assert!(!Check::Email.passes(Some(&json!("jo@x"))));
        assert!(!Check::Email.passes(Some(&json!("jo x@y.com"))));
        assert!(!Check::Email.passes(None));
    }

    #[test]
    fn test_phone_check_strips_formatting() {
        assert!(Check::Phone.passes(Some(&json!("(555) 123-4567"))));
        assert!(!Check::Phone.passes(Some(&json!("12 34"))));
    }

    #[test]
    fn test_min_len_trims_and_rejects_non_strings() {
        assert!(Check::MinLen(2).passes(Some(&json!("Jo"))));
        assert!(!Check::MinLen(2).passes(Some(&json!(" J "))));
        assert!(!Check::MinLen(2).passes(Some(&json!(42))));
    }

    #[test]
    fn test_date_shapes() {
        for s in [
            "2021-03-01",
            "2021-03",
            "03/15/2021",
            "03/2021",
            "March 2021",
            "Mar 2021",
            "2021-03-01T00:00:00Z",
        ] {
            assert!(parse_date(s).is_some(), "{s} should parse");
        }
        assert!(parse_date("someday").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_one_of_is_case_insensitive() {
        let check = Check::OneOf(SKILL_LEVELS);
        assert!(check.passes(Some(&json!("Expert"))));
        assert!(!check.passes(Some(&json!("guru"))));
    }

    #[test]
    fn test_present_handles_every_json_kind() {
        assert!(!is_present(&json!(null)));
        assert!(!is_present(&json!("  ")));
        assert!(!is_present(&json!([])));
        assert!(!is_present(&json!({})));
        assert!(is_present(&json!(0)));
        assert!(is_present(&json!(["rust"])));
    }
}
