//! Audience (service provider) exclusion with attribute overrides.
//!
//! A matching exclusion pattern disables the second factor for the
//! requesting audience. For the first matching pattern, an override set may
//! re-enable it for users carrying selected attribute values (for example
//! `memberOf=admins`).

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::GateError;

/// attribute name -> patterns matched against each of its values
pub type AttributeOverrides = IndexMap<String, Vec<AudiencePattern>>;

/// exclusion pattern source -> attribute overrides
pub type IncludeOverrides = IndexMap<String, AttributeOverrides>;

/// A compiled policy regex that remembers how it was written.
#[derive(Clone, Debug)]
pub struct AudiencePattern {
    source: String,
    regex: Regex,
}

impl AudiencePattern {
    /// Compile a pattern. `/body/flags` is unwrapped (flags `i`, `m`, `s`,
    /// `x`); anything else is used verbatim.
    ///
    /// # Errors
    /// Returns `GateError::PolicyMatch` for an invalid regex or unknown flag.
    pub fn parse(source: &str) -> Result<Self, GateError> {
        let regex = compile(source).map_err(|reason| GateError::PolicyMatch {
            entry: source.to_string(),
            reason,
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

fn compile(source: &str) -> Result<Regex, String> {
    let Some((body, flags)) = split_delimited(source) else {
        return Regex::new(source).map_err(|e| e.to_string());
    };

    let mut builder = RegexBuilder::new(body);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => return Err(format!("unsupported pattern flag {other:?}")),
        };
    }
    builder.build().map_err(|e| e.to_string())
}

fn split_delimited(source: &str) -> Option<(&str, &str)> {
    let rest = source.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    Some((&rest[..end], &rest[end + 1..]))
}

/// Which attribute value re-enabled the second factor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverrideMatch {
    pub attribute: String,
    pub value: String,
    pub pattern: String,
}

/// Outcome of the audience check, kept for the debug trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudienceDecision {
    pub enabled: bool,
    pub matched_pattern: Option<String>,
    pub fired_override: Option<OverrideMatch>,
    pub absent_attributes: Vec<String>,
}

impl fmt::Display for AudienceDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.matched_pattern, &self.fired_override) {
            (None, _) => write!(f, "no exclusion pattern matched, enabled={}", self.enabled),
            (Some(pattern), None) => write!(
                f,
                "matched exclusion pattern {pattern:?}, no attribute override, enabled={}",
                self.enabled
            ),
            (Some(pattern), Some(hit)) => write!(
                f,
                "matched exclusion pattern {pattern:?}, re-enabled by attribute {:?} = {:?} (pattern {:?}), enabled={}",
                hit.attribute, hit.value, hit.pattern, self.enabled
            ),
        }
    }
}

/// Evaluate the exclusion and keep the match trace.
#[must_use]
pub fn evaluate_audience(
    audience_id: &str,
    excluded: &[AudiencePattern],
    overrides: &IncludeOverrides,
    attributes: &BTreeMap<String, Vec<String>>,
) -> AudienceDecision {
    let mut decision = AudienceDecision {
        enabled: true,
        matched_pattern: None,
        fired_override: None,
        absent_attributes: Vec::new(),
    };

    // first match in list order selects the override set
    let Some(matched) = excluded.iter().find(|pattern| {
        let hit = pattern.is_match(audience_id);
        debug!("test pattern {:?} against audience {audience_id:?}: {hit}", pattern.source());
        hit
    }) else {
        return decision;
    };

    decision.enabled = false;
    decision.matched_pattern = Some(matched.source().to_string());

    let Some(attribute_overrides) = lookup_overrides(overrides, matched.source()) else {
        return decision;
    };

    for (attribute, patterns) in attribute_overrides {
        let Some(values) = attributes.get(attribute) else {
            decision.absent_attributes.push(attribute.clone());
            continue;
        };

        let hit = values.iter().find_map(|value| {
            patterns
                .iter()
                .find(|pattern| pattern.is_match(value))
                .map(|pattern| OverrideMatch {
                    attribute: attribute.clone(),
                    value: value.clone(),
                    pattern: pattern.source().to_string(),
                })
        });

        if let Some(hit) = hit {
            decision.enabled = true;
            decision.fired_override = Some(hit);
            break;
        }
    }

    decision
}

/// Boolean form of [`evaluate_audience`]: true means the second factor applies.
#[must_use]
pub fn evaluate_audience_exclusion(
    audience_id: &str,
    excluded: &[AudiencePattern],
    overrides: &IncludeOverrides,
    attributes: &BTreeMap<String, Vec<String>>,
) -> bool {
    evaluate_audience(audience_id, excluded, overrides, attributes).enabled
}

// Override sets may be keyed by the pattern as written or by its delimited form.
fn lookup_overrides<'a>(
    overrides: &'a IncludeOverrides,
    source: &str,
) -> Option<&'a AttributeOverrides> {
    if let Some(found) = overrides.get(source) {
        return Some(found);
    }
    match split_delimited(source) {
        Some((body, "")) => overrides.get(body),
        Some(_) => None,
        None => overrides.get(&format!("/{source}/")),
    }
}
