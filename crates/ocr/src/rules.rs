use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cardscan_core::{ExtractionStrategy, FieldKind};

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid pattern in rule '{name}': {source}")]
    BadPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to parse rule TOML: {0}")]
    Toml(String),
}

/// One declarative extraction rule. Rules are tried in table order within
/// a field kind; the first whose pattern yields a validated value wins.
/// New card layouts are supported by appending rules, not by new code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    pub kind: FieldKind,
    pub strategy: ExtractionStrategy,
    /// Regex; the extracted value is capture group 1 when present,
    /// otherwise the whole match.
    pub pattern: String,
}

/// Pairing of a rule with its precompiled regex.
struct CompiledRule {
    rule: FieldRule,
    regex: Regex,
}

/// A pattern match found by a rule, in reading order of the source text.
#[derive(Debug)]
pub struct RuleMatch<'r> {
    pub rule: &'r FieldRule,
    pub value: String,
    /// Byte offset of the match, for reading-order comparisons and line
    /// anchoring.
    pub start: usize,
}

pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<FieldRule>) -> Result<Self, RuleError> {
        let rules = rules
            .into_iter()
            .map(|rule| match Regex::new(&rule.pattern) {
                Ok(regex) => Ok(CompiledRule { rule, regex }),
                Err(source) => Err(RuleError::BadPattern {
                    name: rule.name.clone(),
                    source,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Parse a `[[rules]]` array-of-tables TOML document.
    pub fn from_toml(toml_content: &str) -> Result<Self, RuleError> {
        #[derive(Deserialize)]
        struct RuleFile {
            rules: Vec<FieldRule>,
        }
        let file: RuleFile =
            toml::from_str(toml_content).map_err(|e| RuleError::Toml(e.to_string()))?;
        Self::new(file.rules)
    }

    /// All matches for a field kind: table order first, then reading order
    /// within a rule.
    pub fn matches(&self, kind: FieldKind, text: &str) -> Vec<RuleMatch<'_>> {
        self.rules
            .iter()
            .filter(|cr| cr.rule.kind == kind)
            .flat_map(|cr| {
                cr.regex.captures_iter(text).map(|caps| {
                    let whole = caps.get(0).expect("capture 0 always present");
                    let value = caps.get(1).unwrap_or(whole);
                    RuleMatch {
                        rule: &cr.rule,
                        value: value.as_str().to_string(),
                        start: value.start(),
                    }
                })
            })
            .collect()
    }

    pub fn first_match(&self, kind: FieldKind, text: &str) -> Option<RuleMatch<'_>> {
        self.matches(kind, text).into_iter().next()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        // The built-in patterns are static and covered by tests.
        RuleSet::new(default_rules()).expect("built-in rules compile")
    }
}

/// The built-in rule table for the reference card layout. Callers add
/// layouts by appending to this and building a new [`RuleSet`].
pub fn default_rules() -> Vec<FieldRule> {
    let rule = |name: &str, kind, strategy, pattern: &str| FieldRule {
        name: name.to_string(),
        kind,
        strategy,
        pattern: pattern.to_string(),
    };
    vec![
        rule(
            "id-grouped-12-digit",
            FieldKind::IdNumber,
            ExtractionStrategy::PrimaryPattern,
            r"\b\d{4}[ -]?\d{4}[ -]?\d{4}\b",
        ),
        rule(
            "dob-labeled",
            FieldKind::DateOfBirth,
            ExtractionStrategy::PrimaryPattern,
            r"(?i)(?:DOB|D\.O\.B\.?|Date\s+of\s+Birth|जन्म\s*तिथि)\s*[:।]?\s*(\d{1,2}[-/.]\d{1,2}[-/.]\d{4})",
        ),
        rule(
            "dob-any-date",
            FieldKind::DateOfBirth,
            ExtractionStrategy::FallbackHeuristic,
            r"\b(\d{1,2}[-/.]\d{1,2}[-/.]\d{4})\b",
        ),
        rule(
            "name-labeled",
            FieldKind::Name,
            ExtractionStrategy::PrimaryPattern,
            r"(?i)(?:Name|नाम)\s*[:।]\s*([A-Za-z][A-Za-z .]*)",
        ),
        rule(
            "gender-vocabulary",
            FieldKind::Gender,
            ExtractionStrategy::PrimaryPattern,
            r"(?i)\b(male|female|transgender)\b|(पुरुष|महिला|किन्नर)",
        ),
    ]
}
