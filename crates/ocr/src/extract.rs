use chrono::{Datelike, NaiveDate, Utc};
use tracing::debug;

use cardscan_core::{
    ChecksumPolicy, ExtractedField, ExtractionRecord, ExtractionStrategy, FieldKind, FieldValue,
    Gender, IdNumber, IdNumberError,
};

use crate::recognizer::OcrResult;
use crate::rules::RuleSet;

/// Words that appear on cards but are never part of a holder's name.
const LABEL_WORDS: [&str; 16] = [
    "government",
    "india",
    "male",
    "female",
    "transgender",
    "dob",
    "birth",
    "year",
    "unique",
    "identification",
    "authority",
    "father",
    "mother",
    "address",
    "भारत",
    "सरकार",
];

/// Parses raw OCR text into the card field set. Never fails hard: every
/// field that cannot be confidently extracted comes back explicitly
/// not-found with a warning, so partial reads stay useful.
pub struct FieldExtractor {
    rules: RuleSet,
    checksum: ChecksumPolicy,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self {
            rules: RuleSet::default(),
            checksum: ChecksumPolicy::default(),
        }
    }
}

impl FieldExtractor {
    pub fn new(rules: RuleSet, checksum: ChecksumPolicy) -> Self {
        Self { rules, checksum }
    }

    pub fn extract(&self, ocr: &OcrResult) -> ExtractionRecord {
        let text = ocr.text.as_str();
        let mut warnings = ocr.warnings.clone();

        let (id_number, id_offset) = self.extract_id(text, &mut warnings);
        let (date_of_birth, dob_offset) = self.extract_dob(text, &mut warnings);
        let name = self.extract_name(text, dob_offset, id_offset, &mut warnings);
        let gender = self.extract_gender(text, &mut warnings);

        let record = ExtractionRecord::new(id_number, name, date_of_birth, gender, warnings);
        debug!(found = record.found_count(), "extraction complete");
        record
    }

    /// Position-independent scan for a digit-count token. Candidates are
    /// taken in reading order; the configured checksum decides whether a
    /// candidate survives validation.
    fn extract_id(
        &self,
        text: &str,
        warnings: &mut Vec<String>,
    ) -> (ExtractedField, Option<usize>) {
        let mut distinct: Vec<String> = Vec::new();
        let mut chosen: Option<(usize, String, IdNumber)> = None;

        for m in self.rules.matches(FieldKind::IdNumber, text) {
            let digits: String = m.value.chars().filter(char::is_ascii_digit).collect();
            if !distinct.contains(&digits) {
                distinct.push(digits);
            }
            if chosen.is_none() {
                match IdNumber::parse(&m.value, self.checksum) {
                    Ok(id) => chosen = Some((m.start, m.value, id)),
                    Err(IdNumberError::Checksum) => push_unique(
                        warnings,
                        format!("ID candidate '{}' rejected by checksum", m.value),
                    ),
                    // Length/digit mismatches cannot survive the pattern;
                    // skip the candidate if one appears anyway.
                    Err(_) => {}
                }
            }
        }

        if distinct.len() > 1 {
            push_unique(
                warnings,
                "multiple ID-number candidates; kept the first in reading order".to_string(),
            );
        }

        match chosen {
            Some((start, raw, id)) => {
                let confidence = match self.checksum {
                    ChecksumPolicy::None => 0.85,
                    ChecksumPolicy::Verhoeff => 0.98,
                };
                (
                    ExtractedField::found(
                        FieldKind::IdNumber,
                        raw,
                        FieldValue::Id(id),
                        ExtractionStrategy::PrimaryPattern,
                        confidence,
                    ),
                    Some(start),
                )
            }
            None => {
                push_unique(warnings, "ID number not found".to_string());
                (ExtractedField::not_found(FieldKind::IdNumber), None)
            }
        }
    }

    /// Labeled anchor first, any date-shaped token second. Tokens are
    /// day-first; impossible or implausible dates are rejected, never
    /// clamped.
    fn extract_dob(
        &self,
        text: &str,
        warnings: &mut Vec<String>,
    ) -> (ExtractedField, Option<usize>) {
        for m in self.rules.matches(FieldKind::DateOfBirth, text) {
            let Some(date) = parse_day_first(&m.value) else {
                push_unique(
                    warnings,
                    format!("date token '{}' is not a valid calendar date", m.value),
                );
                continue;
            };
            if !plausible_birth_year(date) {
                push_unique(
                    warnings,
                    format!("date token '{}' outside the plausible birth-year range", m.value),
                );
                continue;
            }
            let strategy = m.rule.strategy;
            let confidence = match strategy {
                ExtractionStrategy::PrimaryPattern => 0.90,
                ExtractionStrategy::FallbackHeuristic => 0.70,
            };
            if strategy == ExtractionStrategy::FallbackHeuristic {
                push_unique(
                    warnings,
                    "date of birth taken from an unlabeled date token".to_string(),
                );
            }
            return (
                ExtractedField::found(
                    FieldKind::DateOfBirth,
                    m.value,
                    FieldValue::Date(date),
                    strategy,
                    confidence,
                ),
                Some(m.start),
            );
        }
        push_unique(warnings, "date of birth not found".to_string());
        (ExtractedField::not_found(FieldKind::DateOfBirth), None)
    }

    /// Labeled `Name:` pattern first. The fallback walks upward from the
    /// DOB anchor (or the ID block when no DOB was found) to the nearest
    /// line that is predominantly alphabetic and not a label line.
    /// Best-effort only; there is no deterministic guarantee a card even
    /// prints the name on its own line.
    fn extract_name(
        &self,
        text: &str,
        dob_offset: Option<usize>,
        id_offset: Option<usize>,
        warnings: &mut Vec<String>,
    ) -> ExtractedField {
        if let Some(m) = self.rules.first_match(FieldKind::Name, text) {
            let cleaned = clean_name(&m.value);
            if !cleaned.is_empty() {
                return ExtractedField::found(
                    FieldKind::Name,
                    m.value,
                    FieldValue::Text(cleaned),
                    ExtractionStrategy::PrimaryPattern,
                    0.85,
                );
            }
        }

        if let Some(anchor) = dob_offset.or(id_offset) {
            let anchor_line = line_index_of(text, anchor);
            let lines: Vec<&str> = text.lines().collect();
            for idx in (0..anchor_line.min(lines.len())).rev() {
                let line = lines[idx].trim();
                if line.is_empty() || is_label_line(line) || !predominantly_alphabetic(line) {
                    continue;
                }
                let cleaned = clean_name(line);
                if cleaned.is_empty() {
                    continue;
                }
                push_unique(
                    warnings,
                    "name taken from line-position heuristic".to_string(),
                );
                return ExtractedField::found(
                    FieldKind::Name,
                    line,
                    FieldValue::Text(cleaned),
                    ExtractionStrategy::FallbackHeuristic,
                    0.60,
                );
            }
        }

        push_unique(warnings, "name not found".to_string());
        ExtractedField::not_found(FieldKind::Name)
    }

    /// Closed vocabulary in either supported script; absence is reported,
    /// never guessed.
    fn extract_gender(&self, text: &str, warnings: &mut Vec<String>) -> ExtractedField {
        if let Some(m) = self.rules.first_match(FieldKind::Gender, text) {
            let gender = match m.value.to_lowercase().as_str() {
                "male" | "पुरुष" => Some(Gender::Male),
                "female" | "महिला" => Some(Gender::Female),
                "transgender" | "किन्नर" => Some(Gender::Transgender),
                _ => None,
            };
            if let Some(gender) = gender {
                return ExtractedField::found(
                    FieldKind::Gender,
                    m.value,
                    FieldValue::Gender(gender),
                    ExtractionStrategy::PrimaryPattern,
                    0.95,
                );
            }
        }
        push_unique(warnings, "gender not found".to_string());
        ExtractedField::not_found(FieldKind::Gender)
    }
}

fn push_unique(warnings: &mut Vec<String>, message: String) {
    if !warnings.contains(&message) {
        warnings.push(message);
    }
}

fn parse_day_first(token: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = token.split(['/', '-', '.']).collect();
    if parts.len() != 3 {
        return None;
    }
    let day: u32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    let year: i32 = parts[2].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn plausible_birth_year(date: NaiveDate) -> bool {
    (1900..=Utc::now().year()).contains(&date.year())
}

fn line_index_of(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].bytes().filter(|&b| b == b'\n').count()
}

fn is_label_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|w| LABEL_WORDS.contains(&w))
}

/// At least 80% of non-whitespace characters are alphabetic.
fn predominantly_alphabetic(line: &str) -> bool {
    let total = line.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return false;
    }
    let alpha = line.chars().filter(|c| c.is_alphabetic()).count();
    alpha * 10 >= total * 8
}

/// Strip residual OCR noise, collapsing runs of whitespace.
fn clean_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace() || *c == '.')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
