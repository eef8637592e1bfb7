use serde::{Deserialize, Serialize};

use crate::field::{ExtractedField, FieldKind};

/// Aggregate result of one pipeline invocation: exactly one slot per field
/// kind, found or explicitly not. Immutable once handed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub id_number: ExtractedField,
    pub name: ExtractedField,
    pub date_of_birth: ExtractedField,
    pub gender: ExtractedField,
    /// True when at least one field was found.
    pub success: bool,
    pub warnings: Vec<String>,
}

impl ExtractionRecord {
    pub fn new(
        id_number: ExtractedField,
        name: ExtractedField,
        date_of_birth: ExtractedField,
        gender: ExtractedField,
        warnings: Vec<String>,
    ) -> Self {
        debug_assert_eq!(id_number.kind, FieldKind::IdNumber);
        debug_assert_eq!(name.kind, FieldKind::Name);
        debug_assert_eq!(date_of_birth.kind, FieldKind::DateOfBirth);
        debug_assert_eq!(gender.kind, FieldKind::Gender);
        let success = id_number.is_found()
            || name.is_found()
            || date_of_birth.is_found()
            || gender.is_found();
        Self {
            id_number,
            name,
            date_of_birth,
            gender,
            success,
            warnings,
        }
    }

    pub fn field(&self, kind: FieldKind) -> &ExtractedField {
        match kind {
            FieldKind::IdNumber => &self.id_number,
            FieldKind::Name => &self.name,
            FieldKind::DateOfBirth => &self.date_of_birth,
            FieldKind::Gender => &self.gender,
        }
    }

    pub fn fields(&self) -> [&ExtractedField; 4] {
        [&self.id_number, &self.name, &self.date_of_birth, &self.gender]
    }

    pub fn found_count(&self) -> usize {
        self.fields().iter().filter(|f| f.is_found()).count()
    }
}
