pub mod checksum;
pub mod field;
pub mod id_number;
pub mod record;

pub use checksum::ChecksumPolicy;
pub use field::{ExtractedField, ExtractionStrategy, FieldKind, FieldValue, Gender};
pub use id_number::{IdNumber, IdNumberError, ID_DIGITS};
pub use record::ExtractionRecord;
