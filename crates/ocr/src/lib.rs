pub mod extract;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod rules;

pub use extract::FieldExtractor;
pub use pipeline::{CardPipeline, PipelineError, PipelineStage, ProcessOptions};
pub use preprocess::{normalize, NormalizeOptions, NormalizedImage, PreprocessError, RawImage, Rotation};
pub use recognizer::{
    EngineConfig, LanguageHint, MockRecognizer, OcrBackend, OcrEngine, OcrError, OcrResult,
    Recognition,
};
pub use rules::{default_rules, FieldRule, RuleError, RuleSet};
