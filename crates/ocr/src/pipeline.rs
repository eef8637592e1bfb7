use std::path::Path;
use thiserror::Error;
use tracing::debug;

use cardscan_core::ExtractionRecord;

use crate::extract::FieldExtractor;
use crate::preprocess::{self, NormalizeOptions, PreprocessError, RawImage};
use crate::recognizer::{LanguageHint, OcrBackend, OcrEngine, OcrError};

/// Pipeline stage in which a hard failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Input,
    Normalization,
    Recognition,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Input => write!(f, "input"),
            PipelineStage::Normalization => write!(f, "normalization"),
            PipelineStage::Recognition => write!(f, "recognition"),
        }
    }
}

/// Infrastructure failure: the image could not be read or the engine could
/// not produce text. Field-level misses are never errors; they appear as
/// not-found slots inside a successful [`ExtractionRecord`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image normalization failed: {0}")]
    Normalization(#[from] PreprocessError),
    #[error("text recognition failed: {0}")]
    Recognition(#[from] OcrError),
}

impl PipelineError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Io(_) => PipelineStage::Input,
            PipelineError::Normalization(_) => PipelineStage::Normalization,
            PipelineError::Recognition(_) => PipelineStage::Recognition,
        }
    }
}

/// Caller-facing knobs for one invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Contrast stretch + despeckle before recognition.
    pub enhance: bool,
    /// Recognition language model selection.
    pub language: LanguageHint,
    /// Display hint passed through to the presentation layer; the record
    /// always carries the full ID value, and `IdNumber::masked` serves
    /// callers that honor this.
    pub mask_id: bool,
}

/// Sequences normalize → recognize → extract for one card image.
/// Stateless: nothing is shared or retained between invocations, so any
/// number may run concurrently.
pub struct CardPipeline<B: OcrBackend> {
    engine: OcrEngine<B>,
    extractor: FieldExtractor,
}

impl<B: OcrBackend + 'static> CardPipeline<B> {
    pub fn new(engine: OcrEngine<B>, extractor: FieldExtractor) -> Self {
        Self { engine, extractor }
    }

    /// Capability probe for external liveness checks; never runs
    /// recognition.
    pub fn is_engine_available(&self) -> bool {
        self.engine.is_available()
    }

    /// Process an in-memory image. Downstream stages are not invoked once
    /// a stage has failed.
    pub async fn process(
        &self,
        raw: &RawImage,
        options: &ProcessOptions,
    ) -> Result<ExtractionRecord, PipelineError> {
        let normalized =
            preprocess::normalize(raw, &NormalizeOptions { enhance: options.enhance })?;
        debug!(
            width = normalized.width(),
            height = normalized.height(),
            "image normalized"
        );

        let ocr = self.engine.recognize(&normalized, options.language).await?;
        debug!(chars = ocr.text.len(), language = %ocr.language, "text recognized");

        let mut record = self.extractor.extract(&ocr);
        if !normalized.warnings.is_empty() {
            let mut merged = normalized.warnings;
            merged.append(&mut record.warnings);
            record.warnings = merged;
        }
        Ok(record)
    }

    /// Read and process a file on disk; the MIME type is inferred from the
    /// file extension.
    pub async fn process_file(
        &self,
        path: &Path,
        options: &ProcessOptions,
    ) -> Result<ExtractionRecord, PipelineError> {
        let bytes = tokio::fs::read(path).await?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let raw = RawImage::from_ext(bytes, ext);
        self.process(&raw, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{EngineConfig, MockRecognizer, OcrError, Recognition};
    use cardscan_core::FieldValue;
    use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const CARD: &str = "GOVERNMENT OF INDIA\nRahul Kumar\nDOB: 15/08/1990\nMale\n1234 5678 9012";

    /// A PNG with horizontal text-line structure, so orientation detection
    /// stays quiet.
    fn card_png() -> Vec<u8> {
        let img: GrayImage = ImageBuffer::from_fn(64, 48, |_, y| {
            if y % 8 < 3 {
                Luma([20u8])
            } else {
                Luma([230u8])
            }
        });
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn pipeline_with(backend: MockRecognizer) -> CardPipeline<MockRecognizer> {
        CardPipeline::new(
            OcrEngine::new(backend, EngineConfig::default()),
            FieldExtractor::default(),
        )
    }

    #[tokio::test]
    async fn full_pipeline_extracts_card_fields() {
        let pipeline = pipeline_with(MockRecognizer::new(CARD));
        let raw = RawImage::new(card_png(), "image/png");
        let record = pipeline
            .process(&raw, &ProcessOptions::default())
            .await
            .unwrap();
        assert!(record.success);
        assert_eq!(record.found_count(), 4);
        assert_eq!(record.id_number.raw.as_deref(), Some("1234 5678 9012"));
        assert_eq!(
            record.name.value,
            Some(FieldValue::Text("Rahul Kumar".into()))
        );
    }

    #[tokio::test]
    async fn pipeline_is_stateless_across_calls() {
        let pipeline = pipeline_with(MockRecognizer::new(CARD));
        let raw = RawImage::new(card_png(), "image/png");
        let first = pipeline.process(&raw, &ProcessOptions::default()).await.unwrap();
        let second = pipeline.process(&raw, &ProcessOptions::default()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn corrupt_image_fails_in_normalization_without_touching_the_engine() {
        struct TrackingBackend {
            called: Arc<AtomicBool>,
        }
        impl OcrBackend for TrackingBackend {
            fn recognize(&self, _: &[u8], _: &str) -> Result<Recognition, OcrError> {
                self.called.store(true, Ordering::SeqCst);
                Ok(Recognition { text: String::new(), confidence: None })
            }
            fn available_languages(&self) -> Vec<String> {
                vec!["eng".into()]
            }
            fn is_available(&self) -> bool {
                true
            }
        }

        let called = Arc::new(AtomicBool::new(false));
        let pipeline = CardPipeline::new(
            OcrEngine::new(
                TrackingBackend { called: Arc::clone(&called) },
                EngineConfig::default(),
            ),
            FieldExtractor::default(),
        );

        let raw = RawImage::new(b"truncated garbage".to_vec(), "image/png");
        let err = pipeline
            .process(&raw, &ProcessOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), PipelineStage::Normalization);
        assert!(matches!(
            err,
            PipelineError::Normalization(PreprocessError::Decode(_))
        ));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unavailable_engine_fails_in_recognition_stage() {
        let pipeline = pipeline_with(MockRecognizer::unavailable());
        assert!(!pipeline.is_engine_available());

        let raw = RawImage::new(card_png(), "image/png");
        let err = pipeline
            .process(&raw, &ProcessOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), PipelineStage::Recognition);
        assert!(matches!(
            err,
            PipelineError::Recognition(OcrError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_mime_type_is_a_normalization_failure() {
        let pipeline = pipeline_with(MockRecognizer::new(CARD));
        let raw = RawImage::new(card_png(), "application/pdf");
        let err = pipeline
            .process(&raw, &ProcessOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Normalization(PreprocessError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn normalization_warnings_reach_the_record() {
        // A featureless image trips the orientation warning.
        let img: GrayImage = ImageBuffer::from_fn(64, 64, |_, _| Luma([128u8]));
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let pipeline = pipeline_with(MockRecognizer::new(CARD));
        let record = pipeline
            .process(&RawImage::new(buf, "image/png"), &ProcessOptions::default())
            .await
            .unwrap();
        assert!(record
            .warnings
            .iter()
            .any(|w| w.contains("orientation")));
    }

    #[tokio::test]
    async fn enhance_option_processes_successfully() {
        let pipeline = pipeline_with(MockRecognizer::new(CARD));
        let raw = RawImage::new(card_png(), "image/png");
        let options = ProcessOptions { enhance: true, ..ProcessOptions::default() };
        let record = pipeline.process(&raw, &options).await.unwrap();
        assert!(record.success);
    }

    #[tokio::test]
    async fn process_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.png");
        tokio::fs::write(&path, card_png()).await.unwrap();

        let pipeline = pipeline_with(MockRecognizer::new(CARD));
        let record = pipeline
            .process_file(&path, &ProcessOptions::default())
            .await
            .unwrap();
        assert!(record.success);
    }

    #[tokio::test]
    async fn process_file_missing_path_is_an_input_error() {
        let pipeline = pipeline_with(MockRecognizer::new(CARD));
        let err = pipeline
            .process_file(Path::new("/nonexistent/card.png"), &ProcessOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), PipelineStage::Input);
    }

    #[tokio::test]
    async fn record_serializes_for_the_presentation_layer() {
        let pipeline = pipeline_with(MockRecognizer::new(CARD));
        let raw = RawImage::new(card_png(), "image/png");
        let record = pipeline
            .process(&raw, &ProcessOptions::default())
            .await
            .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["success"], serde_json::Value::Bool(true));
    }
}
