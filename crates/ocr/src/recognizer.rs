use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::preprocess::NormalizedImage;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    #[error("recognition exceeded the {0:?} budget")]
    Timeout(Duration),
    #[error("OCR engine error: {0}")]
    Engine(String),
}

/// Which recognition language model to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanguageHint {
    /// Primary script only (`eng`).
    Primary,
    /// Secondary regional script only (`hin`).
    Secondary,
    /// Both models (`eng+hin`).
    #[default]
    Auto,
}

impl LanguageHint {
    pub fn model(self) -> &'static str {
        match self {
            LanguageHint::Primary => "eng",
            LanguageHint::Secondary => "hin",
            LanguageHint::Auto => "eng+hin",
        }
    }
}

impl std::str::FromStr for LanguageHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(LanguageHint::Primary),
            "secondary" => Ok(LanguageHint::Secondary),
            "auto" => Ok(LanguageHint::Auto),
            other => Err(format!("Unknown language hint: '{other}'")),
        }
    }
}

/// What a backend returns for one image.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub text: String,
    /// Engine-reported mean confidence (0–100), when the backend has one.
    pub confidence: Option<f32>,
}

/// Raw output of one adapter-level recognition run.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub text: String,
    /// Language model that actually ran; may differ from the hint after a
    /// fallback.
    pub language: String,
    pub confidence: Option<f32>,
    pub warnings: Vec<String>,
}

/// Abstraction over an OCR engine. Implementations accept PNG image bytes
/// plus a language model name and return recognized text. This trait is
/// the single point of contact with the engine.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, png_bytes: &[u8], language: &str) -> Result<Recognition, OcrError>;

    /// Language models this installation can run.
    fn available_languages(&self) -> Vec<String>;

    /// Cheap capability probe; must not run recognition.
    fn is_available(&self) -> bool;
}

/// Adapter configuration. Passed explicitly to the constructor so two
/// adapters in one process can target different engine installations.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model used when the hinted one is not installed.
    pub default_language: String,
    /// Hard budget for one recognition run.
    pub timeout: Duration,
    /// Serialize backend calls for engines that are not reentrant.
    pub serialize_access: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_language: "eng".to_string(),
            timeout: Duration::from_secs(30),
            serialize_access: false,
        }
    }
}

/// Drives an [`OcrBackend`] with language-model fallback and a bounded
/// time budget. Recognition runs on the blocking pool.
pub struct OcrEngine<B: OcrBackend> {
    backend: Arc<B>,
    config: EngineConfig,
    gate: Option<Arc<Mutex<()>>>,
}

impl<B: OcrBackend + 'static> OcrEngine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        let gate = config.serialize_access.then(|| Arc::new(Mutex::new(())));
        Self { backend: Arc::new(backend), config, gate }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    pub async fn recognize(
        &self,
        image: &NormalizedImage,
        hint: LanguageHint,
    ) -> Result<OcrResult, OcrError> {
        let mut warnings = Vec::new();
        let requested = hint.model();
        let language = if self
            .backend
            .available_languages()
            .iter()
            .any(|l| l == requested)
        {
            requested.to_string()
        } else {
            warn!(
                requested,
                fallback = %self.config.default_language,
                "language model unavailable"
            );
            warnings.push(format!(
                "language model '{requested}' unavailable; used '{}'",
                self.config.default_language
            ));
            self.config.default_language.clone()
        };

        let png = image
            .to_png_bytes()
            .map_err(|e| OcrError::Engine(e.to_string()))?;

        // A timed-out run still occupies the gate until the backend call
        // actually returns.
        let permit = match &self.gate {
            Some(gate) => Some(Arc::clone(gate).lock_owned().await),
            None => None,
        };
        let backend = Arc::clone(&self.backend);
        let lang = language.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            backend.recognize(&png, &lang)
        });

        let recognition = match tokio::time::timeout(self.config.timeout, task).await {
            Err(_) => return Err(OcrError::Timeout(self.config.timeout)),
            Ok(joined) => joined.map_err(|e| OcrError::Engine(e.to_string()))??,
        };
        debug!(chars = recognition.text.len(), %language, "recognition complete");

        Ok(OcrResult {
            text: recognition.text,
            language,
            confidence: recognition.confidence,
            warnings,
        })
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set string — lets the extraction pipeline be exercised
/// without Tesseract installed.
pub struct MockRecognizer {
    text: String,
    languages: Vec<String>,
    delay: Option<Duration>,
    available: bool,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            languages: vec!["eng".into(), "hin".into(), "eng+hin".into()],
            delay: None,
            available: true,
        }
    }

    /// Restrict the advertised language models.
    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Sleep before answering, to exercise the timeout path.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A backend whose engine is down.
    pub fn unavailable() -> Self {
        Self {
            text: String::new(),
            languages: vec![],
            delay: None,
            available: false,
        }
    }
}

impl OcrBackend for MockRecognizer {
    fn recognize(&self, _png_bytes: &[u8], _language: &str) -> Result<Recognition, OcrError> {
        if !self.available {
            return Err(OcrError::Unavailable("mock engine is down".into()));
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(Recognition { text: self.text.clone(), confidence: None })
    }

    fn available_languages(&self) -> Vec<String> {
        self.languages.clone()
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError, Recognition};
    use leptess::LepTess;

    /// Tesseract-backed recognizer. `data_path` points at the tessdata
    /// directory; passing it explicitly (rather than via an environment
    /// global) lets tests point two adapters at different installations.
    pub struct TesseractRecognizer {
        data_path: Option<String>,
        languages: Vec<String>,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, languages: &[&str]) -> Self {
            Self {
                data_path,
                languages: languages.iter().map(|l| l.to_string()).collect(),
            }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, png_bytes: &[u8], language: &str) -> Result<Recognition, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), language)
                .map_err(|e| OcrError::Unavailable(e.to_string()))?;
            lt.set_image_from_mem(png_bytes)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            let text = lt
                .get_utf8_text()
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            let confidence = Some(lt.mean_text_conf() as f32);
            Ok(Recognition { text, confidence })
        }

        fn available_languages(&self) -> Vec<String> {
            self.languages.clone()
        }

        fn is_available(&self) -> bool {
            let probe = self.languages.first().map(String::as_str).unwrap_or("eng");
            LepTess::new(self.data_path.as_deref(), probe).is_ok()
        }
    }
}
