use image::{imageops::FilterType, DynamicImage, GrayImage, ImageBuffer, Luma};
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, warn};

/// Raster formats the pipeline accepts.
const ACCEPTED_MIME: [&str; 6] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/tiff",
    "image/bmp",
];

/// Inputs larger than this are rejected before decoding.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Largest dimension fed to the engine; bigger inputs are downscaled
/// (Tesseract gains nothing past ~300 DPI).
const MAX_DIMENSION: u32 = 2800;

/// Below this confidence the orientation check leaves the image alone.
const ORIENTATION_CONFIDENCE: f32 = 0.6;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("image too large: {0} bytes (limit {MAX_IMAGE_BYTES})")]
    TooLarge(usize),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode processed image: {0}")]
    Encode(String),
}

impl From<image::ImageError> for PreprocessError {
    fn from(e: image::ImageError) -> Self {
        PreprocessError::Decode(e.to_string())
    }
}

/// An input image exactly as the caller submitted it: an opaque byte
/// buffer plus its declared MIME type. Never mutated, never persisted.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self { bytes, mime: mime.into() }
    }

    /// Build from a file extension ("jpg" → "image/jpeg"). Unknown
    /// extensions yield a MIME type `normalize` will reject.
    pub fn from_ext(bytes: Vec<u8>, ext: &str) -> Self {
        let mime = match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "webp" => "image/webp",
            "tif" | "tiff" => "image/tiff",
            "bmp" => "image/bmp",
            _ => "application/octet-stream",
        };
        Self::new(bytes, mime)
    }
}

/// Gross rotation applied to bring a card upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Upright,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Rotation::Upright => img,
            Rotation::Cw90 => img.rotate90(),
            Rotation::Cw180 => img.rotate180(),
            Rotation::Cw270 => img.rotate270(),
        }
    }
}

/// Normalization output: a single-channel pixel buffer plus what was done
/// to produce it. Immutable once built; discarded after recognition.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    image: GrayImage,
    pub rotation: Rotation,
    pub warnings: Vec<String>,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.image
    }

    /// Encode as PNG bytes for the OCR engine.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, PreprocessError> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(self.image.clone())
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| PreprocessError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Contrast stretch + despeckle. A quality/latency trade-off the
    /// caller opts into; off by default.
    pub enhance: bool,
}

/// Convert an arbitrary input image into a canonical single-channel form
/// favorable to OCR: decode, downscale, grayscale, optional enhancement,
/// orientation correction.
pub fn normalize(raw: &RawImage, opts: &NormalizeOptions) -> Result<NormalizedImage, PreprocessError> {
    let mime = raw.mime.to_lowercase();
    if !ACCEPTED_MIME.contains(&mime.as_str()) {
        return Err(PreprocessError::UnsupportedFormat(raw.mime.clone()));
    }
    if raw.bytes.len() > MAX_IMAGE_BYTES {
        return Err(PreprocessError::TooLarge(raw.bytes.len()));
    }

    let decoded = image::load_from_memory(&raw.bytes)?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(PreprocessError::Decode("zero-dimension image".into()));
    }
    let decoded = if decoded.width() > MAX_DIMENSION || decoded.height() > MAX_DIMENSION {
        decoded.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
    } else {
        decoded
    };

    let mut gray: GrayImage = decoded.to_luma8();
    if opts.enhance {
        gray = despeckle(&contrast_stretch(&gray));
    }

    let mut warnings = Vec::new();
    let (detected, confidence) = detect_orientation(&gray);
    let (gray, rotation) = if detected != Rotation::Upright && confidence >= ORIENTATION_CONFIDENCE
    {
        debug!(?detected, confidence, "correcting orientation");
        (
            detected.apply(DynamicImage::ImageLuma8(gray)).to_luma8(),
            detected,
        )
    } else {
        if confidence < ORIENTATION_CONFIDENCE {
            warn!(confidence, "orientation detection inconclusive");
            warnings.push("orientation detection inconclusive; image left unrotated".to_string());
        }
        (gray, Rotation::Upright)
    };

    Ok(NormalizedImage { image: gray, rotation, warnings })
}

/// Stretch intensities so the 2nd..98th percentile spans the full dynamic
/// range. The clipped tails keep a few specular pixels from swallowing
/// the usable range.
fn contrast_stretch(gray: &GrayImage) -> GrayImage {
    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }
    let total = u64::from(gray.width()) * u64::from(gray.height());
    let clip = total / 50;

    let mut lo = 0usize;
    let mut acc = 0u64;
    for (i, &h) in hist.iter().enumerate() {
        acc += h;
        if acc > clip {
            lo = i;
            break;
        }
    }
    let mut hi = 255usize;
    acc = 0;
    for (i, &h) in hist.iter().enumerate().rev() {
        acc += h;
        if acc > clip {
            hi = i;
            break;
        }
    }
    if hi <= lo {
        // Effectively uniform image.
        return gray.clone();
    }

    let range = (hi - lo) as u32;
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let p = (gray.get_pixel(x, y)[0] as usize).clamp(lo, hi) - lo;
        Luma([(p as u32 * 255 / range) as u8])
    })
}

/// 3×3 median filter: removes salt-and-pepper speckle while keeping
/// character edges sharp. Border pixels pass through unchanged.
fn despeckle(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return gray.clone();
    }
    ImageBuffer::from_fn(w, h, |x, y| {
        if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
            return *gray.get_pixel(x, y);
        }
        let mut window = [0u8; 9];
        let mut i = 0;
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                window[i] = gray.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0];
                i += 1;
            }
        }
        window.sort_unstable();
        Luma([window[4]])
    })
}

/// Decide whether text lines run horizontally (upright) or vertically
/// (card rotated a quarter turn) by comparing ink-projection variance
/// across rows vs columns: upright text alternates dense lines and blank
/// gaps row-wise. 180° flips are invisible to projections and pass
/// through unchanged; the confidence value reflects only the 0°/90° call.
fn detect_orientation(gray: &GrayImage) -> (Rotation, f32) {
    let (w, h) = gray.dimensions();
    if w < 16 || h < 16 {
        return (Rotation::Upright, 0.0);
    }

    let total: u64 = gray.pixels().map(|p| u64::from(p[0])).sum();
    let mean = (total / (u64::from(w) * u64::from(h))) as u8;

    let mut rows = vec![0u32; h as usize];
    let mut cols = vec![0u32; w as usize];
    for (x, y, p) in gray.enumerate_pixels() {
        // Ink = darker than the global mean.
        if p[0] < mean {
            rows[y as usize] += 1;
            cols[x as usize] += 1;
        }
    }

    let rv = profile_variance(&rows, w);
    let cv = profile_variance(&cols, h);
    if rv + cv == 0.0 {
        return (Rotation::Upright, 0.0);
    }
    let ratio = rv / (rv + cv);
    if ratio >= 0.5 {
        (Rotation::Upright, ratio)
    } else {
        (Rotation::Cw90, 1.0 - ratio)
    }
}

/// Variance of an ink profile, with counts normalized by the scan width so
/// row and column profiles compare fairly on non-square images.
fn profile_variance(profile: &[u32], scan_width: u32) -> f32 {
    let n = profile.len() as f32;
    let fractions: Vec<f32> = profile
        .iter()
        .map(|&v| v as f32 / scan_width as f32)
        .collect();
    let mean = fractions.iter().sum::<f32>() / n;
    fractions.iter().map(|f| (f - mean) * (f - mean)).sum::<f32>() / n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(img: GrayImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn solid_gray(width: u32, height: u32, value: u8) -> GrayImage {
        ImageBuffer::from_fn(width, height, |_, _| Luma([value]))
    }

    fn gradient_gray(width: u32, height: u32) -> GrayImage {
        ImageBuffer::from_fn(width, height, |x, _| Luma([(x * 255 / width) as u8]))
    }

    /// Dark bands every 8 rows on a light field, like lines of text.
    fn horizontal_lines(width: u32, height: u32) -> GrayImage {
        ImageBuffer::from_fn(width, height, |_, y| {
            if y % 8 < 3 {
                Luma([20u8])
            } else {
                Luma([230u8])
            }
        })
    }

    fn vertical_lines(width: u32, height: u32) -> GrayImage {
        ImageBuffer::from_fn(width, height, |x, _| {
            if x % 8 < 3 {
                Luma([20u8])
            } else {
                Luma([230u8])
            }
        })
    }

    #[test]
    fn rejects_unsupported_mime() {
        let raw = RawImage::new(vec![0u8; 10], "application/pdf");
        assert!(matches!(
            normalize(&raw, &NormalizeOptions::default()),
            Err(PreprocessError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn rejects_oversized_buffer_before_decoding() {
        let raw = RawImage::new(vec![0u8; MAX_IMAGE_BYTES + 1], "image/png");
        assert!(matches!(
            normalize(&raw, &NormalizeOptions::default()),
            Err(PreprocessError::TooLarge(_))
        ));
    }

    #[test]
    fn rejects_corrupt_bytes() {
        let raw = RawImage::new(b"not an image at all".to_vec(), "image/png");
        assert!(matches!(
            normalize(&raw, &NormalizeOptions::default()),
            Err(PreprocessError::Decode(_))
        ));
    }

    #[test]
    fn rejects_truncated_png() {
        let mut bytes = png_bytes(solid_gray(32, 32, 128));
        bytes.truncate(bytes.len() / 2);
        let raw = RawImage::new(bytes, "image/png");
        assert!(matches!(
            normalize(&raw, &NormalizeOptions::default()),
            Err(PreprocessError::Decode(_))
        ));
    }

    #[test]
    fn valid_image_normalizes_without_mutating_input() {
        let bytes = png_bytes(horizontal_lines(64, 48));
        let raw = RawImage::new(bytes.clone(), "image/png");
        let normalized = normalize(&raw, &NormalizeOptions::default()).unwrap();
        assert_eq!(normalized.width(), 64);
        assert_eq!(normalized.height(), 48);
        assert_eq!(raw.bytes, bytes);
    }

    #[test]
    fn large_image_is_downscaled() {
        let bytes = png_bytes(solid_gray(3000, 1500, 200));
        let raw = RawImage::new(bytes, "image/png");
        let normalized = normalize(&raw, &NormalizeOptions::default()).unwrap();
        assert!(normalized.width() <= 2800 && normalized.height() <= 2800);
    }

    #[test]
    fn upright_text_lines_pass_through() {
        let raw = RawImage::new(png_bytes(horizontal_lines(64, 48)), "image/png");
        let normalized = normalize(&raw, &NormalizeOptions::default()).unwrap();
        assert_eq!(normalized.rotation, Rotation::Upright);
        assert!(normalized.warnings.is_empty());
    }

    #[test]
    fn sideways_text_lines_are_rotated() {
        let raw = RawImage::new(png_bytes(vertical_lines(64, 48)), "image/png");
        let normalized = normalize(&raw, &NormalizeOptions::default()).unwrap();
        assert_eq!(normalized.rotation, Rotation::Cw90);
        // Dimensions swap with the quarter turn.
        assert_eq!((normalized.width(), normalized.height()), (48, 64));
    }

    #[test]
    fn featureless_image_warns_instead_of_guessing() {
        let raw = RawImage::new(png_bytes(solid_gray(64, 64, 128)), "image/png");
        let normalized = normalize(&raw, &NormalizeOptions::default()).unwrap();
        assert_eq!(normalized.rotation, Rotation::Upright);
        assert!(normalized
            .warnings
            .iter()
            .any(|w| w.contains("orientation")));
    }

    #[test]
    fn contrast_stretch_reaches_full_range() {
        let stretched = contrast_stretch(&gradient_gray(256, 16));
        let min = stretched.pixels().map(|p| p[0]).min().unwrap();
        let max = stretched.pixels().map(|p| p[0]).max().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn contrast_stretch_handles_uniform_image() {
        let img = solid_gray(10, 10, 128);
        let out = contrast_stretch(&img);
        assert_eq!(out.get_pixel(5, 5)[0], 128);
    }

    #[test]
    fn despeckle_removes_isolated_speck() {
        let mut img = solid_gray(9, 9, 0);
        img.put_pixel(4, 4, Luma([255]));
        let out = despeckle(&img);
        assert_eq!(out.get_pixel(4, 4)[0], 0);
    }

    #[test]
    fn despeckle_preserves_clean_edge() {
        // Left half black, right half white; the boundary must survive.
        let img: GrayImage =
            ImageBuffer::from_fn(16, 16, |x, _| if x < 8 { Luma([0]) } else { Luma([255]) });
        let out = despeckle(&img);
        assert_eq!(out.get_pixel(7, 8)[0], 0);
        assert_eq!(out.get_pixel(8, 8)[0], 255);
    }

    #[test]
    fn normalized_image_encodes_to_png() {
        let raw = RawImage::new(png_bytes(horizontal_lines(32, 32)), "image/png");
        let normalized = normalize(&raw, &NormalizeOptions::default()).unwrap();
        let png = normalized.to_png_bytes().unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }

    #[test]
    fn from_ext_maps_known_extensions() {
        assert_eq!(RawImage::from_ext(vec![], "JPG").mime, "image/jpeg");
        assert_eq!(RawImage::from_ext(vec![], "png").mime, "image/png");
        assert_eq!(RawImage::from_ext(vec![], "exe").mime, "application/octet-stream");
    }

    #[test]
    fn enhance_path_produces_valid_output() {
        let raw = RawImage::new(png_bytes(horizontal_lines(64, 48)), "image/png");
        let normalized = normalize(&raw, &NormalizeOptions { enhance: true }).unwrap();
        assert_eq!(normalized.width(), 64);
        assert_eq!(normalized.height(), 48);
    }
}
