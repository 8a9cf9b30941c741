use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::BoundingBox;
use crate::variants::Variant;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Tesseract not available, build with the `tesseract` feature")]
    NotAvailable,
}

/// A recognizer configuration: engine mode and page segmentation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Profile {
    pub engine_mode: u8,
    pub page_seg_mode: u8,
}

impl Profile {
    pub const fn new(engine_mode: u8, page_seg_mode: u8) -> Self {
        Self { engine_mode, page_seg_mode }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--oem {} --psm {}", self.engine_mode, self.page_seg_mode)
    }
}

/// Text plus mean token confidence (0–100) for one image or region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

impl Recognition {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self { text: text.into(), confidence }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedLine {
    pub bbox: BoundingBox,
    pub text: String,
}

/// A full-page pass: the page text, its confidence, and line geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageRecognition {
    pub lines: Vec<RecognizedLine>,
    pub confidence: f32,
}

impl PageRecognition {
    pub fn text(&self) -> String {
        self.lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n")
    }

    pub fn boxes(&self) -> Vec<BoundingBox> {
        self.lines.iter().map(|l| l.bbox).collect()
    }
}

/// Abstraction over a character recognizer.
///
/// Calls are blocking; the fusion engine schedules them on the blocking pool.
pub trait Recognizer: Send + Sync + 'static {
    fn recognize_page(&self, variant: &Variant, profile: &Profile) -> Result<PageRecognition, OcrError>;

    fn recognize_region(
        &self,
        variant: &Variant,
        region: &BoundingBox,
        profile: &Profile,
    ) -> Result<Recognition, OcrError>;
}

// ── TSV layout parsing ───────────────────────────────────────────────────────

/// Group word rows of Tesseract TSV output into reading-ordered lines.
///
/// Words are keyed by (block, paragraph, line); a line's box is the union of
/// its word boxes. Confidence is the mean over words reporting one (≥ 0).
pub fn page_from_tsv(tsv: &str) -> PageRecognition {
    struct Word {
        bbox: (u32, u32, u32, u32),
        text: String,
    }

    let mut groups: BTreeMap<(u32, u32, u32), Vec<Word>> = BTreeMap::new();
    let mut confs: Vec<f32> = Vec::new();

    for row in tsv.lines().skip_while(|l| l.starts_with("level")) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().ok();
        let text = cols[11].trim();
        let (Some(block), Some(par), Some(line)) = (num(2), num(3), num(4)) else { continue };
        let (Some(left), Some(top), Some(w), Some(h)) = (num(6), num(7), num(8), num(9)) else { continue };
        if let Ok(c) = cols[10].trim().parse::<f32>() {
            if c >= 0.0 {
                confs.push(c);
            }
        }
        if text.is_empty() {
            continue;
        }
        groups
            .entry((block, par, line))
            .or_default()
            .push(Word { bbox: (left, top, left + w, top + h), text: text.to_string() });
    }

    let mut lines: Vec<RecognizedLine> = groups
        .into_values()
        .map(|words| {
            let x1 = words.iter().map(|w| w.bbox.0).min().unwrap_or(0);
            let y1 = words.iter().map(|w| w.bbox.1).min().unwrap_or(0);
            let x2 = words.iter().map(|w| w.bbox.2).max().unwrap_or(0);
            let y2 = words.iter().map(|w| w.bbox.3).max().unwrap_or(0);
            RecognizedLine {
                bbox: BoundingBox::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1)),
                text: words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" "),
            }
        })
        .collect();
    lines.sort_by_key(|l| l.bbox.reading_key());

    let confidence = if confs.is_empty() { 0.0 } else { confs.iter().sum::<f32>() / confs.len() as f32 };
    PageRecognition { lines, confidence }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Scripted recognizer for exercising fusion and the pipeline without an engine.
///
/// Unscripted calls return empty results. Region scripts are keyed by
/// (region, variant id, profile); page scripts by (variant id, profile).
#[derive(Debug, Default)]
pub struct MockRecognizer {
    pages: HashMap<(usize, Profile), PageRecognition>,
    regions: HashMap<(BoundingBox, usize, Profile), Recognition>,
    failing: HashSet<(BoundingBox, usize, Profile)>,
    delay: Option<Duration>,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, variant: usize, profile: Profile, page: PageRecognition) -> Self {
        self.pages.insert((variant, profile), page);
        self
    }

    pub fn with_region(
        mut self,
        region: BoundingBox,
        variant: usize,
        profile: Profile,
        text: &str,
        confidence: f32,
    ) -> Self {
        self.regions.insert((region, variant, profile), Recognition::new(text, confidence));
        self
    }

    pub fn failing_region(mut self, region: BoundingBox, variant: usize, profile: Profile) -> Self {
        self.failing.insert((region, variant, profile));
        self
    }

    /// Block every region call this long, to exercise timeouts and cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Recognizer for MockRecognizer {
    fn recognize_page(&self, variant: &Variant, profile: &Profile) -> Result<PageRecognition, OcrError> {
        Ok(self.pages.get(&(variant.id, *profile)).cloned().unwrap_or_default())
    }

    fn recognize_region(
        &self,
        variant: &Variant,
        region: &BoundingBox,
        profile: &Profile,
    ) -> Result<Recognition, OcrError> {
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        let key = (*region, variant.id, *profile);
        if self.failing.contains(&key) {
            return Err(OcrError::Engine(format!("scripted failure for {profile}")));
        }
        Ok(self.regions.get(&key).cloned().unwrap_or_default())
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{page_from_tsv, OcrError, PageRecognition, Profile, Recognition, Recognizer};
    use crate::preprocess::encode_png;
    use crate::types::BoundingBox;
    use crate::variants::Variant;
    use image::DynamicImage;
    use leptess::{LepTess, Variable};

    /// leptess fixes the engine mode at init, so only the page segmentation
    /// mode of a profile is applied per call.
    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
        padding: u32,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str, padding: u32) -> Self {
            Self { data_path, lang: lang.to_string(), padding }
        }

        fn run(&self, image: &DynamicImage, profile: &Profile) -> Result<PageRecognition, OcrError> {
            let png = encode_png(image).map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_variable(Variable::TesseditPagesegMode, &profile.page_seg_mode.to_string())
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            lt.set_image_from_mem(&png)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let tsv = lt.get_tsv_text(0).map_err(|e| OcrError::Engine(e.to_string()))?;
            Ok(page_from_tsv(&tsv))
        }
    }

    impl Recognizer for TesseractRecognizer {
        fn recognize_page(&self, variant: &Variant, profile: &Profile) -> Result<PageRecognition, OcrError> {
            self.run(&variant.image, profile)
        }

        fn recognize_region(
            &self,
            variant: &Variant,
            region: &BoundingBox,
            profile: &Profile,
        ) -> Result<Recognition, OcrError> {
            let b = region.padded(self.padding, variant.image.width(), variant.image.height());
            let crop = variant.image.crop_imm(b.x, b.y, b.w, b.h);
            let page = self.run(&crop, profile)?;
            Ok(Recognition {
                text: page.lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join(" "),
                confidence: page.confidence,
            })
        }
    }
}
