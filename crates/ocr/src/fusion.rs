//! Per-line text fusion across image variants and recognizer profiles.
//!
//! Every (region, variant, profile) recognition is an independent blocking job
//! scheduled on tokio's blocking pool, bounded by a shared semaphore and
//! guarded by a timeout. A failed, panicked, or timed-out job yields empty
//! text and is never surfaced as an error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::recognizer::{OcrError, PageRecognition, Profile, Recognition, Recognizer};
use crate::types::{BoundingBox, FusedLine};
use crate::variants::Variant;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FusionError {
    #[error("Receipt processing was cancelled")]
    Cancelled,
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Owner side of a cancellation flag.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

/// Observer side, cloned into every run that should stop when asked.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelHandle {
    pub fn pair() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self(tx), CancelSignal(rx))
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self(watch::channel(false).1)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle is gone.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ── Candidate scoring ────────────────────────────────────────────────────────

/// One recognition of one line region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionCandidate {
    pub variant_id: usize,
    pub profile_index: usize,
    pub text: String,
    pub confidence: f32,
    pub score: f32,
}

impl RecognitionCandidate {
    pub fn new(variant_id: usize, profile_index: usize, recognition: Recognition) -> Self {
        let text = recognition.text.trim().to_string();
        let score = candidate_score(&text, recognition.confidence);
        Self { variant_id, profile_index, text, confidence: recognition.confidence, score }
    }
}

const LENGTH_BONUS_PER_CHAR: f32 = 0.6;
const LENGTH_BONUS_CAP: f32 = 20.0;

/// Confidence plus a capped bonus for substantive text. Empty text scores −∞.
pub fn candidate_score(text: &str, confidence: f32) -> f32 {
    let len = text.trim().chars().count();
    if len == 0 {
        return f32::NEG_INFINITY;
    }
    confidence + (len as f32 * LENGTH_BONUS_PER_CHAR).min(LENGTH_BONUS_CAP)
}

/// Highest score wins; equal scores go to the earliest (variant, profile).
/// Empty candidates and non-finite scores are never selected.
pub fn select_best(candidates: &[RecognitionCandidate]) -> Option<&RecognitionCandidate> {
    let mut ranked: Vec<&RecognitionCandidate> = candidates
        .iter()
        .filter(|c| !c.text.is_empty() && c.score.is_finite())
        .collect();
    ranked.sort_by_key(|c| (c.variant_id, c.profile_index));
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.first().copied()
}

/// Keywords whose presence marks a page pass as receipt-like.
const PAGE_KEYWORDS: &[&str] = &["TOTAL", "SUB", "TAX", "RECEIPT", "PAYMENT", "DATE", "CASHIER", "REGISTER"];

re!(re_page_noise, r"[A-Z0-9$.,:/#()\-\s]");

/// Score of a full-page pass: confidence, +4 per keyword, −10 when more than
/// 20 characters fall outside the receipt alphabet.
pub fn page_score(text: &str, confidence: f32) -> f32 {
    let upper = text.to_uppercase();
    let bonus = PAGE_KEYWORDS.iter().filter(|k| upper.contains(*k)).count() as f32 * 4.0;
    let garbage = re_page_noise().replace_all(&upper, "").chars().count();
    confidence + bonus - if garbage > 20 { 10.0 } else { 0.0 }
}

/// Drop logo artifacts: lines under 35 % alphanumeric and ≤ 2-char lines
/// without a digit. Survivors are trimmed and re-indexed.
pub fn clean_fused_lines(lines: Vec<FusedLine>) -> Vec<FusedLine> {
    lines
        .into_iter()
        .filter_map(|mut l| {
            let t = l.text.trim();
            let len = t.chars().count();
            if len == 0 {
                return None;
            }
            let alnum = t.chars().filter(|c| c.is_alphanumeric()).count();
            if (alnum as f32) / (len as f32) < 0.35 {
                return None;
            }
            if len <= 2 && !t.chars().any(|c| c.is_ascii_digit()) {
                return None;
            }
            l.text = t.to_string();
            Some(l)
        })
        .enumerate()
        .map(|(index, l)| FusedLine { index, ..l })
        .collect()
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// The winning full-page pass, whose line boxes become the fusion regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasePass {
    pub variant_id: usize,
    pub profile: Profile,
    pub score: f32,
    pub page: PageRecognition,
}

pub struct LineFusion<R: Recognizer> {
    recognizer: Arc<R>,
    page_profiles: Vec<Profile>,
    line_profiles: Vec<Profile>,
    limiter: Arc<Semaphore>,
    timeout: Duration,
}

impl<R: Recognizer> LineFusion<R> {
    pub fn new(recognizer: Arc<R>, config: &PipelineConfig) -> Self {
        Self {
            recognizer,
            page_profiles: config.page_profiles.clone(),
            line_profiles: config.line_profiles.clone(),
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            timeout: config.recognition_timeout(),
        }
    }

    /// Recognize every variant with every page profile and keep the best pass.
    pub async fn base_pass(
        &self,
        variants: &[Variant],
        cancel: &CancelSignal,
    ) -> Result<Option<BasePass>, FusionError> {
        if cancel.is_cancelled() {
            return Err(FusionError::Cancelled);
        }

        let mut jobs = Vec::new();
        let mut set = JoinSet::new();
        for variant in variants {
            for profile in &self.page_profiles {
                let key = jobs.len();
                jobs.push((variant.id, *profile));
                let (recognizer, variant, profile) = (Arc::clone(&self.recognizer), variant.clone(), *profile);
                self.spawn_job(&mut set, key, format!("page v{} {profile}", variant.id), move || {
                    recognizer.recognize_page(&variant, &profile)
                });
            }
        }

        let mut pages = drain(&mut set, cancel).await?;
        pages.sort_by_key(|(key, _)| *key);

        let mut best: Option<BasePass> = None;
        for (key, page) in pages {
            let (variant_id, profile) = jobs[key];
            let score = page_score(&page.text(), page.confidence);
            debug!(variant_id, %profile, score, lines = page.lines.len(), "page pass");
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(BasePass { variant_id, profile, score, page });
            }
        }
        if let Some(b) = &best {
            info!(variant_id = b.variant_id, profile = %b.profile, score = b.score, "base pass chosen");
        }
        Ok(best)
    }

    /// Fuse each region into its best recognition, in reading order.
    pub async fn fuse(
        &self,
        variants: &[Variant],
        regions: &[BoundingBox],
        cancel: &CancelSignal,
    ) -> Result<Vec<FusedLine>, FusionError> {
        if cancel.is_cancelled() {
            return Err(FusionError::Cancelled);
        }

        let mut jobs = Vec::new();
        let mut set = JoinSet::new();
        for (region_index, region) in regions.iter().enumerate() {
            for variant in variants {
                for (profile_index, profile) in self.line_profiles.iter().enumerate() {
                    let key = jobs.len();
                    jobs.push((region_index, variant.id, profile_index));
                    let recognizer = Arc::clone(&self.recognizer);
                    let (variant, region, profile) = (variant.clone(), *region, *profile);
                    let what = format!("region {region_index} v{} {profile}", variant.id);
                    self.spawn_job(&mut set, key, what, move || {
                        recognizer.recognize_region(&variant, &region, &profile)
                    });
                }
            }
        }

        let mut per_region: Vec<Vec<RecognitionCandidate>> = vec![Vec::new(); regions.len()];
        for (key, recognition) in drain(&mut set, cancel).await? {
            let (region_index, variant_id, profile_index) = jobs[key];
            per_region[region_index].push(RecognitionCandidate::new(variant_id, profile_index, recognition));
        }

        let mut fused: Vec<FusedLine> = per_region
            .iter()
            .zip(regions)
            .filter_map(|(candidates, bbox)| {
                let best = select_best(candidates)?;
                Some(FusedLine { index: 0, bbox: *bbox, text: best.text.clone() })
            })
            .collect();
        fused.sort_by_key(|l| l.bbox.reading_key());
        for (i, line) in fused.iter_mut().enumerate() {
            line.index = i;
        }

        info!(regions = regions.len(), fused = fused.len(), "line fusion complete");
        Ok(fused)
    }

    fn spawn_job<T, F>(&self, set: &mut JoinSet<(usize, T)>, key: usize, what: String, job: F)
    where
        T: Default + Send + 'static,
        F: FnOnce() -> Result<T, OcrError> + Send + 'static,
    {
        let limiter = Arc::clone(&self.limiter);
        let timeout = self.timeout;
        set.spawn(async move {
            let Ok(permit) = limiter.acquire_owned().await else {
                return (key, T::default());
            };
            // The permit lives as long as the recognizer call, even past a timeout.
            let blocking = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            });
            let out = match tokio::time::timeout(timeout, blocking).await {
                Ok(Ok(Ok(out))) => out,
                Ok(Ok(Err(e))) => {
                    debug!(%what, error = %e, "recognition gap");
                    T::default()
                }
                Ok(Err(e)) => {
                    debug!(%what, error = %e, "recognition task failed");
                    T::default()
                }
                Err(_) => {
                    warn!(%what, ?timeout, "recognition timed out");
                    T::default()
                }
            };
            (key, out)
        });
    }
}

/// Collect finished jobs, aborting the rest as soon as cancellation is seen.
async fn drain<T: Send + 'static>(
    set: &mut JoinSet<(usize, T)>,
    cancel: &CancelSignal,
) -> Result<Vec<(usize, T)>, FusionError> {
    let mut cancel = cancel.clone();
    let mut out = Vec::with_capacity(set.len());
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(outstanding = set.len(), "recognition cancelled");
                set.abort_all();
                return Err(FusionError::Cancelled);
            }
            next = set.join_next() => match next {
                Some(Ok(item)) => out.push(item),
                Some(Err(e)) => debug!(error = %e, "recognition task lost"),
                None => return Ok(out),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{MockRecognizer, RecognizedLine};
    use image::{DynamicImage, GrayImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const P0: Profile = Profile::new(1, 7);
    const P1: Profile = Profile::new(3, 7);

    fn cand(variant_id: usize, profile_index: usize, text: &str, confidence: f32) -> RecognitionCandidate {
        RecognitionCandidate::new(variant_id, profile_index, Recognition::new(text, confidence))
    }

    fn variants() -> Vec<Variant> {
        let img = DynamicImage::ImageLuma8(GrayImage::new(8, 8));
        vec![Variant::new(0, "orig", img.clone()), Variant::new(1, "gray", img)]
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            page_profiles: vec![P0, P1],
            line_profiles: vec![P0, P1],
            max_concurrency: 2,
            recognition_timeout_ms: 2_000,
            ..Default::default()
        }
    }

    fn fusion(r: MockRecognizer) -> LineFusion<MockRecognizer> {
        LineFusion::new(Arc::new(r), &config())
    }

    // ── Scoring ───────────────────────────────────────────────────────────────

    #[test]
    fn length_bonus_is_capped() {
        assert_eq!(candidate_score("MILK", 50.0), 50.0 + 4.0 * 0.6);
        assert_eq!(candidate_score(&"X".repeat(100), 50.0), 70.0);
        assert_eq!(candidate_score("   ", 99.0), f32::NEG_INFINITY);
    }

    #[test]
    fn best_candidate_by_score() {
        let cs = [cand(0, 0, "MI1K", 60.0), cand(1, 0, "MILK 3.99", 80.0), cand(0, 1, "", 99.0)];
        assert_eq!(select_best(&cs).map(|c| c.text.as_str()), Some("MILK 3.99"));
    }

    #[test]
    fn ties_go_to_earliest_enumeration() {
        let cs = [cand(1, 0, "EGGS", 70.0), cand(0, 1, "EGG5", 70.0), cand(0, 0, "E6GS", 70.0)];
        let best = select_best(&cs).unwrap();
        assert_eq!((best.variant_id, best.profile_index), (0, 0));
    }

    #[test]
    fn nan_confidence_never_wins() {
        let cs = [cand(0, 0, "EGGS", f32::NAN), cand(1, 0, "EGG5", 40.0)];
        assert_eq!(select_best(&cs).map(|c| c.text.as_str()), Some("EGG5"));
        assert!(select_best(&[cand(0, 0, "EGGS", f32::NAN)]).is_none());
    }

    #[test]
    fn all_empty_selects_nothing() {
        assert!(select_best(&[cand(0, 0, "", 90.0), cand(1, 0, "  ", 90.0)]).is_none());
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn page_score_rewards_keywords_and_penalizes_noise() {
        assert_eq!(page_score("SUBTOTAL 9.00\nTAX 0.79", 50.0), 50.0 + 4.0 * 3.0);
        let noisy = format!("MILK {}", "«»¢~".repeat(6));
        assert_eq!(page_score(&noisy, 50.0), 40.0);
    }

    #[test]
    fn cleaning_drops_logo_artifacts() {
        let line = |text: &str| FusedLine { index: 9, bbox: BoundingBox::new(0, 0, 1, 1), text: text.into() };
        let out = clean_fused_lines(vec![
            line("~~//**"),
            line(" DAISO "),
            line("Ox"),
            line("42"),
            line(""),
        ]);
        let texts: Vec<&str> = out.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["DAISO", "42"]);
        assert_eq!(out[1].index, 1);
    }

    // ── Engine ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fuse_picks_best_per_region_in_reading_order() {
        let top = BoundingBox::new(5, 10, 100, 20);
        let bottom = BoundingBox::new(5, 60, 100, 20);
        let blank = BoundingBox::new(5, 100, 100, 20);
        let r = MockRecognizer::new()
            .with_region(bottom, 0, P0, "MI1K 3.99", 60.0)
            .with_region(bottom, 1, P1, "MILK 3.99", 85.0)
            .failing_region(bottom, 1, P0)
            .with_region(top, 0, P0, "DAISO", 90.0)
            .with_region(top, 1, P0, "DAISO", 90.0);

        let lines = fusion(r)
            .fuse(&variants(), &[bottom, blank, top], &CancelSignal::never())
            .await
            .unwrap();

        let got: Vec<(usize, &str)> = lines.iter().map(|l| (l.index, l.text.as_str())).collect();
        assert_eq!(got, [(0, "DAISO"), (1, "MILK 3.99")]);
        assert_eq!(lines[0].bbox, top);
    }

    #[tokio::test]
    async fn timeouts_degrade_to_empty_text() {
        let b = BoundingBox::new(0, 0, 10, 10);
        let r = MockRecognizer::new()
            .with_region(b, 0, P0, "MILK", 90.0)
            .with_delay(Duration::from_millis(200));
        let cfg = PipelineConfig { recognition_timeout_ms: 20, line_profiles: vec![P0], ..config() };
        let fusion = LineFusion::new(Arc::new(r), &cfg);

        let lines = fusion.fuse(&variants()[..1], &[b], &CancelSignal::never()).await.unwrap();
        assert!(lines.is_empty());
    }

    /// Sleeps in every region call and records how many overlap.
    #[derive(Default)]
    struct CountingRecognizer {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Recognizer for CountingRecognizer {
        fn recognize_page(&self, _: &Variant, _: &Profile) -> Result<PageRecognition, OcrError> {
            Ok(PageRecognition::default())
        }

        fn recognize_region(&self, _: &Variant, _: &BoundingBox, _: &Profile) -> Result<Recognition, OcrError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(60));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Recognition::new("MILK", 90.0))
        }
    }

    #[tokio::test]
    async fn timed_out_recognitions_still_hold_their_slot() {
        let r = Arc::new(CountingRecognizer::default());
        let cfg = PipelineConfig {
            line_profiles: vec![P0],
            max_concurrency: 1,
            recognition_timeout_ms: 5,
            ..config()
        };
        let fusion = LineFusion::new(Arc::clone(&r), &cfg);
        let regions: Vec<BoundingBox> = (0..5).map(|i| BoundingBox::new(0, i * 20, 50, 15)).collect();

        let lines = fusion.fuse(&variants()[..1], &regions, &CancelSignal::never()).await.unwrap();

        assert!(lines.is_empty());
        assert_eq!(r.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let (handle, signal) = CancelHandle::pair();
        handle.cancel();
        let err = fusion(MockRecognizer::new())
            .fuse(&variants(), &[BoundingBox::new(0, 0, 1, 1)], &signal)
            .await
            .unwrap_err();
        assert_eq!(err, FusionError::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_while_recognizing() {
        let (handle, signal) = CancelHandle::pair();
        let r = MockRecognizer::new().with_delay(Duration::from_millis(150));
        let fusion = fusion(r);
        let regions: Vec<BoundingBox> = (0..4).map(|i| BoundingBox::new(0, i * 20, 50, 15)).collect();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let result = fusion.fuse(&variants(), &regions, &signal).await;
        canceller.await.unwrap();
        assert_eq!(result.unwrap_err(), FusionError::Cancelled);
    }

    #[tokio::test]
    async fn base_pass_prefers_receipt_like_page() {
        let page = |texts: &[&str], confidence: f32| PageRecognition {
            lines: texts
                .iter()
                .enumerate()
                .map(|(i, t)| RecognizedLine { bbox: BoundingBox::new(0, i as u32 * 20, 80, 15), text: t.to_string() })
                .collect(),
            confidence,
        };
        let r = MockRecognizer::new()
            .with_page(0, P0, page(&["DAISO", "MILK 3.99"], 70.0))
            .with_page(1, P1, page(&["DAISO", "MILK 3.99", "SUBTOTAL 3.99", "TAX 0.32"], 66.0));

        let best = fusion(r).base_pass(&variants(), &CancelSignal::never()).await.unwrap().unwrap();
        assert_eq!((best.variant_id, best.profile), (1, P1));
        assert_eq!(best.page.boxes().len(), 4);
    }
}
