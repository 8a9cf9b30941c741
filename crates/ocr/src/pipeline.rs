use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::extract::Extractor;
use crate::fusion::{clean_fused_lines, CancelSignal, FusionError, LineFusion};
use crate::hash;
use crate::preprocess::{self, PreprocessError};
use crate::reconcile::{reconcile, ReconcileOutcome, SkipReason};
use crate::recognizer::Recognizer;
use crate::segment::segment_items;
use crate::slice::{explain_slicing, SliceTrace};
use crate::types::{Aggregates, FusedLine, Item, ReceiptSummary};
use crate::variants::{StandardVariants, VariantProducer};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Fusion(#[from] FusionError),
}

// ── Line-level API ────────────────────────────────────────────────────────────

/// Items from fused lines: slice, segment, then reconcile against the
/// aggregates printed on the same receipt.
///
/// A receipt with no item-looking line yields no items.
pub fn parse<S: AsRef<str>>(lines: &[S]) -> Vec<Item> {
    let trace = explain_slicing(lines);
    itemize(&trace, &Extractor::aggregates(lines)).0
}

/// Every extracted field plus reconciled items.
pub fn summarize<S: AsRef<str>>(lines: &[S]) -> ReceiptSummary {
    assemble(lines).0
}

fn assemble<S: AsRef<str>>(lines: &[S]) -> (ReceiptSummary, SliceTrace) {
    let fields = Extractor::extract(lines);
    let trace = explain_slicing(lines);
    let (items, reconciliation) = itemize(&trace, &fields.aggregates);

    let summary = ReceiptSummary {
        merchant: fields.merchant,
        purchase_date: fields.purchase_date,
        address: fields.address,
        total: fields.aggregates.total,
        subtotal: fields.aggregates.subtotal,
        tax: fields.aggregates.tax,
        items,
        reconciliation,
    };
    (summary, trace)
}

fn itemize(trace: &SliceTrace, aggregates: &Aggregates) -> (Vec<Item>, ReconcileOutcome) {
    if trace.first_item_like.is_none() {
        debug!("no item-looking line, returning no items");
        return (Vec::new(), ReconcileOutcome::Skipped { reason: SkipReason::NoItems });
    }

    let mut items = segment_items(&trace.region);
    let outcome = reconcile(&mut items, aggregates);
    debug!(items = items.len(), ?outcome, "itemized region");
    (items, outcome)
}

// ── Image pipeline ────────────────────────────────────────────────────────────

/// The result of a single receipt processing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedReceipt {
    /// SHA-256 hex digest of the uploaded bytes.
    pub receipt_id: String,
    pub fused_lines: Vec<FusedLine>,
    pub summary: ReceiptSummary,
    /// How the item block was bounded, for auditing odd results.
    pub slicing: SliceTrace,
}

/// Orchestrates: hash → decode → variants → base pass → line fusion → clean → summarize.
pub struct ReceiptPipeline<R: Recognizer, V: VariantProducer = StandardVariants> {
    fusion: LineFusion<R>,
    variants: V,
    config: PipelineConfig,
}

impl<R: Recognizer> ReceiptPipeline<R> {
    pub fn new(recognizer: R, config: PipelineConfig) -> Self {
        Self::with_variants(recognizer, StandardVariants, config)
    }
}

impl<R: Recognizer, V: VariantProducer> ReceiptPipeline<R, V> {
    pub fn with_variants(recognizer: R, variants: V, config: PipelineConfig) -> Self {
        Self {
            fusion: LineFusion::new(Arc::new(recognizer), &config),
            variants,
            config,
        }
    }

    /// Process an image file on disk.
    pub async fn process_file(
        &self,
        path: &Path,
        cancel: CancelSignal,
    ) -> Result<ProcessedReceipt, PipelineError> {
        let bytes = tokio::fs::read(path).await?;
        self.process_bytes(&bytes, cancel).await
    }

    /// Process raw image bytes (from an upload or a file read).
    pub async fn process_bytes(
        &self,
        data: &[u8],
        cancel: CancelSignal,
    ) -> Result<ProcessedReceipt, PipelineError> {
        let receipt_id = hash::receipt_id(data);
        info!(%receipt_id, bytes = data.len(), "processing receipt");

        let image = preprocess::load_and_normalize(data, self.config.max_image_side)?;
        let variants = self.variants.produce(&image);
        debug!(%receipt_id, variants = variants.len(), width = image.width(), height = image.height(), "variants ready");

        let regions = match self.fusion.base_pass(&variants, &cancel).await? {
            Some(base) => base.page.boxes(),
            None => Vec::new(),
        };
        if regions.is_empty() {
            warn!(%receipt_id, "base pass found no text lines");
        }

        let fused_lines = clean_fused_lines(self.fusion.fuse(&variants, &regions, &cancel).await?);
        let texts: Vec<&str> = fused_lines.iter().map(|l| l.text.as_str()).collect();
        let (summary, slicing) = assemble(&texts);

        info!(
            %receipt_id,
            lines = fused_lines.len(),
            items = summary.items.len(),
            needs_review = summary.needs_review(),
            "receipt processed"
        );
        Ok(ProcessedReceipt { receipt_id, fused_lines, summary, slicing })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
