//! Receipt OCR fusion and itemization.
//!
//! Fused lines flow through the region slicer, the item segmenter, and price
//! reconciliation against the receipt's own subtotal or total. The image side
//! (variants, recognition, line fusion) lives in [`fusion`] and [`pipeline`].

/// Lazily compiled, process-wide regex.
macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static ::regex::Regex {
            static R: ::std::sync::OnceLock<::regex::Regex> = ::std::sync::OnceLock::new();
            R.get_or_init(|| ::regex::Regex::new($pat).expect("invalid regex"))
        }
    };
}

pub mod classify;
pub mod config;
pub mod extract;
pub mod fusion;
pub mod hash;
pub mod pipeline;
pub mod preprocess;
pub mod price;
pub mod recognizer;
pub mod reconcile;
pub mod segment;
pub mod slice;
pub mod types;
pub mod variants;

pub use config::{ConfigError, PipelineConfig};
pub use extract::{Extractor, ReceiptFields};
pub use fusion::{CancelHandle, CancelSignal, FusionError, LineFusion, RecognitionCandidate};
pub use pipeline::{parse, summarize, PipelineError, ProcessedReceipt, ReceiptPipeline};
pub use preprocess::PreprocessError;
pub use price::{extract_price_loose, normalize_money};
pub use recognizer::{MockRecognizer, OcrError, Profile, Recognizer};
pub use reconcile::{reconcile, ReconcileOutcome};
pub use slice::{explain_slicing, slice_item_region, SliceTrace};
pub use types::{Address, Aggregates, BoundingBox, FusedLine, Item, PriceKind, PriceSource, ReceiptSummary};
pub use variants::{StandardVariants, Variant, VariantProducer};
