//! Price correction against the printed subtotal or total.
//!
//! Sales tax is never folded into item prices: when tax is printed but the
//! subtotal is not, the total is not used as a target.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use tally_core::Money;

use crate::types::{Aggregates, Item};

// ── Compiled regex cache ─────────────────────────────────────────────────────

re!(re_spaced_cents, r"\b\d\s+\d{2}\b");
re!(re_unpunctuated_tail, r"\b\d{1,2}\s*\d{2}\b$");

/// Substrings that show up around prices the recognizer struggled with.
pub const OCR_NOISE: &[&str] = &["TEE", "TCC", "TTC", "$$", "G99", "= G", "¢", "«", "XK"];

/// Prices this close to the even share are treated as one uniform price.
const EQUALIZE_TOLERANCE_CENTS: i64 = 10;
/// Discrepancies up to this size are absorbed by any single item.
const SMALL_DISCREPANCY_CENTS: i64 = 25;
/// Whole-unit corrections larger than this are not attempted.
const MAX_CORRECTION_CENTS: i64 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Basis {
    Subtotal,
    Total,
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Basis::Subtotal => write!(f, "subtotal"),
            Basis::Total => write!(f, "total"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoItems,
    UnpricedItem,
    NoAggregate,
    TaxWithoutSubtotal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Item prices already sum to the target.
    Balanced,
    /// Every price was forced to `share`; `changed` items differed.
    Equalized { share: Money, changed: usize },
    /// Exactly one item price was replaced.
    Corrected { index: usize, from: Money, to: Money, basis: Basis },
    /// A discrepancy exists but no single plausible fix was found.
    Ambiguous { discrepancy: Money },
    Skipped { reason: SkipReason },
}

impl ReconcileOutcome {
    /// Item prices are consistent with the printed aggregate.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Balanced
                | ReconcileOutcome::Equalized { .. }
                | ReconcileOutcome::Corrected { .. }
        )
    }
}

/// Correct item prices in place so they agree with `aggregates`.
pub fn reconcile(items: &mut [Item], aggregates: &Aggregates) -> ReconcileOutcome {
    let outcome = reconcile_inner(items, aggregates);
    match &outcome {
        ReconcileOutcome::Corrected { index, from, to, basis } => {
            tracing::info!(index, %from, %to, %basis, "corrected item price");
        }
        ReconcileOutcome::Equalized { share, changed } if *changed > 0 => {
            tracing::info!(%share, changed, "equalized item prices");
        }
        other => tracing::debug!(outcome = ?other, "reconciliation"),
    }
    outcome
}

fn reconcile_inner(items: &mut [Item], aggregates: &Aggregates) -> ReconcileOutcome {
    if items.is_empty() {
        return ReconcileOutcome::Skipped { reason: SkipReason::NoItems };
    }
    let Some(prices) = items.iter().map(|it| it.price).collect::<Option<Vec<Money>>>() else {
        return ReconcileOutcome::Skipped { reason: SkipReason::UnpricedItem };
    };

    if let Some(subtotal) = aggregates.subtotal {
        if let Some(outcome) = equalize(items, &prices, subtotal) {
            return outcome;
        }
        return correct_single(items, &prices, subtotal, Basis::Subtotal);
    }

    if aggregates.tax.is_some() {
        return ReconcileOutcome::Skipped { reason: SkipReason::TaxWithoutSubtotal };
    }

    match aggregates.total {
        Some(total) => correct_single(items, &prices, total, Basis::Total),
        None => ReconcileOutcome::Skipped { reason: SkipReason::NoAggregate },
    }
}

fn equalize(items: &mut [Item], prices: &[Money], subtotal: Money) -> Option<ReconcileOutcome> {
    if items.len() < 2 {
        return None;
    }
    let share = subtotal.split_evenly(items.len())?;
    let tolerance = Money::from_cents(EQUALIZE_TOLERANCE_CENTS);
    if !prices.iter().all(|&p| (p - share).abs() <= tolerance) {
        return None;
    }

    let mut changed = 0;
    for item in items.iter_mut() {
        let Some(old) = item.price else { continue };
        if old != share {
            item.meta.push(format!(
                "price_equalized:{}->{} using subtotal:{}",
                old.as_decimal(),
                share.as_decimal(),
                subtotal.as_decimal()
            ));
            item.price = Some(share);
            changed += 1;
        }
    }
    Some(ReconcileOutcome::Equalized { share, changed })
}

fn correct_single(items: &mut [Item], prices: &[Money], target: Money, basis: Basis) -> ReconcileOutcome {
    let sum: Money = prices.iter().sum();
    let discrepancy = target - sum;

    if discrepancy.abs().as_decimal() < Decimal::new(5, 3) {
        return ReconcileOutcome::Balanced;
    }

    let small = discrepancy.abs() <= Money::from_cents(SMALL_DISCREPANCY_CENTS);
    // Beyond the small band only whole-unit errors are plausible: OCR corrupts
    // the currency digits and leaves the cents intact.
    let whole_unit = discrepancy.cents_part() == 0
        && discrepancy.abs() <= Money::from_cents(MAX_CORRECTION_CENTS);
    if !small && !whole_unit {
        return ReconcileOutcome::Ambiguous { discrepancy };
    }

    let candidates = prices
        .iter()
        .enumerate()
        .filter(|&(_, &p)| !(p + discrepancy).is_negative())
        .filter(|&(_, &p)| small || (p + discrepancy).cents_part() == p.cents_part());
    // Small discrepancies go to the largest price, where the relative change is
    // least. A whole-unit edit is the same size on every item, so the earliest wins.
    let best = if small {
        candidates.min_by_key(|&(i, &p)| (Reverse(weak_ocr_score(&items[i])), Reverse(p), i))
    } else {
        candidates.min_by_key(|&(i, _)| (Reverse(weak_ocr_score(&items[i])), i))
    };

    let Some((index, &from)) = best else {
        return ReconcileOutcome::Ambiguous { discrepancy };
    };
    let to = from + discrepancy;
    let item = &mut items[index];
    item.meta.push(format!(
        "price_corrected:{}->{} using {}:{}",
        from.as_decimal(),
        to.as_decimal(),
        basis,
        target.as_decimal()
    ));
    item.price = Some(to);
    ReconcileOutcome::Corrected { index, from, to, basis }
}

/// How many low-confidence fingerprints the item's price source carries.
pub fn weak_ocr_score(item: &Item) -> usize {
    let src = item
        .price_source
        .as_ref()
        .map_or(item.raw_line.as_str(), |s| s.text.as_str());
    let upper = src.to_uppercase();

    let spaced = usize::from(re_spaced_cents().is_match(src));
    let unpunctuated =
        usize::from(!src.contains(&['.', ','][..]) && re_unpunctuated_tail().is_match(src.trim_end()));
    let noise = OCR_NOISE.iter().filter(|tok| upper.contains(*tok)).count();
    spaced + unpunctuated + noise
}
