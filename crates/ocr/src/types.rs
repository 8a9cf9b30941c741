use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_core::Money;

use crate::reconcile::ReconcileOutcome;

/// Axis-aligned pixel rectangle of one recognized line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w: w.max(1), h: h.max(1) }
    }

    /// Sort key for reading order: top edge first, then left edge.
    pub fn reading_key(&self) -> (u32, u32) {
        (self.y, self.x)
    }

    /// Grow by `pad` pixels on every side, clipped to a `width`×`height` image.
    pub fn padded(&self, pad: u32, width: u32, height: u32) -> BoundingBox {
        let x1 = self.x.saturating_sub(pad);
        let y1 = self.y.saturating_sub(pad);
        let x2 = (self.x + self.w + pad).min(width);
        let y2 = (self.y + self.h + pad).min(height);
        BoundingBox::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
    }
}

/// The winning recognition for one line region. Never holds empty text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedLine {
    pub index: usize,
    pub bbox: BoundingBox,
    pub text: String,
}

/// Where an item's price was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceKind {
    /// Trailing price on a `<SKU> <description> <price>` line.
    InlineSku,
    /// Price embedded in a tag line such as `** GROCERY (F) $ 6.99`.
    Tag,
    /// A line holding nothing but a money token.
    BareLine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSource {
    pub kind: PriceKind,
    /// The full line text the price was read from.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub price: Option<Money>,
    /// Ordered audit annotations (tags, price provenance, corrections).
    pub meta: Vec<String>,
    pub raw_line: String,
    pub price_source: Option<PriceSource>,
}

impl Item {
    pub fn new(name: impl Into<String>, raw_line: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            price: None,
            meta: vec![],
            raw_line: raw_line.into(),
            price_source: None,
        }
    }

    pub fn is_sku_priced(&self) -> bool {
        self.price.is_some()
            && matches!(self.price_source, Some(PriceSource { kind: PriceKind::InlineSku, .. }))
    }

    pub(crate) fn append_raw(&mut self, line: &str) {
        self.raw_line = format!("{} | {}", self.raw_line.trim(), line.trim()).trim().to_string();
    }
}

/// Street-level location printed in a receipt header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub website: Option<String>,
}

/// Printed figures that reconciliation treats as ground truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregates {
    pub total: Option<Money>,
    pub subtotal: Option<Money>,
    pub tax: Option<Money>,
}

/// The assembled result of one receipt run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptSummary {
    pub merchant: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub address: Address,
    pub total: Option<Money>,
    pub subtotal: Option<Money>,
    pub tax: Option<Money>,
    pub items: Vec<Item>,
    pub reconciliation: ReconcileOutcome,
}

impl ReceiptSummary {
    /// Whether a human should look at the items before they are trusted.
    pub fn needs_review(&self) -> bool {
        self.items.is_empty()
            || self.items.iter().any(|it| it.price.is_none())
            || !self.reconciliation.is_settled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_box_is_clipped_to_image() {
        let b = BoundingBox::new(4, 10, 100, 20);
        assert_eq!(b.padded(8, 200, 200), BoundingBox::new(0, 2, 112, 36));
        assert_eq!(b.padded(8, 50, 25), BoundingBox::new(0, 2, 50, 23));
    }

    #[test]
    fn reading_key_orders_top_then_left() {
        let mut boxes = vec![
            BoundingBox::new(50, 10, 5, 5),
            BoundingBox::new(0, 30, 5, 5),
            BoundingBox::new(0, 10, 5, 5),
        ];
        boxes.sort_by_key(BoundingBox::reading_key);
        assert_eq!(boxes[0], BoundingBox::new(0, 10, 5, 5));
        assert_eq!(boxes[1], BoundingBox::new(50, 10, 5, 5));
    }

    #[test]
    fn sku_priced_requires_price_and_inline_source() {
        let mut it = Item::new("FROSTED GL", "4968988075990 FROSTED GL 2.25");
        it.price_source = Some(PriceSource { kind: PriceKind::InlineSku, text: it.raw_line.clone() });
        assert!(!it.is_sku_priced());
        it.price = Some(Money::from_cents(225));
        assert!(it.is_sku_priced());
        it.price_source = Some(PriceSource { kind: PriceKind::BareLine, text: "2.25".into() });
        assert!(!it.is_sku_priced());
    }

    #[test]
    fn needs_review_when_item_unpriced() {
        let summary = ReceiptSummary {
            merchant: None,
            purchase_date: None,
            address: Address::default(),
            total: None,
            subtotal: None,
            tax: None,
            items: vec![Item::new("MILK", "MILK")],
            reconciliation: ReconcileOutcome::Balanced,
        };
        assert!(summary.needs_review());

        let mut priced = summary.clone();
        priced.items[0].price = Some(Money::from_cents(399));
        assert!(!priced.needs_review());
    }
}
