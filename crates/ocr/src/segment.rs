//! Turns the sliced item region into [`Item`]s.
//!
//! Each line is first reduced to a [`LineShape`]; [`transition`] then maps the
//! current [`SegmentState`] and that shape to an [`Action`] and the next state.
//! A post-pass merges two-line items the forward pass left split.

use tally_core::Money;

use crate::classify;
use crate::price::{extract_price_loose, normalize_money};
use crate::types::{Item, PriceKind, PriceSource};

// ── Compiled regex cache ─────────────────────────────────────────────────────

re!(re_sku_item, r"^\s*(\d{7,14})\s+(.+?)\s*$");
re!(re_trailing_price, r"\s+[$€£]?\s*\d{1,5}[.,]\d{2}\s*$");
re!(re_unit_suffix, r"(?i)\s+\d+(?:[.,]\d+)?\s*(?:OZ\.?|LBS?|CT|PK|EA|PCS?)\b.*$");
re!(re_trailing_number, r"\s+\d+\s*$");

/// Strip trailing unit-of-measure tokens and bare quantities from a description.
pub fn clean_item_name(desc: &str) -> String {
    let d = desc.trim();
    let d = re_unit_suffix().replace(d, "");
    let d = re_trailing_number().replace(&d, "");
    d.trim().to_string()
}

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    ExpectingItem,
    /// The last line was `<SKU> <abbreviated description> <price>`; the next
    /// plain line is likely the full description.
    ExpectingContinuation,
}

/// How a region line reads to the segmenter.
#[derive(Debug, Clone, PartialEq)]
pub enum LineShape {
    Separator,
    Legend,
    Header,
    Tag { price: Option<Money> },
    /// Nothing but a money token; normalization may still fail.
    BareMoney(Option<Money>),
    SkuPriced { description: String, price: Money },
    Plain { carries_money: bool, sku: bool, closing: bool },
}

impl LineShape {
    /// A description line with no price, code, or footer content.
    fn is_bare_description(&self) -> bool {
        matches!(self, LineShape::Plain { carries_money: false, sku: false, closing: false })
    }
}

pub fn shape_of(line: &str) -> LineShape {
    let t = line.trim();
    if classify::is_separator(t) {
        return LineShape::Separator;
    }
    if classify::is_legend(t) {
        return LineShape::Legend;
    }
    if classify::is_header_noise(t) {
        return LineShape::Header;
    }
    if classify::is_metadata(t) {
        return LineShape::Tag { price: extract_price_loose(t) };
    }
    if classify::is_money_only(t) {
        return LineShape::BareMoney(normalize_money(t));
    }

    let closing = classify::is_totalish(t) || classify::is_footer_marker(t);
    if let (Some(c), false) = (re_sku_item().captures(t), closing) {
        if let Some(price) = extract_price_loose(t) {
            let desc = c.get(2).map_or("", |m| m.as_str());
            let desc = re_trailing_price().replace(desc, "");
            let description = clean_item_name(&desc);
            if !description.is_empty() {
                return LineShape::SkuPriced { description, price };
            }
        }
    }

    LineShape::Plain {
        carries_money: classify::carries_money(t),
        sku: classify::is_sku_line(t),
        closing,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Skip,
    Stop,
    AttachTag,
    AttachPrice,
    ReplaceName,
    NewSkuItem,
    AppendToName,
    NewItem,
}

/// What the transition table needs to know about the item under construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cursor {
    pub has_item: bool,
    pub current_sku_priced: bool,
}

pub fn transition(state: SegmentState, shape: &LineShape, cur: Cursor) -> (Action, SegmentState) {
    use SegmentState::*;

    match (state, shape) {
        (_, LineShape::Separator) => (Action::Skip, state),
        (_, LineShape::Legend) => (Action::Stop, state),
        (_, LineShape::Header) => (Action::Skip, state),
        (_, LineShape::Tag { .. }) => (Action::AttachTag, state),
        (_, LineShape::BareMoney(_)) => (Action::AttachPrice, state),
        (ExpectingContinuation, s) if cur.has_item && s.is_bare_description() => {
            (Action::ReplaceName, ExpectingItem)
        }
        // A continuation was expected but did not arrive; read the line afresh.
        (ExpectingContinuation, s) => transition(ExpectingItem, s, cur),
        (ExpectingItem, LineShape::SkuPriced { .. }) => (Action::NewSkuItem, ExpectingContinuation),
        (ExpectingItem, s) if cur.current_sku_priced && s.is_bare_description() => {
            (Action::AppendToName, ExpectingItem)
        }
        (ExpectingItem, LineShape::Plain { .. }) => (Action::NewItem, ExpectingItem),
    }
}

// ── Segmenter ─────────────────────────────────────────────────────────────────

struct Segmenter {
    items: Vec<Item>,
    state: SegmentState,
    /// Last plain description seen, for tags that precede any item.
    last_plain: Option<String>,
}

impl Segmenter {
    fn new() -> Self {
        Self { items: vec![], state: SegmentState::ExpectingItem, last_plain: None }
    }

    fn cursor(&self) -> Cursor {
        Cursor {
            has_item: !self.items.is_empty(),
            current_sku_priced: self.items.last().is_some_and(Item::is_sku_priced),
        }
    }

    /// Returns `false` once parsing should stop.
    fn feed(&mut self, line: &str) -> bool {
        let t = line.trim();
        if t.is_empty() {
            return true;
        }

        let shape = shape_of(t);
        let (action, next) = transition(self.state, &shape, self.cursor());
        tracing::trace!(line = t, ?action, ?next, "segment");
        self.state = next;

        match (action, shape) {
            (Action::Stop, _) => return false,
            (Action::Skip, _) => {}
            (Action::AttachTag, LineShape::Tag { price }) => {
                if self.items.is_empty() {
                    if let Some(desc) = self.last_plain.take() {
                        self.items.push(Item::new(clean_item_name(&desc), desc));
                    }
                }
                if let Some(item) = self.items.last_mut() {
                    item.meta.push(classify::clean_meta_tag(t));
                    if let Some(p) = price {
                        attach_price(item, p, PriceKind::Tag, t);
                    }
                }
            }
            (Action::AttachPrice, LineShape::BareMoney(price)) => {
                if let (Some(item), Some(p)) = (self.items.last_mut(), price) {
                    item.price = Some(p);
                    item.meta.push(t.to_string());
                    item.price_source = Some(PriceSource { kind: PriceKind::BareLine, text: t.to_string() });
                }
            }
            (Action::ReplaceName, _) => {
                let cleaned = clean_item_name(t);
                if let (Some(item), false) = (self.items.last_mut(), cleaned.is_empty()) {
                    item.name = cleaned;
                    item.append_raw(t);
                }
            }
            (Action::NewSkuItem, LineShape::SkuPriced { description, price }) => {
                let mut item = Item::new(description, t);
                attach_price(&mut item, price, PriceKind::InlineSku, t);
                self.items.push(item);
            }
            (Action::AppendToName, _) => {
                if let Some(item) = self.items.last_mut() {
                    item.name = clean_item_name(&format!("{} {}", item.name, t));
                    item.append_raw(t);
                }
            }
            (Action::NewItem, _) => {
                self.last_plain = Some(t.to_string());
                self.items.push(Item::new(clean_item_name(t), t));
            }
            (action, shape) => {
                tracing::debug!(?action, ?shape, "action does not fit line shape");
            }
        }
        true
    }
}

fn attach_price(item: &mut Item, price: Money, kind: PriceKind, line: &str) {
    item.price = Some(price);
    item.meta.push(format!("price_from: {line}"));
    item.price_source = Some(PriceSource { kind, text: line.to_string() });
}

/// Forward pass plus continuation merge over an already-sliced region.
pub fn segment_items<S: AsRef<str>>(region: &[S]) -> Vec<Item> {
    let mut seg = Segmenter::new();
    for line in region {
        if !seg.feed(line.as_ref()) {
            break;
        }
    }
    merge_continuations(seg.items)
}

/// Fold an unpriced plain description into the SKU-priced item just before it.
pub fn merge_continuations(mut items: Vec<Item>) -> Vec<Item> {
    let mut i = 0;
    while i + 1 < items.len() {
        if items[i].is_sku_priced() && is_mergeable_continuation(&items[i + 1]) {
            let next = items.remove(i + 1);
            let cur = &mut items[i];
            let cleaned = clean_item_name(&next.name);
            cur.name = if cleaned.is_empty() { next.name.trim().to_string() } else { cleaned };
            cur.append_raw(&next.raw_line);
            cur.meta.extend(next.meta);
            continue;
        }
        i += 1;
    }
    items
}

fn is_mergeable_continuation(item: &Item) -> bool {
    let raw = item.raw_line.trim();
    item.price.is_none()
        && !item.name.trim().is_empty()
        && !classify::is_sku_line(raw)
        && !classify::carries_money(raw)
        && !classify::is_totalish(raw)
        && !classify::is_footer_marker(raw)
        && !classify::is_metadata(raw)
}
