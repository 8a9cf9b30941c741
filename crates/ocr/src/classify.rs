//! Pure predicates over a single fused line.
//!
//! Keyword matches are anchored at a word start and must end at a word end, a
//! digit, or a colon, so `CASHEW` is not `CASH` while `SUBTOTAL9.00` still
//! reads as a footer.

use serde::{Deserialize, Serialize};

use crate::price::extract_price_loose;

// ── Compiled regex cache ─────────────────────────────────────────────────────

re!(re_footer,
    r"(?i)\b(?:SUB\s?TOTAL|TOTAL|TAX|BALANCE|AMOUNT|APPROVED|DECLINED|EFT|DEBIT|CREDIT|CARD|CHANGE|CASH)(?:\b|\d)|\bAID:|\bTRAN\s?ID\b|\bVERIFIED\s+BY\b");
re!(re_totalish,
    r"(?i)\b(?:SUB\s?TOTAL|TOTAL|TAX)(?:\b|\d)");
re!(re_not_an_item,
    r"(?i)\b(?:PAYMENT|METHOD|RECEIPT|CASHIER|REGISTER|DATE|TIME|CARD|ACCOUNT|APPROVED|DECLINED|SUB\s?TOTAL|TOTAL|TAX)(?:\b|\d)");
re!(re_header_anchor,
    r"(?i)\b(?:DATE|TIME|RECEIPT|REGISTER|ORDER|CASHIER)\b");
re!(re_header_noise,
    r"(?i)\bPAYMENT\s+METHOD\b|\bRECEIPT\b|\bDATE\s+TIME\b|\bCASHIER\b|\bCARD\s+TYPE\b|\bSALES\b|^\s*TAX\b");
re!(re_legend_code, r"^[TF]\s*=\s*");
re!(re_qty_at_price_anywhere, r"\b\d+\s*@\s*\d{1,5}[.,]\d{2}\b");
re!(re_qty_at_price_line, r"^\s*\d+\s*@\s*\d{1,5}[.,]\d{2}\s*$");
re!(re_money_ending, r"[$€£]?\s*\d{1,5}[.,]\d{2}\s*$");
re!(re_money_only, r"^\s*[$€£]?\s*\d{1,5}[.,]\d{2}\s*$");
re!(re_money_at_end, r"(?:[$€£]?\s*\d{1,5}[.,]\d{2}|\d{3,5})\s*$");
re!(re_letters, r"[A-Z]{2,}");
re!(re_digit, r"\d");
re!(re_sku_start, r"^\s*\d{7,14}\b");

/// Tax-category tags that decorate the item printed just before them.
pub const TAG_CATEGORIES: &[&str] = &["GROCERY"];

/// Legend words explaining tax-code letters; everything after them is footer.
pub const LEGEND_WORDS: &[&str] = &["FOODSTAMP", "FOODSTAHP", "STATE TAX"];

const SEPARATOR_CHARS: &[char] = &['-', '_', '=', '—'];

/// Long run of dashes, underscores, or equals signs.
pub fn is_separator(line: &str) -> bool {
    let t = line.trim();
    t.chars().count() >= 6 && t.chars().all(|c| SEPARATOR_CHARS.contains(&c))
}

/// A "letter = meaning" tax-code explanation such as `F = FOODSTAMP ITEM`.
pub fn is_legend(line: &str) -> bool {
    let t = line.trim().to_uppercase();
    re_legend_code().is_match(&t) || LEGEND_WORDS.iter().any(|w| t.contains(w))
}

/// Short tag such as `** GROCERY (F)`.
pub fn is_metadata(line: &str) -> bool {
    let t = line.trim().to_uppercase();
    TAG_CATEGORIES
        .iter()
        .any(|cat| t.contains(cat) && (t.contains("(F") || t.starts_with('*')))
}

/// Canonical annotation for a tag line: `GROCERY (F)` or `GROCERY`.
pub fn clean_meta_tag(line: &str) -> String {
    let u = line.trim().to_uppercase();
    for cat in TAG_CATEGORIES {
        if u.contains(cat) {
            return if u.contains("(F") { format!("{cat} (F)") } else { cat.to_string() };
        }
    }
    line.trim().to_string()
}

/// Totals, tender, and card-slip keywords that close the item block.
pub fn is_footer_marker(line: &str) -> bool {
    re_footer().is_match(line)
}

pub fn is_totalish(line: &str) -> bool {
    re_totalish().is_match(line.trim())
}

/// Header keywords whose *last* occurrence bounds the top of the item block.
pub fn is_header_anchor(line: &str) -> bool {
    re_header_anchor().is_match(line) || line.trim().eq_ignore_ascii_case("SALES")
}

/// Header or tax lines that can survive slicing but are never items.
pub fn is_header_noise(line: &str) -> bool {
    re_header_noise().is_match(line)
}

pub fn is_money_only(line: &str) -> bool {
    re_money_only().is_match(line)
}

pub fn has_money_at_end(line: &str) -> bool {
    re_money_at_end().is_match(line)
}

pub fn is_qty_at_price(line: &str) -> bool {
    re_qty_at_price_line().is_match(line)
}

/// Starts with a 7–14 digit product code.
pub fn is_sku_line(line: &str) -> bool {
    re_sku_start().is_match(line)
}

/// Any price-like content, including what the loose reader can dig out of a
/// corrupted tail.
pub fn carries_money(line: &str) -> bool {
    extract_price_loose(line).is_some() || is_money_only(line) || is_qty_at_price(line)
}

pub fn looks_like_item(line: &str) -> bool {
    let t = line.trim();
    if t.is_empty() || is_separator(t) || is_legend(t) {
        return false;
    }

    let u = t.to_uppercase();
    if re_qty_at_price_anywhere().is_match(&u) {
        return true;
    }
    if re_money_ending().is_match(t) && re_letters().is_match(&u) {
        return true;
    }
    if re_not_an_item().is_match(&u) {
        return false;
    }
    re_letters().is_match(&u) && re_digit().is_match(&u) && !is_totalish(t)
}

/// Every predicate result for one line, for slicing diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReport {
    pub line: String,
    pub looks_like_item: bool,
    pub is_totalish: bool,
    pub is_separator: bool,
    pub is_legend: bool,
    pub is_footer_marker: bool,
    pub money_at_end: bool,
    pub qty_at_price: bool,
    pub money_only: bool,
}

pub fn classify(line: &str) -> LineReport {
    let t = line.trim();
    LineReport {
        line: t.to_string(),
        looks_like_item: looks_like_item(t),
        is_totalish: is_totalish(t),
        is_separator: is_separator(t),
        is_legend: is_legend(t),
        is_footer_marker: is_footer_marker(t),
        money_at_end: has_money_at_end(t),
        qty_at_price: is_qty_at_price(t),
        money_only: is_money_only(t),
    }
}
