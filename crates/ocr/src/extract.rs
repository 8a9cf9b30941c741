use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_core::Money;

use crate::price::{extract_price_loose, normalize_money};
use crate::types::{Address, Aggregates};

// ── Compiled regex cache ─────────────────────────────────────────────────────

re!(re_money_token,
    r"[$€£]?\s*\d{1,5}[.,]\d{2}");
re!(re_money_token_spaced,
    r"[$€£]?\s*\d{1,5}(?:[.,]\d{2}|\s+\d{2})");
re!(re_money_tail,
    r"([$€£]?\s*\d{1,5}(?:[.,]\d{2}|\s+\d{2})|\d{3,5})\s*$");

re!(re_date_month_name,
    r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2}),?\s+(\d{4})\b");
re!(re_date_abbr_month,
    r"(?i)\b(\d{1,2})\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\.?\s+(\d{4})\b");
re!(re_date_iso,
    r"\b(\d{4})-(\d{2})-(\d{2})\b");
re!(re_date_slash,
    r"\b(\d{1,2})/(\d{1,2})/(\d{2,4})\b");
re!(re_date_dash,
    r"\b(\d{1,2})-(\d{1,2})-(\d{2,4})\b");

re!(re_street,
    r"(?i)\b\d{2,6}\s+.+\b(?:AVE|AVENUE|ST|STREET|RD|ROAD|BLVD|DR|DRIVE|WAY|HWY)\b");
re!(re_city_state_zip,
    r"(?i)^\s*([A-Z][A-Z .]+),\s*([A-Z]{2})\s+(\d{4,5})");
re!(re_website,
    r"(?i)www\.|\.com\b");

re!(re_phone,
    r"\(?\d{3}\)?[\s\-]\d{3}[\s\-]\d{4}");
re!(re_url,
    r"(?i)(https?://|www\.)\S+");

/// Lines mentioning these are never the merchant name.
const MERCHANT_SKIP: &[&str] = &["PAYMENT", "DATE", "RECEIPT", "CASHIER", "REGISTER"];

/// Header fields pulled from a fused line sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptFields {
    pub merchant: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub address: Address,
    pub aggregates: Aggregates,
}

// ── Public extraction API ─────────────────────────────────────────────────────

pub struct Extractor;

impl Extractor {
    /// Extract every header and aggregate field from fused lines.
    pub fn extract<S: AsRef<str>>(lines: &[S]) -> ReceiptFields {
        let lines: Vec<&str> = lines
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty())
            .collect();

        ReceiptFields {
            merchant: Self::merchant(&lines),
            purchase_date: Self::purchase_date(&lines),
            address: Self::address(&lines),
            aggregates: Self::aggregates(&lines),
        }
    }

    pub fn aggregates<S: AsRef<str>>(lines: &[S]) -> Aggregates {
        Aggregates {
            total: Self::total(lines),
            subtotal: Self::subtotal(lines),
            tax: Self::tax(lines),
        }
    }

    // ── Merchant ──────────────────────────────────────────────────────────────

    /// Best alpha-heavy short line near the top; all-caps lines win ties.
    pub fn merchant<S: AsRef<str>>(lines: &[S]) -> Option<String> {
        let mut best: Option<(&str, f32)> = None;
        for line in lines.iter().take(8).map(|l| l.as_ref().trim()) {
            let upper = line.to_uppercase();
            if line.len() < 3 || line.len() > 50
                || upper == "SALES" || upper == "SALE"
                || MERCHANT_SKIP.iter().any(|k| upper.contains(k))
                || re_phone().is_match(line)
                || re_url().is_match(line)
                || re_date_slash().is_match(line)
                || re_date_iso().is_match(line)
                || line.starts_with(|c: char| c.is_ascii_digit())
            {
                continue;
            }

            let ratio = alpha_ratio(line);
            if ratio < 0.45 {
                continue;
            }
            let all_caps = line.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase);
            let score = ratio * 100.0 - line.chars().count() as f32 + if all_caps { 10.0 } else { 0.0 };
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((line, score));
            }
        }
        best.map(|(l, _)| l.to_string())
    }

    // ── Date ─────────────────────────────────────────────────────────────────

    /// Lines mentioning DATE or TIME first, then the rest bottom-up.
    pub fn purchase_date<S: AsRef<str>>(lines: &[S]) -> Option<NaiveDate> {
        let preferred = lines.iter().map(|l| l.as_ref()).filter(|l| {
            let u = l.to_uppercase();
            u.contains("DATE") || u.contains("TIME")
        });
        preferred
            .chain(lines.iter().rev().map(|l| l.as_ref()))
            .find_map(parse_date)
    }

    // ── Address ──────────────────────────────────────────────────────────────

    pub fn address<S: AsRef<str>>(lines: &[S]) -> Address {
        let top: Vec<&str> = lines
            .iter()
            .take(20)
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty())
            .collect();

        let mut out = Address {
            website: top.iter().find(|l| re_website().is_match(l)).map(|l| l.to_string()),
            ..Default::default()
        };

        if let Some(i) = top.iter().position(|l| re_street().is_match(l)) {
            out.street = Some(top[i].to_string());
            if let Some(c) = top.get(i + 1).and_then(|next| re_city_state_zip().captures(next)) {
                out.city = c.get(1).map(|m| title_case(m.as_str().trim()));
                out.state = c.get(2).map(|m| m.as_str().to_uppercase());
                out.zip = c.get(3).map(|m| m.as_str().to_string());
            }
        }
        out
    }

    // ── Amounts ───────────────────────────────────────────────────────────────

    /// Bottom-up: an `AMOUNT` line first, then a `TOTAL` line that is not a subtotal.
    pub fn total<S: AsRef<str>>(lines: &[S]) -> Option<Money> {
        let amount = lines.iter().rev().map(|l| l.as_ref()).find_map(|l| {
            let u = l.to_uppercase();
            if !u.contains("AMOUNT") || u.contains("TAX") {
                return None;
            }
            normalize_money(re_money_token().find(l)?.as_str())
        });
        amount.or_else(|| {
            lines.iter().rev().map(|l| l.as_ref()).find_map(|l| {
                let u = l.to_uppercase();
                if !u.contains("TOTAL") || u.contains("SUB") {
                    return None;
                }
                let c = re_money_tail().captures(l.trim())?;
                normalize_money(c.get(1)?.as_str())
            })
        })
    }

    pub fn subtotal<S: AsRef<str>>(lines: &[S]) -> Option<Money> {
        lines.iter().rev().map(|l| l.as_ref()).find_map(|l| {
            let u = l.to_uppercase();
            if !(u.contains("SUBTOTAL") || u.contains("SUB TOTAL")) {
                return None;
            }
            re_money_token()
                .find(l)
                .and_then(|m| normalize_money(m.as_str()))
                .or_else(|| extract_price_loose(l))
        })
    }

    /// Skips `TAX EXEMPT` and `NO TAX` lines.
    pub fn tax<S: AsRef<str>>(lines: &[S]) -> Option<Money> {
        lines.iter().rev().map(|l| l.as_ref()).find_map(|l| {
            let u = l.to_uppercase();
            if !u.contains("TAX") || u.contains("TAX EXEMPT") || u.contains("NO TAX") {
                return None;
            }
            normalize_money(re_money_token_spaced().find(l)?.as_str())
        })
    }
}

fn alpha_ratio(s: &str) -> f32 {
    let total = s.chars().count();
    if total == 0 {
        return 0.0;
    }
    s.chars().filter(|c| c.is_alphabetic()).count() as f32 / total as f32
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Date helpers ──────────────────────────────────────────────────────────────

fn parse_date(line: &str) -> Option<NaiveDate> {
    try_date_month_name(line)
        .or_else(|| try_date_abbr_month(line))
        .or_else(|| try_date_iso(line))
        .or_else(|| try_date_slash(line))
        .or_else(|| try_date_dash(line))
}

fn try_date_month_name(text: &str) -> Option<NaiveDate> {
    let c = re_date_month_name().captures(text)?;
    let month = month_name_to_num(c.get(1)?.as_str())?;
    let day: u32 = c.get(2)?.as_str().parse().ok()?;
    let year: i32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn try_date_abbr_month(text: &str) -> Option<NaiveDate> {
    let c = re_date_abbr_month().captures(text)?;
    let day: u32 = c.get(1)?.as_str().parse().ok()?;
    let month = month_name_to_num(c.get(2)?.as_str())?;
    let year: i32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn try_date_iso(text: &str) -> Option<NaiveDate> {
    let c = re_date_iso().captures(text)?;
    let y: i32 = c.get(1)?.as_str().parse().ok()?;
    let m: u32 = c.get(2)?.as_str().parse().ok()?;
    let d: u32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

// Receipts print US-style month/day/year.
fn try_date_slash(text: &str) -> Option<NaiveDate> {
    let c = re_date_slash().captures(text)?;
    month_day_year(c.get(1)?.as_str(), c.get(2)?.as_str(), c.get(3)?.as_str())
}

fn try_date_dash(text: &str) -> Option<NaiveDate> {
    let c = re_date_dash().captures(text)?;
    month_day_year(c.get(1)?.as_str(), c.get(2)?.as_str(), c.get(3)?.as_str())
}

fn month_day_year(m: &str, d: &str, y: &str) -> Option<NaiveDate> {
    let month: u32 = m.parse().ok()?;
    let day: u32 = d.parse().ok()?;
    let year = expand_year(y.parse().ok()?);
    NaiveDate::from_ymd_opt(year, month, day)
}

fn expand_year(y: i32) -> i32 {
    if y < 100 { 2000 + y } else { y }
}

fn month_name_to_num(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1, "feb" => 2, "mar" => 3, "apr" => 4,
        "may" => 5, "jun" => 6, "jul" => 7, "aug" => 8,
        "sep" => 9, "oct" => 10, "nov" => 11, "dec" => 12,
        _ => return None,
    };
    Some(month)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    fn m(cents: i64) -> Option<Money> {
        Some(Money::from_cents(cents))
    }

    // ── Merchant ──────────────────────────────────────────────────────────────

    #[test]
    fn merchant_all_caps_preferred() {
        let f = Extractor::extract(&lines("123 Main Street\nStarbucks Coffee Co\nSTARBUCKS COFFEE\n2024-01-15\nTotal $5.50"));
        assert_eq!(f.merchant.as_deref(), Some("STARBUCKS COFFEE"));
    }

    #[test]
    fn merchant_skips_phone_and_header_lines() {
        let f = Extractor::extract(&lines("(555) 123-4567\nRECEIPT\nWHOLE FOODS\nTotal $42.00"));
        assert_eq!(f.merchant.as_deref(), Some("WHOLE FOODS"));
    }

    #[test]
    fn merchant_skips_bare_sales_banner() {
        let f = Extractor::extract(&lines("SALES\nDAISO\nREGISTER 2"));
        assert_eq!(f.merchant.as_deref(), Some("DAISO"));
    }

    #[test]
    fn merchant_none_when_nothing_qualifies() {
        let f = Extractor::extract(&lines("123 First Ave\n(800) 555-1234\n$10.00"));
        assert_eq!(f.merchant, None);
    }

    // ── Date ─────────────────────────────────────────────────────────────────

    #[test]
    fn date_line_preferred_over_footer_timestamp() {
        let text = "STORE\nDATE TIME 1/6/2026 10:02\nMILK 3.99\n01/10/2026 13:13 #0041";
        assert_eq!(
            Extractor::extract(&lines(text)).purchase_date,
            NaiveDate::from_ymd_opt(2026, 1, 6)
        );
    }

    #[test]
    fn date_found_bottom_up_without_label() {
        let text = "STORE\nMILK 3.99\n01/10/26 13:13";
        assert_eq!(
            Extractor::extract(&lines(text)).purchase_date,
            NaiveDate::from_ymd_opt(2026, 1, 10)
        );
    }

    #[test]
    fn date_full_month_name_and_iso() {
        assert_eq!(
            Extractor::purchase_date(&["Date: March 15, 2024"]),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(
            Extractor::purchase_date(&["Order 2024-03-15"]),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(
            Extractor::purchase_date(&["15 Jan 2024"]),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
    }

    #[test]
    fn invalid_dates_rejected() {
        assert_eq!(Extractor::purchase_date(&["13/45/2024"]), None);
    }

    // ── Address ──────────────────────────────────────────────────────────────

    #[test]
    fn street_city_state_zip() {
        let text = "DAISO\n1234 NE 45TH ST\nSEATTLE, WA 98105\nwww.daisous.com";
        let a = Extractor::extract(&lines(text)).address;
        assert_eq!(a.street.as_deref(), Some("1234 NE 45TH ST"));
        assert_eq!(a.city.as_deref(), Some("Seattle"));
        assert_eq!(a.state.as_deref(), Some("WA"));
        assert_eq!(a.zip.as_deref(), Some("98105"));
        assert_eq!(a.website.as_deref(), Some("www.daisous.com"));
    }

    #[test]
    fn address_empty_when_absent() {
        assert_eq!(Extractor::address(&["STORE", "MILK 3.99"]), Address::default());
    }

    // ── Amounts ───────────────────────────────────────────────────────────────

    #[test]
    fn subtotal_tax_total() {
        let f = Extractor::extract(&lines("STORE\nSUBTOTAL 45.00\nTAX 3.60\nTOTAL 48.60"));
        assert_eq!(f.aggregates.subtotal, m(4500));
        assert_eq!(f.aggregates.tax, m(360));
        assert_eq!(f.aggregates.total, m(4860));
    }

    #[test]
    fn amount_line_beats_total_line() {
        let text = "TOTAL 48.60\nVISA\nAMOUNT: $48.66";
        assert_eq!(Extractor::total(&lines(text)), m(4866));
    }

    #[test]
    fn total_accepts_spaced_and_bare_cents() {
        assert_eq!(Extractor::total(&["TOTAL 7 49"]), m(749));
        assert_eq!(Extractor::total(&["TOTAL 1079"]), m(1079));
    }

    #[test]
    fn total_ignores_subtotal_line() {
        assert_eq!(Extractor::total(&["SUBTOTAL 9.00"]), None);
    }

    #[test]
    fn tax_exempt_lines_skipped() {
        assert_eq!(Extractor::tax(&["TAX 0.79", "TAX EXEMPT 0.00"]), m(79));
        assert_eq!(Extractor::tax(&["NO TAX 0.00"]), None);
    }

    #[test]
    fn subtotal_falls_back_to_loose_reader() {
        assert_eq!(Extractor::subtotal(&["SUB TOTAL $ 9 OO"]), m(900));
    }

    #[test]
    fn no_panic_on_garbage_input() {
        let _ = Extractor::extract(&lines("!@#$%^&*()\n\0\x01\x02"));
        let _ = Extractor::extract::<&str>(&[]);
    }
}
