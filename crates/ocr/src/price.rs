use rust_decimal::Decimal;
use std::str::FromStr;
use tally_core::Money;

// ── Compiled regex cache ─────────────────────────────────────────────────────

re!(re_bare_cents, r"^\d{3,5}$");
re!(re_non_numeric, r"[^0-9.,\s]");
re!(re_whitespace, r"\s+");
re!(re_tail_decimal, r"(\d{1,5}[.,]\d{2})\s*$");
re!(re_tail_spaced_cents, r"(\d)\s+(\d{2})\s*$");
re!(re_tail_bare_cents, r"(\d{3,5})\s*$");

/// Characters OCR routinely emits in place of digits.
pub const DIGIT_CONFUSIONS: &[(char, char)] = &[
    ('O', '0'),
    ('Q', '0'),
    ('I', '1'),
    ('L', '1'),
    ('|', '1'),
    ('S', '5'),
    ('B', '8'),
    ('Z', '2'),
    ('G', '6'),
];

/// Prices sit at the end of a line; the loose reader only looks this far back.
pub const LOOSE_TAIL_CHARS: usize = 18;

const STRIPPED: &[char] = &['$', '€', '£', '\\', '¢'];

/// Strict mode: turn a money-looking token into a value.
///
/// Accepts `"6.99"`, `"6,99"`, `"$ 6,99"`, `"1,234.56"` and bare cents such as
/// `"699"` (→ 6.99). Returns `None` on anything else.
pub fn normalize_money(token: &str) -> Option<Money> {
    let t: String = token
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !STRIPPED.contains(c))
        .collect();
    if t.is_empty() {
        return None;
    }

    let t = if t.contains(',') && !t.contains('.') {
        t.replace(',', ".")
    } else {
        t.replace(',', "")
    };

    if re_bare_cents().is_match(&t) {
        return t.parse::<i64>().ok().map(Money::from_cents);
    }

    Decimal::from_str(&t).ok().map(Money::from_decimal)
}

/// Loose mode: read a price off the corrupted tail of a whole line.
///
/// `"** GROCERY (F) $ = G99"` → 6.99, `"** GROCERY (F) tee 7 49"` → 7.49.
pub fn extract_price_loose(line: &str) -> Option<Money> {
    let upper = line.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }

    let chars: Vec<char> = upper.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(LOOSE_TAIL_CHARS)..]
        .iter()
        .map(|&c| unconfuse(c))
        .collect();
    let tail = re_non_numeric().replace_all(&tail, " ");
    let tail = re_whitespace().replace_all(&tail, " ");
    let tail = tail.trim();

    if let Some(c) = re_tail_decimal().captures(tail) {
        return normalize_money(c.get(1)?.as_str());
    }
    if let Some(c) = re_tail_spaced_cents().captures(tail) {
        let joined = format!("{}{}", c.get(1)?.as_str(), c.get(2)?.as_str());
        return normalize_money(&joined);
    }
    if let Some(c) = re_tail_bare_cents().captures(tail) {
        return normalize_money(c.get(1)?.as_str());
    }
    None
}

fn unconfuse(c: char) -> char {
    DIGIT_CONFUSIONS
        .iter()
        .find(|(from, _)| *from == c)
        .map_or(c, |(_, to)| *to)
}
