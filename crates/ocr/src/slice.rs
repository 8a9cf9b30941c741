use serde::{Deserialize, Serialize};

use crate::classify::{self, LineReport};

/// Header anchors are only looked for this far down the receipt.
pub const HEADER_SCAN_LINES: usize = 25;

/// Lines of context reported on either side of the bounds.
pub const TRACE_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineHit {
    pub index: usize,
    pub line: String,
}

/// Every decision the slicer made, for debugging and test authoring.
///
/// Indices refer to the trimmed, blank-free line sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceTrace {
    pub header_anchor: Option<LineHit>,
    pub first_item_like: Option<LineHit>,
    pub footer: Option<LineHit>,
    pub start: usize,
    pub end: usize,
    pub region: Vec<String>,
    pub window: Vec<LineReport>,
}

/// The lines between the receipt header and the totals footer.
pub fn slice_item_region<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    explain_slicing(lines).region
}

pub fn explain_slicing<S: AsRef<str>>(lines: &[S]) -> SliceTrace {
    let lines: Vec<&str> = lines
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.is_empty())
        .collect();

    // The last anchor wins, even when anchors appear out of their usual order.
    let header_anchor = lines
        .iter()
        .take(HEADER_SCAN_LINES)
        .enumerate()
        .filter(|(_, l)| classify::is_header_anchor(l))
        .last()
        .map(|(index, l)| LineHit { index, line: l.to_string() });
    let provisional = header_anchor.as_ref().map_or(0, |h| h.index + 1);

    let first_item_like = lines
        .iter()
        .enumerate()
        .skip(provisional)
        .find(|(_, l)| classify::looks_like_item(l))
        .map(|(index, l)| LineHit { index, line: l.to_string() });
    let start = first_item_like.as_ref().map_or(provisional, |h| h.index);

    let footer = lines
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, l)| classify::is_footer_marker(l))
        .map(|(index, l)| LineHit { index, line: l.to_string() });
    let end = footer.as_ref().map_or(lines.len(), |h| h.index).max(start);

    let region: Vec<String> = lines[start.min(lines.len())..end.min(lines.len())]
        .iter()
        .filter(|l| !classify::is_totalish(l))
        .map(|l| l.to_string())
        .collect();

    let lo = start.saturating_sub(TRACE_WINDOW);
    let hi = (end + TRACE_WINDOW).min(lines.len());
    let window = lines[lo.min(hi)..hi].iter().map(|l| classify::classify(l)).collect();

    tracing::debug!(
        start,
        end,
        anchor = ?header_anchor.as_ref().map(|h| h.index),
        footer = ?footer.as_ref().map(|h| h.index),
        "sliced item region"
    );

    SliceTrace { header_anchor, first_item_like, footer, start, end, region, window }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn slices_between_header_and_subtotal() {
        let input = lines(&[
            "REGISTER 4",
            "DATE 01/01/2025",
            "MILK 2 FOR $4.00",
            "BREAD ... 3.49",
            "EGGS ... 5.99",
            "SUBTOTAL 9.00",
        ]);
        assert_eq!(
            slice_item_region(&input),
            vec!["MILK 2 FOR $4.00", "BREAD ... 3.49", "EGGS ... 5.99"]
        );
    }

    #[test]
    fn trace_reports_each_hit() {
        let input = lines(&[
            "WALMART",
            "REGISTER 4",
            "DATE 01/01/2025",
            "",
            "THANK YOU FOR SHOPPING",
            "MILK 3.99",
            "TOTAL 3.99",
        ]);
        let t = explain_slicing(&input);
        assert_eq!(t.header_anchor, Some(LineHit { index: 2, line: "DATE 01/01/2025".into() }));
        assert_eq!(t.first_item_like, Some(LineHit { index: 4, line: "MILK 3.99".into() }));
        assert_eq!(t.footer, Some(LineHit { index: 5, line: "TOTAL 3.99".into() }));
        assert_eq!((t.start, t.end), (4, 5));
        assert_eq!(t.region, vec!["MILK 3.99"]);
        assert_eq!(t.window.len(), 6);
    }

    #[test]
    fn missing_anchor_and_footer_use_bounds() {
        let input = lines(&["BANANAS 1.09", "APPLES 2.49"]);
        let t = explain_slicing(&input);
        assert!(t.header_anchor.is_none());
        assert!(t.footer.is_none());
        assert_eq!((t.start, t.end), (0, 2));
        assert_eq!(t.region.len(), 2);
    }

    #[test]
    fn last_anchor_wins_even_out_of_order() {
        let input = lines(&["ITEM A 1.00", "RECEIPT", "ITEM B 2.00", "TIME 10:02", "ITEM C 3.00"]);
        let t = explain_slicing(&input);
        assert_eq!(t.header_anchor.map(|h| h.index), Some(3));
        assert_eq!(t.region, vec!["ITEM C 3.00"]);
    }

    #[test]
    fn no_item_like_line_keeps_provisional_start() {
        let input = lines(&["RECEIPT", "THANK YOU", "TOTAL DUE"]);
        let t = explain_slicing(&input);
        assert!(t.first_item_like.is_none());
        assert_eq!(t.start, 1);
        assert_eq!(t.region, vec!["THANK YOU"]);
    }

    #[test]
    fn empty_input_is_empty_region() {
        let t = explain_slicing::<String>(&[]);
        assert!(t.region.is_empty());
        assert!(t.window.is_empty());
        assert_eq!((t.start, t.end), (0, 0));
    }

    #[test]
    fn anchors_beyond_scan_limit_are_ignored() {
        let mut input: Vec<String> = (0..30).map(|i| format!("FILLER LINE {i} 1.00")).collect();
        input.push("CASHIER JO".into());
        input.push("PEAS 1.29".into());
        let t = explain_slicing(&input);
        assert!(t.header_anchor.is_none());
        assert_eq!(t.start, 0);
    }
}
