use tally_core::Money;
use tally_ocr::reconcile::{Basis, SkipReason};
use tally_ocr::{explain_slicing, parse, slice_item_region, summarize, PriceKind, ReconcileOutcome};

fn cents(c: i64) -> Option<Money> {
    Some(Money::from_cents(c))
}

const GROCERY: &[&str] = &[
    "WINCO FOODS",
    "1234 NE 45TH ST",
    "SEATTLE, WA 98105",
    "CASHIER: ANNA",
    "BANANAS 3 LB",
    "** GROCERY (F) tee 7 49",
    "CHEDDAR 8 OZ",
    "4.79",
    "CRACKERS 2",
    "$ 2,99",
    "SUBTOTAL 15.17",
    "TOTAL 15.17",
    "F = FOODSTAMP ITEM",
];

#[test]
fn grocery_receipt_is_sliced_after_cashier_line() {
    let trace = explain_slicing(GROCERY);
    assert_eq!(trace.header_anchor.as_ref().map(|h| h.index), Some(3));
    assert_eq!((trace.start, trace.end), (4, 10));
    assert_eq!(trace.footer.as_ref().map(|h| h.line.as_str()), Some("SUBTOTAL 15.17"));
    assert_eq!(slice_item_region(GROCERY), trace.region);
    assert_eq!(trace.region.first().map(String::as_str), Some("BANANAS 3 LB"));
}

#[test]
fn grocery_receipt_corrects_the_weakest_price() {
    let items = parse(GROCERY);

    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["BANANAS", "CHEDDAR", "CRACKERS"]);

    assert_eq!(items[0].price, cents(739));
    assert_eq!(items[1].price, cents(479));
    assert_eq!(items[2].price, cents(299));

    assert_eq!(items[0].price_source.as_ref().map(|s| s.kind), Some(PriceKind::Tag));
    assert_eq!(
        items[0].meta,
        [
            "GROCERY (F)",
            "price_from: ** GROCERY (F) tee 7 49",
            "price_corrected:7.49->7.39 using subtotal:15.17",
        ]
    );
    assert_eq!(items[1].meta, ["4.79"]);
}

#[test]
fn grocery_summary_carries_header_fields() {
    let s = summarize(GROCERY);
    assert_eq!(s.merchant.as_deref(), Some("WINCO FOODS"));
    assert_eq!(s.address.street.as_deref(), Some("1234 NE 45TH ST"));
    assert_eq!(s.address.city.as_deref(), Some("Seattle"));
    assert_eq!(s.address.zip.as_deref(), Some("98105"));
    assert_eq!(s.subtotal, cents(1517));
    assert_eq!(s.total, cents(1517));
    assert_eq!(s.tax, None);
    assert_eq!(s.purchase_date, None);
    assert_eq!(
        s.reconciliation,
        ReconcileOutcome::Corrected {
            index: 0,
            from: Money::from_cents(749),
            to: Money::from_cents(739),
            basis: Basis::Subtotal,
        }
    );

    let json = serde_json::to_value(&s).unwrap();
    assert_eq!(json["reconciliation"]["status"], "corrected");
    assert_eq!(json["items"][0]["price_source"]["kind"], "tag");
}

#[test]
fn tax_without_subtotal_leaves_prices_alone() {
    let lines = ["MARKET", "COFFEE BEANS 1", "$ 6.00", "TEA 2", "$ 4.10", "TAX 0.79", "TOTAL 10.79"];
    let s = summarize(&lines);
    assert_eq!(s.reconciliation, ReconcileOutcome::Skipped { reason: SkipReason::TaxWithoutSubtotal });
    let prices: Vec<Option<Money>> = s.items.iter().map(|i| i.price).collect();
    assert_eq!(prices, [cents(600), cents(410)]);
    assert!(s.items.iter().all(|i| !i.meta.iter().any(|m| m.starts_with("price_corrected"))));
    assert!(s.needs_review());
}

#[test]
fn whole_unit_misread_is_fixed_against_total() {
    let lines = ["SHOP", "HAMMER 1", "$ 12.99", "NAILS 2", "$ 4.99", "TOTAL 12.98"];
    let items = parse(&lines);
    assert_eq!(items[0].price, cents(799));
    assert_eq!(items[1].price, cents(499));
    assert_eq!(items[0].meta.last().map(String::as_str), Some("price_corrected:12.99->7.99 using total:12.98"));
}

#[test]
fn receipt_without_item_lines_has_no_items() {
    assert!(parse(&["THANK YOU", "VISIT AGAIN"]).is_empty());
    let s = summarize(&["THANK YOU", "VISIT AGAIN"]);
    assert_eq!(s.reconciliation, ReconcileOutcome::Skipped { reason: SkipReason::NoItems });
}
