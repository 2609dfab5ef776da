// src/normalise.rs

//! Canonicalise a validated document before it is rendered: fold model-side
//! aliases into canonical fields and fill the defaults a printed document needs.

use crate::dates;
use crate::document::{
    BillOfSupply, Document, GstInvoice, LineItem, PaymentReceipt, Quotation, RAW_ITEM, lenient,
};
use serde_json::{Map, Value};

pub const DEFAULT_UNIT: &str = "Nos";
pub const DEFAULT_GST_HALF_RATE: f64 = 9.0;
pub const QUOTATION_VALIDITY_DAYS: i64 = 14;
pub const QUOTATION_NOTE: &str = "Estimate Only - Not a Tax Invoice";
pub const QUOTATION_TAX_NOTE: &str = "GST Extra as applicable";

pub fn normalize(document: &Document) -> Document {
    match document.clone() {
        Document::GstInvoice(inv) => Document::GstInvoice(normalize_gst_invoice(inv)),
        Document::BillOfSupply(bill) => Document::BillOfSupply(normalize_bill(bill)),
        Document::Quotation(quote) => Document::Quotation(normalize_quotation(quote)),
        Document::PaymentReceipt(receipt) => {
            Document::PaymentReceipt(normalize_receipt(receipt))
        }
    }
}

fn normalize_gst_invoice(mut inv: GstInvoice) -> GstInvoice {
    inv.items = inv.items.into_iter().map(normalize_item).collect();
    inv.invoice_date = inv.invoice_date.map(|d| dates::normalize_date(&d));
    inv.subtotal = inv
        .subtotal
        .or_else(|| take_number(&mut inv.extra, "subtotal_amount"))
        .or(Some(0.0));
    inv.cgst_amount = inv
        .cgst_amount
        .or_else(|| take_number(&mut inv.extra, "CGST_amount"))
        .or(Some(0.0));
    inv.sgst_amount = inv
        .sgst_amount
        .or_else(|| take_number(&mut inv.extra, "SGST_amount"))
        .or(Some(0.0));
    inv.total = inv
        .total
        .or_else(|| take_number(&mut inv.extra, "total_amount"))
        .or(Some(0.0));
    inv.cgst_rate = inv.cgst_rate.or(Some(DEFAULT_GST_HALF_RATE));
    inv.sgst_rate = inv.sgst_rate.or(Some(DEFAULT_GST_HALF_RATE));
    inv
}

fn normalize_bill(mut bill: BillOfSupply) -> BillOfSupply {
    bill.items = bill.items.into_iter().map(normalize_item).collect();
    bill.bill_date = bill.bill_date.map(|d| dates::normalize_date(&d));
    bill.total = bill
        .total
        .or_else(|| take_number(&mut bill.extra, "total_amount"))
        .or(Some(0.0));
    bill
}

fn normalize_quotation(mut quote: Quotation) -> Quotation {
    quote.items = quote.items.into_iter().map(normalize_item).collect();
    quote.quotation_date = quote.quotation_date.map(|d| dates::normalize_date(&d));
    quote.subtotal = quote
        .subtotal
        .or_else(|| take_number(&mut quote.extra, "subtotal_amount"))
        .or_else(|| Some(quote.items.iter().filter_map(|i| i.amount).sum()));
    quote.total_estimate = quote
        .total_estimate
        .or_else(|| take_number(&mut quote.extra, "total_amount"))
        .or(quote.subtotal);
    if quote.valid_until.is_none() {
        let issued = quote
            .quotation_date
            .as_deref()
            .and_then(dates::parse_date)
            .unwrap_or_else(dates::today);
        quote.valid_until = Some(dates::iso(dates::add_days(issued, QUOTATION_VALIDITY_DAYS)));
    }
    quote.tax_note.get_or_insert_with(|| QUOTATION_TAX_NOTE.to_string());
    quote.note.get_or_insert_with(|| QUOTATION_NOTE.to_string());
    quote
}

fn normalize_receipt(mut receipt: PaymentReceipt) -> PaymentReceipt {
    receipt.receipt_date = receipt.receipt_date.map(|d| dates::normalize_date(&d));
    if receipt.current_balance.is_none() {
        if let (Some(previous), Some(received)) = (receipt.previous_balance, receipt.amount_received)
        {
            receipt.current_balance = Some(previous - received);
        }
    }
    receipt
}

fn normalize_item(mut item: LineItem) -> LineItem {
    if item.description.is_none() {
        item.description = take_string(&mut item.extra, "product_name")
            .or_else(|| take_string(&mut item.extra, RAW_ITEM));
    }
    if item.hsn_code.is_none() {
        item.hsn_code = take_string(&mut item.extra, "HSN");
    }
    if item.rate.is_none() {
        item.rate = take_number(&mut item.extra, "unit_price");
    }
    if item.amount.is_none() {
        item.amount = take_number(&mut item.extra, "item_total");
    }
    let quantity = *item.quantity.get_or_insert(1.0);
    item.unit.get_or_insert_with(|| DEFAULT_UNIT.to_string());
    if item.amount.is_none() {
        item.amount = Some(item.rate.map(|rate| rate * quantity).unwrap_or(0.0));
    }
    item.rate.get_or_insert(0.0);
    item
}

/// Move an alias into its canonical field. A value that does not convert
/// stays where it is.
fn take_number(extra: &mut Map<String, Value>, key: &str) -> Option<f64> {
    let number = match extra.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => lenient::parse_amount(s),
        _ => None,
    }?;
    extra.remove(key);
    Some(number)
}

fn take_string(extra: &mut Map<String, Value>, key: &str) -> Option<String> {
    let text = match extra.get(key)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    extra.remove(key);
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_item_aliases_and_defaults() {
        let normalized = normalize(&doc(json!({
            "document_type": "gst_invoice",
            "customer_name": "Rahul",
            "items": [{"product_name": "Cement", "HSN": 2523, "unit_price": 380, "quantity": 10}],
            "subtotal_amount": 3800,
            "total_amount": 4484
        })));
        let Document::GstInvoice(inv) = normalized else {
            panic!("type changed");
        };
        let item = &inv.items[0];
        assert_eq!(item.description.as_deref(), Some("Cement"));
        assert_eq!(item.hsn_code.as_deref(), Some("2523"));
        assert_eq!(item.rate, Some(380.0));
        assert_eq!(item.amount, Some(3800.0));
        assert_eq!(item.unit.as_deref(), Some("Nos"));
        assert!(item.extra.is_empty());
        assert_eq!(inv.subtotal, Some(3800.0));
        assert_eq!(inv.total, Some(4484.0));
        assert_eq!(inv.cgst_amount, Some(0.0));
        assert_eq!(inv.cgst_rate, Some(9.0));
        assert!(inv.extra.is_empty());
    }

    #[test]
    fn test_canonical_fields_win_over_aliases() {
        let normalized = normalize(&doc(json!({
            "document_type": "bill_of_supply",
            "items": [{"description": "Sand", "product_name": "Ret", "amount": 900}],
            "total": 900,
            "total_amount": 1
        })));
        let Document::BillOfSupply(bill) = normalized else {
            panic!("type changed");
        };
        assert_eq!(bill.items[0].description.as_deref(), Some("Sand"));
        assert_eq!(bill.items[0].quantity, Some(1.0));
        assert_eq!(bill.total, Some(900.0));
        assert!(bill.extra.contains_key("total_amount"));
    }

    #[test]
    fn test_formatted_alias_amounts() {
        let normalized = normalize(&doc(json!({
            "document_type": "bill_of_supply",
            "items": [{"description": "Tiles", "item_total": "Rs. 1,200"}],
            "total_amount": "₹4,484"
        })));
        let Document::BillOfSupply(bill) = normalized else {
            panic!("type changed");
        };
        assert_eq!(bill.items[0].amount, Some(1200.0));
        assert_eq!(bill.total, Some(4484.0));
        assert!(bill.extra.is_empty());

        let normalized = normalize(&doc(json!({
            "document_type": "bill_of_supply",
            "total_amount": "pending"
        })));
        let Document::BillOfSupply(bill) = normalized else {
            panic!("type changed");
        };
        assert_eq!(bill.total, Some(0.0));
        assert_eq!(bill.extra["total_amount"], "pending");
    }

    #[test]
    fn test_bare_text_line_becomes_description() {
        let normalized = normalize(&doc(json!({
            "document_type": "bill_of_supply",
            "items": ["Cement 50 bags"],
            "total": 900
        })));
        let Document::BillOfSupply(bill) = normalized else {
            panic!("type changed");
        };
        assert_eq!(bill.items[0].description.as_deref(), Some("Cement 50 bags"));
        assert!(bill.items[0].extra.is_empty());
    }

    #[test]
    fn test_quotation_defaults() {
        let normalized = normalize(&doc(json!({
            "document_type": "quotation",
            "quotation_date": "25/01/2026",
            "items": [{"description": "Paint", "rate": 500, "quantity": 3}]
        })));
        let Document::Quotation(quote) = normalized else {
            panic!("type changed");
        };
        assert_eq!(quote.quotation_date.as_deref(), Some("2026-01-25"));
        assert_eq!(quote.valid_until.as_deref(), Some("2026-02-08"));
        assert_eq!(quote.subtotal, Some(1500.0));
        assert_eq!(quote.total_estimate, Some(1500.0));
        assert_eq!(quote.note.as_deref(), Some(QUOTATION_NOTE));
        assert_eq!(quote.tax_note.as_deref(), Some(QUOTATION_TAX_NOTE));
    }

    #[test]
    fn test_receipt_current_balance() {
        let normalized = normalize(&doc(json!({
            "document_type": "payment_receipt",
            "amount_received": 3000,
            "payment_mode": "cash",
            "previous_balance": 5000
        })));
        let Document::PaymentReceipt(receipt) = normalized else {
            panic!("type changed");
        };
        assert_eq!(receipt.current_balance, Some(2000.0));
    }

    #[test]
    fn test_normalize_does_not_touch_input() {
        let original = doc(json!({"document_type": "quotation", "items": [{"rate": 5}]}));
        let before = original.clone();
        let _ = normalize(&original);
        assert_eq!(original, before);
    }
}
