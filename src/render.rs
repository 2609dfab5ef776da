// src/render.rs

//! Single-page A4 rendering of normalized documents with the PDF base fonts.

use crate::config::BusinessConfig;
use crate::document::{BillOfSupply, Document, GstInvoice, LineItem, PaymentReceipt, Quotation};
use crate::financial::report::format_currency;
use crate::storage::sanitize;
use lopdf::content::{Content, Operation};
use lopdf::{Object, Stream, dictionary};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
/// Space kept free at the bottom for totals and the signature line.
const FOOTER_RESERVE: i64 = 170;
const DESCRIPTION_CHARS: usize = 32;

pub const BILL_OF_SUPPLY_NOTE: &str = "Bill of Supply - Composition Scheme";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to build PDF: {0}")]
    Pdf(String),
}

/// Render `document` to `<out_dir>/<Prefix>_<number or unix time>.pdf`.
pub fn render_pdf(
    document: &Document,
    business: &BusinessConfig,
    out_dir: impl AsRef<Path>,
) -> Result<PathBuf, RenderError> {
    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir).map_err(|source| RenderError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let path = out_dir.join(pdf_file_name(document));
    let bytes = render_bytes(document, business)?;
    fs::write(&path, bytes).map_err(|source| RenderError::Io {
        path: path.clone(),
        source,
    })?;

    info!(path = %path.display(), title = document.schema().title, "PDF generated");
    Ok(path)
}

pub fn pdf_file_name(document: &Document) -> String {
    let suffix = match document.number() {
        Some(number) => sanitize(number),
        None => OffsetDateTime::now_utc().unix_timestamp().to_string(),
    };
    format!("{}_{}.pdf", document.schema().file_prefix, suffix)
}

pub fn render_bytes(document: &Document, business: &BusinessConfig) -> Result<Vec<u8>, RenderError> {
    let mut page = Page::new();
    letterhead(&mut page, business);
    page.centered(Font::Bold, 18, document.schema().title);
    page.gap(6);

    match document {
        Document::GstInvoice(inv) => gst_invoice(&mut page, inv),
        Document::BillOfSupply(bill) => bill_of_supply(&mut page, bill),
        Document::Quotation(quote) => quotation(&mut page, quote),
        Document::PaymentReceipt(receipt) => payment_receipt(&mut page, receipt),
    }

    signature(&mut page, business);
    debug!(operations = page.ops.len(), "Page laid out");
    build_pdf(page.ops)
}

fn letterhead(page: &mut Page, business: &BusinessConfig) {
    page.centered(Font::Bold, 16, &business.name);
    page.centered(Font::Regular, 9, &business.address);
    page.centered(
        Font::Regular,
        9,
        &format!(
            "GSTIN: {}  |  Phone: {}  |  Email: {}",
            business.gstin, business.phone, business.email
        ),
    );
    page.rule();
}

fn gst_invoice(page: &mut Page, inv: &GstInvoice) {
    page.pair("Invoice No:", or_dash(&inv.invoice_number), "Date:", or_dash(&inv.invoice_date));
    page.line(Font::Bold, 10, "Bill To:");
    page.line(Font::Regular, 10, or_dash(&inv.customer_name));
    if let Some(gstin) = &inv.customer_gstin {
        page.line(Font::Regular, 10, &format!("GSTIN: {gstin}"));
    }
    if let Some(address) = &inv.customer_address {
        page.line(Font::Regular, 10, address);
    }
    page.gap(6);

    item_table(page, &inv.items, true);

    let cgst_rate = inv.cgst_rate.unwrap_or_default();
    let sgst_rate = inv.sgst_rate.unwrap_or_default();
    page.total(Font::Regular, "Subtotal:", inv.subtotal);
    page.total(Font::Regular, &format!("CGST @ {cgst_rate}%:"), inv.cgst_amount);
    page.total(Font::Regular, &format!("SGST @ {sgst_rate}%:"), inv.sgst_amount);
    page.total(Font::Bold, "Grand Total:", inv.total);
}

fn bill_of_supply(page: &mut Page, bill: &BillOfSupply) {
    page.centered(Font::Regular, 9, "(Under Composition Scheme)");
    page.pair("Bill No:", or_dash(&bill.bill_number), "Date:", or_dash(&bill.bill_date));
    page.line(Font::Bold, 10, "Bill To:");
    page.line(Font::Regular, 10, or_dash(&bill.customer_name));
    page.gap(6);

    item_table(page, &bill.items, false);
    page.total(Font::Bold, "Total:", bill.total);
    page.gap(8);
    page.line(
        Font::Regular,
        9,
        bill.note.as_deref().unwrap_or(BILL_OF_SUPPLY_NOTE),
    );
}

fn quotation(page: &mut Page, quote: &Quotation) {
    page.centered(Font::Bold, 10, "ESTIMATE ONLY - NOT A TAX INVOICE");
    page.pair(
        "Quotation No:",
        or_dash(&quote.quotation_number),
        "Date:",
        or_dash(&quote.quotation_date),
    );
    page.line(Font::Regular, 10, &format!("Valid Until: {}", or_dash(&quote.valid_until)));
    page.line(Font::Bold, 10, "Quotation For:");
    page.line(Font::Regular, 10, or_dash(&quote.customer_name));
    page.gap(6);

    item_table(page, &quote.items, false);
    page.total(Font::Regular, "Subtotal:", quote.subtotal);
    if let Some(tax_note) = &quote.tax_note {
        page.line(Font::Regular, 9, tax_note);
    }
    page.total(Font::Bold, "Total Estimate:", quote.total_estimate);
    if let Some(note) = &quote.note {
        page.gap(8);
        page.line(Font::Regular, 9, note);
    }
}

fn payment_receipt(page: &mut Page, receipt: &PaymentReceipt) {
    page.pair(
        "Receipt No:",
        or_dash(&receipt.receipt_number),
        "Date:",
        or_dash(&receipt.receipt_date),
    );
    page.gap(8);
    page.line(
        Font::Regular,
        11,
        &format!("Received with thanks from: {}", or_dash(&receipt.received_from)),
    );
    page.line(Font::Bold, 12, &format!("Amount: {}", money(receipt.amount_received)));
    page.line(
        Font::Regular,
        11,
        &format!("Payment Mode: {}", or_dash(&receipt.payment_mode)),
    );
    if let Some(payment_for) = &receipt.payment_for {
        page.line(Font::Regular, 11, &format!("Towards: {payment_for}"));
    }

    if let Some(previous) = receipt.previous_balance {
        let received = receipt.amount_received.unwrap_or_default();
        let current = receipt.current_balance.unwrap_or(previous - received);
        page.gap(8);
        page.rule();
        page.line(Font::Bold, 11, "Account Summary");
        page.total(Font::Regular, "Previous Balance:", Some(previous));
        page.total(Font::Regular, "Amount Received:", Some(received));
        page.total(Font::Bold, "Current Balance:", Some(current));
    }
}

fn item_table(page: &mut Page, items: &[LineItem], with_hsn: bool) {
    let header: Vec<(i64, &str)> = if with_hsn {
        vec![(MARGIN, "#"), (75, "Description"), (270, "HSN"), (330, "Qty"), (395, "Rate"), (475, "Amount")]
    } else {
        vec![(MARGIN, "#"), (75, "Description"), (330, "Qty"), (395, "Rate"), (475, "Amount")]
    };
    page.row(Font::Bold, 10, &header);
    page.rule();

    for (index, item) in items.iter().enumerate() {
        if !page.has_room() {
            let rest = items.len() - index;
            page.line(Font::Regular, 9, &format!("... and {rest} more item(s)"));
            break;
        }
        let number = (index + 1).to_string();
        let description: String = item
            .description
            .as_deref()
            .unwrap_or("-")
            .chars()
            .take(DESCRIPTION_CHARS)
            .collect();
        let quantity = match (item.quantity, &item.unit) {
            (Some(q), Some(unit)) => format!("{q} {unit}"),
            (Some(q), None) => q.to_string(),
            (None, _) => "-".to_string(),
        };
        let rate = money(item.rate);
        let amount = money(item.amount);
        let hsn = item.hsn_code.as_deref().unwrap_or("-");

        let mut cells = vec![(MARGIN, number.as_str()), (75, description.as_str())];
        if with_hsn {
            cells.push((270, hsn));
        }
        cells.extend([(330, quantity.as_str()), (395, rate.as_str()), (475, amount.as_str())]);
        page.row(Font::Regular, 10, &cells);
    }
    page.rule();
}

fn signature(page: &mut Page, business: &BusinessConfig) {
    page.text_at(380, MARGIN + 40, Font::Regular, 9, &format!("For {}", business.name));
    page.text_at(380, MARGIN, Font::Regular, 9, "Authorised Signatory");
    page.text_at(MARGIN, MARGIN, Font::Regular, 8, "This is a computer generated document.");
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.trim().is_empty()).unwrap_or("-")
}

fn money(amount: Option<f64>) -> String {
    format_currency(amount.unwrap_or_default())
}

/// Base fonts only cover Latin-1; anything outside ASCII is replaced.
pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '₹' => out.push_str("Rs."),
            c if c.is_ascii() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

#[derive(Clone, Copy)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// Top-down cursor over a single page's content stream.
struct Page {
    ops: Vec<Operation>,
    y: i64,
}

impl Page {
    fn new() -> Self {
        Self {
            ops: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn text_at(&mut self, x: i64, y: i64, font: Font, size: i64, text: &str) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops
            .push(Operation::new("Tf", vec![font.resource().into(), size.into()]));
        self.ops.push(Operation::new("Td", vec![x.into(), y.into()]));
        self.ops.push(Operation::new(
            "Tj",
            vec![Object::string_literal(transliterate(text))],
        ));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn line(&mut self, font: Font, size: i64, text: &str) {
        self.text_at(MARGIN, self.y, font, size, text);
        self.y -= size + 6;
    }

    fn centered(&mut self, font: Font, size: i64, text: &str) {
        // Helvetica averages a little over half an em per glyph.
        let width = transliterate(text).len() as i64 * size * 55 / 100;
        let x = ((PAGE_WIDTH - width) / 2).max(MARGIN);
        self.text_at(x, self.y, font, size, text);
        self.y -= size + 6;
    }

    fn row(&mut self, font: Font, size: i64, cells: &[(i64, &str)]) {
        for (x, text) in cells {
            self.text_at(*x, self.y, font, size, text);
        }
        self.y -= size + 6;
    }

    fn pair(&mut self, left_label: &str, left: &str, right_label: &str, right: &str) {
        let left = format!("{left_label} {left}");
        let right = format!("{right_label} {right}");
        self.row(Font::Regular, 10, &[(MARGIN, left.as_str()), (380, right.as_str())]);
    }

    fn total(&mut self, font: Font, label: &str, amount: Option<f64>) {
        let amount = money(amount);
        self.row(font, 10, &[(330, label), (475, amount.as_str())]);
    }

    fn rule(&mut self) {
        let y = self.y + 4;
        self.ops.push(Operation::new("w", vec![Object::Integer(1)]));
        self.ops
            .push(Operation::new("m", vec![MARGIN.into(), y.into()]));
        self.ops
            .push(Operation::new("l", vec![(PAGE_WIDTH - MARGIN).into(), y.into()]));
        self.ops.push(Operation::new("S", vec![]));
        self.y -= 10;
    }

    fn gap(&mut self, height: i64) {
        self.y -= height;
    }

    fn has_room(&self) -> bool {
        self.y > FOOTER_RESERVE
    }
}

fn build_pdf(operations: Vec<Operation>) -> Result<Vec<u8>, RenderError> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });

    let content = Content { operations }
        .encode()
        .map_err(|e| RenderError::Pdf(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| RenderError::Pdf(e.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalise::normalize;
    use serde_json::json;

    fn page_strings(bytes: &[u8]) -> Vec<String> {
        let pdf = lopdf::Document::load_mem(bytes).unwrap();
        let pages = pdf.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.values().next().unwrap();
        let content = Content::decode(&pdf.get_page_content(page_id).unwrap()).unwrap();
        content
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| match op.operands.first() {
                Some(Object::String(bytes, _)) => Some(String::from_utf8_lossy(bytes).into_owned()),
                _ => None,
            })
            .collect()
    }

    fn invoice() -> Document {
        normalize(
            &Document::from_value(json!({
                "document_type": "gst_invoice",
                "invoice_number": "INV/2026/001",
                "invoice_date": "2026-02-01",
                "customer_name": "Rahul Hardware",
                "customer_gstin": "27ABCDE1234F1Z5",
                "items": [{"description": "Cement", "hsn_code": "2523", "quantity": 50, "unit": "bags", "rate": 380}],
                "subtotal": 19000,
                "cgst_amount": 1710,
                "sgst_amount": 1710,
                "total": 22420
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_invoice_layout() {
        let strings = page_strings(&render_bytes(&invoice(), &BusinessConfig::default()).unwrap());
        assert!(strings.iter().any(|s| s == "TAX INVOICE"));
        assert!(strings.iter().any(|s| s == "Rahul Hardware"));
        assert!(strings.iter().any(|s| s == "2523"));
        assert!(strings.iter().any(|s| s == "CGST @ 9%:"));
        assert!(strings.iter().any(|s| s == "Rs.22,420.00"));
        assert!(strings.iter().any(|s| s == "Your Business Name"));
    }

    #[test]
    fn test_receipt_account_summary() {
        let receipt = normalize(
            &Document::from_value(json!({
                "document_type": "payment_receipt",
                "receipt_number": "R-9",
                "received_from": "Gupta ji",
                "amount_received": 3000,
                "payment_mode": "cash",
                "payment_for": "udhaar",
                "previous_balance": 125000
            }))
            .unwrap(),
        );
        let strings = page_strings(&render_bytes(&receipt, &BusinessConfig::default()).unwrap());
        assert!(strings.iter().any(|s| s == "PAYMENT RECEIPT"));
        assert!(strings.iter().any(|s| s == "Account Summary"));
        assert!(strings.iter().any(|s| s == "Rs.1,22,000.00"));
    }

    #[test]
    fn test_receipt_without_balance_has_no_summary() {
        let receipt = Document::from_value(json!({
            "document_type": "payment_receipt",
            "amount_received": 500,
            "payment_mode": "UPI"
        }))
        .unwrap();
        let strings = page_strings(&render_bytes(&receipt, &BusinessConfig::default()).unwrap());
        assert!(!strings.iter().any(|s| s == "Account Summary"));
    }

    #[test]
    fn test_long_item_list_stays_on_one_page() {
        let items: Vec<_> = (0..80)
            .map(|i| json!({"description": format!("Item {i}"), "rate": 10}))
            .collect();
        let bill = normalize(
            &Document::from_value(json!({"document_type": "bill_of_supply", "items": items})).unwrap(),
        );
        let strings = page_strings(&render_bytes(&bill, &BusinessConfig::default()).unwrap());
        assert!(strings.iter().any(|s| s.ends_with("more item(s)")));
        assert!(strings.iter().any(|s| s == BILL_OF_SUPPLY_NOTE));
    }

    #[test]
    fn test_render_pdf_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = render_pdf(&invoice(), &BusinessConfig::default(), dir.path().join("pdf")).unwrap();
        assert_eq!(path, dir.path().join("pdf").join("GST_Invoice_INV_2026_001.pdf"));
        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
    }

    #[test]
    fn test_file_name_without_number() {
        let quote = Document::from_value(json!({"document_type": "quotation"})).unwrap();
        let name = pdf_file_name(&quote);
        assert!(name.starts_with("Quotation_"));
        assert!(name.trim_start_matches("Quotation_").trim_end_matches(".pdf").parse::<i64>().is_ok());
    }

    #[test]
    fn test_transliterate() {
        assert_eq!(transliterate("₹500 paid"), "Rs.500 paid");
        assert_eq!(transliterate("नमस्ते"), "??????");
        assert_eq!(transliterate("Sharma & Sons"), "Sharma & Sons");
    }
}
