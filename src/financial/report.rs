// src/financial/report.rs

use super::FinancialKind;
use super::agent::ProcessingResult;
use crate::dates;
use std::collections::BTreeMap;
use time::macros::format_description;

/// Rupees with Indian digit grouping, e.g. `₹1,23,456.78`.
pub fn format_currency(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (integer, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let grouped = if integer.len() > 3 {
        let (head, last_three) = integer.split_at(integer.len() - 3);
        let mut groups: Vec<&str> = Vec::new();
        let mut rest = head;
        while rest.len() > 2 {
            let (front, pair) = rest.split_at(rest.len() - 2);
            groups.push(pair);
            rest = front;
        }
        groups.push(rest);
        groups.reverse();
        format!("{},{}", groups.join(","), last_three)
    } else {
        integer.to_string()
    };

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}₹{grouped}.{fraction}")
}

/// Human-readable summary of a batch run.
pub fn summary_report(results: &[ProcessingResult]) -> String {
    let total = results.len();
    let successful = results.iter().filter(|r| r.is_success()).count();
    let failed = total - successful;
    let success_rate = if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64 * 100.0
    };

    let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut total_amount = 0.0;
    for data in results
        .iter()
        .filter(|r| r.is_success())
        .filter_map(|r| r.data.as_ref())
    {
        *by_kind.entry(data.document_type.as_str()).or_default() += 1;
        total_amount += data.amount.unwrap_or_default();
    }

    let generated = dates::now()
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_default();

    let mut out = format!(
        "BATCH PROCESSING SUMMARY\n\
         ========================\n\
         Total Processed: {total}\n\
         Successful:      {successful}\n\
         Failed:          {failed}\n\
         Success Rate:    {success_rate:.1}%\n\
         \n\
         Document Types:\n"
    );
    for kind in FinancialKind::ALL {
        if let Some(count) = by_kind.get(kind.as_str()) {
            out.push_str(&format!("  {kind}: {count}\n"));
        }
    }
    out.push_str(&format!(
        "\nTotal Amount Extracted: {}\nGenerated: {generated}\n",
        format_currency(total_amount)
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::financial::ExtractedData;
    use crate::financial::agent::ProcessingStatus;

    fn result(kind: FinancialKind, amount: Option<f64>) -> ProcessingResult {
        ProcessingResult {
            status: ProcessingStatus::Success,
            filename: None,
            timestamp: String::new(),
            data: Some(ExtractedData {
                document_type: kind,
                amount,
                ..ExtractedData::default()
            }),
            confidence_score: Some(70.0),
            error: None,
            output_path: None,
        }
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(0.0), "₹0.00");
        assert_eq!(format_currency(999.5), "₹999.50");
        assert_eq!(format_currency(1000.0), "₹1,000.00");
        assert_eq!(format_currency(123456.78), "₹1,23,456.78");
        assert_eq!(format_currency(12345678.0), "₹1,23,45,678.00");
        assert_eq!(format_currency(-2500.0), "-₹2,500.00");
    }

    #[test]
    fn test_summary_report() {
        let mut failed = result(FinancialKind::Unknown, None);
        failed.status = ProcessingStatus::Error;
        failed.data = None;

        let report = summary_report(&[
            result(FinancialKind::UpiScreenshot, Some(1500.0)),
            result(FinancialKind::Invoice, Some(100000.0)),
            result(FinancialKind::UpiScreenshot, None),
            failed,
        ]);
        assert!(report.contains("Total Processed: 4"));
        assert!(report.contains("Failed:          1"));
        assert!(report.contains("Success Rate:    75.0%"));
        assert!(report.contains("upi_screenshot: 2"));
        assert!(report.contains("invoice: 1"));
        assert!(report.contains("₹1,01,500.00"));
    }

    #[test]
    fn test_empty_batch() {
        let report = summary_report(&[]);
        assert!(report.contains("Success Rate:    0.0%"));
    }
}
