// src/financial/store.rs

use super::{ExtractedData, FinancialKind};
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub struct FinancialStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    pub id: i64,
    pub image_digest: String,
    pub document_type: FinancialKind,
    pub amount: Option<f64>,
    pub transaction_date: Option<String>,
    pub utr_number: Option<String>,
    pub sender_name: Option<String>,
    pub receiver_name: Option<String>,
    pub payment_app: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_gstin: Option<String>,
    pub invoice_number: Option<String>,
    pub items: Vec<String>,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub confidence_score: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatistics {
    pub total_documents: i64,
    pub by_type: BTreeMap<String, i64>,
    pub total_amount: f64,
}

/// `transaction_date` is stored as DD/MM/YYYY; this reorders it for comparison.
const ISO_DATE: &str = "substr(transaction_date, 7, 4) || '-' || substr(transaction_date, 4, 2) || '-' || substr(transaction_date, 1, 2)";

const COLUMNS: &str = "id, image_digest, document_type, amount, transaction_date, utr_number,
    sender_name, receiver_name, payment_app, vendor_name, vendor_gstin, invoice_number,
    items, description, file_path, confidence_score, created_at";

impl FinancialStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS financial_documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_digest TEXT NOT NULL UNIQUE,
                document_type TEXT NOT NULL,
                amount REAL,
                transaction_date TEXT,
                utr_number TEXT UNIQUE,
                sender_name TEXT,
                receiver_name TEXT,
                payment_app TEXT,
                vendor_name TEXT,
                vendor_gstin TEXT,
                invoice_number TEXT,
                items TEXT,
                description TEXT,
                file_path TEXT,
                confidence_score REAL,
                raw_data TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_financial_vendor ON financial_documents(vendor_name)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_financial_invoice ON financial_documents(invoice_number)",
            [],
        )?;
        Ok(Self { conn })
    }

    /// SHA-256 of the image bytes, hex encoded.
    pub fn image_digest(image: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image);
        format!("{:x}", hasher.finalize())
    }

    /// Insert or refresh the row for this image. Scanning the same image again
    /// updates the existing row instead of adding one.
    pub fn save_extraction(
        &self,
        image: &[u8],
        data: &ExtractedData,
        file_path: Option<&str>,
        confidence_score: Option<f64>,
    ) -> SqliteResult<i64> {
        let digest = Self::image_digest(image);
        let items = data
            .items
            .as_ref()
            .map(|items| serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string()));
        let raw = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());

        self.conn.execute(
            "INSERT INTO financial_documents
                (image_digest, document_type, amount, transaction_date, utr_number, sender_name,
                 receiver_name, payment_app, vendor_name, vendor_gstin, invoice_number, items,
                 description, file_path, confidence_score, raw_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(image_digest) DO UPDATE SET
                document_type = excluded.document_type,
                amount = excluded.amount,
                transaction_date = excluded.transaction_date,
                utr_number = excluded.utr_number,
                sender_name = excluded.sender_name,
                receiver_name = excluded.receiver_name,
                payment_app = excluded.payment_app,
                vendor_name = excluded.vendor_name,
                vendor_gstin = excluded.vendor_gstin,
                invoice_number = excluded.invoice_number,
                items = excluded.items,
                description = excluded.description,
                file_path = excluded.file_path,
                confidence_score = excluded.confidence_score,
                raw_data = excluded.raw_data,
                updated_at = CURRENT_TIMESTAMP",
            params![
                digest,
                data.document_type.as_str(),
                data.amount,
                data.date,
                data.utr_number,
                data.sender_name,
                data.receiver_name,
                data.payment_app,
                data.vendor_name,
                data.gstin,
                data.invoice_number,
                items,
                data.description,
                file_path,
                confidence_score,
                raw,
            ],
        )?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM financial_documents WHERE image_digest = ?1",
            params![digest],
            |row| row.get(0),
        )?;
        info!(id, document_type = %data.document_type, "Financial document stored");
        Ok(id)
    }

    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredDocument> {
        let kind: String = row.get(2)?;
        let items: Option<String> = row.get(12)?;
        Ok(StoredDocument {
            id: row.get(0)?,
            image_digest: row.get(1)?,
            document_type: FinancialKind::parse(&kind),
            amount: row.get(3)?,
            transaction_date: row.get(4)?,
            utr_number: row.get(5)?,
            sender_name: row.get(6)?,
            receiver_name: row.get(7)?,
            payment_app: row.get(8)?,
            vendor_name: row.get(9)?,
            vendor_gstin: row.get(10)?,
            invoice_number: row.get(11)?,
            items: items
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            description: row.get(13)?,
            file_path: row.get(14)?,
            confidence_score: row.get(15)?,
            created_at: row.get(16)?,
        })
    }

    fn query_one(&self, filter: &str, value: &dyn rusqlite::ToSql) -> SqliteResult<Option<StoredDocument>> {
        let sql = format!("SELECT {COLUMNS} FROM financial_documents WHERE {filter} LIMIT 1");
        self.conn
            .query_row(&sql, [value], Self::row_to_document)
            .optional()
    }

    pub fn get_by_id(&self, id: i64) -> SqliteResult<Option<StoredDocument>> {
        self.query_one("id = ?1", &id)
    }

    pub fn get_by_utr(&self, utr_number: &str) -> SqliteResult<Option<StoredDocument>> {
        self.query_one("utr_number = ?1", &utr_number)
    }

    pub fn get_by_invoice_number(&self, invoice_number: &str) -> SqliteResult<Option<StoredDocument>> {
        self.query_one("invoice_number = ?1", &invoice_number)
    }

    /// Case-insensitive substring match on the vendor name.
    pub fn get_by_vendor(&self, vendor_name: &str) -> SqliteResult<Vec<StoredDocument>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM financial_documents
             WHERE vendor_name LIKE '%' || ?1 || '%' COLLATE NOCASE
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![vendor_name], Self::row_to_document)?;
        rows.collect()
    }

    /// Documents dated between `start` and `end` inclusive, both DD/MM/YYYY.
    pub fn get_by_date_range(&self, start: &str, end: &str) -> SqliteResult<Vec<StoredDocument>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM financial_documents
             WHERE transaction_date IS NOT NULL AND {ISO_DATE} BETWEEN ?1 AND ?2
             ORDER BY {ISO_DATE}, id"
        ))?;
        let rows = stmt.query_map(params![dmy_to_iso(start), dmy_to_iso(end)], Self::row_to_document)?;
        rows.collect()
    }

    pub fn get_all(&self, limit: i64, offset: i64) -> SqliteResult<Vec<StoredDocument>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM financial_documents ORDER BY id LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit, offset], Self::row_to_document)?;
        rows.collect()
    }

    pub fn statistics(&self) -> SqliteResult<StoreStatistics> {
        let (total_documents, total_amount): (i64, f64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(amount), 0.0) FROM financial_documents",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut by_type: BTreeMap<String, i64> = FinancialKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), 0))
            .collect();
        let mut stmt = self.conn.prepare(
            "SELECT document_type, COUNT(*) FROM financial_documents GROUP BY document_type",
        )?;
        let counts = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for count in counts {
            let (kind, n) = count?;
            by_type.insert(kind, n);
        }

        Ok(StoreStatistics {
            total_documents,
            by_type,
            total_amount,
        })
    }

    pub fn delete(&self, id: i64) -> SqliteResult<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM financial_documents WHERE id = ?1", params![id])?;
        if affected > 0 {
            info!(id, "Financial document deleted");
        }
        Ok(affected > 0)
    }
}

fn dmy_to_iso(date: &str) -> String {
    let parts: Vec<&str> = date.trim().split('/').collect();
    match parts.as_slice() {
        [day, month, year] => format!("{year}-{month}-{day}"),
        _ => date.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upi(utr: &str, amount: f64) -> ExtractedData {
        ExtractedData {
            document_type: FinancialKind::UpiScreenshot,
            amount: Some(amount),
            date: Some("01/02/2026".to_string()),
            utr_number: Some(utr.to_string()),
            sender_name: Some("John Doe".to_string()),
            payment_app: Some("PhonePe".to_string()),
            ..ExtractedData::default()
        }
    }

    fn invoice(vendor: &str, number: &str, amount: f64) -> ExtractedData {
        ExtractedData {
            document_type: FinancialKind::Invoice,
            amount: Some(amount),
            vendor_name: Some(vendor.to_string()),
            invoice_number: Some(number.to_string()),
            items: Some(vec!["Cement".to_string(), "Sand".to_string()]),
            ..ExtractedData::default()
        }
    }

    #[test]
    fn test_digest_is_stable() {
        let a = FinancialStore::image_digest(b"image-bytes");
        let b = FinancialStore::image_digest(b"image-bytes");
        let c = FinancialStore::image_digest(b"other-bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let store = FinancialStore::open_in_memory().unwrap();
        let first = store
            .save_extraction(b"img-1", &upi("412345678901", 1500.0), Some("a.jpg"), Some(100.0))
            .unwrap();
        let again = store
            .save_extraction(b"img-1", &upi("412345678901", 1600.0), Some("a.jpg"), Some(100.0))
            .unwrap();
        assert_eq!(first, again);

        let stored = store.get_by_id(first).unwrap().unwrap();
        assert_eq!(stored.amount, Some(1600.0));
        assert_eq!(store.get_all(100, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_utr_is_unique() {
        let store = FinancialStore::open_in_memory().unwrap();
        store
            .save_extraction(b"img-1", &upi("412345678901", 1500.0), None, None)
            .unwrap();
        let duplicate = store.save_extraction(b"img-2", &upi("412345678901", 1500.0), None, None);
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_lookups() {
        let store = FinancialStore::open_in_memory().unwrap();
        store
            .save_extraction(b"img-1", &upi("412345678901", 1500.0), None, None)
            .unwrap();
        let id = store
            .save_extraction(b"img-2", &invoice("Sharma Traders", "INV-77", 900.0), None, Some(85.0))
            .unwrap();
        store
            .save_extraction(b"img-3", &invoice("Verma & Sons", "INV-78", 100.0), None, None)
            .unwrap();

        let by_utr = store.get_by_utr("412345678901").unwrap().unwrap();
        assert_eq!(by_utr.payment_app.as_deref(), Some("PhonePe"));
        assert_eq!(by_utr.transaction_date.as_deref(), Some("01/02/2026"));

        let by_number = store.get_by_invoice_number("INV-77").unwrap().unwrap();
        assert_eq!(by_number.id, id);
        assert_eq!(by_number.items, vec!["Cement", "Sand"]);

        let vendors = store.get_by_vendor("sharma").unwrap();
        assert_eq!(vendors.len(), 1);
        assert_eq!(vendors[0].vendor_name.as_deref(), Some("Sharma Traders"));

        assert!(store.get_by_utr("000000000000").unwrap().is_none());
        assert_eq!(store.get_all(1, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_date_range_compares_calendar_dates() {
        let store = FinancialStore::open_in_memory().unwrap();
        let dated = |date: &str, utr: &str| ExtractedData {
            date: Some(date.to_string()),
            ..upi(utr, 100.0)
        };
        store.save_extraction(b"jan", &dated("15/01/2026", "UTR0000000001"), None, None).unwrap();
        store.save_extraction(b"feb", &dated("02/02/2026", "UTR0000000002"), None, None).unwrap();
        store.save_extraction(b"dec", &dated("20/12/2025", "UTR0000000003"), None, None).unwrap();
        store
            .save_extraction(b"none", &invoice("Sharma Traders", "INV-1", 50.0), None, None)
            .unwrap();

        let found = store.get_by_date_range("01/01/2026", "31/01/2026").unwrap();
        let dates: Vec<_> = found.iter().filter_map(|d| d.transaction_date.as_deref()).collect();
        assert_eq!(dates, vec!["15/01/2026"]);

        let found = store.get_by_date_range("01/12/2025", "02/02/2026").unwrap();
        let dates: Vec<_> = found.iter().filter_map(|d| d.transaction_date.as_deref()).collect();
        assert_eq!(dates, vec!["20/12/2025", "15/01/2026", "02/02/2026"]);
    }

    #[test]
    fn test_statistics_and_delete() {
        let store = FinancialStore::open_in_memory().unwrap();
        let id = store
            .save_extraction(b"img-1", &upi("412345678901", 1500.0), None, None)
            .unwrap();
        store
            .save_extraction(b"img-2", &invoice("Sharma Traders", "INV-77", 900.0), None, None)
            .unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.by_type["upi_screenshot"], 1);
        assert_eq!(stats.by_type["invoice"], 1);
        assert_eq!(stats.by_type["handwritten_note"], 0);
        assert_eq!(stats.total_amount, 2400.0);

        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());
        assert_eq!(store.statistics().unwrap().total_documents, 1);
    }
}
