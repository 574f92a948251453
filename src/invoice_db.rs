use crate::invoice::InvoiceRecord;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Result as SqliteResult, params};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Shown in place of a missing `recommended_action`.
pub const ACTION_PLACEHOLDER: &str = "Review pending";

/// Append-only invoice table.
///
/// Holds only the path: every call opens its own connection and drops it
/// before returning, so nothing is shared between files.
#[derive(Debug, Clone)]
pub struct InvoiceStore {
    db_path: PathBuf,
}

/// A row as read back from the table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredInvoice {
    pub id: i64,
    pub invoice_id: Option<String>,
    pub vendor: Option<String>,
    pub amount: f64,
    pub issue_date: Option<String>,
    pub due_date: Option<String>,
    pub items: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub recommended_action: String,
    pub created_at: String,
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_id TEXT,
    vendor TEXT,
    amount REAL,
    issue_date DATE,
    due_date DATE,
    items TEXT,
    location TEXT,
    status TEXT,
    recommended_action TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

impl InvoiceStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Create the database file and invoice table if missing.
    pub fn init(&self) -> SqliteResult<()> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(dir = %parent.display(), error = %e, "Cannot create database directory");
            }
        }
        let conn = Connection::open(&self.db_path)?;
        conn.execute(CREATE_TABLE, [])?;
        info!(db = %self.db_path.display(), "Database initialized successfully");
        Ok(())
    }

    /// True when the file exists and already holds the invoice table.
    pub fn is_initialized(&self) -> bool {
        if !self.db_path.is_file() {
            return false;
        }
        let Ok(conn) =
            Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        else {
            return false;
        };
        conn.query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'invoices'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .is_ok_and(|name| name.is_some())
    }

    /// Append one record, returning its row id.
    pub fn insert(&self, record: &InvoiceRecord) -> SqliteResult<i64> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(CREATE_TABLE, [])?;
        conn.execute(
            "INSERT INTO invoices
                (invoice_id, vendor, amount, issue_date, due_date, items, location, status, recommended_action)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.invoice_id,
                record.vendor,
                record.amount,
                record.issue_date.map(|d| d.to_string()),
                record.due_date.map(|d| d.to_string()),
                record.items_text(),
                record.location,
                record.status().as_str(),
                record.action().as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append one record. Failures are logged, never returned: a lost row
    /// must not stop the batch.
    pub fn save(&self, record: &InvoiceRecord) {
        match self.insert(record) {
            Ok(id) => {
                info!(
                    row = id,
                    invoice_id = record.invoice_id.as_deref().unwrap_or("Unknown ID"),
                    "Saved invoice to database"
                );
            }
            Err(e) => {
                error!(
                    invoice_id = ?record.invoice_id,
                    error = %e,
                    "Database error, invoice not saved"
                );
            }
        }
    }

    /// Every stored row in insertion order.
    pub fn all_records(&self) -> SqliteResult<Vec<StoredInvoice>> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let mut stmt = conn.prepare(
            "SELECT id, invoice_id, vendor, amount, issue_date, due_date, items, location, status,
                    recommended_action, created_at
             FROM invoices
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| Self::row_to_invoice(row))?;
        rows.collect()
    }

    pub fn count(&self) -> SqliteResult<usize> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.query_row("SELECT COUNT(*) FROM invoices", [], |row| row.get(0))
    }

    fn row_to_invoice(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredInvoice> {
        Ok(StoredInvoice {
            id: row.get(0)?,
            invoice_id: row.get(1)?,
            vendor: row.get(2)?,
            amount: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            issue_date: row.get(4)?,
            due_date: row.get(5)?,
            items: row.get(6)?,
            location: row.get(7)?,
            status: row.get(8)?,
            recommended_action: row
                .get::<_, Option<String>>(9)?
                .unwrap_or_else(|| ACTION_PLACEHOLDER.to_string()),
            created_at: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        })
    }
}
