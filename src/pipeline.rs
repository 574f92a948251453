// src/pipeline.rs

use crate::error::PipelineError;
use crate::invoice::InvoiceRecord;
use crate::invoice_db::InvoiceStore;
use crate::llm_extract::InvoiceExtractor;
use crate::pdf_extract::TextSource;
use crate::rules;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Instrument, error, info, info_span, warn};

/// What happened to one input file.
#[derive(Debug)]
enum FileOutcome {
    Recorded(InvoiceRecord),
    Skipped,
    Failed,
}

/// Totals for one batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub discovered: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub records: Vec<InvoiceRecord>,
}

/// Sequential PDF → text → model → rules → store batch.
pub struct Pipeline<'a> {
    text_source: &'a dyn TextSource,
    extractor: &'a dyn InvoiceExtractor,
    store: &'a InvoiceStore,
    /// Pause after every file; throttles calls to the model API.
    file_delay: Duration,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        text_source: &'a dyn TextSource,
        extractor: &'a dyn InvoiceExtractor,
        store: &'a InvoiceStore,
        file_delay: Duration,
    ) -> Self {
        Self {
            text_source,
            extractor,
            store,
            file_delay,
        }
    }

    /// Process every PDF in `dir`. Only a missing directory or an
    /// uninitialized store is fatal; per-file failures are logged and the
    /// batch moves on.
    pub async fn run(&self, dir: &Path) -> Result<BatchSummary, PipelineError> {
        if !dir.is_dir() {
            return Err(PipelineError::MissingInputDir(dir.to_path_buf()));
        }
        if !self.store.is_initialized() {
            return Err(PipelineError::StoreNotInitialized(
                self.store.path().to_path_buf(),
            ));
        }

        let files = discover_pdfs(dir)?;
        info!(count = files.len(), dir = %dir.display(), "Found PDFs");

        let mut summary = BatchSummary {
            discovered: files.len(),
            ..Default::default()
        };

        for (idx, path) in files.iter().enumerate() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let span = info_span!("invoice", file = %name, idx = idx + 1, total = files.len());

            match self.process_file(path).instrument(span).await {
                FileOutcome::Recorded(record) => {
                    println!(
                        "  [ok]   {name}: {} | {} | {}",
                        record.vendor.as_deref().unwrap_or("Unknown vendor"),
                        record.status(),
                        record.action()
                    );
                    summary.processed += 1;
                    summary.records.push(record);
                }
                FileOutcome::Skipped => {
                    println!("  [skip] {name}: no extractable text");
                    summary.skipped += 1;
                }
                FileOutcome::Failed => {
                    println!("  [fail] {name}: extraction failed (see log)");
                    summary.failed += 1;
                }
            }

            tokio::time::sleep(self.file_delay).await;
        }

        info!(
            discovered = summary.discovered,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Batch complete"
        );
        Ok(summary)
    }

    async fn process_file(&self, path: &Path) -> FileOutcome {
        info!("Processing");
        let text = self.text_source.extract_text(path);
        if text.trim().is_empty() {
            warn!("No extractable text, skipping");
            return FileOutcome::Skipped;
        }
        info!(chars = text.chars().count(), "Text extracted");

        let fields = match self.extractor.extract(&text).await {
            Ok(fields) => fields,
            Err(e) => {
                error!(error = %e, "Extraction failed, dropping file");
                return FileOutcome::Failed;
            }
        };

        let classification = rules::evaluate(&fields);
        let record = InvoiceRecord::new(fields, classification);
        self.store.save(&record);
        FileOutcome::Recorded(record)
    }
}

/// `*.pdf` files directly inside `dir` (no recursion), sorted by name.
pub fn discover_pdfs(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Serialize)]
struct CsvRow<'r> {
    invoice_id: Option<&'r str>,
    vendor: Option<&'r str>,
    amount: f64,
    issue_date: Option<String>,
    due_date: Option<String>,
    items: String,
    location: Option<&'r str>,
    status: &'static str,
    recommended_action: &'static str,
}

impl<'r> From<&'r InvoiceRecord> for CsvRow<'r> {
    fn from(r: &'r InvoiceRecord) -> Self {
        Self {
            invoice_id: r.invoice_id.as_deref(),
            vendor: r.vendor.as_deref(),
            amount: r.amount,
            issue_date: r.issue_date.map(|d| d.to_string()),
            due_date: r.due_date.map(|d| d.to_string()),
            items: r.items_text(),
            location: r.location.as_deref(),
            status: r.status().as_str(),
            recommended_action: r.action().as_str(),
        }
    }
}

const CSV_HEADER: [&str; 9] = [
    "invoice_id",
    "vendor",
    "amount",
    "issue_date",
    "due_date",
    "items",
    "location",
    "status",
    "recommended_action",
];

/// Overwrite `path` with this run's records. Secondary copy only; the
/// database is authoritative.
pub fn export_csv(path: &Path, records: &[InvoiceRecord]) -> Result<(), csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record(CSV_HEADER)?;
    for record in records {
        wtr.serialize(CsvRow::from(record))?;
    }
    wtr.flush()?;
    info!(path = %path.display(), rows = records.len(), "CSV export written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use crate::invoice::{ExtractedFields, RecommendedAction, Status};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// In-memory log sink for asserting on emitted events.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Treats every file as plain text.
    struct PlainText;

    impl TextSource for PlainText {
        fn extract_text(&self, path: &Path) -> String {
            std::fs::read_to_string(path).unwrap_or_default()
        }
    }

    /// Fixed answers keyed by the document text; unknown text fails like
    /// an exhausted model call.
    #[derive(Default)]
    struct Canned {
        answers: HashMap<String, ExtractedFields>,
        seen: Mutex<Vec<String>>,
    }

    impl Canned {
        fn with(mut self, text: &str, status: &str, amount: f64) -> Self {
            self.answers.insert(
                text.to_string(),
                ExtractedFields {
                    invoice_id: Some(text.to_string()),
                    vendor: Some("Acme".to_string()),
                    amount: Some(Value::from(amount)),
                    payment_status: Some(status.to_string()),
                    ..Default::default()
                },
            );
            self
        }
    }

    #[async_trait]
    impl InvoiceExtractor for Canned {
        async fn extract(&self, text: &str) -> Result<ExtractedFields, ExtractError> {
            self.seen.lock().unwrap().push(text.to_string());
            self.answers
                .get(text)
                .cloned()
                .ok_or_else(|| ExtractError::ExhaustedRetries {
                    attempts: 3,
                    source: Box::new(ExtractError::MalformedResponse("garbage".to_string())),
                })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        data: PathBuf,
        store: InvoiceStore,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        for (name, body) in files {
            std::fs::write(data.join(name), body).unwrap();
        }
        let store = InvoiceStore::new(dir.path().join("invoices.db"));
        store.init().unwrap();
        Fixture {
            _dir: dir,
            data,
            store,
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let fx = fixture(&[("a.pdf", "alpha"), ("b.pdf", "broken"), ("c.pdf", "gamma")]);
        let extractor = Canned::default()
            .with("alpha", "Paid", 450.0)
            .with("gamma", "Unpaid", 9500.0);
        let pipeline = Pipeline::new(&PlainText, &extractor, &fx.store, Duration::ZERO);

        let summary = pipeline.run(&fx.data).await.unwrap();

        assert_eq!(summary.discovered, 3);
        assert_eq!(summary.records.len(), 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(fx.store.count().unwrap(), 2);
        assert_eq!(*extractor.seen.lock().unwrap(), ["alpha", "broken", "gamma"]);

        let first = &summary.records[0];
        assert_eq!(first.status(), Status::Paid);
        assert_eq!(first.action(), RecommendedAction::Archive);
        let last = &summary.records[1];
        assert_eq!(last.status(), Status::Pending);
        assert_eq!(last.action(), RecommendedAction::ManagerApproval);
    }

    #[tokio::test]
    async fn test_failed_file_is_logged() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let fx = fixture(&[("a.pdf", "alpha"), ("b.pdf", "broken")]);
        let extractor = Canned::default().with("alpha", "Paid", 450.0);
        let pipeline = Pipeline::new(&PlainText, &extractor, &fx.store, Duration::ZERO);

        let summary = pipeline.run(&fx.data).await.unwrap();
        assert_eq!(summary.failed, 1);

        let output = logs.contents();
        let line = output
            .lines()
            .find(|l| l.contains("Extraction failed, dropping file"))
            .expect("failure was not logged");
        assert!(line.contains("ERROR"));
        assert!(line.contains("file=b.pdf"));
        assert!(line.contains("extraction failed after 3 attempts"));
    }

    #[tokio::test]
    async fn test_empty_text_is_skipped() {
        let fx = fixture(&[("blank.pdf", "  \n "), ("ok.pdf", "ok")]);
        let extractor = Canned::default().with("ok", "Unpaid", 10.0);
        let pipeline = Pipeline::new(&PlainText, &extractor, &fx.store, Duration::ZERO);

        let summary = pipeline.run(&fx.data).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 1);
        // the model is never asked about a blank document
        assert_eq!(*extractor.seen.lock().unwrap(), ["ok"]);
    }

    #[tokio::test]
    async fn test_only_top_level_pdfs() {
        let fx = fixture(&[("x.PDF", "x"), ("notes.txt", "x"), ("y.pdf", "x")]);
        std::fs::create_dir(fx.data.join("sub.pdf")).unwrap();
        std::fs::write(fx.data.join("sub.pdf").join("z.pdf"), "x").unwrap();

        let found = discover_pdfs(&fx.data).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["x.PDF", "y.pdf"]);
    }

    #[tokio::test]
    async fn test_missing_dir_is_fatal() {
        let fx = fixture(&[]);
        let extractor = Canned::default();
        let pipeline = Pipeline::new(&PlainText, &extractor, &fx.store, Duration::ZERO);
        let err = pipeline.run(&fx.data.join("nope")).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingInputDir(_)));
    }

    #[tokio::test]
    async fn test_uninitialized_store_is_fatal() {
        let fx = fixture(&[("a.pdf", "alpha")]);
        let extractor = Canned::default().with("alpha", "Paid", 1.0);
        let store = InvoiceStore::new(fx.data.join("missing.db"));
        let pipeline = Pipeline::new(&PlainText, &extractor, &store, Duration::ZERO);
        let err = pipeline.run(&fx.data).await.unwrap_err();
        assert!(matches!(err, PipelineError::StoreNotInitialized(_)));
        assert!(extractor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_csv_export_overwrites() {
        let fx = fixture(&[("a.pdf", "alpha"), ("b.pdf", "beta")]);
        let extractor = Canned::default()
            .with("alpha", "Paid", 450.0)
            .with("beta", "Unpaid", 12.0);
        let pipeline = Pipeline::new(&PlainText, &extractor, &fx.store, Duration::ZERO);
        let summary = pipeline.run(&fx.data).await.unwrap();

        let csv_path = fx.data.join("out.csv");
        std::fs::write(&csv_path, "stale\n").unwrap();
        export_csv(&csv_path, &summary.records).unwrap();

        let written = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("invoice_id,vendor,amount"));
        assert!(lines[1].starts_with("alpha,Acme,450"));
        assert!(lines[1].ends_with("Paid,Archive"));
        assert!(!written.contains("stale"));
    }

    #[test]
    fn test_csv_export_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        export_csv(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
