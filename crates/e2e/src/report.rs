//! Report aggregation
//!
//! Scenarios register a [`ReportEntry`] by name and append steps to it while
//! they run. Entries live in a concurrent map; each entry carries its own
//! lock so unrelated scenarios never contend. At suite end, after every
//! worker has been joined, [`ReportAggregator::flush`] serializes all entries
//! in registration order to a [`ReportSink`], once.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use qarun_common::{FailureKind, Priority, ReportConfig, StepOutcome};

use crate::error::{E2eError, E2eResult};

/// Inline binary attachment, stored base64-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// `sha256:<hex>` of the raw bytes
    pub id: String,
    pub caption: String,
    pub media_type: String,
    pub size: usize,
    pub data: String,
}

impl Artifact {
    pub fn new(bytes: &[u8], caption: &str, media_type: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self {
            id: format!("sha256:{}", hex::encode(hasher.finalize())),
            caption: caption.to_string(),
            media_type: media_type.to_string(),
            size: bytes.len(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn png(bytes: &[u8], caption: &str) -> Self {
        Self::new(bytes, caption, "image/png")
    }

    pub fn decode(&self) -> E2eResult<Vec<u8>> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| E2eError::ReportSink(format!("artifact {}: {}", self.id, e)))
    }
}

/// One recorded step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub text: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Artifact>,
}

impl Step {
    pub fn skipped(text: &str) -> Self {
        Self {
            text: text.to_string(),
            started_at: Utc::now(),
            duration_ms: 0,
            outcome: StepOutcome::Skipped,
            error: None,
            screenshot: None,
        }
    }
}

/// Classified failure summary shown on a failed entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub step: String,
    pub kind: FailureKind,
    pub priority: Priority,
    pub message: String,
}

/// Everything recorded for one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub name: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    pub overall_outcome: StepOutcome,
}

impl ReportEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            registered_at: Utc::now(),
            tags: Vec::new(),
            steps: Vec::new(),
            artifacts: Vec::new(),
            notes: Vec::new(),
            failure: None,
            overall_outcome: StepOutcome::Pass,
        }
    }

    fn derive_outcome(&mut self) {
        self.overall_outcome = if self.failure.is_some()
            || self.steps.iter().any(|s| s.outcome == StepOutcome::Fail)
        {
            StepOutcome::Fail
        } else if !self.steps.is_empty()
            && self.steps.iter().all(|s| s.outcome == StepOutcome::Skipped)
        {
            StepOutcome::Skipped
        } else {
            StepOutcome::Pass
        };
    }
}

/// Shared handle to a registered entry
#[derive(Debug, Clone)]
pub struct EntryHandle {
    seq: u64,
    entry: Arc<Mutex<ReportEntry>>,
}

impl EntryHandle {
    pub fn name(&self) -> String {
        self.entry.lock().name.clone()
    }

    /// Copy of the entry as it stands now
    pub fn snapshot(&self) -> ReportEntry {
        self.entry.lock().clone()
    }

    pub fn same_entry(&self, other: &EntryHandle) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportTotals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The serialized report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDocument {
    pub title: String,
    pub environment: String,
    pub generated_at: DateTime<Utc>,
    pub totals: ReportTotals,
    pub entries: Vec<ReportEntry>,
}

/// Destination of the flushed report
pub trait ReportSink {
    /// Write the document, returning the number of bytes written
    fn write_report(&mut self, report: &ReportDocument) -> E2eResult<u64>;
}

/// Pretty JSON with inline base64 artifacts
pub struct JsonReportSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonReportSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonReportSink<BufWriter<File>> {
    /// Sink writing to `path`, creating parent directories
    pub fn create(path: &Path) -> E2eResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> ReportSink for JsonReportSink<W> {
    fn write_report(&mut self, report: &ReportDocument) -> E2eResult<u64> {
        let bytes = serde_json::to_vec_pretty(report)?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(bytes.len() as u64)
    }
}

/// Concurrent registry of per-scenario report entries
pub struct ReportAggregator {
    title: String,
    environment: String,
    min_bytes: u64,
    entries: DashMap<String, EntryHandle>,
    next_seq: AtomicU64,
    flushed: AtomicBool,
}

impl ReportAggregator {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            title: config.title.clone(),
            environment: config.environment.clone(),
            min_bytes: config.min_bytes,
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
            flushed: AtomicBool::new(false),
        }
    }

    /// Register `name`, or return the existing entry of that name
    pub fn create_entry(&self, name: &str) -> EntryHandle {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Registered report entry '{}'", name);
                EntryHandle {
                    seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                    entry: Arc::new(Mutex::new(ReportEntry::new(name))),
                }
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<EntryHandle> {
        self.entries.get(name).map(|h| h.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append_step(&self, handle: &EntryHandle, step: Step) {
        let mut entry = handle.entry.lock();
        entry.steps.push(step);
        entry.derive_outcome();
    }

    pub fn attach_artifact(&self, handle: &EntryHandle, bytes: &[u8], caption: &str, media_type: &str) {
        handle
            .entry
            .lock()
            .artifacts
            .push(Artifact::new(bytes, caption, media_type));
    }

    pub fn set_tags(&self, handle: &EntryHandle, tags: &[String]) {
        handle.entry.lock().tags = tags.to_vec();
    }

    pub fn add_note(&self, handle: &EntryHandle, note: impl Into<String>) {
        handle.entry.lock().notes.push(note.into());
    }

    pub fn record_failure(&self, handle: &EntryHandle, failure: FailureSummary) {
        let mut entry = handle.entry.lock();
        entry.failure = Some(failure);
        entry.derive_outcome();
    }

    /// JSON rendering of one entry, leaving the aggregator unflushed
    pub fn render_entry(&self, handle: &EntryHandle) -> E2eResult<Vec<u8>> {
        let entry = handle.snapshot();
        Ok(serde_json::to_vec_pretty(&entry)?)
    }

    /// Serialize every entry in registration order; allowed once
    ///
    /// A sink failure leaves the aggregator unflushed so the report can be
    /// written elsewhere.
    pub fn flush(&self, sink: &mut dyn ReportSink) -> E2eResult<u64> {
        if self.flushed.swap(true, Ordering::SeqCst) {
            return Err(E2eError::ReportAlreadyFlushed);
        }

        let mut handles: Vec<EntryHandle> = self.entries.iter().map(|e| e.value().clone()).collect();
        handles.sort_by_key(|h| h.seq);
        let entries: Vec<ReportEntry> = handles.iter().map(EntryHandle::snapshot).collect();

        let mut totals = ReportTotals {
            total: entries.len(),
            ..ReportTotals::default()
        };
        for entry in &entries {
            match entry.overall_outcome {
                StepOutcome::Pass => totals.passed += 1,
                StepOutcome::Fail => totals.failed += 1,
                StepOutcome::Skipped => totals.skipped += 1,
            }
        }

        let document = ReportDocument {
            title: self.title.clone(),
            environment: self.environment.clone(),
            generated_at: Utc::now(),
            totals,
            entries,
        };

        let written = match sink.write_report(&document) {
            Ok(written) => written,
            Err(e) => {
                self.flushed.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        if written < self.min_bytes {
            warn!(
                "Report is only {} bytes (expected at least {}); it may be incomplete",
                written, self.min_bytes
            );
        } else {
            info!(
                "Report flushed: {} entries, {} bytes",
                document.entries.len(),
                written
            );
        }
        Ok(written)
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn aggregator() -> ReportAggregator {
        ReportAggregator::new(&ReportConfig::default())
    }

    fn step(text: &str, outcome: StepOutcome) -> Step {
        Step {
            text: text.to_string(),
            started_at: Utc::now(),
            duration_ms: 5,
            outcome,
            error: None,
            screenshot: None,
        }
    }

    #[test]
    fn test_create_entry_is_idempotent() {
        let agg = aggregator();
        let a = agg.create_entry("Login");
        let b = agg.create_entry("Login");
        assert!(a.same_entry(&b));
        assert_eq!(agg.len(), 1);

        agg.append_step(&a, step("one", StepOutcome::Pass));
        assert_eq!(b.snapshot().steps.len(), 1);
    }

    #[test]
    fn test_step_order_is_preserved() {
        let agg = aggregator();
        let h = agg.create_entry("Ordered");
        for i in 0..20 {
            agg.append_step(&h, step(&format!("step {}", i), StepOutcome::Pass));
        }
        let texts: Vec<_> = h.snapshot().steps.into_iter().map(|s| s.text).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("step {}", i)).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_overall_outcome() {
        let agg = aggregator();
        let h = agg.create_entry("Mixed");
        agg.append_step(&h, step("a", StepOutcome::Pass));
        assert_eq!(h.snapshot().overall_outcome, StepOutcome::Pass);
        agg.append_step(&h, step("b", StepOutcome::Fail));
        agg.append_step(&h, step("c", StepOutcome::Skipped));
        assert_eq!(h.snapshot().overall_outcome, StepOutcome::Fail);

        let p = agg.create_entry("Pending");
        agg.append_step(&p, Step::skipped("later"));
        assert_eq!(p.snapshot().overall_outcome, StepOutcome::Skipped);
    }

    #[test]
    fn test_concurrent_appends() {
        let agg = aggregator();
        thread::scope(|s| {
            for w in 0..4 {
                let agg = &agg;
                s.spawn(move || {
                    let h = agg.create_entry(&format!("scenario-{}", w));
                    for i in 0..50 {
                        agg.append_step(&h, step(&format!("{}", i), StepOutcome::Pass));
                    }
                });
            }
        });
        assert_eq!(agg.len(), 4);
        for w in 0..4 {
            let entry = agg.get(&format!("scenario-{}", w)).unwrap().snapshot();
            assert_eq!(entry.steps.len(), 50);
            assert_eq!(entry.steps[49].text, "49");
        }
    }

    #[test]
    fn test_flush_once_in_registration_order() {
        let agg = aggregator();
        for name in ["zeta", "alpha", "mid"] {
            let h = agg.create_entry(name);
            agg.append_step(&h, step("only", StepOutcome::Pass));
        }

        let mut sink = JsonReportSink::new(Vec::new());
        agg.flush(&mut sink).unwrap();
        let doc: ReportDocument = serde_json::from_slice(&sink.into_inner()).unwrap();
        let names: Vec<_> = doc.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(doc.totals.passed, 3);

        let mut again = JsonReportSink::new(Vec::new());
        assert!(matches!(agg.flush(&mut again), Err(E2eError::ReportAlreadyFlushed)));
    }

    struct BrokenSink;

    impl ReportSink for BrokenSink {
        fn write_report(&mut self, _report: &ReportDocument) -> E2eResult<u64> {
            Err(E2eError::ReportSink("disk full".to_string()))
        }
    }

    #[test]
    fn test_failed_write_can_be_retried() {
        let agg = aggregator();
        let h = agg.create_entry("kept");
        agg.append_step(&h, step("only", StepOutcome::Pass));

        assert!(matches!(agg.flush(&mut BrokenSink), Err(E2eError::ReportSink(_))));
        assert!(!agg.is_flushed());

        let mut sink = JsonReportSink::new(Vec::new());
        agg.flush(&mut sink).unwrap();
        assert!(agg.is_flushed());
        let doc: ReportDocument = serde_json::from_slice(&sink.into_inner()).unwrap();
        assert_eq!(doc.entries[0].name, "kept");
    }

    #[test]
    fn test_small_report_still_written() {
        let agg = ReportAggregator::new(&ReportConfig {
            min_bytes: 1_000_000,
            ..ReportConfig::default()
        });
        agg.create_entry("tiny");
        let mut sink = JsonReportSink::new(Vec::new());
        let written = agg.flush(&mut sink).unwrap();
        assert_eq!(written as usize, sink.into_inner().len());
    }

    #[test]
    fn test_render_entry_does_not_flush() {
        let agg = aggregator();
        let h = agg.create_entry("Snapshot");
        agg.append_step(&h, step("a", StepOutcome::Pass));
        let bytes = agg.render_entry(&h).unwrap();
        let entry: ReportEntry = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(entry.name, "Snapshot");
        assert!(!agg.is_flushed());
    }

    #[test]
    fn test_artifact_encoding() {
        let a = Artifact::png(b"\x89PNG", "shot");
        assert!(a.id.starts_with("sha256:"));
        assert_eq!(a.size, 4);
        assert_eq!(a.decode().unwrap(), b"\x89PNG");
    }
}
