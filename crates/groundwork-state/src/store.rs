use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::error::StateError;
use crate::record::ExecutionRecord;
use crate::snapshot::{StateSnapshot, SNAPSHOT_VERSION};

/// File-backed state store: per document, an append-only log of execution
/// records (`<name>.log.json`, one JSON record per line) plus the
/// materialized snapshot (`<name>.json`).
///
/// Writes are serialized behind a mutex; loads read whatever was last
/// flushed. `record()` persists both files before returning, so callers can
/// release dependents only after partial progress is durable.
pub struct StateStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        StateStore {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, document: &str) -> PathBuf {
        self.dir.join(format!("{document}.json"))
    }

    fn log_path(&self, document: &str) -> PathBuf {
        self.dir.join(format!("{document}.log.json"))
    }

    /// Load the latest snapshot, or a fresh one if none was ever flushed.
    pub async fn load(&self, document: &str) -> Result<StateSnapshot, StateError> {
        let path = self.snapshot_path(document);
        if !path.exists() {
            tracing::debug!(document = %document, "no existing state, starting fresh");
            return Ok(StateSnapshot::fresh(document));
        }

        let json = std::fs::read(&path)?;
        let snapshot: StateSnapshot = serde_json::from_slice(&json)?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StateError::UnsupportedVersion {
                document: document.to_string(),
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        if snapshot.document != document {
            return Err(StateError::DocumentMismatch {
                expected: document.to_string(),
                found: snapshot.document,
            });
        }

        tracing::debug!(
            document = %document,
            resources = snapshot.resources.len(),
            "state loaded"
        );
        Ok(snapshot)
    }

    /// Append one execution record and flush the snapshot, atomically
    /// enough to survive a crash between applies (tmp + rename).
    pub async fn record(
        &self,
        snapshot: &StateSnapshot,
        record: &ExecutionRecord,
    ) -> Result<(), StateError> {
        let _guard = self.write_lock.lock().await;
        self.append_record(&snapshot.document, record)?;
        self.write_snapshot(snapshot)?;
        tracing::debug!(
            document = %snapshot.document,
            resource = %record.resource_id,
            action = %record.action,
            "state recorded"
        );
        Ok(())
    }

    /// Flush the snapshot without logging a record (plan metadata updates).
    pub async fn flush(&self, snapshot: &StateSnapshot) -> Result<(), StateError> {
        let _guard = self.write_lock.lock().await;
        self.write_snapshot(snapshot)
    }

    /// Read the full execution history for a document, oldest first.
    pub async fn history(&self, document: &str) -> Result<Vec<ExecutionRecord>, StateError> {
        let path = self.log_path(document);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)?;
        let mut records = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    fn append_record(&self, document: &str, record: &ExecutionRecord) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(document))?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn write_snapshot(&self, snapshot: &StateSnapshot) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(snapshot)?;
        let path = self.snapshot_path(&snapshot.document);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}
