use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use directories::BaseDirs;
use tracing::{debug, error};
use wire_core::history::{HistoryRecord, HistorySink};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Throughput history kept as one JSON array on disk, oldest first.
#[derive(Clone, Debug)]
pub struct JsonHistoryStore {
    path: PathBuf,
    limit: usize,
}

impl JsonHistoryStore {
    pub fn new(path: PathBuf, limit: usize) -> Self {
        Self {
            path,
            limit: limit.max(1),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.data_dir().join("llamawire").join("tps_history.json"))
    }

    pub fn open_default(limit: usize) -> Option<Self> {
        Self::default_path().map(|p| Self::new(p, limit))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<HistoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read(&self.path)
            .with_context(|| format!("read history file: {}", self.path.display()))?;
        let records: Vec<HistoryRecord> =
            serde_json::from_slice(&data).with_context(|| "parse history json")?;
        Ok(records)
    }

    /// Like [`load`](Self::load), but an unreadable file counts as empty.
    pub fn get_history(&self) -> Vec<HistoryRecord> {
        self.load().unwrap_or_else(|e| {
            error!(target: "cli", "reading history: {:#}", e);
            Vec::new()
        })
    }

    pub fn append(&self, record: HistoryRecord) -> Result<()> {
        let mut history = self.get_history();
        history.push(record);
        if history.len() > self.limit {
            let excess = history.len() - self.limit;
            history.drain(..excess);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let data = serde_json::to_vec_pretty(&history)?;
        let mut tmp = self.path.clone();
        tmp.set_extension("json.tmp");
        {
            let mut f =
                fs::File::create(&tmp).with_context(|| format!("create tmp: {}", tmp.display()))?;
            f.write_all(&data)?;
            f.flush()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("persist history to {}", self.path.display()))?;
        debug!(target: "cli", "history saved records={}", history.len());
        Ok(())
    }
}

impl HistorySink for JsonHistoryStore {
    fn save_record(&self, record: HistoryRecord) {
        if let Err(e) = self.append(record) {
            error!(target: "cli", "saving history: {:#}", e);
        }
    }
}
