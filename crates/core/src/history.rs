use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed query and the throughput it reached.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub query: String,
    pub model: String,
    pub tps: f64,
    pub timestamp: DateTime<Utc>,
    pub server_url: String,
}

impl HistoryRecord {
    pub fn new<Q, M, U>(query: Q, model: M, tps: f64, server_url: U) -> Self
    where
        Q: Into<String>,
        M: Into<String>,
        U: Into<String>,
    {
        Self {
            query: query.into(),
            model: model.into(),
            tps,
            timestamp: Utc::now(),
            server_url: server_url.into(),
        }
    }
}

/// Destination for finished-turn records. Implementations own their storage
/// and must swallow their own failures.
pub trait HistorySink: Send + Sync {
    fn save_record(&self, record: HistoryRecord);
}

/// Sink that keeps nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardHistory;

impl HistorySink for DiscardHistory {
    fn save_record(&self, _record: HistoryRecord) {}
}
