//! Execution log recording
//!
//! Every execution cycle ends in exactly one [`ExecutionLog`] handed to the
//! configured sink. The shipped sink keeps a bounded ring of recent logs in
//! memory for the REST layer and mirrors each record onto the tracing
//! output.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::ExecutionLog;

/// Default number of logs the in-memory sink retains
const DEFAULT_RETAINED_LOGS: usize = 256;

/// Receives the structured log of every execution cycle.
#[async_trait]
pub trait ExecutionLogSink: Send + Sync {
    async fn record(&self, log: ExecutionLog);
}

/// Bounded in-memory log sink
///
/// When the ring is full, oldest logs are evicted.
pub struct MemoryLogSink {
    retained: usize,
    logs: RwLock<VecDeque<ExecutionLog>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RETAINED_LOGS)
    }

    pub fn with_capacity(retained: usize) -> Self {
        Self {
            retained,
            logs: RwLock::new(VecDeque::with_capacity(retained.min(DEFAULT_RETAINED_LOGS))),
        }
    }

    /// Up to `limit` most recent logs, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<ExecutionLog> {
        let logs = self.logs.read().await;
        logs.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionLogSink for MemoryLogSink {
    async fn record(&self, log: ExecutionLog) {
        if log.success {
            info!(
                instance = %log.instance_name,
                measure = %log.measure_name,
                duration_ms = log.duration_ms,
                measurements = log.measurements.len(),
                "measure executed"
            );
        } else {
            warn!(
                instance = %log.instance_name,
                measure = %log.measure_name,
                error = log.error.as_deref().unwrap_or("unknown"),
                "measure execution failed"
            );
        }

        let mut logs = self.logs.write().await;
        if logs.len() >= self.retained {
            logs.pop_front();
        }
        logs.push_back(log);
    }
}
