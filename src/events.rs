use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structured event emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ScanCompleted {
        root: PathBuf,
        transactions: usize,
        appended: usize,
    },
    TxPlanned {
        tx_id: uuid::Uuid,
        kind: String,
        path: PathBuf,
        line_number: u64,
    },
    TxStarted {
        tx_id: uuid::Uuid,
    },
    TxCompleted {
        tx_id: uuid::Uuid,
        final_path: PathBuf,
    },
    TxSkipped {
        tx_id: uuid::Uuid,
        reason: String,
    },
    TxFailed {
        tx_id: uuid::Uuid,
        error: String,
        permission_denied: bool,
    },
    RunSummary {
        completed: usize,
        failed: usize,
        skipped: usize,
        remaining: usize,
        log_path: PathBuf,
    },
}
