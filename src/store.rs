use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::model::Transaction;

/// File name of the persisted transaction log, placed at the scan root.
pub const LOG_FILE_NAME: &str = "planned_transactions.json";

/// Second-scan output used only for determinism verification.
pub const VALIDATION_FILE_NAME: &str = "planned_transactions_validation.json";

/// Previous-version snapshot kept next to the log by `persist`.
pub const LOG_BACKUP_FILE_NAME: &str = "planned_transactions.json.bak";

/// Staging file written before the atomic rename into place.
pub const LOG_TEMP_FILE_NAME: &str = "planned_transactions.json.tmp";

/// Durable JSON store for the transaction list.
///
/// Every mutation is persisted immediately via write-to-temp + atomic
/// rename-into-place, with the previous version kept as `.bak` so a process
/// kill mid-write can always fall back to the last consistent snapshot.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    transactions: Vec<Transaction>,
}

impl LogStore {
    /// Start an empty log that will persist to `root/planned_transactions.json`.
    pub fn create(root: &Path) -> Self {
        Self {
            path: root.join(LOG_FILE_NAME),
            transactions: Vec::new(),
        }
    }

    /// Load an existing log, falling back to the `.bak` snapshot when the
    /// primary file is missing (e.g. killed between backup and replace).
    ///
    /// A log that exists but cannot be parsed is a log-integrity error and is
    /// reported as fatal rather than silently rebuilt.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(LOG_FILE_NAME);
        let backup = backup_path(&path);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && backup.exists() => {
                warn!(path = %path.display(), "log missing, recovering from backup snapshot");
                fs::read(&backup).context("failed to read log backup")?
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let transactions: Vec<Transaction> = serde_json::from_slice(&data).with_context(|| {
            format!(
                "transaction log at {} is corrupted; refusing to continue (restore {} or re-scan without --resume)",
                path.display(),
                backup.display()
            )
        })?;
        let mut seen = HashSet::new();
        for tx in &transactions {
            if !seen.insert(tx.id) {
                bail!("transaction log contains duplicate id {}", tx.id);
            }
        }
        debug!(count = transactions.len(), "loaded transaction log");
        Ok(Self { path, transactions })
    }

    /// True if a log file (or its backup) exists under `root`.
    pub fn exists(root: &Path) -> bool {
        let path = root.join(LOG_FILE_NAME);
        path.exists() || backup_path(&path).exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn transactions_mut(&mut self) -> &mut [Transaction] {
        &mut self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Append a freshly scanned transaction.
    pub fn push(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    /// Merge a re-scan into the existing log.
    ///
    /// Transactions are matched by stable identity (kind, path, line number,
    /// original content/name). An identity with outstanding work (PENDING,
    /// IN_PROGRESS) or a standing no-op (SKIPPED) keeps its entry and id; a
    /// re-found match whose previous entry already ran to COMPLETED or FAILED
    /// is new work (the file was recreated, or a failed edit is being
    /// retried) and gets a fresh PENDING entry. Returns the number appended.
    pub fn merge_scan(&mut self, scanned: Vec<Transaction>) -> usize {
        let known: HashSet<_> = self
            .transactions
            .iter()
            .filter(|tx| {
                !tx.status.is_terminal() || tx.status == crate::model::TxStatus::Skipped
            })
            .map(|tx| owned_identity(tx))
            .collect();
        let mut appended = 0;
        for tx in scanned {
            if known.contains(&owned_identity(&tx)) {
                continue;
            }
            self.transactions.push(tx);
            appended += 1;
        }
        appended
    }

    /// Persist the full transaction list.
    ///
    /// Write-to-temp + fsync + backup-current + atomic rename. At every
    /// instant either the new log, the old log, or the `.bak` snapshot is a
    /// complete, parseable document.
    pub fn persist(&self) -> Result<()> {
        let tmp = self.path.with_file_name(LOG_TEMP_FILE_NAME);
        let json = serde_json::to_vec_pretty(&self.transactions)
            .context("failed to serialize transaction log")?;
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        if self.path.exists() {
            fs::rename(&self.path, backup_path(&self.path))
                .context("failed to back up previous transaction log")?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move log into place at {}", self.path.display()))?;
        Ok(())
    }

    /// Write a transaction list to an arbitrary path (determinism validation).
    pub fn write_snapshot(path: &Path, transactions: &[Transaction]) -> Result<()> {
        let json = serde_json::to_vec_pretty(transactions)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

fn backup_path(log: &Path) -> PathBuf {
    log.with_file_name(LOG_BACKUP_FILE_NAME)
}

fn owned_identity(tx: &Transaction) -> (crate::model::TxKind, PathBuf, u64, Option<String>, Option<String>) {
    let (kind, path, line, name, content) = tx.identity();
    (kind, path.clone(), line, name.cloned(), content.cloned())
}
