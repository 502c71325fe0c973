use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classify;
use crate::events::Event;
use crate::mapping::ReplacementMap;
use crate::model::{Transaction, TxKind, TxStatus};
use crate::reporter::Reporter;
use crate::resolve::PathResolver;
use crate::scanner::{split_lines, strip_terminator};
use crate::store::LogStore;

/// Failure of a single filesystem operation, classified for retry handling.
#[derive(Debug, Error)]
pub enum OpError {
    /// Surfaced distinctly so callers can escalate privileges or skip.
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },
    /// Momentary condition (lock, interruption); worth retrying.
    #[error("transient failure on {path}: {source}")]
    Transient {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Anything else; retrying will not help.
    #[error("{message}")]
    Terminal { message: String },
}

impl OpError {
    fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => OpError::PermissionDenied {
                path: path.to_path_buf(),
            },
            io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ResourceBusy => OpError::Transient {
                path: path.to_path_buf(),
                source: err,
            },
            _ => OpError::Terminal {
                message: format!("{}: {}", path.display(), err),
            },
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, OpError::Transient { .. })
    }
}

/// Bounded retry with linear backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Conservative: 3 attempts, linear 100ms steps.
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub retry: RetryPolicy,
    /// Stop after processing this many transactions, leaving the rest
    /// untouched. Used by the self-test harness and integration tests to
    /// emulate a mid-run kill deterministically.
    pub stop_after: Option<usize>,
}

/// Final tally of an execution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Non-terminal transactions left behind (only non-zero when stopped early).
    pub remaining: usize,
}

/// Fixed processing order: folder renames deepest-first, then file renames,
/// then content edits. Children are renamed before their parents so every
/// rename targets a still-valid path, and content edits run against fully
/// stabilized paths.
pub fn execution_order(txs: &[Transaction]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..txs.len()).collect();
    order.sort_by(|&a, &b| {
        let (ta, tb) = (&txs[a], &txs[b]);
        let rank = |t: &Transaction| match t.kind {
            TxKind::FolderName => 0,
            TxKind::FileName => 1,
            TxKind::FileContentLine => 2,
        };
        rank(ta)
            .cmp(&rank(tb))
            .then_with(|| {
                if ta.kind == TxKind::FolderName {
                    tb.depth().cmp(&ta.depth())
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .then_with(|| ta.path.cmp(&tb.path))
            .then_with(|| ta.line_number.cmp(&tb.line_number))
    });
    order
}

/// Apply all non-terminal transactions in the store to the tree under `root`.
///
/// Each transaction is marked IN_PROGRESS and persisted before the attempt,
/// then marked terminal and persisted again, so a kill at any point leaves a
/// resumable log. Per-transaction failures never abort the pass.
pub fn execute(
    store: &mut LogStore,
    root: &Path,
    map: &ReplacementMap,
    opts: &ExecOptions,
    reporter: &mut Reporter,
) -> Result<Summary> {
    let root = root
        .canonicalize()
        .with_context(|| format!("execution root vanished: {}", root.display()))?;
    let mut resolver = PathResolver::new(root);
    let order = execution_order(store.transactions());

    // A resumed run replays completed renames (in the same fixed order) so
    // the resolver sees the tree exactly as the previous pass left it.
    for &i in &order {
        let tx = &store.transactions()[i];
        if tx.status == TxStatus::Completed
            && matches!(tx.kind, TxKind::FolderName | TxKind::FileName)
            && let Some(original) = tx.original_name.clone()
        {
            let new_name = map.apply(&original).into_owned();
            if new_name != original {
                let old_rel = resolver.resolve_relative(&tx.path);
                let new_rel = renamed_sibling(&old_rel, &new_name);
                resolver.record_rename(old_rel, new_rel);
            }
        }
    }
    if resolver.journal_len() > 0 {
        debug!(replayed = resolver.journal_len(), "seeded rename journal from completed work");
    }

    let mut summary = Summary::default();
    let mut processed = 0;
    for &i in &order {
        if let Some(limit) = opts.stop_after
            && processed >= limit
        {
            info!(processed, "stopping early as requested");
            break;
        }
        if store.transactions()[i].status.is_terminal() {
            continue;
        }
        processed += 1;
        let tx_id = store.transactions()[i].id;
        // A transaction already IN_PROGRESS was interrupted by a crash and
        // may have been half-applied; the apply step accounts for that.
        let interrupted = store.transactions()[i].status == TxStatus::InProgress;
        reporter.record(Event::TxStarted { tx_id });
        store.transactions_mut()[i].set_status(TxStatus::InProgress);
        store.persist()?;

        let outcome = apply_one(
            &store.transactions()[i],
            &mut resolver,
            map,
            &opts.retry,
            interrupted,
        );
        match outcome {
            Ok(Outcome::Done { final_path }) => {
                store.transactions_mut()[i].set_status(TxStatus::Completed);
                summary.completed += 1;
                reporter.record(Event::TxCompleted { tx_id, final_path });
            }
            Ok(Outcome::NoOp { reason }) => {
                store.transactions_mut()[i].set_status(TxStatus::Skipped);
                summary.skipped += 1;
                reporter.record(Event::TxSkipped { tx_id, reason });
            }
            Err(err) => {
                let permission_denied = matches!(err, OpError::PermissionDenied { .. });
                warn!(tx = %tx_id, error = %err, "transaction failed");
                store.transactions_mut()[i].fail(err.to_string());
                summary.failed += 1;
                reporter.record(Event::TxFailed {
                    tx_id,
                    error: err.to_string(),
                    permission_denied,
                });
            }
        }
        store.persist()?;
    }

    summary.remaining = store
        .transactions()
        .iter()
        .filter(|t| !t.status.is_terminal())
        .count();
    Ok(summary)
}

enum Outcome {
    Done { final_path: PathBuf },
    NoOp { reason: String },
}

fn apply_one(
    tx: &Transaction,
    resolver: &mut PathResolver,
    map: &ReplacementMap,
    retry: &RetryPolicy,
    interrupted: bool,
) -> Result<Outcome, OpError> {
    match tx.kind {
        TxKind::FolderName | TxKind::FileName => {
            apply_rename(tx, resolver, map, retry, interrupted)
        }
        TxKind::FileContentLine => apply_content_edit(tx, resolver, map, retry),
    }
}

fn apply_rename(
    tx: &Transaction,
    resolver: &mut PathResolver,
    map: &ReplacementMap,
    retry: &RetryPolicy,
    interrupted: bool,
) -> Result<Outcome, OpError> {
    let original = tx.original_name.as_deref().ok_or_else(|| OpError::Terminal {
        message: format!("transaction {} has no original_name", tx.id),
    })?;
    let new_name = map.apply(original).into_owned();
    if new_name == original {
        return Ok(Outcome::NoOp {
            reason: "replacement equals original name".into(),
        });
    }
    let old_rel = resolver.resolve_relative(&tx.path);
    let new_rel = renamed_sibling(&old_rel, &new_name);
    let old_abs = resolver.root().join(&old_rel);
    let new_abs = resolver.root().join(&new_rel);
    let src_present = old_abs.exists() || old_abs.is_symlink();
    let dst_present = new_abs.exists() || new_abs.is_symlink();
    if !src_present {
        // A transaction interrupted mid-apply may have renamed the entry
        // before the crash; treat that as already done, not as a failure.
        if dst_present && interrupted {
            resolver.record_rename(old_rel, new_rel);
            return Ok(Outcome::Done { final_path: new_abs });
        }
        return Err(OpError::Terminal {
            message: format!("rename source missing: {}", old_abs.display()),
        });
    }
    if dst_present {
        return Err(OpError::Terminal {
            message: format!("rename destination already exists: {}", new_abs.display()),
        });
    }
    with_retry(retry, &old_abs, || fs::rename(&old_abs, &new_abs))?;
    resolver.record_rename(old_rel, new_rel);
    Ok(Outcome::Done { final_path: new_abs })
}

fn apply_content_edit(
    tx: &Transaction,
    resolver: &mut PathResolver,
    map: &ReplacementMap,
    retry: &RetryPolicy,
) -> Result<Outcome, OpError> {
    let abs = resolver.resolve(&tx.path);
    let bytes = with_retry(retry, &abs, || fs::read(&abs))?;
    let lines = split_lines(&bytes);
    let idx = tx.line_number.checked_sub(1).ok_or_else(|| OpError::Terminal {
        message: format!("transaction {} has line_number 0", tx.id),
    })? as usize;
    let line = *lines.get(idx).ok_or_else(|| OpError::Terminal {
        message: format!(
            "line {} out of range in {} ({} lines)",
            tx.line_number,
            abs.display(),
            lines.len()
        ),
    })?;
    let body = strip_terminator(line);
    let terminator = &line[body.len()..];

    if let Some(recorded) = &tx.original_line_content {
        let expected = classify::unescape_bytes(recorded);
        if expected != body {
            warn!(
                path = %abs.display(),
                line = tx.line_number,
                "line drifted since scan; applying replacement to current content"
            );
        }
    }

    let replaced = map.apply_bytes(body);
    if replaced.as_ref() == body {
        return Ok(Outcome::NoOp {
            reason: "replacement equals original line".into(),
        });
    }

    // Offset of the line within the file; everything outside it is copied
    // back byte-for-byte.
    let start = line.as_ptr() as usize - bytes.as_ptr() as usize;
    let end = start + line.len();
    let mut rewritten = Vec::with_capacity(bytes.len() + replaced.len());
    rewritten.extend_from_slice(&bytes[..start]);
    rewritten.extend_from_slice(&replaced);
    rewritten.extend_from_slice(terminator);
    rewritten.extend_from_slice(&bytes[end..]);

    with_retry(retry, &abs, || write_atomic(&abs, &rewritten))?;
    Ok(Outcome::Done { final_path: abs })
}

/// Replace a file's contents via temp-file + rename, keeping its permissions.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let permissions = fs::metadata(path)?.permissions();
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    io::Write::write_all(&mut tmp, contents)?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn renamed_sibling(rel: &Path, new_name: &str) -> PathBuf {
    match rel.parent() {
        Some(parent) if parent != Path::new("") => parent.join(new_name),
        _ => PathBuf::from(new_name),
    }
}

fn with_retry<T>(
    retry: &RetryPolicy,
    path: &Path,
    mut op: impl FnMut() -> io::Result<T>,
) -> Result<T, OpError> {
    let attempts = retry.max_attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let classified = OpError::from_io(path, err);
                if !classified.is_transient() || attempt == attempts {
                    return Err(classified);
                }
                let delay = retry.backoff * attempt;
                debug!(path = %path.display(), attempt, ?delay, "transient failure, backing off");
                std::thread::sleep(delay);
                last = Some(classified);
            }
        }
    }
    // Loop always returns; keep the compiler satisfied.
    Err(last.unwrap_or(OpError::Terminal {
        message: format!("retry loop exhausted for {}", path.display()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn name_tx(kind: TxKind, path: &str, name: &str) -> Transaction {
        Transaction::name_change(kind, PathBuf::from(path), name.into())
    }

    /// Persist a log holding one rename transaction frozen at IN_PROGRESS,
    /// as a crash between the pre-attempt persist and the terminal persist
    /// would leave it.
    fn store_with_interrupted_rename(root: &Path) -> LogStore {
        let mut tx = name_tx(TxKind::FileName, "flojoy.txt", "flojoy.txt");
        tx.set_status(TxStatus::InProgress);
        let mut store = LogStore::create(root);
        store.push(tx);
        store.persist().unwrap();
        store
    }

    #[test]
    fn order_is_folders_deepest_first_then_files_then_content() {
        let txs = vec![
            Transaction::content_line(
                PathBuf::from("a/file.txt"),
                3,
                "flojoy".into(),
                "atlasvibe".into(),
                "utf-8".into(),
            ),
            name_tx(TxKind::FileName, "a/flojoy.txt", "flojoy.txt"),
            name_tx(TxKind::FolderName, "a/flojoy_dir", "flojoy_dir"),
            name_tx(TxKind::FolderName, "a/flojoy_dir/nested_flojoy", "nested_flojoy"),
        ];
        let order = execution_order(&txs);
        let kinds: Vec<(TxKind, &PathBuf)> =
            order.iter().map(|&i| (txs[i].kind, &txs[i].path)).collect();
        assert_eq!(kinds[0].0, TxKind::FolderName);
        assert_eq!(kinds[0].1, &PathBuf::from("a/flojoy_dir/nested_flojoy"));
        assert_eq!(kinds[1].1, &PathBuf::from("a/flojoy_dir"));
        assert_eq!(kinds[2].0, TxKind::FileName);
        assert_eq!(kinds[3].0, TxKind::FileContentLine);
    }

    #[test]
    fn resume_recovers_in_progress_rename_already_applied() {
        let dir = tempfile::tempdir().unwrap();
        // The crash happened after the rename landed: only the destination
        // exists on disk.
        fs::write(dir.path().join("atlasvibe.txt"), "payload\n").unwrap();
        let mut store = store_with_interrupted_rename(dir.path());

        let map = ReplacementMap::standard();
        let mut reporter = Reporter::new(false);
        let summary =
            execute(&mut store, dir.path(), &map, &ExecOptions::default(), &mut reporter)
                .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.transactions()[0].status, TxStatus::Completed);
        // Exactly one terminal outcome, no duplicate file, content intact.
        assert!(!dir.path().join("flojoy.txt").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("atlasvibe.txt")).unwrap(),
            "payload\n"
        );
    }

    #[test]
    fn resume_applies_in_progress_rename_not_yet_started() {
        let dir = tempfile::tempdir().unwrap();
        // The crash happened before the rename: only the source exists.
        fs::write(dir.path().join("flojoy.txt"), "payload\n").unwrap();
        let mut store = store_with_interrupted_rename(dir.path());

        let map = ReplacementMap::standard();
        let mut reporter = Reporter::new(false);
        let summary =
            execute(&mut store, dir.path(), &map, &ExecOptions::default(), &mut reporter)
                .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.transactions()[0].status, TxStatus::Completed);
        assert!(!dir.path().join("flojoy.txt").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("atlasvibe.txt")).unwrap(),
            "payload\n"
        );
    }

    #[test]
    fn permission_errors_are_not_transient() {
        let err = OpError::from_io(
            Path::new("/x"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, OpError::PermissionDenied { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result: Result<(), OpError> = with_retry(&retry, Path::new("/x"), || {
            calls += 1;
            Err(io::Error::new(io::ErrorKind::WouldBlock, "busy"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_succeeds_after_transient_failures() {
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result = with_retry(&retry, Path::new("/x"), || {
            calls += 1;
            if calls < 3 {
                Err(io::Error::new(io::ErrorKind::Interrupted, "try again"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }
}
