use anyhow::{Context, Result, bail};
use path_absolutize::Absolutize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::{ExecuteArgs, RunArgs, ScanArgs};
use crate::events::Event;
use crate::executor::{self, ExecOptions, RetryPolicy, Summary};
use crate::exit_codes::exit;
use crate::mapping::ReplacementMap;
use crate::reporter::Reporter;
use crate::scanner::{self, ScanOptions};
use crate::store::{LogStore, VALIDATION_FILE_NAME};

/// Scan phase: build or extend the transaction log. Read-only on the tree.
pub fn scan(args: ScanArgs) -> Result<i32> {
    let mut reporter = Reporter::new(args.json);
    let root = absolute_root(&args.root)?;
    let map = ReplacementMap::standard();
    let store = scan_into_store(&root, &map, &args, &mut reporter)?;
    if !args.json {
        println!(
            "planned {} transaction(s), log at {}",
            store.len(),
            store.path().display()
        );
    }
    Ok(exit::SUCCESS)
}

/// Execute phase: apply the existing log without re-scanning.
pub fn execute(args: ExecuteArgs) -> Result<i32> {
    let mut reporter = Reporter::new(args.json);
    let root = absolute_root(&args.root)?;
    let mut store = LogStore::load(&root)?;
    let map = ReplacementMap::standard();
    execute_store(&mut store, &root, &map, &args, &mut reporter)
}

/// Full pipeline: scan, then execute the freshly built log.
pub fn run(args: RunArgs) -> Result<i32> {
    let mut reporter = Reporter::new(args.json);
    let root = absolute_root(&args.root)?;
    let map = ReplacementMap::standard();
    let mut store = scan_into_store(&root, &map, &args.scan_args(), &mut reporter)?;
    execute_store(&mut store, &root, &map, &args.execute_args(), &mut reporter)
}

fn scan_into_store(
    root: &Path,
    map: &ReplacementMap,
    args: &ScanArgs,
    reporter: &mut Reporter,
) -> Result<LogStore> {
    let opts = ScanOptions {
        exclude: args.exclude.clone(),
        ignore_symlinks: args.ignore_symlinks,
    };
    let scanned = scanner::scan(root, map, &opts)?;
    let total_scanned = scanned.len();

    let (store, appended) = if args.resume && LogStore::exists(root) {
        let mut store = LogStore::load(root).context("cannot resume scan")?;
        let appended = store.merge_scan(scanned);
        info!(appended, "scan resume merged into existing log");
        (store, appended)
    } else {
        let mut store = LogStore::create(root);
        for tx in scanned {
            store.push(tx);
        }
        (store, total_scanned)
    };
    store.persist()?;

    if args.validate {
        let second = scanner::scan(root, map, &opts)?;
        let path = root.join(VALIDATION_FILE_NAME);
        LogStore::write_snapshot(&path, &second)?;
        let first: Vec<_> = store.transactions().iter().map(|t| t.identity()).collect();
        let missing = second
            .iter()
            .filter(|t| !first.contains(&t.identity()))
            .count();
        // A resumed log may legitimately hold entries for since-deleted
        // matches, so only the non-resume case requires equal counts.
        let count_mismatch = !args.resume && first.len() != second.len();
        if missing > 0 || count_mismatch {
            bail!(
                "determinism check failed: scans disagree ({} vs {} transactions, see {})",
                first.len(),
                second.len(),
                path.display()
            );
        }
        info!("determinism check passed");
    }

    reporter.record(Event::ScanCompleted {
        root: root.to_path_buf(),
        transactions: store.len(),
        appended,
    });
    Ok(store)
}

fn execute_store(
    store: &mut LogStore,
    root: &Path,
    map: &ReplacementMap,
    args: &ExecuteArgs,
    reporter: &mut Reporter,
) -> Result<i32> {
    let pending: Vec<usize> = store
        .transactions()
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.status.is_terminal())
        .map(|(i, _)| i)
        .collect();

    if args.dry_run {
        for &i in &pending {
            let tx = &store.transactions()[i];
            reporter.record(Event::TxPlanned {
                tx_id: tx.id,
                kind: format!("{:?}", tx.kind),
                path: tx.path.clone(),
                line_number: tx.line_number,
            });
        }
        let summary = Summary {
            remaining: pending.len(),
            ..Summary::default()
        };
        finish(store, &summary, args.json, reporter);
        return Ok(exit::SUCCESS);
    }

    if !(args.yes || args.resume) && !confirm(pending.len(), root)? {
        if !args.json {
            println!("aborted");
        }
        return Ok(exit::SUCCESS);
    }

    let opts = ExecOptions {
        retry: RetryPolicy {
            max_attempts: args.retry_attempts,
            backoff: args.retry_backoff,
        },
        stop_after: None,
    };
    let summary = executor::execute(store, root, map, &opts, reporter)?;
    finish(store, &summary, args.json, reporter);
    if summary.failed > 0 {
        return Ok(exit::PARTIAL_FAILURE);
    }
    Ok(exit::SUCCESS)
}

fn finish(store: &LogStore, summary: &Summary, json: bool, reporter: &mut Reporter) {
    reporter.record(Event::RunSummary {
        completed: summary.completed,
        failed: summary.failed,
        skipped: summary.skipped,
        remaining: summary.remaining,
        log_path: store.path().to_path_buf(),
    });
    if !json && let Some(line) = reporter.summary_line() {
        println!("{}", line);
    }
}

fn confirm(count: usize, root: &Path) -> Result<bool> {
    print!(
        "apply {} pending transaction(s) under {}? [y/N] ",
        count,
        root.display()
    );
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn absolute_root(root: &Path) -> Result<PathBuf> {
    let abs = root
        .absolutize()
        .with_context(|| format!("cannot absolutize root {}", root.display()))?
        .into_owned();
    if !abs.is_dir() {
        bail!("root is not a directory: {}", abs.display());
    }
    Ok(abs)
}
