use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Transactional mass find-and-replace engine.
#[derive(Parser)]
#[command(name = "rebrand", version, about, long_about = None)]
pub struct Cli {
    /// Verbose logging (overridden by RUST_LOG).
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print JSON Schema for the transaction log.
    Schema,
    /// Scan the tree and write planned_transactions.json without executing.
    Scan(ScanArgs),
    /// Execute an existing transaction log without re-scanning.
    Execute(ExecuteArgs),
    /// Scan and execute in one pass.
    Run(RunArgs),
    /// Build a disposable sandbox and verify engine invariants against it.
    SelfTest(SelfTestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Root directory to scan.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Merge into an existing transaction log instead of rebuilding it.
    #[arg(long)]
    pub resume: bool,

    /// Run a second scan and verify determinism against the first.
    #[arg(long)]
    pub validate: bool,

    /// Additional directory names to exclude (repeatable).
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Skip symlinks entirely (never renamed, never read).
    #[arg(long)]
    pub ignore_symlinks: bool,

    /// Output structured JSON lines to stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExecuteArgs {
    /// Root directory holding the transaction log.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Simulate execution without touching the tree.
    #[arg(long)]
    pub dry_run: bool,

    /// Continue a previous run; implies no confirmation prompt.
    #[arg(long)]
    pub resume: bool,

    /// Skip the confirmation prompt.
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Output structured JSON lines to stdout.
    #[arg(long)]
    pub json: bool,

    /// Retry attempts for transient filesystem failures.
    #[arg(long, default_value_t = 3)]
    pub retry_attempts: u32,

    /// Linear backoff step between retries (e.g. "100ms", "2s").
    #[arg(long, default_value = "100ms", value_parser = humantime::parse_duration)]
    pub retry_backoff: Duration,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Root directory to scan and rewrite.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Merge the scan into an existing transaction log and resume execution.
    #[arg(long)]
    pub resume: bool,

    /// Simulate execution without touching the tree.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt.
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Additional directory names to exclude (repeatable).
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Skip symlinks entirely (never renamed, never read).
    #[arg(long)]
    pub ignore_symlinks: bool,

    /// Output structured JSON lines to stdout.
    #[arg(long)]
    pub json: bool,

    /// Retry attempts for transient filesystem failures.
    #[arg(long, default_value_t = 3)]
    pub retry_attempts: u32,

    /// Linear backoff step between retries (e.g. "100ms", "2s").
    #[arg(long, default_value = "100ms", value_parser = humantime::parse_duration)]
    pub retry_backoff: Duration,
}

impl RunArgs {
    pub fn scan_args(&self) -> ScanArgs {
        ScanArgs {
            root: self.root.clone(),
            resume: self.resume,
            validate: false,
            exclude: self.exclude.clone(),
            ignore_symlinks: self.ignore_symlinks,
            json: self.json,
        }
    }

    pub fn execute_args(&self) -> ExecuteArgs {
        ExecuteArgs {
            root: self.root.clone(),
            dry_run: self.dry_run,
            resume: self.resume,
            yes: self.yes,
            json: self.json,
            retry_attempts: self.retry_attempts,
            retry_backoff: self.retry_backoff,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SelfTestArgs {
    /// Also run the alternate-mapping scenario.
    #[arg(long)]
    pub complex_map: bool,

    /// Keep the sandbox directory for inspection instead of deleting it.
    #[arg(long)]
    pub keep_sandbox: bool,
}
