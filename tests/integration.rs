use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use rebrand::cli::{ExecuteArgs, RunArgs, ScanArgs};
use rebrand::executor::{self, ExecOptions};
use rebrand::mapping::ReplacementMap;
use rebrand::model::TxStatus;
use rebrand::reporter::Reporter;
use rebrand::scanner::{self, ScanOptions};
use rebrand::store::LogStore;

fn run_args(root: &Path) -> RunArgs {
    RunArgs {
        root: root.to_path_buf(),
        resume: false,
        dry_run: false,
        yes: true,
        exclude: vec![],
        ignore_symlinks: false,
        json: false,
        retry_attempts: 1,
        retry_backoff: std::time::Duration::from_millis(1),
    }
}

fn scan_to_store(root: &Path) -> Result<LogStore> {
    let scanned = scanner::scan(root, &ReplacementMap::standard(), &ScanOptions::default())?;
    let mut store = LogStore::create(root);
    for tx in scanned {
        store.push(tx);
    }
    store.persist()?;
    Ok(store)
}

#[test]
fn test_full_run_renames_and_rewrites() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    fs::create_dir_all(root.join("flojoy_pkg/nested_flojoy"))?;
    fs::write(root.join("flojoy_pkg/nested_flojoy/Flojoy.py"), "import flojoy\nok\n")?;
    fs::write(root.join("readme.md"), "Flojoy and flojoy\n")?;

    let code = rebrand::engine::run(run_args(root))?;
    assert_eq!(code, 0);

    let new_file = root.join("atlasvibe_pkg/nested_atlasvibe/Atlasvibe.py");
    assert!(new_file.is_file());
    assert_eq!(fs::read_to_string(&new_file)?, "import atlasvibe\nok\n");
    assert_eq!(
        fs::read_to_string(root.join("readme.md"))?,
        "Atlasvibe and atlasvibe\n"
    );
    Ok(())
}

#[test]
fn test_dry_run_touches_nothing() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    fs::write(root.join("flojoy.txt"), "flojoy\n")?;

    let mut args = run_args(root);
    args.dry_run = true;
    assert_eq!(rebrand::engine::run(args)?, 0);

    assert!(root.join("flojoy.txt").exists());
    assert_eq!(fs::read_to_string(root.join("flojoy.txt"))?, "flojoy\n");
    // The log still records the planned work as pending.
    let store = LogStore::load(root)?;
    assert!(store.transactions().iter().all(|t| t.status == TxStatus::Pending));
    Ok(())
}

#[test]
fn test_resume_after_interrupt_completes_without_duplicates() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    fs::create_dir_all(root.join("flojoy_a/flojoy_b"))?;
    fs::write(root.join("flojoy_a/flojoy_b/flojoy.txt"), "flojoy line\n")?;
    fs::write(root.join("other.txt"), "flojoy too\n")?;

    let mut store = scan_to_store(root)?;
    let total = store.len();
    assert!(total >= 4);

    // Emulate a kill after two transactions.
    let map = ReplacementMap::standard();
    let mut reporter = Reporter::new(false);
    let partial = ExecOptions {
        stop_after: Some(2),
        ..ExecOptions::default()
    };
    executor::execute(&mut store, root, &map, &partial, &mut reporter)?;
    drop(store);

    // A fresh process resumes from the persisted log.
    let mut resumed = LogStore::load(root)?;
    let terminal_before = resumed
        .transactions()
        .iter()
        .filter(|t| t.status.is_terminal())
        .count();
    assert_eq!(terminal_before, 2);

    executor::execute(&mut resumed, root, &map, &ExecOptions::default(), &mut reporter)?;
    let terminal_after = resumed
        .transactions()
        .iter()
        .filter(|t| t.status.is_terminal())
        .count();
    assert_eq!(terminal_after, total);

    // Exactly-once effects: the fully renamed tree exists and no stale or
    // doubled entries remain.
    assert!(root.join("atlasvibe_a/atlasvibe_b/atlasvibe.txt").is_file());
    assert!(!root.join("flojoy_a").exists());
    assert_eq!(
        fs::read_to_string(root.join("atlasvibe_a/atlasvibe_b/atlasvibe.txt"))?,
        "atlasvibe line\n"
    );
    assert_eq!(fs::read_to_string(root.join("other.txt"))?, "atlasvibe too\n");
    Ok(())
}

#[test]
fn test_line_isolation_in_large_file() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let mut content = String::new();
    for i in 0..1000 {
        if i == 499 {
            content.push_str("only flojoy here\r\n");
        } else {
            content.push_str(&format!("line {i}\n"));
        }
    }
    fs::write(root.join("big.txt"), &content)?;

    assert_eq!(rebrand::engine::run(run_args(root))?, 0);

    let after = fs::read_to_string(root.join("big.txt"))?;
    let expected = content.replace("only flojoy here\r\n", "only atlasvibe here\r\n");
    assert_eq!(after, expected);
    Ok(())
}

#[test]
fn test_binary_content_is_untouched() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let payload = b"\x00\x01 flojoy FLOJOY \x02\xFF".to_vec();
    fs::write(root.join("flojoy.dat"), &payload)?;

    assert_eq!(rebrand::engine::run(run_args(root))?, 0);

    // Name applied, content byte-for-byte identical.
    assert!(!root.join("flojoy.dat").exists());
    assert_eq!(fs::read(root.join("atlasvibe.dat"))?, payload);
    Ok(())
}

#[test]
fn test_execute_reuses_log_without_rescanning() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    fs::write(root.join("flojoy_old.txt"), "flojoy\n")?;
    scan_to_store(root)?;

    // A file created after the scan is not part of the planned work.
    fs::write(root.join("flojoy_new.txt"), "flojoy\n")?;

    let args = ExecuteArgs {
        root: root.to_path_buf(),
        dry_run: false,
        resume: false,
        yes: true,
        json: false,
        retry_attempts: 1,
        retry_backoff: std::time::Duration::from_millis(1),
    };
    assert_eq!(rebrand::engine::execute(args)?, 0);

    assert!(root.join("atlasvibe_old.txt").exists());
    assert!(root.join("flojoy_new.txt").exists());
    Ok(())
}

#[test]
fn test_scan_resume_appends_only_new_matches() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    fs::write(root.join("flojoy_one.txt"), "flojoy\n")?;
    scan_to_store(root)?;
    let before = LogStore::load(root)?;
    let ids: Vec<_> = before.transactions().iter().map(|t| t.id).collect();

    fs::write(root.join("flojoy_two.txt"), "flojoy\n")?;
    let args = ScanArgs {
        root: root.to_path_buf(),
        resume: true,
        validate: false,
        exclude: vec![],
        ignore_symlinks: false,
        json: false,
    };
    assert_eq!(rebrand::engine::scan(args)?, 0);

    let after = LogStore::load(root)?;
    assert_eq!(after.len(), ids.len() + 2);
    // Previously planned transactions kept their ids.
    for id in ids {
        assert!(after.transactions().iter().any(|t| t.id == id));
    }
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_permission_failure_yields_partial_exit_code() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir()?;
    let root = dir.path();
    fs::create_dir(root.join("locked"))?;
    fs::write(root.join("locked/flojoy.txt"), "flojoy\n")?;
    fs::write(root.join("free_flojoy.txt"), "flojoy\n")?;
    fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o555))?;

    // Mode bits do not bind a privileged user; without an enforced lock the
    // scenario cannot produce a failure, so there is nothing to assert.
    if fs::write(root.join("locked/.write_check"), b"").is_ok() {
        eprintln!("skipping: read-only directory is writable (running privileged)");
        return Ok(());
    }

    let code = rebrand::engine::run(run_args(root));
    fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o755))?;
    assert_eq!(code?, 1);

    // Siblings still completed.
    assert!(root.join("free_atlasvibe.txt").exists());
    let store = LogStore::load(root)?;
    let failed: Vec<_> = store
        .transactions()
        .iter()
        .filter(|t| t.status == TxStatus::Failed)
        .collect();
    assert!(!failed.is_empty());
    assert!(
        failed
            .iter()
            .all(|t| t.error_message.as_deref().unwrap_or("").contains("denied"))
    );
    Ok(())
}
