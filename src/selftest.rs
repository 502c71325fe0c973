use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::SelfTestArgs;
use crate::executor::{self, ExecOptions};
use crate::exit_codes::exit;
use crate::mapping::ReplacementMap;
use crate::model::{TxKind, TxStatus};
use crate::reporter::Reporter;
use crate::scanner::{self, ScanOptions};
use crate::store::LogStore;

/// Outcome of one invariant check.
struct Check {
    name: &'static str,
    passed: bool,
    detail: String,
}

struct Checks(Vec<Check>);

impl Checks {
    fn record(&mut self, name: &'static str, passed: bool, detail: impl Into<String>) {
        self.0.push(Check {
            name,
            passed,
            detail: detail.into(),
        });
    }
}

/// Restores directory permissions on drop so sandbox teardown always works,
/// even when a check panics or an error unwinds past the harness.
struct PermGuard {
    path: PathBuf,
}

#[cfg(unix)]
impl Drop for PermGuard {
    fn drop(&mut self) {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o755));
    }
}

#[cfg(not(unix))]
impl Drop for PermGuard {
    fn drop(&mut self) {}
}

/// Build a disposable sandbox, run scan + execute against it, and verify the
/// engine's invariants. The sandbox is torn down regardless of outcome.
pub fn run(args: &SelfTestArgs) -> Result<i32> {
    let mut checks = Checks(Vec::new());

    let sandbox = tempfile::Builder::new()
        .prefix("rebrand-selftest-")
        .tempdir()
        .context("failed to create sandbox")?;
    info!(sandbox = %sandbox.path().display(), "self-test sandbox");

    standard_scenario(sandbox.path(), &mut checks)?;
    if args.complex_map {
        complex_map_scenario(&mut checks)?;
    }

    let failed = checks.0.iter().filter(|c| !c.passed).count();
    for check in &checks.0 {
        let tag = if check.passed { "PASS" } else { "FAIL" };
        println!("[{}] {}: {}", tag, check.name, check.detail);
    }
    println!(
        "self-test: {} passed, {} failed",
        checks.0.len() - failed,
        failed
    );

    if args.keep_sandbox {
        let kept = sandbox.keep();
        println!("sandbox kept at {}", kept.display());
    }
    Ok(if failed == 0 { exit::SUCCESS } else { exit::PARTIAL_FAILURE })
}

const DEEP_LEVELS: usize = 12;
const BIG_LINES: usize = 1000;
const BIG_MATCH_LINE: usize = 500;
const BINARY_BYTES: &[u8] = b"\x00\x01flojoy\x02FLOJOY\x03";

fn standard_scenario(root: &Path, checks: &mut Checks) -> Result<()> {
    let map = ReplacementMap::standard();
    build_fixtures(root)?;
    let _guard = lock_permission_fixture(root)?;
    // Root (and some filesystems) ignore the read-only mode bits; skip the
    // permission checks when the lock demonstrably does not hold.
    let perms_enforced = permission_lock_holds(root);

    // Pure-function properties first.
    let replaced = map.apply("Flojoy and flojoy").into_owned();
    checks.record(
        "mapped replacement",
        replaced == "Atlasvibe and atlasvibe",
        replaced.clone(),
    );
    let twice = map.apply(&replaced).into_owned();
    checks.record("idempotence", twice == replaced, twice);
    let unmapped = map.apply("fLoJoY marker").into_owned();
    checks.record("unmapped preservation", unmapped == "fLoJoY marker", unmapped);

    // Scan determinism.
    let opts = ScanOptions::default();
    let first = scanner::scan(root, &map, &opts)?;
    let second = scanner::scan(root, &map, &opts)?;
    let deterministic = first.len() == second.len()
        && first
            .iter()
            .zip(&second)
            .all(|(a, b)| a.identity() == b.identity());
    checks.record(
        "scan determinism",
        deterministic,
        format!("{} vs {} transactions", first.len(), second.len()),
    );

    let mut store = LogStore::create(root);
    let total = first.len();
    for tx in first {
        store.push(tx);
    }
    store.persist()?;

    // Execute a prefix, then resume: emulates a mid-run kill.
    let mut reporter = Reporter::new(false);
    let partial = ExecOptions {
        stop_after: Some(3),
        ..ExecOptions::default()
    };
    executor::execute(&mut store, root, &map, &partial, &mut reporter)?;
    let mut store = LogStore::load(root)?;
    executor::execute(&mut store, root, &map, &ExecOptions::default(), &mut reporter)?;

    let terminal = store
        .transactions()
        .iter()
        .filter(|t| t.status.is_terminal())
        .count();
    checks.record(
        "resume completeness",
        terminal == total && total > 0,
        format!("{} of {} terminal after resume", terminal, total),
    );

    verify_tree(root, &store, checks, perms_enforced)?;
    Ok(())
}

/// True when the read-only bit on `locked/` actually prevents writes. A
/// privileged caller bypasses mode bits, turning the fixture into a no-op.
fn permission_lock_holds(root: &Path) -> bool {
    let witness = root.join("locked").join(".write_check");
    match fs::write(&witness, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&witness);
            false
        }
        Err(_) => true,
    }
}

fn build_fixtures(root: &Path) -> Result<()> {
    // Nested matching folders to depth 12, with a matching leaf file.
    let mut deep = root.to_path_buf();
    for level in 0..DEEP_LEVELS {
        deep = deep.join(format!("flojoy_lvl{level}"));
    }
    fs::create_dir_all(&deep)?;
    fs::write(deep.join("flojoy_leaf.txt"), "deep flojoy content\n")?;

    // UTF-8 fixture with multiple casings.
    fs::write(root.join("utf8.txt"), "Flojoy and flojoy\nno match here\n")?;

    // Latin-1 fixture: 0xE9 is not valid UTF-8.
    fs::write(root.join("legacy_latin1.txt"), b"caf\xE9 flojoy\n")?;

    // 1000-line file with exactly one matching line; the matching line uses
    // CRLF while the rest use LF, to prove terminator preservation.
    let mut big = String::new();
    for i in 0..BIG_LINES {
        if i == BIG_MATCH_LINE {
            big.push_str("the flojoy line\r\n");
        } else {
            big.push_str(&format!("filler line {i}\n"));
        }
    }
    fs::write(root.join("big.txt"), &big)?;

    // Binary file whose name matches but whose content must never change.
    fs::write(root.join("flojoy_tool.bin"), BINARY_BYTES)?;

    // Diacritics and combining marks adjacent to (or breaking) matches.
    fs::write(
        root.join("marks.txt"),
        "fl\u{00F6}joy stays\nflojoy\u{0301} gets replaced\n",
    )?;
    // Irregular casing in a name: scanned, but execution is a no-op.
    fs::write(root.join("fLoJoY_note.txt"), "nothing to see\n")?;

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(root.join("utf8.txt"), root.join("flojoy_file_link"))?;
        std::os::unix::fs::symlink(root.join("flojoy_lvl0"), root.join("flojoy_dir_link"))?;
    }

    // Permission failure: a matching file inside a directory that will be
    // made read-only before execution.
    fs::create_dir(root.join("locked"))?;
    fs::write(root.join("locked/flojoy_trapped.txt"), "flojoy\n")?;
    Ok(())
}

#[cfg(unix)]
fn lock_permission_fixture(root: &Path) -> Result<Option<PermGuard>> {
    use std::os::unix::fs::PermissionsExt;
    let locked = root.join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555))?;
    Ok(Some(PermGuard { path: locked }))
}

#[cfg(not(unix))]
fn lock_permission_fixture(_root: &Path) -> Result<Option<PermGuard>> {
    Ok(None)
}

fn verify_tree(
    root: &Path,
    store: &LogStore,
    checks: &mut Checks,
    perms_enforced: bool,
) -> Result<()> {
    // Depth-first rename safety: the deep chain is fully renamed and the
    // leaf is reachable at its new path.
    let mut deep = root.to_path_buf();
    for level in 0..DEEP_LEVELS {
        deep = deep.join(format!("atlasvibe_lvl{level}"));
    }
    let leaf = deep.join("atlasvibe_leaf.txt");
    checks.record(
        "depth-first rename safety",
        leaf.is_file(),
        format!("leaf at {}", leaf.display()),
    );
    let stale = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name().to_string_lossy().to_ascii_lowercase().contains("flojoy")
                && !e.path_is_symlink()
        })
        .count();
    // The unmapped-casing fixture keeps its name on purpose, and when the
    // permission lock holds its trapped file legitimately stays behind;
    // nothing else may.
    let expected_stale = if perms_enforced { 2 } else { 1 };
    checks.record(
        "tree fully renamed",
        stale == expected_stale,
        format!("{} entries still matching (expected {})", stale, expected_stale),
    );

    checks.record(
        "mapped content rewrite",
        fs::read_to_string(root.join("utf8.txt"))? == "Atlasvibe and atlasvibe\nno match here\n",
        "utf8.txt",
    );

    let latin1 = fs::read(root.join("legacy_latin1.txt"))?;
    checks.record(
        "latin-1 bytes preserved",
        latin1 == b"caf\xE9 atlasvibe\n",
        format!("{:?}", &latin1[..latin1.len().min(16)]),
    );

    let binary = fs::read(root.join("atlasvibe_tool.bin"))?;
    checks.record(
        "binary content untouched",
        binary == BINARY_BYTES,
        "renamed, content byte-identical",
    );

    let big = fs::read_to_string(root.join("big.txt"))?;
    let mut expected = String::new();
    for i in 0..BIG_LINES {
        if i == BIG_MATCH_LINE {
            expected.push_str("the atlasvibe line\r\n");
        } else {
            expected.push_str(&format!("filler line {i}\n"));
        }
    }
    checks.record(
        "line isolation",
        big == expected,
        format!("{} bytes", big.len()),
    );

    checks.record(
        "combining marks preserved",
        fs::read_to_string(root.join("marks.txt"))?
            == "fl\u{00F6}joy stays\natlasvibe\u{0301} gets replaced\n",
        "marks.txt",
    );

    if perms_enforced {
        let trapped_failed = store.transactions().iter().any(|t| {
            t.path == PathBuf::from("locked/flojoy_trapped.txt")
                && t.kind == TxKind::FileName
                && t.status == TxStatus::Failed
                && t.error_message
                    .as_deref()
                    .is_some_and(|m| m.contains("permission denied"))
        });
        checks.record(
            "permission failure surfaced",
            trapped_failed,
            "locked/flojoy_trapped.txt",
        );
    }

    let unmapped_skipped = store.transactions().iter().any(|t| {
        t.original_name.as_deref() == Some("fLoJoY_note.txt") && t.status == TxStatus::Skipped
    });
    checks.record(
        "unmapped name skipped",
        unmapped_skipped,
        "fLoJoY_note.txt",
    );

    Ok(())
}

/// Alternate-mapping scenario: proves the map is injected configuration, not
/// a baked-in constant.
fn complex_map_scenario(checks: &mut Checks) -> Result<()> {
    let sandbox = tempfile::Builder::new()
        .prefix("rebrand-selftest-map-")
        .tempdir()?;
    let root = sandbox.path();
    let map = ReplacementMap::new(
        "widget",
        &[("widget", "gadget"), ("Widget", "Gadget"), ("WIDGET", "GADGET")],
    );

    fs::create_dir(root.join("widget_pkg"))?;
    fs::write(root.join("widget_pkg/Widget.txt"), "WIDGET and wIdGeT\n")?;

    let scanned = scanner::scan(root, &map, &ScanOptions::default())?;
    let mut store = LogStore::create(root);
    for tx in scanned {
        store.push(tx);
    }
    store.persist()?;
    let mut reporter = Reporter::new(false);
    executor::execute(&mut store, root, &map, &ExecOptions::default(), &mut reporter)?;

    let content = fs::read_to_string(root.join("gadget_pkg/Gadget.txt"))?;
    checks.record(
        "complex map scenario",
        content == "GADGET and wIdGeT\n",
        content,
    );
    Ok(())
}
