use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::classify::{self, ContentKind};
use crate::mapping::ReplacementMap;
use crate::model::{Transaction, TxKind};
use crate::store;

/// Directory names never descended into by default: version control,
/// virtual envs, dependency caches, and build artifacts.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "venv",
    ".venv",
    "__pycache__",
    "site-packages",
    ".tox",
    ".cache",
    "target",
    "build",
    "dist",
];

/// Scanner configuration.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Extra directory names to exclude, in addition to the defaults.
    pub exclude: Vec<String>,
    /// Skip symlinks entirely: no name transaction, no traversal.
    /// Without this flag symlinks are still never followed, but their own
    /// name remains eligible for renaming.
    pub ignore_symlinks: bool,
}

/// Walk the tree under `root` and emit pending transactions.
///
/// Deterministic: entries are visited in file-name order, so two scans of an
/// unmodified tree produce the same transaction sequence modulo ids and
/// timestamps. Unreadable entries are logged and skipped, never fatal.
pub fn scan(root: &Path, map: &ReplacementMap, opts: &ScanOptions) -> Result<Vec<Transaction>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("scan root is not readable: {}", root.display()))?;
    info!(root = %root.display(), "scanning");

    let mut out = Vec::new();
    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry, opts));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if entry.path() == root {
            continue;
        }
        let is_symlink = entry.path_is_symlink();
        if is_symlink && opts.ignore_symlinks {
            debug!(path = %entry.path().display(), "ignoring symlink");
            continue;
        }
        let rel = match entry.path().strip_prefix(&root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        let name = entry.file_name().to_string_lossy().into_owned();

        if map.matches(name.as_bytes()) {
            let kind = if entry.file_type().is_dir() {
                TxKind::FolderName
            } else {
                TxKind::FileName
            };
            out.push(Transaction::name_change(kind, rel.clone(), name));
        }

        // Content is only scanned for regular files; symlink targets are
        // never read.
        if entry.file_type().is_file() && !is_symlink {
            if let Err(e) = scan_file_content(entry.path(), &rel, map, &mut out) {
                warn!(path = %entry.path().display(), error = %e, "skipping unreadable file content");
            }
        }
    }
    info!(transactions = out.len(), "scan complete");
    Ok(out)
}

/// Emit one `FILE_CONTENT_LINE` transaction per matching line of a text file.
fn scan_file_content(
    abs: &Path,
    rel: &Path,
    map: &ReplacementMap,
    out: &mut Vec<Transaction>,
) -> Result<()> {
    let kind = classify::classify_file(abs)?;
    let encoding = match kind {
        ContentKind::Binary => return Ok(()),
        ContentKind::Text { encoding } => encoding,
    };
    let bytes = fs::read(abs)?;
    for (idx, line) in split_lines(&bytes).iter().enumerate() {
        let body = strip_terminator(line);
        if !map.matches(body) {
            continue;
        }
        let proposed = map.apply_bytes(body);
        out.push(Transaction::content_line(
            rel.to_path_buf(),
            (idx + 1) as u64,
            classify::escape_bytes(body),
            classify::escape_bytes(&proposed),
            encoding.clone(),
        ));
    }
    Ok(())
}

/// Split raw bytes into lines, each including its original terminator.
/// The final line is kept even without a trailing newline.
pub fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            lines.push(&bytes[start..=i]);
            start = i + 1;
        }
    }
    if start < bytes.len() {
        lines.push(&bytes[start..]);
    }
    lines
}

/// Line content without its `\n` / `\r\n` terminator.
pub fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_excluded(entry: &walkdir::DirEntry, opts: &ScanOptions) -> bool {
    // The root itself is never excluded, whatever it is named.
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        if DEFAULT_EXCLUDE_DIRS.contains(&name.as_ref()) {
            return true;
        }
        if opts.exclude.iter().any(|ex| ex == name.as_ref()) {
            return true;
        }
        return false;
    }
    // The engine's own state files must never become work items. Only the
    // exact artifact names are excluded; user files that merely share a
    // suffix are still scanned.
    matches!(
        name.as_ref(),
        store::LOG_FILE_NAME
            | store::VALIDATION_FILE_NAME
            | store::LOG_BACKUP_FILE_NAME
            | store::LOG_TEMP_FILE_NAME
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TxStatus;
    use std::fs;
    use std::path::PathBuf;

    fn run_scan(root: &Path) -> Vec<Transaction> {
        scan(root, &ReplacementMap::standard(), &ScanOptions::default()).unwrap()
    }

    #[test]
    fn emits_one_transaction_per_matching_line() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("app.py"),
            "import flojoy\nplain line\nflojoy and FLOJOY here\n",
        )
        .unwrap();
        let txs = run_scan(dir.path());
        let lines: Vec<u64> = txs
            .iter()
            .filter(|t| t.kind == TxKind::FileContentLine)
            .map(|t| t.line_number)
            .collect();
        // Two occurrences on line 3 still yield a single transaction.
        assert_eq!(lines, vec![1, 3]);
        assert!(txs.iter().all(|t| t.status == TxStatus::Pending));
    }

    #[test]
    fn name_matches_for_files_and_folders() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Flojoy_sdk")).unwrap();
        fs::write(dir.path().join("Flojoy_sdk/flojoy.bin"), [0u8, 1, 2]).unwrap();
        let txs = run_scan(dir.path());
        let kinds: Vec<TxKind> = txs.iter().map(|t| t.kind).collect();
        // Binary file content is never scanned, but its name still matches.
        assert_eq!(kinds, vec![TxKind::FolderName, TxKind::FileName]);
        assert_eq!(txs[1].original_name.as_deref(), Some("flojoy.bin"));
    }

    #[test]
    fn excluded_directories_are_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/flojoy.txt"), "flojoy").unwrap();
        fs::create_dir(dir.path().join("keepme")).unwrap();
        fs::write(dir.path().join("keepme/flojoy.txt"), "flojoy").unwrap();
        let txs = run_scan(dir.path());
        assert!(txs.iter().all(|t| !t.path.starts_with(".git")));
        assert!(txs.iter().any(|t| t.path.starts_with("keepme")));
    }

    #[test]
    fn own_log_files_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            store::LOG_FILE_NAME,
            store::VALIDATION_FILE_NAME,
            store::LOG_BACKUP_FILE_NAME,
            store::LOG_TEMP_FILE_NAME,
        ] {
            fs::write(dir.path().join(name), "[{\"flojoy\": true}]").unwrap();
        }
        let txs = run_scan(dir.path());
        assert!(txs.is_empty());
    }

    #[test]
    fn user_files_sharing_artifact_suffixes_are_scanned() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.json.bak"), "flojoy backup\n").unwrap();
        fs::write(dir.path().join("state.json.tmp"), "flojoy staging\n").unwrap();
        let txs = run_scan(dir.path());
        let paths: Vec<&PathBuf> = txs.iter().map(|t| &t.path).collect();
        assert!(paths.contains(&&PathBuf::from("data.json.bak")));
        assert!(paths.contains(&&PathBuf::from("state.json.tmp")));
    }

    #[test]
    fn scan_is_deterministic_modulo_ids() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_flojoy.txt", "a_flojoy.txt", "c.txt"] {
            fs::write(dir.path().join(name), "say flojoy\n").unwrap();
        }
        let a = run_scan(dir.path());
        let b = run_scan(dir.path());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.identity(), y.identity());
        }
    }

    #[test]
    fn latin1_lines_round_trip_through_escape() {
        let dir = tempfile::tempdir().unwrap();
        // 0xE9 is é in latin-1 and invalid UTF-8 on its own.
        fs::write(dir.path().join("legacy.txt"), b"caf\xE9 flojoy\n").unwrap();
        let txs = run_scan(dir.path());
        assert_eq!(txs.len(), 1);
        let tx = &txs[0];
        assert_eq!(tx.original_encoding.as_deref(), Some("latin-1"));
        let original = tx.original_line_content.as_ref().unwrap();
        assert_eq!(classify::unescape_bytes(original), b"caf\xE9 flojoy");
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed_and_can_be_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("real_flojoy")).unwrap();
        fs::write(dir.path().join("real_flojoy/inner.txt"), "flojoy\n").unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("real_flojoy"),
            dir.path().join("link_flojoy"),
        )
        .unwrap();

        let default = run_scan(dir.path());
        // The symlink's own name matches, but nothing beneath it is visited
        // twice and its target content is not read through the link.
        let link = PathBuf::from("link_flojoy");
        assert!(default.iter().any(|t| t.path == link));
        // No transaction sits strictly below the link path.
        assert!(
            default
                .iter()
                .all(|t| t.path == link || !t.path.starts_with(&link))
        );

        let ignored = scan(
            dir.path(),
            &ReplacementMap::standard(),
            &ScanOptions { ignore_symlinks: true, ..Default::default() },
        )
        .unwrap();
        assert!(ignored.iter().all(|t| t.path != PathBuf::from("link_flojoy")));
    }
}
