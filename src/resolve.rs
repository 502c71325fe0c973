use std::path::{Path, PathBuf};
use tracing::trace;

/// Maps scan-time relative paths to their current on-disk location.
///
/// Renames applied during the current execution pass invalidate the recorded
/// relative paths of everything nested beneath them. Rather than rewriting
/// transaction records, the resolver keeps an ordered journal of
/// `(old_rel, new_rel)` pairs and rewrites the matching path prefix when
/// asked. Entries are recorded in application order (children before their
/// parents, per the executor's ordering), so a single bounded pass over the
/// journal yields the current path: no recursion, guaranteed termination,
/// and resolving an already-current path is a no-op.
pub struct PathResolver {
    root: PathBuf,
    journal: Vec<(PathBuf, PathBuf)>,
}

impl PathResolver {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            journal: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record a successfully applied rename. Both paths are relative to the
    /// root and must reflect the tree state at the moment of the rename
    /// (i.e. already resolved through earlier journal entries).
    pub fn record_rename(&mut self, old_rel: PathBuf, new_rel: PathBuf) {
        trace!(old = %old_rel.display(), new = %new_rel.display(), "journal rename");
        self.journal.push((old_rel, new_rel));
    }

    /// Current relative path for a scan-time relative path.
    pub fn resolve_relative(&self, scan_time: &Path) -> PathBuf {
        let mut current = scan_time.to_path_buf();
        for (old, new) in &self.journal {
            if current == *old {
                current = new.clone();
            } else if let Ok(rest) = current.strip_prefix(old) {
                current = new.join(rest);
            }
        }
        current
    }

    /// Current absolute path for a scan-time relative path.
    pub fn resolve(&self, scan_time: &Path) -> PathBuf {
        self.root.join(self.resolve_relative(scan_time))
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }
}
