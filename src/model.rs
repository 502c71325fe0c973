use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// What a transaction changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxKind {
    #[serde(rename = "FOLDER_NAME")]
    FolderName,
    #[serde(rename = "FILE_NAME")]
    FileName,
    #[serde(rename = "FILE_CONTENT_LINE")]
    FileContentLine,
}

/// Transaction lifecycle state.
///
/// `Pending → InProgress → {Completed | Failed | Skipped}`; terminal states
/// are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum TxStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Completed | TxStatus::Failed | TxStatus::Skipped)
    }
}

/// A single planned unit of rename or content-edit work.
///
/// `path` is the entry's location relative to the scan root as captured at
/// scan time and is never rewritten afterwards; rename effects are resolved
/// dynamically by the path resolver.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Transaction {
    /// Stable unique identifier, immutable across resumes.
    pub id: Uuid,
    /// Transaction type.
    #[serde(rename = "type")]
    pub kind: TxKind,
    /// Scan-time path relative to the scan root.
    pub path: PathBuf,
    /// Pre-replacement entry name (name transactions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    /// 1-indexed line number for content transactions, 0 otherwise.
    #[serde(default)]
    pub line_number: u64,
    /// Full line before replacement, byte-escaped (content transactions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_line_content: Option<String>,
    /// Simulated line after replacement, byte-escaped (content transactions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_line_content: Option<String>,
    /// Detected text encoding of the containing file (content transactions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_encoding: Option<String>,
    /// Lifecycle state.
    pub status: TxStatus,
    /// Failure detail, set only when `status == FAILED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the scanner created this transaction.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    fn base(kind: TxKind, path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            path,
            original_name: None,
            line_number: 0,
            original_line_content: None,
            proposed_line_content: None,
            original_encoding: None,
            status: TxStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// New pending rename transaction for a file or folder name.
    pub fn name_change(kind: TxKind, path: PathBuf, original_name: String) -> Self {
        Self {
            original_name: Some(original_name),
            ..Self::base(kind, path)
        }
    }

    /// New pending content-line transaction.
    pub fn content_line(
        path: PathBuf,
        line_number: u64,
        original: String,
        proposed: String,
        encoding: String,
    ) -> Self {
        Self {
            line_number,
            original_line_content: Some(original),
            proposed_line_content: Some(proposed),
            original_encoding: Some(encoding),
            ..Self::base(TxKind::FileContentLine, path)
        }
    }

    /// Stable identity used to reconcile transactions across scan resumes.
    ///
    /// Everything except `id`, status fields, and timestamps.
    pub fn identity(&self) -> (TxKind, &PathBuf, u64, Option<&String>, Option<&String>) {
        (
            self.kind,
            &self.path,
            self.line_number,
            self.original_name.as_ref(),
            self.original_line_content.as_ref(),
        )
    }

    /// Move to a new status, refusing to leave a terminal state.
    pub fn set_status(&mut self, status: TxStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Mark failed with a reason.
    pub fn fail(&mut self, message: String) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TxStatus::Failed;
        self.error_message = Some(message);
        self.updated_at = Utc::now();
    }

    /// Path depth (number of components) of the scan-time path.
    pub fn depth(&self) -> usize {
        self.path.components().count()
    }
}

/// Generate the JSON Schema for the persisted transaction log.
pub fn generate_schema() -> String {
    let schema = schemars::schema_for!(Vec<Transaction>);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
