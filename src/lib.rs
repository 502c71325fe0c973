//! Transactional mass find-and-replace engine.
//!
//! Scans a directory tree for case-variant occurrences of a target string in
//! file names, folder names, and file content, plans the changes as a
//! persisted transaction log (`planned_transactions.json`), and executes them
//! crash-safely: the process can be killed and resumed at any point without
//! data loss or duplicate work.

pub mod classify;
pub mod cli;
pub mod engine;
pub mod events;
pub mod executor;
pub mod exit_codes;
pub mod mapping;
pub mod model;
pub mod reporter;
pub mod resolve;
pub mod scanner;
pub mod selftest;
pub mod store;
