/// Exit codes as defined in README.md.
pub mod exit {
    /// Every transaction reached a non-failed terminal state.
    pub const SUCCESS: i32 = 0;
    /// The run finished but some transactions are FAILED.
    pub const PARTIAL_FAILURE: i32 = 1;
    /// Fatal setup or log-integrity error; nothing was (further) executed.
    pub const FATAL: i32 = 2;
}
