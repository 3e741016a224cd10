//! Run-scoped counters shared by every component of a distribution run.
//!
//! A `RunContext` is created once per invocation and passed by `&mut` to
//! every component that can warn or fail. Counters from a previous
//! (interrupted) invocation are merged in at restart so end-of-run decisions
//! see the whole run.

use std::fmt::Display;

use tracing::{error, warn};

/// Warning/error tallies plus the session that owns this run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    session_id: String,
    warnings: u64,
    errors: u64,
    prior_warnings: u64,
    prior_errors: u64,
}

impl RunContext {
    /// Creates a context for the given session with zeroed counters.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Session id owning this run.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Replaces the session id (used when resuming a persisted session).
    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = session_id.into();
    }

    /// Seeds the counters persisted by earlier invocations of this run.
    pub fn merge_prior(&mut self, warnings: u64, errors: u64) {
        self.prior_warnings = warnings;
        self.prior_errors = errors;
    }

    /// Logs and counts a warning.
    pub fn warn(&mut self, message: impl Display) {
        warn!("{}", message);
        self.warnings += 1;
    }

    /// Logs and counts an error.
    pub fn error(&mut self, message: impl Display) {
        error!("{}", message);
        self.errors += 1;
    }

    /// Warnings raised by this process only.
    pub fn current_warnings(&self) -> u64 {
        self.warnings
    }

    /// Errors raised by this process only.
    pub fn current_errors(&self) -> u64 {
        self.errors
    }

    /// Warnings across all invocations of this run.
    pub fn total_warnings(&self) -> u64 {
        self.prior_warnings + self.warnings
    }

    /// Errors across all invocations of this run.
    pub fn total_errors(&self) -> u64 {
        self.prior_errors + self.errors
    }
}
