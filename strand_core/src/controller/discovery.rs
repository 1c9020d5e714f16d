//! Discovery attempt bookkeeping and fallback-index selection

use serde::{Deserialize, Serialize};

/// Why a discovery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// No failure recorded.
    None,
    /// Authentication-class status (drives configuration fallback).
    Authentication,
    /// Everything else.
    Other,
}

/// Outcome of the attempt so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed(FailureClass),
}

/// Transient record of the discovery attempt in progress.
///
/// Lives from the first `Loading` until discovery succeeds or the
/// authentication retry budget is exhausted.
#[derive(Debug, Clone)]
pub struct DiscoveryAttempt {
    /// Which configuration variant is active.
    pub config_index: usize,
    /// Authentication-failure retries consumed so far.
    pub auth_retries: u32,
    /// Current outcome.
    pub outcome: AttemptOutcome,
}

impl DiscoveryAttempt {
    pub fn new(config_index: usize) -> Self {
        Self {
            config_index,
            auth_retries: 0,
            outcome: AttemptOutcome::Pending,
        }
    }
}

/// Select the active configuration index for an attempt.
///
/// With `count` fallback configurations and default index `default`,
/// retry `r < count` uses `(r + default + 1) % count`; past the budget
/// the default is forced. The sequence therefore visits every variant
/// once and lands on the default last, so the default is never skipped.
pub fn active_config_index(retry: u32, default: usize, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let retry = retry as usize;
    if retry < count {
        (retry + default + 1) % count
    } else {
        default
    }
}
