//! Lock error taxonomy
//!
//! Contention and ownership races are expected and carried as values
//! (`ReleaseOutcome::NotOwner`); only the conditions below surface as errors.

use std::time::Duration;

use crate::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// Contention outlasted the caller's wait budget.
    #[error("lock '{name}' busy: not acquired within {waited:?}, retry later")]
    AcquireTimeout { name: String, waited: Duration },

    /// The watchdog saw the record expire or change hands while the holder
    /// was still running.
    #[error("lock '{name}' lost while held")]
    LockLost { name: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("invalid lock options: {0}")]
    InvalidOptions(String),
}

impl LockError {
    /// Whether the caller can reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::AcquireTimeout { .. } | LockError::LockLost { .. }
        )
    }
}
