//! Critical section execution
//!
//! `run_exclusive` ties acquisition, renewal and release to the lifetime of one
//! piece of protected work.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, warn};

use crate::error::LockError;
use crate::manager::LockManager;
use crate::model::{AcquireOptions, LockName, Ownership};

impl LockManager {
    /// Run `work` while holding `name`, using the configured defaults.
    pub async fn run_exclusive<F, Fut, T>(&self, name: &LockName, work: F) -> Result<T, LockError>
    where
        F: FnOnce(Ownership) -> Fut,
        Fut: Future<Output = T>,
    {
        self.run_exclusive_with(name, self.default_options(), work)
            .await
    }

    /// Run `work` exactly once while holding `name`.
    ///
    /// The watchdog (when enabled) runs alongside the work. If it reports the
    /// lock lost, the work is dropped at its next await point and the call
    /// returns `LockLost`. Whatever way the work ends, including a panic, the
    /// watchdog is stopped and the lock released before this returns; panics
    /// are resumed afterwards. If this future is itself dropped, the watchdog
    /// is aborted and the handle releases the lock in the background.
    pub async fn run_exclusive_with<F, Fut, T>(
        &self,
        name: &LockName,
        options: AcquireOptions,
        work: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce(Ownership) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut handle = self.acquire_with(name, options).await?;
        let renewer = options.watchdog.then(|| self.start_renewer(&handle));

        let finished = {
            let mut ownership = handle.ownership();
            let work = AssertUnwindSafe(work(handle.ownership())).catch_unwind();
            tokio::select! {
                biased;
                result = work => Some(result),
                _ = ownership.lost() => None,
            }
        };

        if let Some(renewer) = renewer {
            renewer.stop().await;
        }

        let lost = !handle.is_held();
        match finished {
            Some(outcome) if !lost => {
                let released = self.release(handle).await;
                match outcome {
                    Ok(value) => {
                        released?;
                        Ok(value)
                    }
                    Err(panic) => {
                        if let Err(e) = released {
                            error!(lock = %name, error = %e, "Failed to release lock after panic");
                        }
                        std::panic::resume_unwind(panic)
                    }
                }
            }
            finished => {
                // Nothing of ours left in the store
                handle.disarm();
                warn!(
                    lock = %name,
                    held_for = ?handle.held_for(),
                    "Lock lost during critical section, remaining work abandoned"
                );
                if let Some(Err(panic)) = finished {
                    std::panic::resume_unwind(panic);
                }
                Err(LockError::LockLost {
                    name: name.to_string(),
                })
            }
        }
    }
}
