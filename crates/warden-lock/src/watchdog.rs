//! Watchdog renewal
//!
//! While a lock is held, a background task extends the record's expiry every
//! third of its TTL, so at least two renewals fall inside any TTL window. The
//! task compares tokens through the store on every tick and gives up as soon
//! as the record is no longer ours. It never deletes the record.
//!
//! The record is only known to be alive until `ttl` after the last request
//! that successfully set its expiry was *sent*. The task marks the handle lost
//! a margin before that point, whether or not a renewal is still in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, error, warn};

use crate::model::{FencingToken, HandleState, LockHandle, LockName};
use crate::stats::LockStatsCollector;
use crate::store::KeyValueStore;

/// How long `stop` waits for the task to exit before aborting it.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Renewal cadence for a given TTL.
pub(crate) fn renewal_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(1))
}

/// Slack kept between the presumed loss and the record's latest possible
/// expiry, for scheduling delay and clock skew with the store.
pub(crate) fn expiry_margin(ttl: Duration) -> Duration {
    ttl / 10
}

/// Handle to a running renewer.
///
/// `stop` waits a bounded grace for the task to exit; dropping the handle
/// aborts it.
pub struct RenewerTask {
    name: LockName,
    stop_tx: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl RenewerTask {
    pub(crate) fn spawn(handle: &LockHandle, stats: Arc<LockStatsCollector>) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let renewal = Renewal {
            store: handle.store().clone(),
            name: handle.name().clone(),
            key: handle.key().to_string(),
            token: handle.token().clone(),
            ttl: handle.ttl(),
            lease_start: handle.lease_start(),
            state: handle.state(),
            stats,
        };

        debug!(
            lock = %handle.name(),
            every = ?renewal_interval(handle.ttl()),
            "Starting lock watchdog"
        );

        Self {
            name: handle.name().clone(),
            stop_tx,
            join: Some(tokio::spawn(renewal.run(stop_rx))),
        }
    }

    /// True once the renewer exited on its own (lock lost) or was stopped.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop renewing and wait for the task to exit, aborting it if it does
    /// not within a short grace.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.try_send(());
        let Some(mut join) = self.join.take() else {
            return;
        };

        match tokio::time::timeout(STOP_GRACE, &mut join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => {
                error!(lock = %self.name, "Lock watchdog panicked: {}", e);
            }
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(
                    lock = %self.name,
                    grace = ?STOP_GRACE,
                    "Lock watchdog did not stop in time, aborting"
                );
                join.abort();
            }
        }
    }
}

impl Drop for RenewerTask {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

struct Renewal {
    store: Arc<dyn KeyValueStore>,
    name: LockName,
    key: String,
    token: FencingToken,
    ttl: Duration,
    lease_start: Instant,
    state: Arc<HandleState>,
    stats: Arc<LockStatsCollector>,
}

impl Renewal {
    async fn run(self, mut stop_rx: mpsc::Receiver<()>) {
        let every = renewal_interval(self.ttl);
        let margin = expiry_margin(self.ttl);
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sent = self.lease_start;

        loop {
            let deadline = last_sent + (self.ttl - margin);

            tokio::select! {
                biased;
                _ = stop_rx.recv() => break,
                _ = sleep_until(deadline) => {
                    self.expire(deadline);
                    break;
                }
                _ = ticker.tick() => {}
            }

            let sent = Instant::now();
            let renewed = tokio::select! {
                biased;
                _ = stop_rx.recv() => break,
                _ = sleep_until(deadline) => {
                    self.expire(deadline);
                    break;
                }
                result = self
                    .store
                    .compare_and_extend_expiry(&self.key, self.token.as_str(), self.ttl) => result,
            };

            match renewed {
                Ok(true) => {
                    last_sent = sent;
                    self.stats.record_renewal();
                    debug!(lock = %self.name, ttl = ?self.ttl, "Lock renewed");
                }
                Ok(false) => {
                    warn!(
                        lock = %self.name,
                        token = %self.token,
                        "Lock record expired or changed owner, stopping watchdog"
                    );
                    self.lose();
                    break;
                }
                Err(e) => {
                    warn!(
                        lock = %self.name,
                        error = %e,
                        "Lock renewal failed, retrying on next tick"
                    );
                }
            }
        }
    }

    fn expire(&self, deadline: Instant) {
        warn!(
            lock = %self.name,
            ttl = ?self.ttl,
            deadline = ?deadline,
            "No successful renewal in time, presuming lock expired"
        );
        self.lose();
    }

    fn lose(&self) {
        if self.state.mark_lost() {
            self.stats.record_lost();
        }
    }
}
