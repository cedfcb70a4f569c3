//! Resident-memory monitor for a single judged process.
//!
//! Detection only: the monitor samples `/proc/<pid>/status` on a fixed
//! interval, reports the first limit crossing, and returns the peak it saw.
//! Killing the process on exceedance is the sandbox's job, so "detect" and
//! "enforce" stay independently testable.

use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Final output of a monitor task.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryReport {
    /// Highest resident memory sampled, in megabytes.
    pub peak_mb: u64,
    /// Whether any sample crossed the configured limit.
    pub exceeded: bool,
}

/// Handle to a running monitor task.
pub struct MemoryWatch {
    handle: JoinHandle<MemoryReport>,
    stop: watch::Sender<bool>,
    tripped: oneshot::Receiver<()>,
}

impl MemoryWatch {
    /// Resolves the first time a sample crosses the limit. Never resolves if
    /// the limit is not crossed; callers race this against process
    /// completion.
    pub async fn exceeded(&mut self) {
        if (&mut self.tripped).await.is_err() {
            // Monitor ended without tripping; report retrieval will say so.
            std::future::pending::<()>().await;
        }
    }

    /// Stop the monitor cooperatively and retrieve its report.
    pub async fn finish(self) -> MemoryReport {
        let _ = self.stop.send(true);
        self.handle.await.unwrap_or_default()
    }
}

/// Spawn a monitor task polling the resident memory of `pid` against
/// `limit_mb`. The task ends when the process disappears or when the watch
/// is stopped; either way the peak observed so far is reported.
pub fn spawn_monitor(pid: u32, limit_mb: u64) -> MemoryWatch {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let (trip_tx, trip_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let mut peak_mb = 0u64;
        let mut exceeded = false;
        let mut trip_tx = Some(trip_tx);

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    let Some(rss_mb) = sample_rss_mb(pid).await else {
                        // Process gone: graceful end, keep the peak.
                        break;
                    };
                    if rss_mb > peak_mb {
                        peak_mb = rss_mb;
                    }
                    if rss_mb > limit_mb && !exceeded {
                        exceeded = true;
                        debug!(pid, rss_mb, limit_mb, "memory limit exceeded");
                        if let Some(tx) = trip_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                }
            }
        }

        MemoryReport { peak_mb, exceeded }
    });

    MemoryWatch {
        handle,
        stop: stop_tx,
        tripped: trip_rx,
    }
}

/// Current resident set size of `pid` in megabytes, or None if the process
/// no longer exists.
async fn sample_rss_mb(pid: u32) -> Option<u64> {
    let status = tokio::fs::read_to_string(format!("/proc/{}/status", pid))
        .await
        .ok()?;
    parse_vm_rss_kb(&status).map(|kb| kb / 1024)
}

fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}
