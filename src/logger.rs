//! Utilities for logging relay statistics.
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::{sleep, JoinHandle};
use std::time::Duration;

use log::{error, info};

use crate::capture_loop::{CancellationToken, RelayStatistics, Side};
use crate::utilities::lock;

pub struct StatisticsLogger {
    handle: JoinHandle<()>,
    stopped: CancellationToken,
}

impl StatisticsLogger {
    /// Log the statistics of each side every `interval`, and once more when stopped.
    pub fn new(statistics: Vec<(Side, Arc<Mutex<RelayStatistics>>)>, interval: Duration) -> Self {
        let stopped = CancellationToken::new();
        let stopped_thr = stopped.clone();
        let handle = thread::spawn(move || {
            let log = || {
                for (side, statistics) in &statistics {
                    info!("side={} {}", side, lock(statistics));
                }
            };
            let refresh = Duration::from_millis(100);
            let mut elapsed = Duration::ZERO;
            while !stopped_thr.is_cancelled() {
                sleep(refresh);
                elapsed += refresh;
                if elapsed >= interval {
                    log();
                    elapsed = Duration::ZERO;
                }
            }
            log();
        });
        Self { stopped, handle }
    }

    pub fn stop(self) {
        self.stopped.cancel();
        if self.handle.join().is_err() {
            error!("statistics logger panicked");
        }
    }
}
