//! Wall-clock limit for a whole run.
//!
//! A helper thread waits on a channel with a timeout. Finishing the run
//! disconnects the channel and the thread exits quietly; if the timeout
//! fires first the shared flag is raised and long-running work (pipeline
//! passes, the interpreter loop) stops at its next check.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Raised once the watchdog expires.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub struct Watchdog {
    done: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    flag: CancelFlag,
    timeout: Duration,
}

impl Watchdog {
    pub fn start(timeout: Duration) -> Self {
        let (done, wait) = bounded::<()>(0);
        let flag = CancelFlag::new();
        let raised = flag.clone();
        let handle = std::thread::spawn(move || match wait.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("Watchdog expired after {:?}", timeout);
                raised.set();
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => debug!("Watchdog released"),
        });
        Watchdog {
            done: Some(done),
            handle: Some(handle),
            flag,
            timeout,
        }
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self::start(Duration::from_secs(seconds))
    }

    pub fn flag(&self) -> CancelFlag {
        self.flag.clone()
    }

    pub fn expired(&self) -> bool {
        self.flag.is_set()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.done.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
