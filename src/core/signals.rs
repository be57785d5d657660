//! Interrupt handling for long runs.
//!
//! SIGINT and SIGTERM set a shared flag; download, resume and remediation
//! loops poll it between records and stop at a record boundary so the output
//! stream stays resumable. A second signal is not special-cased: the loops
//! already stop at the next boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop flag, cheap to clone.
#[derive(Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    /// A flag that only trips when [`request_stop`](Self::request_stop) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag that also trips on SIGINT or SIGTERM.
    ///
    /// Registration is best effort; failures are reported on stderr and the
    /// run proceeds without signal-driven stops.
    #[cfg(feature = "signals")]
    pub fn install() -> Self {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let stop = Self::new();
        for (name, signal) in [("SIGINT", SIGINT), ("SIGTERM", SIGTERM)] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&stop.flag)) {
                eprintln!("[DAH-SIGNAL] failed to register {name}: {e}");
            }
        }
        stop
    }

    pub fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}
