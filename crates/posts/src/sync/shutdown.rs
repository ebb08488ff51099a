//! Interruptible sleeps and cooperative shutdown

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Something that can block the sync thread for a while
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration`. Returns false if the sleep was cut short by a
    /// shutdown request.
    fn sleep(&self, duration: Duration) -> bool;

    /// True once a shutdown was requested. Plain sleepers never are.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shared shutdown flag that wakes any sleeper when triggered
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake all sleepers
    pub fn trigger(&self) {
        let (flag, condvar) = &*self.inner;
        let mut stopped = flag.lock().unwrap_or_else(|p| p.into_inner());
        *stopped = true;
        condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Sleeper for ShutdownSignal {
    fn sleep(&self, duration: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|p| p.into_inner());
        if *guard {
            return false;
        }
        let (guard, _) = condvar
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(|p| p.into_inner());
        !*guard
    }

    fn is_cancelled(&self) -> bool {
        self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_completes_without_trigger() {
        let signal = ShutdownSignal::new();
        assert!(signal.sleep(Duration::from_millis(5)));
        assert!(!signal.is_triggered());
    }

    #[test]
    fn test_triggered_signal_skips_sleep() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let start = Instant::now();
        assert!(!signal.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancelled_follows_trigger() {
        let signal = ShutdownSignal::new();
        let sleeper: &dyn Sleeper = &signal;
        assert!(!sleeper.is_cancelled());

        signal.clone().trigger();
        assert!(sleeper.is_cancelled());
    }

    #[test]
    fn test_trigger_wakes_sleeping_thread() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();

        let handle = std::thread::spawn(move || remote.sleep(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        signal.trigger();

        assert!(!handle.join().unwrap());
    }
}
