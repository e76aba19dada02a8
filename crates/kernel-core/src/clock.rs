//! Deterministic time for evaluation/cache/effectivity control paths.
//!
//! The kernel reads wall-clock time in three places that matter for test
//! determinism: policy effectivity windows, cache `cachedAt`/`expiresAt`,
//! and the evaluation deadline. Routing all of them through a swappable
//! [`Clock`] lets property and scenario tests freeze or advance time
//! instead of racing `SystemTime::now`.

use std::sync::{Arc, OnceLock, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction for deterministic time in kernel control paths.
/// Returns milliseconds since UNIX epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// System (production) clock. Wraps `SystemTime`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as u64
    }
}

/// Virtual (deterministic/test) clock with manual control.
#[derive(Debug)]
pub struct VirtualClock {
    inner: std::sync::Mutex<u64>,
}

impl VirtualClock {
    /// Create a new virtual clock seeded at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self { inner: std::sync::Mutex::new(start_ms) }
    }

    /// Advance the virtual clock by `delta_ms`.
    pub fn advance_ms(&self, delta_ms: u64) {
        let mut g = self.inner.lock().expect("virtual clock lock poisoned");
        *g = g.saturating_add(delta_ms);
    }

    /// Set the virtual clock to an absolute ms value.
    pub fn set_ms(&self, value: u64) {
        let mut g = self.inner.lock().expect("virtual clock lock poisoned");
        *g = value;
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        *self.inner.lock().expect("virtual clock lock poisoned")
    }
}

static PROCESS_CLOCK: OnceLock<RwLock<Arc<dyn Clock>>> = OnceLock::new();

fn cell() -> &'static RwLock<Arc<dyn Clock>> {
    PROCESS_CLOCK.get_or_init(|| RwLock::new(Arc::new(SystemClock)))
}

/// Get the current process-wide Clock (Arc clone).
#[must_use]
pub fn process_clock() -> Arc<dyn Clock> {
    cell().read().expect("process clock read lock poisoned").clone()
}

/// Set/swap the process-wide Clock. Used by tests and scenario replay.
pub fn set_process_clock(clock: Arc<dyn Clock>) {
    *cell().write().expect("process clock write lock poisoned") = clock;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn virtual_clock_is_deterministic() {
        let clk = VirtualClock::new(1_000);
        assert_eq!(clk.now_ms(), 1_000);
        clk.advance_ms(5);
        assert_eq!(clk.now_ms(), 1_005);
        clk.set_ms(42);
        assert_eq!(clk.now_ms(), 42);
    }

    #[test]
    fn process_clock_can_be_swapped() {
        let _guard = TEST_LOCK.lock().unwrap();
        let clk: Arc<dyn Clock> = Arc::new(VirtualClock::new(42));
        set_process_clock(clk);
        assert_eq!(process_clock().now_ms(), 42);
        set_process_clock(Arc::new(SystemClock));
    }
}
