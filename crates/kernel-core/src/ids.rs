//! ID utilities: monotonic event ids and trace ids.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::clock::process_clock;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new monotonic identifier (starts at 1).
pub fn next_monotonic_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Milliseconds since UNIX epoch, read through the process clock so tests
/// can freeze or advance time deterministically (see [`crate::clock`]).
pub fn now_ms() -> u64 {
    process_clock().now_ms()
}

/// Opaque trace identifier (UUID v4 string).
pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_increments() {
        let a = next_monotonic_id();
        let b = next_monotonic_id();
        assert!(b > a);
    }

    #[test]
    fn trace_id_format() {
        let t = new_trace_id();
        assert_eq!(t.len(), 36);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }
}
