//! Ambient structured logging: a `tracing` subscriber init and a small throttle
//! helper for warnings the spec requires to be rate-limited (e.g. buffer-pool
//! utilization, repeated auth failures).

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Initializes the global `tracing` subscriber. Safe to call more than once; only the
/// first call takes effect.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Rate-limits a warning to at most once per `interval`, per instance. Components that
/// must emit "at most once per interval" warnings hold one `Throttle` each.
pub struct Throttle {
    interval: Duration,
    last_fired: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_fired: Mutex::new(None),
        }
    }

    /// Returns `true` if the caller should emit its warning now (and records that a
    /// warning fired), `false` if it should be suppressed.
    pub fn should_fire(&self) -> bool {
        let mut guard = self.last_fired.lock().unwrap();
        let now = Instant::now();
        match *guard {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                *guard = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_fires_once_then_suppresses() {
        let t = Throttle::new(Duration::from_secs(60));
        assert!(t.should_fire());
        assert!(!t.should_fire());
    }

    #[test]
    fn throttle_fires_again_after_interval() {
        let t = Throttle::new(Duration::from_millis(10));
        assert!(t.should_fire());
        std::thread::sleep(Duration::from_millis(20));
        assert!(t.should_fire());
    }
}
