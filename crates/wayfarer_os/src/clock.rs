#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use wayfarer_kernel_contracts::UnixTimeMs;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> UnixTimeMs;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimeMs {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        UnixTimeMs(ms)
    }
}

/// Test clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start: UnixTimeMs) -> Self {
        Self {
            now_ms: AtomicU64::new(start.0),
        }
    }

    pub fn set(&self, now: UnixTimeMs) {
        self.now_ms.store(now.0, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimeMs {
        UnixTimeMs(self.now_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_clock_01_manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new(UnixTimeMs(1_000));
        assert_eq!(clock.now(), UnixTimeMs(1_000));
        clock.advance_ms(250);
        assert_eq!(clock.now(), UnixTimeMs(1_250));
        clock.set(UnixTimeMs(5));
        assert_eq!(clock.now(), UnixTimeMs(5));
    }

    #[test]
    fn at_clock_02_system_clock_is_past_epoch() {
        assert!(SystemClock.now().0 > 0);
    }
}
