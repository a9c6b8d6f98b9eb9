//! Per-phase wall-clock accounting for handler invocations
//!
//! A handler splits its work into named phases (`decoding`, `detection`,
//! `publishing`, ...). Each phase is measured with a monotonic clock while its
//! [`PhaseGuard`] is alive, and the elapsed time is folded into a per-name
//! aggregate when the guard drops, which also happens while unwinding.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Aggregate for a single phase name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    /// Number of completed measurements
    pub count: u64,
    /// Sum of all measured durations
    pub total: Duration,
    /// Longest single measurement
    pub max: Duration,
}

impl PhaseStats {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    /// Mean duration, zero when nothing was recorded
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total.as_nanos() / u128::from(self.count);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

impl fmt::Display for PhaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={:<5} avg {:>8.3}ms  max {:>8.3}ms  total {:>9.3}ms",
            self.count,
            self.mean().as_secs_f64() * 1000.0,
            self.max.as_secs_f64() * 1000.0,
            self.total.as_secs_f64() * 1000.0
        )
    }
}

/// Immutable copy of every phase aggregate, keyed by phase name
pub type PhaseSnapshot = BTreeMap<String, PhaseStats>;

/// Accumulates phase durations for one subscription
#[derive(Debug, Default)]
pub struct PhaseTimer {
    phases: Mutex<BTreeMap<String, PhaseStats>>,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `name`; the measurement is recorded when the guard drops.
    pub fn scoped_phase(&self, name: &str) -> PhaseGuard<'_> {
        PhaseGuard {
            timer: self,
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Fold one measurement into the aggregate for `name`
    pub fn record(&self, name: &str, elapsed: Duration) {
        let mut phases = self.phases.lock();
        match phases.get_mut(name) {
            Some(stats) => stats.record(elapsed),
            None => {
                let mut stats = PhaseStats::default();
                stats.record(elapsed);
                phases.insert(name.to_string(), stats);
            }
        }
    }

    pub fn snapshot(&self) -> PhaseSnapshot {
        self.phases.lock().clone()
    }
}

/// Open measurement of a single phase
#[must_use = "the phase is measured until this guard is dropped"]
pub struct PhaseGuard<'a> {
    timer: &'a PhaseTimer,
    name: String,
    started: Instant,
}

impl PhaseGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.timer.record(&self.name, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_phase_delay() {
        let timer = PhaseTimer::new();
        {
            let _p = timer.scoped_phase("p");
            thread::sleep(Duration::from_millis(10));
        }

        let snapshot = timer.snapshot();
        let p = snapshot["p"];
        assert_eq!(p.count, 1);
        assert!(p.total >= Duration::from_millis(10));
        assert!(p.max >= Duration::from_millis(10));
    }

    #[test]
    fn test_repeated_phase_counts() {
        let timer = PhaseTimer::new();
        for _ in 0..2 {
            let _p = timer.scoped_phase("p");
            thread::sleep(Duration::from_millis(10));
        }

        let p = timer.snapshot()["p"];
        assert_eq!(p.count, 2);
        assert!(p.total >= Duration::from_millis(20));
    }

    #[test]
    fn test_nested_distinct_phases() {
        let timer = PhaseTimer::new();
        {
            let _outer = timer.scoped_phase("outer");
            thread::sleep(Duration::from_millis(5));
            {
                let _inner = timer.scoped_phase("inner");
                thread::sleep(Duration::from_millis(5));
            }
        }

        let snapshot = timer.snapshot();
        assert_eq!(snapshot["outer"].count, 1);
        assert_eq!(snapshot["inner"].count, 1);
        assert!(snapshot["outer"].total >= snapshot["inner"].total);
    }

    #[test]
    fn test_recorded_on_unwind() {
        let timer = PhaseTimer::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _p = timer.scoped_phase("explodes");
            panic!("handler failure");
        }));
        assert!(result.is_err());
        assert_eq!(timer.snapshot()["explodes"].count, 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let timer = PhaseTimer::new();
        timer.record("a", Duration::from_millis(1));
        let before = timer.snapshot();
        timer.record("a", Duration::from_millis(1));

        assert_eq!(before["a"].count, 1);
        assert_eq!(timer.snapshot()["a"].count, 2);
    }

    #[test]
    fn test_mean() {
        let mut stats = PhaseStats::default();
        assert_eq!(stats.mean(), Duration::ZERO);
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(30));
        assert_eq!(stats.mean(), Duration::from_millis(20));
    }

    #[test]
    fn test_mean_with_huge_count() {
        let stats = PhaseStats {
            count: 1 << 32,
            total: Duration::from_secs(1 << 32),
            max: Duration::from_secs(1),
        };
        assert_eq!(stats.mean(), Duration::from_secs(1));
        assert!(stats.to_string().contains("n=4294967296"));
    }
}
