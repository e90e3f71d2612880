//! C3 (half): the per-subject reply-time history and phi-accrual
//! timeout detector (`spec.md §3`, `§4.3`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::defaults;

/// Rolling reply-time history for one subject on one connection.
/// Entries expire from the owning cache after [`defaults::MONITOR_EXPIRY`]
/// of non-use; that expiry is enforced by the cache, not by this type.
#[derive(Debug)]
pub struct RequestMonitor {
    samples: Vec<Duration>,
    max: Duration,
    reply_count: u32,
    last_update: Instant,
}

impl RequestMonitor {
    pub fn new() -> Self {
        RequestMonitor {
            samples: Vec::with_capacity(defaults::SAMPLE_WINDOW),
            max: Duration::ZERO,
            reply_count: 0,
            last_update: Instant::now(),
        }
    }

    /// Record one observed reply time (`spec.md §4.3`, `addReplyTime`).
    pub fn add_reply_time(&mut self, elapsed: Duration) {
        self.max = self.max.max(elapsed);
        self.reply_count += 1;

        if self.reply_count >= defaults::WINDOW_UPDATE_SAMPLE_THRESHOLD
            && self.last_update.elapsed() > defaults::WINDOW_UPDATE_PERIOD
        {
            if self.samples.len() == defaults::SAMPLE_WINDOW {
                self.samples.remove(0);
            }
            self.samples.push(self.max);
            self.max = Duration::ZERO;
            self.reply_count = 0;
            self.last_update = Instant::now();
        }
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self.samples.iter().map(Duration::as_secs_f64).sum();
        total / self.samples.len() as f64
    }

    /// `phi(t) = (1/ln 10) * t / mean(samples)` once at least
    /// [`defaults::MIN_SAMPLES_FOR_PHI`] samples exist, else `0`. A
    /// `mean` of zero returns `100` (`spec.md §4.3`). With a window of
    /// [`defaults::SAMPLE_WINDOW`] entries this threshold is never
    /// reached in practice; see `spec.md §9`.
    fn phi(&self, elapsed: Duration) -> f64 {
        if (self.samples.len() as u32) < defaults::MIN_SAMPLES_FOR_PHI {
            return 0.0;
        }
        let mean = self.mean();
        if mean == 0.0 {
            return 100.0;
        }
        defaults::phi_factor() * elapsed.as_secs_f64() / mean
    }

    /// True iff the sample window is full and `phi(elapsed)` has
    /// crossed [`defaults::PHI_THRESHOLD`] (`spec.md §4.3`).
    pub fn is_timed_out(&self, elapsed: Duration) -> bool {
        self.samples.len() == defaults::SAMPLE_WINDOW && self.phi(elapsed) >= defaults::PHI_THRESHOLD
    }

    #[cfg(test)]
    fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Default for RequestMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Access-expiring `subject -> RequestMonitor` cache owned by one
/// client connection (`spec.md §4.3`).
#[derive(Debug, Default)]
pub struct MonitorCache {
    entries: HashMap<String, (RequestMonitor, Instant)>,
}

impl MonitorCache {
    pub fn new() -> Self {
        MonitorCache::default()
    }

    /// Look up (or create) the monitor for `subject`, refreshing its
    /// last-access time, and evicting any entry that has aged out.
    pub fn get_or_create(&mut self, subject: &str) -> &mut RequestMonitor {
        self.evict_expired();
        let (monitor, touched) = self
            .entries
            .entry(subject.to_string())
            .or_insert_with(|| (RequestMonitor::new(), Instant::now()));
        *touched = Instant::now();
        monitor
    }

    fn evict_expired(&mut self) {
        let expiry = defaults::MONITOR_EXPIRY;
        self.entries
            .retain(|_, (_, touched)| touched.elapsed() <= expiry);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_window(monitor: &mut RequestMonitor, value: Duration) {
        // Force a window roll without waiting 60s in tests: drive the
        // private fields directly via the public API by simulating the
        // threshold-crossing condition through repeated small sleeps is
        // impractical in a unit test, so exercise the sample vector
        // through the crate-internal constructor instead.
        monitor.samples.push(value);
        if monitor.samples.len() > defaults::SAMPLE_WINDOW {
            monitor.samples.remove(0);
        }
    }

    #[test]
    fn not_timed_out_until_window_is_full() {
        let mut monitor = RequestMonitor::new();
        for _ in 0..5 {
            fill_window(&mut monitor, Duration::from_millis(10));
        }
        assert_eq!(monitor.sample_count(), 5);
        assert!(!monitor.is_timed_out(Duration::from_secs(10)));
    }

    #[test]
    fn phi_branch_is_unreachable_with_a_full_window_of_ten() {
        let mut monitor = RequestMonitor::new();
        for _ in 0..defaults::SAMPLE_WINDOW {
            fill_window(&mut monitor, Duration::from_millis(10));
        }
        assert_eq!(monitor.sample_count(), defaults::SAMPLE_WINDOW);
        // Even an enormous elapsed time cannot trip phi, since
        // MIN_SAMPLES_FOR_PHI (25) can never be reached by a window
        // capped at 10 samples. This is the preserved quirk from
        // spec.md §9.
        assert!(!monitor.is_timed_out(Duration::from_secs(3600)));
    }

    #[test]
    fn monitor_cache_expires_unused_entries() {
        let mut cache = MonitorCache::new();
        cache.get_or_create("echo");
        assert_eq!(cache.len(), 1);
        // Can't fast-forward a real Instant in a unit test without a
        // clock abstraction; just confirm repeated access doesn't grow
        // the cache for the same subject.
        cache.get_or_create("echo");
        assert_eq!(cache.len(), 1);
    }
}
