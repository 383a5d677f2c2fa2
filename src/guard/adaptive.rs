//! Load-adaptive limit scaling.
//!
//! When system load climbs past a configured threshold, every rule's request
//! limit is scaled down proportionally so the backend sheds traffic before it
//! falls over. The load scalar is sampled through a [`LoadProbe`] at most
//! once per sampling interval.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::System;
use tracing::debug;

use crate::clock::Clock;

/// Weight of CPU utilization in the blended load scalar.
const CPU_WEIGHT: f64 = 0.7;
/// Weight of memory pressure in the blended load scalar.
const MEMORY_WEIGHT: f64 = 0.3;

/// Source of a system load scalar in `[0, 1]`.
pub trait LoadProbe: Send + Sync {
    fn sample(&self) -> f64;
}

/// Probe blending CPU utilization and memory pressure via `sysinfo`.
pub struct SystemLoadProbe {
    system: Mutex<System>,
}

impl SystemLoadProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemLoadProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProbe for SystemLoadProbe {
    fn sample(&self) -> f64 {
        let mut sys = self.system.lock();
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let cpu = sys.global_cpu_usage() as f64 / 100.0;
        let memory = if sys.total_memory() > 0 {
            sys.used_memory() as f64 / sys.total_memory() as f64
        } else {
            0.0
        };

        (cpu * CPU_WEIGHT + memory * MEMORY_WEIGHT).clamp(0.0, 1.0)
    }
}

/// Probe returning a preset load, for tests and host-driven overrides.
#[derive(Debug, Default)]
pub struct FixedLoadProbe {
    load: Mutex<f64>,
}

impl FixedLoadProbe {
    pub fn new(load: f64) -> Self {
        Self {
            load: Mutex::new(load),
        }
    }

    pub fn set(&self, load: f64) {
        *self.load.lock() = load;
    }
}

impl LoadProbe for FixedLoadProbe {
    fn sample(&self) -> f64 {
        *self.load.lock()
    }
}

/// Scales rule limits by current system load.
pub struct AdaptiveController {
    probe: Arc<dyn LoadProbe>,
    clock: Arc<dyn Clock>,
    load_threshold: f64,
    adaptive_factor: f64,
    sample_interval: Duration,
    cached: Mutex<Option<(DateTime<Utc>, f64)>>,
}

impl AdaptiveController {
    /// `load_threshold` is the load above which scaling begins;
    /// `adaptive_factor` caps the reduction applied at full load;
    /// `sample_interval` bounds how often the probe runs (never below 10s).
    pub fn new(
        probe: Arc<dyn LoadProbe>,
        clock: Arc<dyn Clock>,
        load_threshold: f64,
        adaptive_factor: f64,
        sample_interval: Duration,
    ) -> Self {
        Self {
            probe,
            clock,
            load_threshold,
            adaptive_factor,
            sample_interval: sample_interval.max(Duration::seconds(10)),
            cached: Mutex::new(None),
        }
    }

    /// Current load scalar, re-sampled at most once per interval.
    pub fn current_load(&self) -> f64 {
        let now = self.clock.now();
        let mut cached = self.cached.lock();
        if let Some((sampled_at, load)) = *cached {
            if now - sampled_at < self.sample_interval {
                return load;
            }
        }
        let load = self.probe.sample().clamp(0.0, 1.0);
        debug!(load = load, "Sampled system load");
        *cached = Some((now, load));
        load
    }

    /// Effective limit for a base rule under the current load.
    pub fn effective_limit(&self, base_limit: u32) -> u32 {
        scaled_limit(
            base_limit,
            self.current_load(),
            self.load_threshold,
            self.adaptive_factor,
        )
    }
}

/// Pure scaling rule: below the threshold the base limit is untouched; above
/// it the limit shrinks linearly toward `base * (1 - adaptive_factor)` at
/// full load, and never drops below 1.
fn scaled_limit(base_limit: u32, load: f64, load_threshold: f64, adaptive_factor: f64) -> u32 {
    if load <= load_threshold || load_threshold >= 1.0 {
        return base_limit;
    }
    let reduction = (load - load_threshold) / (1.0 - load_threshold) * adaptive_factor;
    ((base_limit as f64) * (1.0 - reduction)).floor().max(1.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_scaling_matches_reference_points() {
        // base=100, threshold=0.75, factor=0.4
        assert_eq!(scaled_limit(100, 0.5, 0.75, 0.4), 100);
        assert_eq!(scaled_limit(100, 0.75, 0.75, 0.4), 100);
        assert_eq!(scaled_limit(100, 1.0, 0.75, 0.4), 60);
    }

    #[test]
    fn test_scaling_is_monotonically_non_increasing() {
        let mut previous = u32::MAX;
        for step in 0..=100 {
            let load = step as f64 / 100.0;
            let limit = scaled_limit(100, load, 0.75, 0.4);
            assert!(limit <= previous, "limit rose as load increased");
            assert!(limit >= 1);
            previous = limit;
        }
    }

    #[test]
    fn test_scaling_never_drops_below_one() {
        assert_eq!(scaled_limit(1, 1.0, 0.1, 1.0), 1);
        assert_eq!(scaled_limit(2, 1.0, 0.1, 1.0), 1);
    }

    struct CountingProbe {
        calls: AtomicUsize,
        load: f64,
    }

    impl LoadProbe for CountingProbe {
        fn sample(&self) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.load
        }
    }

    #[test]
    fn test_probe_sampled_at_most_once_per_interval() {
        let clock = Arc::new(ManualClock::starting_now());
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            load: 0.5,
        });
        let controller = AdaptiveController::new(
            probe.clone(),
            clock.clone(),
            0.75,
            0.4,
            Duration::seconds(10),
        );

        for _ in 0..50 {
            controller.current_load();
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        clock.advance_secs(10);
        controller.current_load();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_effective_limit_tracks_probe() {
        let clock = Arc::new(ManualClock::starting_now());
        let probe = Arc::new(FixedLoadProbe::new(1.0));
        let controller =
            AdaptiveController::new(probe, clock, 0.75, 0.4, Duration::seconds(10));
        assert_eq!(controller.effective_limit(100), 60);
    }
}
