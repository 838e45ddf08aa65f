//! Background cap tuner
//!
//! A sampling thread reads commit/abort totals from the runtime every
//! tuning interval and retunes the admission cap. Two strategies:
//!
//! - additive hill climbing (default): move the cap by one in the
//!   direction that last improved commit throughput, reversing when a
//!   move made things worse
//! - the analytic model (experimental, config-gated): fit the window and
//!   jump to the predicted best cap
//!
//! Tuning only runs while threads are actually queued at the gate; an
//! idle gate means the cap is not the bottleneck and moving it would be
//! noise.

use crate::gate::AdmissionGate;
use crate::model::{Observation, ThroughputModel};
use filament_core::AdmissionConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Counter totals the tuner samples. Implemented by the runtime facade.
pub trait StatsSource: Send + Sync + 'static {
    /// Committed transactions since startup.
    fn total_commits(&self) -> u64;
    /// Aborted attempts since startup.
    fn total_aborts(&self) -> u64;
}

/// Handle to the background tuning thread.
pub struct Collector {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct Tuner {
    cfg: AdmissionConfig,
    gate: Arc<AdmissionGate>,
    source: Arc<dyn StatsSource>,
    max_cap: usize,
    last_commits: u64,
    last_aborts: u64,
    last_throughput: f64,
    direction: i64,
}

impl Tuner {
    fn step(&mut self, elapsed: Duration) {
        let commits = self.source.total_commits();
        let aborts = self.source.total_aborts();
        let window_commits = commits - self.last_commits;
        let window_aborts = aborts - self.last_aborts;
        self.last_commits = commits;
        self.last_aborts = aborts;

        if self.gate.queued() < self.cfg.min_queue_for_scaling {
            trace!(queued = self.gate.queued(), "gate idle, cap untouched");
            return;
        }

        let seconds = elapsed.as_secs_f64();
        let throughput = if seconds > 0.0 {
            window_commits as f64 / seconds
        } else {
            0.0
        };

        let cap = self.gate.cap();
        let next = if self.cfg.use_analytic_model {
            let obs = Observation {
                cap,
                commits: window_commits,
                aborts: window_aborts,
                seconds,
            };
            match ThroughputModel::fit(&obs) {
                Some(model) => model.best_cap(self.max_cap),
                None => cap,
            }
        } else {
            // Additive hill climbing: keep going while it helps.
            if throughput < self.last_throughput {
                self.direction = -self.direction;
            }
            (cap as i64 + self.direction).clamp(1, self.max_cap as i64) as usize
        };
        self.last_throughput = throughput;

        if next != cap {
            debug!(cap, next, throughput, "retuning admission cap");
            self.gate.set_cap(next);
        }
    }
}

impl Collector {
    /// Spawn the tuning thread. With `scaling` disabled in the
    /// configuration the thread is not started and the cap stays fixed.
    pub fn spawn(
        cfg: AdmissionConfig,
        gate: Arc<AdmissionGate>,
        source: Arc<dyn StatsSource>,
        max_cap: usize,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        if !cfg.scaling {
            return Collector { stop, handle: None };
        }
        let interval = Duration::from_millis(cfg.tuning_interval_ms);
        let stop2 = Arc::clone(&stop);
        let mut tuner = Tuner {
            cfg,
            gate,
            source,
            max_cap: max_cap.max(1),
            last_commits: 0,
            last_aborts: 0,
            last_throughput: 0.0,
            direction: 1,
        };
        let handle = std::thread::Builder::new()
            .name("filament-tuner".into())
            .spawn(move || {
                let mut last = Instant::now();
                while !stop2.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    let now = Instant::now();
                    tuner.step(now - last);
                    last = now;
                }
            })
            .ok();
        Collector { stop, handle }
    }

    /// Stop and join the tuning thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct FakeSource {
        commits: AtomicU64,
        aborts: AtomicU64,
    }

    impl StatsSource for FakeSource {
        fn total_commits(&self) -> u64 {
            self.commits.load(Ordering::Relaxed)
        }
        fn total_aborts(&self) -> u64 {
            self.aborts.load(Ordering::Relaxed)
        }
    }

    fn tuner(cfg: AdmissionConfig, gate: Arc<AdmissionGate>, source: Arc<FakeSource>) -> Tuner {
        Tuner {
            cfg,
            gate,
            source,
            max_cap: 16,
            last_commits: 0,
            last_aborts: 0,
            last_throughput: 0.0,
            direction: 1,
        }
    }

    #[test]
    fn test_idle_gate_leaves_cap_alone() {
        let gate = Arc::new(AdmissionGate::new(4));
        let source = Arc::new(FakeSource {
            commits: AtomicU64::new(100),
            aborts: AtomicU64::new(0),
        });
        let mut t = tuner(AdmissionConfig::default(), Arc::clone(&gate), source);
        t.step(Duration::from_millis(50));
        assert_eq!(gate.cap(), 4);
    }

    #[test]
    fn test_hill_climb_follows_throughput() {
        let gate = Arc::new(AdmissionGate::new(4));
        let source = Arc::new(FakeSource {
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        });
        let cfg = AdmissionConfig {
            min_queue_for_scaling: 0,
            ..AdmissionConfig::default()
        };
        let mut t = tuner(cfg, Arc::clone(&gate), Arc::clone(&source));

        source.commits.store(100, Ordering::Relaxed);
        t.step(Duration::from_millis(50));
        assert_eq!(gate.cap(), 5);

        // Improving throughput keeps the direction.
        source.commits.store(300, Ordering::Relaxed);
        t.step(Duration::from_millis(50));
        assert_eq!(gate.cap(), 6);

        // Worse throughput reverses it.
        source.commits.store(350, Ordering::Relaxed);
        t.step(Duration::from_millis(50));
        assert_eq!(gate.cap(), 5);
    }

    #[test]
    fn test_analytic_model_jumps_to_predicted_best() {
        let gate = Arc::new(AdmissionGate::new(8));
        let source = Arc::new(FakeSource {
            commits: AtomicU64::new(200),
            aborts: AtomicU64::new(800),
        });
        let cfg = AdmissionConfig {
            use_analytic_model: true,
            min_queue_for_scaling: 0,
            ..AdmissionConfig::default()
        };
        let mut t = tuner(cfg, Arc::clone(&gate), source);
        t.step(Duration::from_secs(1));
        assert!(gate.cap() < 8, "cap {} should back off", gate.cap());
    }

    #[test]
    fn test_collector_spawn_and_stop() {
        let gate = Arc::new(AdmissionGate::new(2));
        let source: Arc<dyn StatsSource> = Arc::new(FakeSource {
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        });
        let cfg = AdmissionConfig {
            tuning_interval_ms: 5,
            ..AdmissionConfig::default()
        };
        let mut collector = Collector::spawn(cfg, gate, source, 8);
        std::thread::sleep(Duration::from_millis(20));
        collector.stop();
    }
}
