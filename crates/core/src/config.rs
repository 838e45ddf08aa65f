//! Engine configuration
//!
//! All knobs are fixed before any thread enters the runtime. Policy and
//! design names parse from strings so that benchmark drivers can pass them
//! through untyped configuration; unknown names are synchronous
//! [`Error::Config`](crate::error::Error::Config) failures.

use crate::error::{Error, Result};
use crate::word::VERSION_MAX;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Commit-protocol design variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DesignVariant {
    /// Write-back with encounter-time locking: stores acquire their lock
    /// eagerly and buffer the value; commit validates and writes back.
    #[default]
    WriteBackEtl,
    /// Write-back with commit-time locking: stores only buffer; all locks
    /// are acquired during commit.
    WriteBackCtl,
    /// Write-through: stores mutate memory immediately under the lock,
    /// recording undo entries replayed on abort.
    WriteThrough,
}

impl DesignVariant {
    /// Canonical name, as reported by the parameter surface.
    pub fn name(&self) -> &'static str {
        match self {
            DesignVariant::WriteBackEtl => "write-back-etl",
            DesignVariant::WriteBackCtl => "write-back-ctl",
            DesignVariant::WriteThrough => "write-through",
        }
    }
}

impl FromStr for DesignVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "write-back-etl" | "wbetl" | "etl" => Ok(DesignVariant::WriteBackEtl),
            "write-back-ctl" | "wbctl" | "ctl" => Ok(DesignVariant::WriteBackCtl),
            "write-through" | "wt" => Ok(DesignVariant::WriteThrough),
            other => Err(Error::Config(format!("unknown design variant '{other}'"))),
        }
    }
}

/// Contention-manager policy: which of two conflicting transactions dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ContentionPolicy {
    /// Always kill the other party.
    Aggressive,
    /// Always kill self.
    #[default]
    Suicide,
    /// Kill self and wait for the conflicting lock before restarting.
    Delay,
    /// Older transaction (by start timestamp, identity tie-break) wins.
    Timestamp,
    /// Transaction with more completed work wins.
    Karma,
}

impl ContentionPolicy {
    /// Canonical name, as reported by the parameter surface.
    pub fn name(&self) -> &'static str {
        match self {
            ContentionPolicy::Aggressive => "aggressive",
            ContentionPolicy::Suicide => "suicide",
            ContentionPolicy::Delay => "delay",
            ContentionPolicy::Timestamp => "timestamp",
            ContentionPolicy::Karma => "karma",
        }
    }
}

impl FromStr for ContentionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aggressive" => Ok(ContentionPolicy::Aggressive),
            "suicide" => Ok(ContentionPolicy::Suicide),
            "delay" => Ok(ContentionPolicy::Delay),
            "timestamp" => Ok(ContentionPolicy::Timestamp),
            "karma" => Ok(ContentionPolicy::Karma),
            other => Err(Error::Config(format!(
                "unknown contention policy '{other}'"
            ))),
        }
    }
}

/// Admission-control scheduler configuration.
///
/// Presence of this struct in [`Config`] enables the scheduler. Tuning is
/// a heuristic control loop: a wrong cap degrades throughput, never
/// correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Initial number of concurrently admitted transactions.
    pub initial_cap: usize,
    /// Whether the collector thread retunes the cap at runtime.
    pub scaling: bool,
    /// Queue length below which the collector leaves the cap alone.
    pub min_queue_for_scaling: usize,
    /// Collector sampling period in milliseconds.
    pub tuning_interval_ms: u64,
    /// Use the closed-network analytic throughput model instead of the
    /// additive heuristic. Experimental.
    pub use_analytic_model: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        AdmissionConfig {
            initial_cap: 4,
            scaling: true,
            min_queue_for_scaling: 1,
            tuning_interval_ms: 50,
            use_analytic_model: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of threads that may register with the runtime.
    pub max_threads: usize,
    /// Transactional heap size in words.
    pub heap_words: usize,
    /// Commit-protocol design.
    pub design: DesignVariant,
    /// Contention-manager policy.
    pub contention: ContentionPolicy,
    /// Initial read/write-set capacity per thread (sets grow dynamically).
    pub initial_set_capacity: usize,
    /// log2 of the lock-table size.
    pub lock_bits: u32,
    /// Version ceiling triggering the quiesce-and-rollover protocol.
    /// Lowered by tests to exercise rollover; production leaves the
    /// default.
    pub version_max: u64,
    /// Abort-and-retry budget per `atomically` call; `None` retries
    /// forever.
    pub max_retries: Option<u64>,
    /// Admission-control scheduler; `None` disables it.
    pub admission: Option<AdmissionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_threads: 64,
            heap_words: 1 << 20,
            design: DesignVariant::default(),
            contention: ContentionPolicy::default(),
            initial_set_capacity: 1024,
            lock_bits: 20,
            version_max: VERSION_MAX,
            max_retries: None,
            admission: None,
        }
    }
}

impl Config {
    /// Validate the configuration. Called once by runtime construction.
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(Error::Config("max_threads must be at least 1".into()));
        }
        // Owner slots are packed into 16 bits of the lock word.
        if self.max_threads > u16::MAX as usize {
            return Err(Error::Config(format!(
                "max_threads {} exceeds the {} owner-slot limit",
                self.max_threads,
                u16::MAX
            )));
        }
        if self.heap_words == 0 {
            return Err(Error::Config("heap_words must be non-zero".into()));
        }
        if self.lock_bits == 0 || self.lock_bits > 32 {
            return Err(Error::Config(format!(
                "lock_bits {} outside supported range 1..=32",
                self.lock_bits
            )));
        }
        if self.version_max == 0 || self.version_max > VERSION_MAX {
            return Err(Error::Config(format!(
                "version_max must be in 1..={VERSION_MAX}"
            )));
        }
        if let Some(adm) = &self.admission {
            if adm.initial_cap == 0 {
                return Err(Error::Config("admission initial_cap must be >= 1".into()));
            }
            if adm.tuning_interval_ms == 0 && adm.scaling {
                return Err(Error::Config(
                    "admission tuning_interval_ms must be non-zero when scaling".into(),
                ));
            }
        }
        Ok(())
    }
}
