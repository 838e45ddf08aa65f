//! Analytic cap selection
//!
//! A closed-network throughput model for the admission cap, used instead
//! of the additive heuristic when configured. The runtime is modeled as a
//! closed system of `cap` concurrent transactions in which each attempt
//! either commits or aborts and retries; commits per second at cap `c`
//! are approximated as
//!
//! ```text
//! X(c) = c * mu * P(c)          P(c) = max(0, 1 - alpha * (c - 1))
//! ```
//!
//! where `mu` is the commit service rate of one uncontended transaction
//! and `alpha` is how much commit probability each added concurrent
//! transaction costs. Both are fitted from the last observation window,
//! so the model tracks workload phases: with no observed aborts `alpha`
//! is zero and throughput scales linearly, while under contention `X`
//! peaks at an interior cap and the tuner backs off. Experimental: a bad
//! fit costs throughput, never correctness.

/// One observation window at a fixed cap.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// Cap in force during the window.
    pub cap: usize,
    /// Committed transactions in the window.
    pub commits: u64,
    /// Aborted attempts in the window.
    pub aborts: u64,
    /// Window length in seconds.
    pub seconds: f64,
}

impl Observation {
    fn commit_rate(&self) -> f64 {
        if self.seconds > 0.0 {
            self.commits as f64 / self.seconds
        } else {
            0.0
        }
    }

    /// Fraction of attempts that aborted.
    fn abort_ratio(&self) -> f64 {
        let attempts = self.commits + self.aborts;
        if attempts == 0 {
            0.0
        } else {
            self.aborts as f64 / attempts as f64
        }
    }
}

/// Fitted throughput model.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputModel {
    mu: f64,
    alpha: f64,
}

impl ThroughputModel {
    /// Fit from one observation window.
    ///
    /// Returns `None` when the window carries too little signal to fit
    /// (no commits, or a single-transaction cap with nothing to
    /// extrapolate contention from).
    pub fn fit(obs: &Observation) -> Option<Self> {
        if obs.commits == 0 || obs.seconds <= 0.0 {
            return None;
        }
        let p_commit = 1.0 - obs.abort_ratio();
        if p_commit <= 0.0 {
            return None;
        }
        // X(c) = c * mu * P(c) and P(c) was observed directly, so the
        // per-transaction service rate falls out of the window.
        let mu = obs.commit_rate() / (obs.cap as f64 * p_commit);
        let alpha = if obs.cap > 1 {
            obs.abort_ratio() / (obs.cap as f64 - 1.0)
        } else {
            // No contention observable at cap 1; assume none.
            0.0
        };
        Some(ThroughputModel { mu, alpha })
    }

    /// Predicted commits per second at cap `c`.
    pub fn throughput(&self, cap: usize) -> f64 {
        if cap == 0 {
            return 0.0;
        }
        let c = cap as f64;
        let p = (1.0 - self.alpha * (c - 1.0)).max(0.0);
        c * self.mu * p
    }

    /// Cap in `1..=max_cap` with the highest predicted throughput.
    pub fn best_cap(&self, max_cap: usize) -> usize {
        let mut best = 1;
        let mut best_x = self.throughput(1);
        for cap in 2..=max_cap.max(1) {
            let x = self.throughput(cap);
            if x > best_x {
                best = cap;
                best_x = x;
            }
        }
        best
    }
}
