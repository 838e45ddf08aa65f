//! Contention-manager policies
//!
//! When a transaction hits a slot owned by a live peer, the policy decides
//! who yields. The decision is pure: it looks at two snapshots and returns
//! a verdict; delivering the kill (or backing off) is the engine's job,
//! and the CAS on the victim's status word may still fail if the victim
//! moved on, in which case the engine simply re-reads and retries.

use filament_core::ContentionPolicy;
use std::time::Duration;

/// Snapshot of one contender, taken from its shared descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Contender {
    /// Registry slot.
    pub slot: u16,
    /// Published start timestamp.
    pub start: u64,
    /// Read-set size.
    pub reads: u64,
    /// Write-set size.
    pub writes: u64,
    /// Holds irrevocable rights; never loses.
    pub irrevocable: bool,
}

impl Contender {
    /// Accumulated work for the karma policy. Writes weigh double since
    /// they already paid for lock acquisition.
    fn karma(&self) -> u64 {
        2 * self.writes + self.reads
    }
}

/// Who rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Victim {
    /// The transaction that detected the conflict aborts itself.
    Us,
    /// The current owner is killed; the detector waits for it to release.
    Them,
}

/// A policy verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Who yields.
    pub victim: Victim,
    /// Backoff the loser applies before its next attempt, when the policy
    /// asks for one.
    pub backoff: Option<Duration>,
    /// Whether a self-victim should wait for the specific slot to be
    /// released before retrying, rather than restarting immediately.
    pub wait_for_lock: bool,
}

impl Decision {
    fn us() -> Self {
        Decision {
            victim: Victim::Us,
            backoff: None,
            wait_for_lock: false,
        }
    }

    fn them() -> Self {
        Decision {
            victim: Victim::Them,
            backoff: None,
            wait_for_lock: false,
        }
    }
}

/// Base backoff for the delay and timestamp policies. Doubles per
/// consecutive loss, capped at [`MAX_BACKOFF`].
const BASE_BACKOFF: Duration = Duration::from_micros(1);
/// Cap on exponential backoff.
const MAX_BACKOFF: Duration = Duration::from_millis(1);

/// Exponential backoff for the `losses`-th consecutive loss.
pub fn backoff_for(losses: u32) -> Duration {
    let exp = losses.min(10);
    (BASE_BACKOFF * 2u32.pow(exp)).min(MAX_BACKOFF)
}

/// Decide a conflict between `us` (the detector) and `them` (the current
/// owner). `losses` is the detector's consecutive-loss count, feeding the
/// backoff curve.
pub fn decide(
    policy: ContentionPolicy,
    us: &Contender,
    them: &Contender,
    losses: u32,
) -> Decision {
    // Irrevocable transactions never yield; if we hold the rights the
    // owner must, and vice versa.
    if us.irrevocable {
        return Decision::them();
    }
    if them.irrevocable {
        return Decision {
            wait_for_lock: true,
            ..Decision::us()
        };
    }

    match policy {
        ContentionPolicy::Aggressive => Decision::them(),
        ContentionPolicy::Suicide => Decision::us(),
        ContentionPolicy::Delay => Decision {
            wait_for_lock: true,
            ..Decision::us()
        },
        ContentionPolicy::Timestamp => {
            // Older transaction (smaller start) wins; ties break on slot
            // so the outcome is deterministic either way round.
            let we_win = (us.start, us.slot) < (them.start, them.slot);
            if we_win {
                Decision::them()
            } else {
                Decision {
                    backoff: Some(backoff_for(losses)),
                    ..Decision::us()
                }
            }
        }
        ContentionPolicy::Karma => {
            let we_win = (us.karma(), them.slot) > (them.karma(), us.slot);
            if we_win {
                Decision::them()
            } else {
                Decision {
                    backoff: Some(backoff_for(losses)),
                    ..Decision::us()
                }
            }
        }
    }
}
