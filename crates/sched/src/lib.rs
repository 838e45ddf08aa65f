//! Admission-control scheduling
//!
//! Caps how many transactions run concurrently. Under contention, running
//! fewer transactions at once can commit more per second than running all
//! of them; the [`AdmissionGate`] enforces the cap on the begin path and
//! the [`Collector`] retunes it in the background from observed commit
//! throughput.
//!
//! The cap is a throughput knob, never a correctness one: any cap value
//! yields correct executions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collector;
pub mod gate;
pub mod model;

pub use collector::{Collector, StatsSource};
pub use gate::AdmissionGate;
pub use model::ThroughputModel;
