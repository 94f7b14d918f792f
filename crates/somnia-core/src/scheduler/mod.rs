//! Background scheduling
//!
//! - [`evaluate_gate`]: device conditions a cycle needs before it starts
//! - [`ActivityTracker`]: foreground activity, for idle detection
//! - [`BackgroundScheduler`]: runs one light or nightly cycle at a time

mod activity;
mod background;
mod gate;

pub use activity::{ActivityStats, ActivityTracker};
pub use background::{BackgroundScheduler, CycleReport, CycleState, LightCycleReport, StartOutcome};
pub use gate::{CycleKind, DeviceMonitor, DeviceState, GateDecision, GateViolation, evaluate_gate};
