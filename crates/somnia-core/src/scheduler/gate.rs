//! Start conditions for background cycles
//!
//! Every condition of a cycle kind must hold at once. A closed gate is an
//! outcome, not an error: the cycle simply does not start.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;

/// Device conditions as reported by the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceState {
    pub charging: bool,
    /// Battery level in [0, 1]
    pub battery_level: f64,
    /// Time since the last foreground activity
    pub idle: Duration,
    /// Free share of device memory in [0, 1]
    pub free_memory_ratio: f64,
    /// Current local hour, 0-23
    pub local_hour: u32,
}

/// Source of [`DeviceState`] readings
pub trait DeviceMonitor: Send + Sync {
    fn device_state(&self) -> DeviceState;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    /// Light background learning over recent context
    Light,
    /// Full nightly integration
    Nightly,
}

impl CycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleKind::Light => "light",
            CycleKind::Nightly => "nightly",
        }
    }
}

impl std::fmt::Display for CycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unmet condition
#[derive(Debug, Clone, PartialEq)]
pub enum GateViolation {
    NotCharging,
    BatteryLow { level: f64, threshold: f64 },
    OutsideNightWindow { hour: u32, start: u32, end: u32 },
    NotIdle { idle: Duration, required: Duration },
    LowFreeMemory { ratio: f64, threshold: f64 },
}

impl std::fmt::Display for GateViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateViolation::NotCharging => write!(f, "device not charging"),
            GateViolation::BatteryLow { level, threshold } => {
                write!(f, "battery {:.2} below {:.2}", level, threshold)
            }
            GateViolation::OutsideNightWindow { hour, start, end } => {
                write!(f, "hour {} outside night window {:02}:00-{:02}:00", hour, start, end)
            }
            GateViolation::NotIdle { idle, required } => write!(
                f,
                "idle {}m, need {}m",
                idle.num_minutes(),
                required.num_minutes()
            ),
            GateViolation::LowFreeMemory { ratio, threshold } => {
                write!(f, "free memory {:.2} below {:.2}", ratio, threshold)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Open,
    Closed(Vec<GateViolation>),
}

impl GateDecision {
    pub fn is_open(&self) -> bool {
        matches!(self, GateDecision::Open)
    }

    pub fn violations(&self) -> &[GateViolation] {
        match self {
            GateDecision::Open => &[],
            GateDecision::Closed(v) => v,
        }
    }
}

/// Check every condition of `kind` against a device reading
pub fn evaluate_gate(kind: CycleKind, state: &DeviceState, config: &MemoryConfig) -> GateDecision {
    let mut violations = Vec::new();

    match kind {
        CycleKind::Light => {
            let bg = &config.background;
            if !state.charging && state.battery_level < bg.battery_threshold {
                violations.push(GateViolation::BatteryLow {
                    level: state.battery_level,
                    threshold: bg.battery_threshold,
                });
            }
            if state.idle < bg.idle_threshold() {
                violations.push(GateViolation::NotIdle {
                    idle: state.idle,
                    required: bg.idle_threshold(),
                });
            }
            if state.free_memory_ratio < bg.free_memory_ratio {
                violations.push(GateViolation::LowFreeMemory {
                    ratio: state.free_memory_ratio,
                    threshold: bg.free_memory_ratio,
                });
            }
        }
        CycleKind::Nightly => {
            let nightly = &config.nightly;
            if !state.charging {
                violations.push(GateViolation::NotCharging);
            }
            if !nightly.in_window(state.local_hour) {
                violations.push(GateViolation::OutsideNightWindow {
                    hour: state.local_hour,
                    start: nightly.window_start_hour,
                    end: nightly.window_end_hour,
                });
            }
            if state.idle < nightly.idle_threshold() {
                violations.push(GateViolation::NotIdle {
                    idle: state.idle,
                    required: nightly.idle_threshold(),
                });
            }
            if state.free_memory_ratio < nightly.free_memory_ratio {
                violations.push(GateViolation::LowFreeMemory {
                    ratio: state.free_memory_ratio,
                    threshold: nightly.free_memory_ratio,
                });
            }
        }
    }

    if violations.is_empty() {
        GateDecision::Open
    } else {
        GateDecision::Closed(violations)
    }
}
