//! Device monitor with a scripted reading

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Duration;
use somnia_core::{DeviceMonitor, DeviceState};

/// Reports `state`, switching to `after` once `reads_left` readings are used up
pub struct ScriptedDevice {
    state: Mutex<DeviceState>,
    after: Mutex<Option<(usize, DeviceState)>>,
    reads: AtomicUsize,
}

impl ScriptedDevice {
    pub fn new(state: DeviceState) -> Self {
        Self {
            state: Mutex::new(state),
            after: Mutex::new(None),
            reads: AtomicUsize::new(0),
        }
    }

    /// Charging, full, idle for hours, at 3am
    pub fn asleep() -> Self {
        Self::new(Self::asleep_state())
    }

    pub fn asleep_state() -> DeviceState {
        DeviceState {
            charging: true,
            battery_level: 1.0,
            idle: Duration::hours(3),
            free_memory_ratio: 0.9,
            local_hour: 3,
        }
    }

    /// Unplugged at 20% battery, in use
    pub fn in_use() -> DeviceState {
        DeviceState {
            charging: false,
            battery_level: 0.2,
            idle: Duration::minutes(1),
            free_memory_ratio: 0.5,
            local_hour: 14,
        }
    }

    pub fn set(&self, state: DeviceState) {
        *self.state.lock().unwrap() = state;
    }

    /// After `reads` more readings, report `state` instead
    pub fn switch_after(&self, reads: usize, state: DeviceState) {
        let at = self.reads.load(Ordering::SeqCst) + reads;
        *self.after.lock().unwrap() = Some((at, state));
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl DeviceMonitor for ScriptedDevice {
    fn device_state(&self) -> DeviceState {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some((at, state)) = *self.after.lock().unwrap() {
            if n >= at {
                return state;
            }
        }
        *self.state.lock().unwrap()
    }
}
