// MIT License - Copyright (c) 2026 Peter Wright
// Live state model

pub mod cache;
pub mod partition;

pub use cache::{StateCache, TemperatureReading};
pub use partition::{alarm_state_for, AlarmState, PartitionStateKind, StateCategory, ALARM_STATE_PRIORITY};
