// MIT License - Copyright (c) 2026 Peter Wright
// Partition state kinds and alarm-state mapping

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::constants::StatusKind;

/// Per-partition state kinds tracked by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionStateKind {
    /// Derived: configured partitions in no arming kind
    Disarmed,
    ArmedMode0,
    ArmedMode1,
    ArmedMode2,
    ArmedMode3,
    EntryTime,
    ExitCountdownOver10,
    ExitCountdownUnder10,
    Triggered,
    TriggeredFire,
}

/// How a state kind relates to the others on the same partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCategory {
    /// Computed from the arming kinds, never pushed.
    Derived,
    /// Mutually exclusive per partition.
    Arming,
    /// Independent flags.
    Alarm,
}

impl PartitionStateKind {
    pub const ALL: [PartitionStateKind; 10] = [
        Self::Disarmed,
        Self::ArmedMode0,
        Self::ArmedMode1,
        Self::ArmedMode2,
        Self::ArmedMode3,
        Self::EntryTime,
        Self::ExitCountdownOver10,
        Self::ExitCountdownUnder10,
        Self::Triggered,
        Self::TriggeredFire,
    ];

    pub const ARMING: [PartitionStateKind; 6] = [
        Self::ArmedMode0,
        Self::ArmedMode1,
        Self::ArmedMode2,
        Self::ArmedMode3,
        Self::ExitCountdownOver10,
        Self::ExitCountdownUnder10,
    ];

    /// Map a pushed status kind onto a partition state kind. Zone and output
    /// kinds have no partition counterpart.
    pub fn from_status(kind: StatusKind) -> Option<Self> {
        match kind {
            StatusKind::ArmedMode0 => Some(Self::ArmedMode0),
            StatusKind::ArmedMode1 => Some(Self::ArmedMode1),
            StatusKind::ArmedMode2 => Some(Self::ArmedMode2),
            StatusKind::ArmedMode3 => Some(Self::ArmedMode3),
            StatusKind::EntryTime => Some(Self::EntryTime),
            StatusKind::ExitCountdownOver10 => Some(Self::ExitCountdownOver10),
            StatusKind::ExitCountdownUnder10 => Some(Self::ExitCountdownUnder10),
            StatusKind::Triggered => Some(Self::Triggered),
            StatusKind::TriggeredFire => Some(Self::TriggeredFire),
            StatusKind::ZonesViolated | StatusKind::OutputsActive => None,
        }
    }

    pub fn category(&self) -> StateCategory {
        match self {
            Self::Disarmed => StateCategory::Derived,
            Self::ArmedMode0
            | Self::ArmedMode1
            | Self::ArmedMode2
            | Self::ArmedMode3
            | Self::ExitCountdownOver10
            | Self::ExitCountdownUnder10 => StateCategory::Arming,
            Self::EntryTime | Self::Triggered | Self::TriggeredFire => StateCategory::Alarm,
        }
    }

    pub fn is_arming(&self) -> bool {
        self.category() == StateCategory::Arming
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disarmed => "disarmed",
            Self::ArmedMode0 => "armed_mode0",
            Self::ArmedMode1 => "armed_mode1",
            Self::ArmedMode2 => "armed_mode2",
            Self::ArmedMode3 => "armed_mode3",
            Self::EntryTime => "entry_time",
            Self::ExitCountdownOver10 => "exit_countdown_over_10",
            Self::ExitCountdownUnder10 => "exit_countdown_under_10",
            Self::Triggered => "triggered",
            Self::TriggeredFire => "triggered_fire",
        }
    }
}

impl fmt::Display for PartitionStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alarm-panel state as shown to a user interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmState {
    Disarmed,
    ArmedHome,
    ArmedAway,
    Pending,
    Triggered,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disarmed => "disarmed",
            Self::ArmedHome => "armed_home",
            Self::ArmedAway => "armed_away",
            Self::Pending => "pending",
            Self::Triggered => "triggered",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First match wins.
pub const ALARM_STATE_PRIORITY: [(PartitionStateKind, AlarmState); 9] = [
    (PartitionStateKind::Triggered, AlarmState::Triggered),
    (PartitionStateKind::TriggeredFire, AlarmState::Triggered),
    (PartitionStateKind::EntryTime, AlarmState::Pending),
    (PartitionStateKind::ArmedMode3, AlarmState::ArmedHome),
    (PartitionStateKind::ArmedMode2, AlarmState::ArmedHome),
    (PartitionStateKind::ArmedMode1, AlarmState::ArmedHome),
    (PartitionStateKind::ArmedMode0, AlarmState::ArmedAway),
    (PartitionStateKind::ExitCountdownOver10, AlarmState::Pending),
    (PartitionStateKind::ExitCountdownUnder10, AlarmState::Pending),
];

/// Resolve the alarm state of `partition` from a partition-state snapshot.
pub fn alarm_state_for(
    states: &BTreeMap<PartitionStateKind, BTreeSet<u32>>,
    partition: u32,
) -> AlarmState {
    ALARM_STATE_PRIORITY
        .iter()
        .find(|(kind, _)| states.get(kind).is_some_and(|ids| ids.contains(&partition)))
        .map_or(AlarmState::Disarmed, |&(_, state)| state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(entries: &[(PartitionStateKind, &[u32])]) -> BTreeMap<PartitionStateKind, BTreeSet<u32>> {
        entries
            .iter()
            .map(|(kind, ids)| (*kind, ids.iter().copied().collect()))
            .collect()
    }

    #[test]
    fn test_from_status() {
        assert_eq!(
            PartitionStateKind::from_status(StatusKind::ArmedMode1),
            Some(PartitionStateKind::ArmedMode1)
        );
        assert_eq!(PartitionStateKind::from_status(StatusKind::ZonesViolated), None);
        assert_eq!(PartitionStateKind::from_status(StatusKind::OutputsActive), None);
    }

    #[test]
    fn test_categories() {
        for kind in PartitionStateKind::ARMING {
            assert!(kind.is_arming());
        }
        assert_eq!(PartitionStateKind::Triggered.category(), StateCategory::Alarm);
        assert_eq!(PartitionStateKind::EntryTime.category(), StateCategory::Alarm);
        assert_eq!(PartitionStateKind::Disarmed.category(), StateCategory::Derived);
    }

    #[test]
    fn test_armed_mode0_is_away() {
        let s = states(&[(PartitionStateKind::ArmedMode0, &[1])]);
        assert_eq!(alarm_state_for(&s, 1), AlarmState::ArmedAway);
        assert_eq!(alarm_state_for(&s, 2), AlarmState::Disarmed);
    }

    #[test]
    fn test_partial_modes_are_home() {
        for kind in [
            PartitionStateKind::ArmedMode1,
            PartitionStateKind::ArmedMode2,
            PartitionStateKind::ArmedMode3,
        ] {
            let s = states(&[(kind, &[3])]);
            assert_eq!(alarm_state_for(&s, 3), AlarmState::ArmedHome);
        }
    }

    #[test]
    fn test_alarm_outranks_arming() {
        let s = states(&[
            (PartitionStateKind::ArmedMode0, &[1]),
            (PartitionStateKind::Triggered, &[1]),
        ]);
        assert_eq!(alarm_state_for(&s, 1), AlarmState::Triggered);

        let s = states(&[
            (PartitionStateKind::ArmedMode0, &[1]),
            (PartitionStateKind::EntryTime, &[1]),
        ]);
        assert_eq!(alarm_state_for(&s, 1), AlarmState::Pending);
    }

    #[test]
    fn test_exit_countdown_is_pending() {
        let s = states(&[(PartitionStateKind::ExitCountdownUnder10, &[2])]);
        assert_eq!(alarm_state_for(&s, 2), AlarmState::Pending);
    }

    #[test]
    fn test_fire_is_triggered() {
        let s = states(&[(PartitionStateKind::TriggeredFire, &[4])]);
        assert_eq!(alarm_state_for(&s, 4), AlarmState::Triggered);
    }
}
