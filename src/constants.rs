// MIT License - Copyright (c) 2026 Peter Wright
// Protocol constants

/// Frame delimiter byte. Two of them start a frame, `SYNC END` ends it.
pub const SYNC: u8 = 0xFE;
/// Second byte of the end-of-frame marker.
pub const END: u8 = 0x0D;
/// Follows a `SYNC` byte inside a frame body to mean a literal `0xFE`.
pub const STUFF: u8 = 0xF0;

/// Initial value of the frame checksum.
pub const CRC_INIT: u16 = 0x147A;

/// Frame kind bytes.
pub const KIND_REQUEST: u8 = 0x01;
pub const KIND_RESPONSE: u8 = 0x02;
pub const KIND_STATUS: u8 = 0x03;
pub const KIND_TEMPERATURE: u8 = 0x04;

/// Correlation id used by frames the panel pushes on its own.
pub const PUSH_CORRELATION_ID: u8 = 0;

/// Largest unstuffed frame body accepted by the decoder.
pub const MAX_BODY_LEN: usize = 512;

/// Longest integration key the ETHM module accepts.
pub const MAX_INTEGRATION_KEY_LEN: usize = 12;

/// Longest user code (digits) that fits the 8-byte BCD field.
pub const MAX_CODE_DIGITS: usize = 16;
pub const USER_CODE_LEN: usize = 8;

pub const MAX_PARTITIONS: u32 = 32;
pub const MAX_ZONES: u32 = 256;
pub const MAX_OUTPUTS: u32 = 256;
pub const MAX_TEMPERATURE_SENSORS: u32 = 256;

/// Mask widths for partition and zone/output bitmaps.
pub const PARTITION_MASK_LEN: usize = 4;
pub const DEVICE_MASK_LEN: usize = 32;
/// Width of the monitoring subscription bitmap.
pub const MONITOR_MASK_LEN: usize = 6;

/// Request command codes.
pub const CMD_ARM_MODE0: u8 = 0x80;
pub const CMD_ARM_MODE1: u8 = 0x81;
pub const CMD_ARM_MODE2: u8 = 0x82;
pub const CMD_ARM_MODE3: u8 = 0x83;
pub const CMD_DISARM: u8 = 0x84;
pub const CMD_CLEAR_ALARM: u8 = 0x85;
pub const CMD_OUTPUTS_ON: u8 = 0x88;
pub const CMD_OUTPUTS_OFF: u8 = 0x89;
pub const CMD_READ_TEMPERATURE: u8 = 0x7D;
pub const CMD_KEEP_ALIVE: u8 = 0x7E;
pub const CMD_START_MONITORING: u8 = 0x7F;

/// Raw temperature value meaning "undetermined".
pub const TEMPERATURE_UNDETERMINED: u16 = 0xFFFF;
/// Offset subtracted from the raw temperature before halving.
pub const TEMPERATURE_OFFSET: u16 = 0x6E;

/// Kinds of status the panel pushes, keyed by their wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum StatusKind {
    ZonesViolated = 0x00,
    ArmedMode0 = 0x09,
    ArmedMode2 = 0x0A,
    ArmedMode3 = 0x0B,
    EntryTime = 0x0E,
    ExitCountdownOver10 = 0x0F,
    ExitCountdownUnder10 = 0x10,
    Triggered = 0x13,
    TriggeredFire = 0x14,
    OutputsActive = 0x17,
    ArmedMode1 = 0x2A,
}

impl StatusKind {
    pub const ALL: [StatusKind; 11] = [
        Self::ZonesViolated,
        Self::ArmedMode0,
        Self::ArmedMode1,
        Self::ArmedMode2,
        Self::ArmedMode3,
        Self::EntryTime,
        Self::ExitCountdownOver10,
        Self::ExitCountdownUnder10,
        Self::Triggered,
        Self::TriggeredFire,
        Self::OutputsActive,
    ];

    pub fn from_code(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::ZonesViolated),
            0x09 => Some(Self::ArmedMode0),
            0x0A => Some(Self::ArmedMode2),
            0x0B => Some(Self::ArmedMode3),
            0x0E => Some(Self::EntryTime),
            0x0F => Some(Self::ExitCountdownOver10),
            0x10 => Some(Self::ExitCountdownUnder10),
            0x13 => Some(Self::Triggered),
            0x14 => Some(Self::TriggeredFire),
            0x17 => Some(Self::OutputsActive),
            0x2A => Some(Self::ArmedMode1),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Whether the status bitmap addresses partitions (as opposed to zones/outputs).
    pub fn is_partition_kind(&self) -> bool {
        !matches!(self, Self::ZonesViolated | Self::OutputsActive)
    }

    /// Width of the bitmap carried by a push of this kind.
    pub fn mask_len(&self) -> usize {
        if self.is_partition_kind() {
            PARTITION_MASK_LEN
        } else {
            DEVICE_MASK_LEN
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ZonesViolated => "Zones violated",
            Self::ArmedMode0 => "Armed (mode 0)",
            Self::ArmedMode1 => "Armed (mode 1)",
            Self::ArmedMode2 => "Armed (mode 2)",
            Self::ArmedMode3 => "Armed (mode 3)",
            Self::EntryTime => "Entry time",
            Self::ExitCountdownOver10 => "Exit time > 10s",
            Self::ExitCountdownUnder10 => "Exit time < 10s",
            Self::Triggered => "Alarm",
            Self::TriggeredFire => "Fire alarm",
            Self::OutputsActive => "Outputs active",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_kind_codes() {
        for kind in StatusKind::ALL {
            assert_eq!(StatusKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(StatusKind::from_code(0x55), None);
    }

    #[test]
    fn test_status_kind_fits_monitor_mask() {
        for kind in StatusKind::ALL {
            assert!((kind.code() as usize) < MONITOR_MASK_LEN * 8);
        }
    }

    #[test]
    fn test_mask_len() {
        assert_eq!(StatusKind::ArmedMode0.mask_len(), 4);
        assert_eq!(StatusKind::ZonesViolated.mask_len(), 32);
        assert_eq!(StatusKind::OutputsActive.mask_len(), 32);
    }
}
