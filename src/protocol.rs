// MIT License - Copyright (c) 2026 Peter Wright
// Typed frames and command payloads

use std::collections::BTreeSet;
use std::fmt;

use bitflags::bitflags;

use crate::config::{check_ids, ArmMode};
use crate::constants::*;
use crate::error::{ResultCode, Result, SatelError};

/// A user (PIN) code, stored as the 8-byte BCD field the panel expects.
///
/// Digits are packed high nibble first and right-padded with `0xF` nibbles,
/// so `"1234"` becomes `12 34 FF FF FF FF FF FF`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserCode([u8; USER_CODE_LEN]);

impl UserCode {
    /// Parse a numeric code. Empty or blank codes are refused outright.
    pub fn parse(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.is_empty() {
            return Err(SatelError::EmptyCode);
        }
        if code.len() > MAX_CODE_DIGITS {
            return Err(SatelError::InvalidCode {
                reason: format!("more than {} digits", MAX_CODE_DIGITS),
            });
        }
        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SatelError::InvalidCode {
                reason: "code must be numeric".to_string(),
            });
        }

        let mut bytes = [0xFFu8; USER_CODE_LEN];
        for (i, digit) in code.bytes().map(|b| b - b'0').enumerate() {
            let byte = &mut bytes[i / 2];
            if i % 2 == 0 {
                *byte = (digit << 4) | 0x0F;
            } else {
                *byte = (*byte & 0xF0) | digit;
            }
        }
        Ok(Self(bytes))
    }

    /// Rebuild a code from its wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; USER_CODE_LEN] = bytes
            .try_into()
            .map_err(|_| SatelError::malformed("user code field must be 8 bytes"))?;
        let code = Self(raw);
        // Validates the nibble layout
        let digits = code.digits()?;
        if digits.is_empty() {
            return Err(SatelError::EmptyCode);
        }
        Ok(code)
    }

    pub fn as_bytes(&self) -> &[u8; USER_CODE_LEN] {
        &self.0
    }

    fn digits(&self) -> Result<String> {
        let mut out = String::with_capacity(MAX_CODE_DIGITS);
        let mut padding = false;
        for nibble in self.0.iter().flat_map(|b| [b >> 4, b & 0x0F]) {
            match nibble {
                0x0F => padding = true,
                d @ 0..=9 if !padding => out.push(char::from(b'0' + d)),
                _ => return Err(SatelError::malformed("invalid BCD digit in user code")),
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for UserCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the digits
        f.write_str("UserCode(****)")
    }
}

bitflags! {
    /// Status kinds the client asks the panel to push. Each flag sits at the
    /// bit position of the kind's wire code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MonitorFlags: u64 {
        const ZONES_VIOLATED          = 1 << 0x00;
        const ARMED_MODE0             = 1 << 0x09;
        const ARMED_MODE2             = 1 << 0x0A;
        const ARMED_MODE3             = 1 << 0x0B;
        const ENTRY_TIME              = 1 << 0x0E;
        const EXIT_COUNTDOWN_OVER_10  = 1 << 0x0F;
        const EXIT_COUNTDOWN_UNDER_10 = 1 << 0x10;
        const TRIGGERED               = 1 << 0x13;
        const TRIGGERED_FIRE          = 1 << 0x14;
        const OUTPUTS_ACTIVE          = 1 << 0x17;
        const ARMED_MODE1             = 1 << 0x2A;
    }
}

impl MonitorFlags {
    /// Every partition-level kind.
    pub fn partitions() -> Self {
        StatusKind::ALL
            .iter()
            .filter(|k| k.is_partition_kind())
            .map(|&k| Self::from(k))
            .collect()
    }

    /// The status kinds in this set, in wire-code order.
    pub fn kinds(&self) -> Vec<StatusKind> {
        let mut kinds: Vec<StatusKind> = StatusKind::ALL
            .into_iter()
            .filter(|&k| self.contains(Self::from(k)))
            .collect();
        kinds.sort();
        kinds
    }
}

impl From<StatusKind> for MonitorFlags {
    fn from(kind: StatusKind) -> Self {
        Self::from_bits_retain(1u64 << kind.code())
    }
}

/// Encode a set of 1-based ids as an LSB-first bitmap of `len` bytes.
pub fn encode_mask(ids: &BTreeSet<u32>, len: usize) -> Vec<u8> {
    let mut mask = vec![0u8; len];
    for &id in ids {
        let bit = (id - 1) as usize;
        if let Some(byte) = mask.get_mut(bit / 8) {
            *byte |= 1 << (bit % 8);
        }
    }
    mask
}

/// Decode an LSB-first bitmap into the set of 1-based ids it marks.
pub fn decode_mask(mask: &[u8]) -> BTreeSet<u32> {
    let mut ids = BTreeSet::new();
    for (i, &byte) in mask.iter().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                ids.insert((i * 8 + bit) as u32 + 1);
            }
        }
    }
    ids
}

/// Commands the client sends to the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `0x80..=0x83` - Arm partitions in the given mode.
    Arm {
        mode: ArmMode,
        code: UserCode,
        partitions: BTreeSet<u32>,
    },
    /// `0x84` - Disarm partitions.
    Disarm {
        code: UserCode,
        partitions: BTreeSet<u32>,
    },
    /// `0x85` - Clear alarm memory on partitions.
    ClearAlarm {
        code: UserCode,
        partitions: BTreeSet<u32>,
    },
    /// `0x88` / `0x89` - Switch outputs on or off.
    SetOutputs {
        on: bool,
        code: UserCode,
        outputs: BTreeSet<u32>,
    },
    /// `0x7D` - Ask the panel to push the temperature of a zone sensor.
    ReadTemperature { sensor: u32 },
    /// `0x7F` - Subscribe to status pushes; the panel answers with the
    /// current state of every requested kind.
    StartMonitoring { kinds: MonitorFlags },
    /// `0x7E` - Keep-alive.
    KeepAlive,
}

impl Command {
    pub fn arm(code: &str, partitions: &[u32], mode: ArmMode) -> Result<Self> {
        Ok(Command::Arm {
            mode,
            code: UserCode::parse(code)?,
            partitions: targets(partitions, MAX_PARTITIONS)?,
        })
    }

    pub fn disarm(code: &str, partitions: &[u32]) -> Result<Self> {
        Ok(Command::Disarm {
            code: UserCode::parse(code)?,
            partitions: targets(partitions, MAX_PARTITIONS)?,
        })
    }

    pub fn clear_alarm(code: &str, partitions: &[u32]) -> Result<Self> {
        Ok(Command::ClearAlarm {
            code: UserCode::parse(code)?,
            partitions: targets(partitions, MAX_PARTITIONS)?,
        })
    }

    pub fn set_outputs(code: &str, outputs: &[u32], on: bool) -> Result<Self> {
        Ok(Command::SetOutputs {
            on,
            code: UserCode::parse(code)?,
            outputs: targets(outputs, MAX_OUTPUTS)?,
        })
    }

    pub fn read_temperature(sensor: u32) -> Result<Self> {
        check_ids(&[sensor], MAX_TEMPERATURE_SENSORS)?;
        Ok(Command::ReadTemperature { sensor })
    }

    /// Command code byte.
    pub fn code(&self) -> u8 {
        match self {
            Command::Arm { mode, .. } => match mode {
                ArmMode::Mode0 => CMD_ARM_MODE0,
                ArmMode::Mode1 => CMD_ARM_MODE1,
                ArmMode::Mode2 => CMD_ARM_MODE2,
                ArmMode::Mode3 => CMD_ARM_MODE3,
            },
            Command::Disarm { .. } => CMD_DISARM,
            Command::ClearAlarm { .. } => CMD_CLEAR_ALARM,
            Command::SetOutputs { on: true, .. } => CMD_OUTPUTS_ON,
            Command::SetOutputs { on: false, .. } => CMD_OUTPUTS_OFF,
            Command::ReadTemperature { .. } => CMD_READ_TEMPERATURE,
            Command::StartMonitoring { .. } => CMD_START_MONITORING,
            Command::KeepAlive => CMD_KEEP_ALIVE,
        }
    }

    /// Short name for logs and timeout errors.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Arm { .. } => "arm",
            Command::Disarm { .. } => "disarm",
            Command::ClearAlarm { .. } => "clear_alarm",
            Command::SetOutputs { on: true, .. } => "outputs_on",
            Command::SetOutputs { on: false, .. } => "outputs_off",
            Command::ReadTemperature { .. } => "read_temperature",
            Command::StartMonitoring { .. } => "start_monitoring",
            Command::KeepAlive => "keep_alive",
        }
    }

    /// Request payload: command code followed by its data.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = vec![self.code()];
        match self {
            Command::Arm {
                code, partitions, ..
            }
            | Command::Disarm { code, partitions }
            | Command::ClearAlarm { code, partitions } => {
                out.extend_from_slice(code.as_bytes());
                out.extend(encode_mask(partitions, PARTITION_MASK_LEN));
            }
            Command::SetOutputs { code, outputs, .. } => {
                out.extend_from_slice(code.as_bytes());
                out.extend(encode_mask(outputs, DEVICE_MASK_LEN));
            }
            Command::ReadTemperature { sensor } => out.push(sensor_to_wire(*sensor)),
            Command::StartMonitoring { kinds } => {
                out.extend_from_slice(&kinds.bits().to_le_bytes()[..MONITOR_MASK_LEN]);
            }
            Command::KeepAlive => {}
        }
        out
    }

    /// Parse a request payload back into a command.
    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        let (&code, data) = payload
            .split_first()
            .ok_or_else(|| SatelError::malformed("empty request payload"))?;

        let coded = |mask_len: usize| -> Result<(UserCode, BTreeSet<u32>)> {
            expect_len(data, USER_CODE_LEN + mask_len, "request")?;
            let user = UserCode::from_bytes(&data[..USER_CODE_LEN])?;
            Ok((user, decode_mask(&data[USER_CODE_LEN..])))
        };

        match code {
            CMD_ARM_MODE0..=CMD_ARM_MODE3 => {
                let (code_field, partitions) = coded(PARTITION_MASK_LEN)?;
                let mode = ArmMode::from_u8(code - CMD_ARM_MODE0)
                    .ok_or_else(|| SatelError::malformed("bad arm mode"))?;
                Ok(Command::Arm {
                    mode,
                    code: code_field,
                    partitions,
                })
            }
            CMD_DISARM => {
                let (code, partitions) = coded(PARTITION_MASK_LEN)?;
                Ok(Command::Disarm { code, partitions })
            }
            CMD_CLEAR_ALARM => {
                let (code, partitions) = coded(PARTITION_MASK_LEN)?;
                Ok(Command::ClearAlarm { code, partitions })
            }
            CMD_OUTPUTS_ON | CMD_OUTPUTS_OFF => {
                let (code_field, outputs) = coded(DEVICE_MASK_LEN)?;
                Ok(Command::SetOutputs {
                    on: code == CMD_OUTPUTS_ON,
                    code: code_field,
                    outputs,
                })
            }
            CMD_READ_TEMPERATURE => {
                expect_len(data, 1, "read temperature")?;
                Ok(Command::ReadTemperature {
                    sensor: sensor_from_wire(data[0]),
                })
            }
            CMD_START_MONITORING => {
                expect_len(data, MONITOR_MASK_LEN, "start monitoring")?;
                let mut raw = [0u8; 8];
                raw[..MONITOR_MASK_LEN].copy_from_slice(data);
                let kinds = MonitorFlags::from_bits(u64::from_le_bytes(raw))
                    .ok_or_else(|| SatelError::malformed("unknown status kind in monitor mask"))?;
                Ok(Command::StartMonitoring { kinds })
            }
            CMD_KEEP_ALIVE => {
                expect_len(data, 0, "keep alive")?;
                Ok(Command::KeepAlive)
            }
            other => Err(SatelError::malformed(format!(
                "unknown command code 0x{:02X}",
                other
            ))),
        }
    }
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Client → panel command.
    Request { correlation_id: u8, command: Command },
    /// Panel → client answer to the request with the same correlation id.
    /// The result byte is kept raw so an unknown value can be reported to
    /// the waiting caller instead of being dropped.
    Response { correlation_id: u8, result: u8 },
    /// Unsolicited snapshot of one status kind.
    Status { kind: StatusKind, ids: BTreeSet<u32> },
    /// Unsolicited temperature reading; `None` when the panel could not
    /// determine the value.
    Temperature { sensor: u32, value: Option<f32> },
}

impl Frame {
    pub fn response(correlation_id: u8, result: ResultCode) -> Self {
        Frame::Response {
            correlation_id,
            result: result.as_byte(),
        }
    }

    pub fn kind_byte(&self) -> u8 {
        match self {
            Frame::Request { .. } => KIND_REQUEST,
            Frame::Response { .. } => KIND_RESPONSE,
            Frame::Status { .. } => KIND_STATUS,
            Frame::Temperature { .. } => KIND_TEMPERATURE,
        }
    }

    pub fn correlation_id(&self) -> u8 {
        match self {
            Frame::Request { correlation_id, .. } | Frame::Response { correlation_id, .. } => {
                *correlation_id
            }
            Frame::Status { .. } | Frame::Temperature { .. } => PUSH_CORRELATION_ID,
        }
    }

    /// Frame payload (without the integration-key header).
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Frame::Request { command, .. } => command.encode_payload(),
            Frame::Response { result, .. } => vec![*result],
            Frame::Status { kind, ids } => {
                let mut out = vec![kind.code()];
                out.extend(encode_mask(ids, kind.mask_len()));
                out
            }
            Frame::Temperature { sensor, value } => {
                let raw = value.map_or(TEMPERATURE_UNDETERMINED, celsius_to_raw);
                let mut out = vec![sensor_to_wire(*sensor)];
                out.extend_from_slice(&raw.to_be_bytes());
                out
            }
        }
    }

    /// Build a frame from its kind, correlation id and payload.
    pub fn decode_payload(kind: u8, correlation_id: u8, payload: &[u8]) -> Result<Self> {
        match kind {
            KIND_REQUEST => Ok(Frame::Request {
                correlation_id,
                command: Command::decode_payload(payload)?,
            }),
            KIND_RESPONSE => {
                expect_len(payload, 1, "response")?;
                Ok(Frame::Response {
                    correlation_id,
                    result: payload[0],
                })
            }
            KIND_STATUS => {
                let (&code, mask) = payload
                    .split_first()
                    .ok_or_else(|| SatelError::malformed("empty status payload"))?;
                let kind = StatusKind::from_code(code).ok_or_else(|| {
                    SatelError::malformed(format!("unknown status code 0x{:02X}", code))
                })?;
                expect_len(mask, kind.mask_len(), kind.description())?;
                Ok(Frame::Status {
                    kind,
                    ids: decode_mask(mask),
                })
            }
            KIND_TEMPERATURE => {
                expect_len(payload, 3, "temperature")?;
                let raw = u16::from_be_bytes([payload[1], payload[2]]);
                Ok(Frame::Temperature {
                    sensor: sensor_from_wire(payload[0]),
                    value: raw_to_celsius(raw),
                })
            }
            other => Err(SatelError::malformed(format!(
                "unknown frame kind 0x{:02X}",
                other
            ))),
        }
    }
}

/// Convert a raw sensor value to °C.
pub fn raw_to_celsius(raw: u16) -> Option<f32> {
    if raw == TEMPERATURE_UNDETERMINED {
        return None;
    }
    Some((i32::from(raw) - i32::from(TEMPERATURE_OFFSET)) as f32 / 2.0)
}

/// Inverse of [`raw_to_celsius`], rounding to the sensor's 0.5 °C resolution.
pub fn celsius_to_raw(celsius: f32) -> u16 {
    let raw = (celsius * 2.0).round() as i32 + i32::from(TEMPERATURE_OFFSET);
    raw.clamp(0, i32::from(TEMPERATURE_UNDETERMINED) - 1) as u16
}

/// Sensor 256 travels as 0.
fn sensor_to_wire(sensor: u32) -> u8 {
    (sensor % 256) as u8
}

fn sensor_from_wire(b: u8) -> u32 {
    if b == 0 { 256 } else { u32::from(b) }
}

fn targets(ids: &[u32], max: u32) -> Result<BTreeSet<u32>> {
    if ids.is_empty() {
        return Err(SatelError::NoTargets);
    }
    check_ids(ids, max)?;
    Ok(ids.iter().copied().collect())
}

fn expect_len(data: &[u8], len: usize, what: &str) -> Result<()> {
    if data.len() != len {
        return Err(SatelError::malformed(format!(
            "{} payload is {} bytes, expected {}",
            what,
            data.len(),
            len
        )));
    }
    Ok(())
}
