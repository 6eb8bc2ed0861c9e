// MIT License - Copyright (c) 2026 Peter Wright
// Error types

use std::fmt;

/// Result byte carried by a command-response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// 0x00 - OK
    Ok,
    /// 0x01 - User code not found
    UserCodeNotFound,
    /// 0x02 - No access
    NoAccess,
    /// 0x03 - Selected user does not exist
    UserNotExist,
    /// 0x04 - Selected user already exists
    UserAlreadyExists,
    /// 0x05 - Wrong code or code already exists
    WrongCode,
    /// 0x06 - Telephone code already exists
    TelephoneCodeExists,
    /// 0x07 - Changed code is the same
    ChangedCodeSame,
    /// 0x08 - Other error
    OtherError,
    /// 0x11 - Cannot arm, but can use force arm
    CannotArmForcePossible,
    /// 0x12 - Cannot arm
    CannotArm,
    /// 0xFF - Command accepted (will be processed)
    Accepted,
}

impl ResultCode {
    /// Parse the result byte of a response frame.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Ok),
            0x01 => Some(Self::UserCodeNotFound),
            0x02 => Some(Self::NoAccess),
            0x03 => Some(Self::UserNotExist),
            0x04 => Some(Self::UserAlreadyExists),
            0x05 => Some(Self::WrongCode),
            0x06 => Some(Self::TelephoneCodeExists),
            0x07 => Some(Self::ChangedCodeSame),
            0x08 => Some(Self::OtherError),
            0x11 => Some(Self::CannotArmForcePossible),
            0x12 => Some(Self::CannotArm),
            0xFF => Some(Self::Accepted),
            _ => None,
        }
    }

    /// The wire byte for this result.
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::UserCodeNotFound => 0x01,
            Self::NoAccess => 0x02,
            Self::UserNotExist => 0x03,
            Self::UserAlreadyExists => 0x04,
            Self::WrongCode => 0x05,
            Self::TelephoneCodeExists => 0x06,
            Self::ChangedCodeSame => 0x07,
            Self::OtherError => 0x08,
            Self::CannotArmForcePossible => 0x11,
            Self::CannotArm => 0x12,
            Self::Accepted => 0xFF,
        }
    }

    /// Whether the panel executed (or queued) the command.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Accepted)
    }

    /// Whether the panel refused the credentials rather than the operation.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::UserCodeNotFound | Self::NoAccess | Self::UserNotExist | Self::WrongCode
        )
    }

    /// Human-readable description of the result.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::UserCodeNotFound => "User code not found",
            Self::NoAccess => "No access",
            Self::UserNotExist => "Selected user does not exist",
            Self::UserAlreadyExists => "Selected user already exists",
            Self::WrongCode => "Wrong code or code already exists",
            Self::TelephoneCodeExists => "Telephone code already exists",
            Self::ChangedCodeSame => "Changed code is the same",
            Self::OtherError => "Other error",
            Self::CannotArmForcePossible => "Cannot arm, but can use force arm",
            Self::CannotArm => "Cannot arm",
            Self::Accepted => "Command accepted",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}: {}", self.as_byte(), self.description())
    }
}

/// Coarse classification of [`SatelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport down or lost; triggers reconnection.
    Connection,
    /// Malformed or unrecognized frame.
    Protocol,
    /// Credentials or user code refused.
    Auth,
    /// No response within the bound.
    Timeout,
    /// Request rejected locally before reaching the wire.
    Request,
    /// Panel refused the operation for a non-credential reason.
    Rejected,
}

/// All errors that can occur in the satel-integra library.
#[derive(Debug, thiserror::Error)]
pub enum SatelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectTimeout,

    #[error("Not connected")]
    Disconnected,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Client shut down")]
    Shutdown,

    #[error("Checksum mismatch (expected {expected:04X}, got {actual:04X})")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Malformed frame: {details}")]
    MalformedFrame { details: String },

    #[error("Unknown result code: 0x{0:02X}")]
    UnknownResultCode(u8),

    #[error("Integration key mismatch")]
    IntegrationKeyMismatch,

    #[error("Panel refused credentials: {0}")]
    Auth(ResultCode),

    #[error("User code is empty")]
    EmptyCode,

    #[error("Invalid user code: {reason}")]
    InvalidCode { reason: String },

    #[error("Command timeout: {command}")]
    CommandTimeout { command: String },

    #[error("Timeout reading temperature sensor {sensor}")]
    TemperatureTimeout { sensor: u32 },

    #[error("Temperature sensor {sensor} reported no value")]
    TemperatureUnavailable { sensor: u32 },

    #[error("Invalid device ID: {id} (max: {max})")]
    InvalidDeviceId { id: u32, max: u32 },

    #[error("Command has no target devices")]
    NoTargets,

    #[error("Too many pending commands")]
    TooManyPending,

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("Panel rejected command: {0}")]
    Rejected(ResultCode),
}

impl SatelError {
    pub(crate) fn malformed(details: impl Into<String>) -> Self {
        SatelError::MalformedFrame {
            details: details.into(),
        }
    }

    /// Classify the error into the protocol client's failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SatelError::Io(_)
            | SatelError::ConnectTimeout
            | SatelError::Disconnected
            | SatelError::ConnectionLost
            | SatelError::Shutdown => ErrorKind::Connection,
            SatelError::ChecksumMismatch { .. }
            | SatelError::MalformedFrame { .. }
            | SatelError::UnknownResultCode(_)
            | SatelError::IntegrationKeyMismatch
            | SatelError::TemperatureUnavailable { .. } => ErrorKind::Protocol,
            SatelError::Auth(_) | SatelError::EmptyCode | SatelError::InvalidCode { .. } => {
                ErrorKind::Auth
            }
            SatelError::CommandTimeout { .. } | SatelError::TemperatureTimeout { .. } => {
                ErrorKind::Timeout
            }
            SatelError::InvalidDeviceId { .. }
            | SatelError::NoTargets
            | SatelError::TooManyPending
            | SatelError::InvalidConfig { .. } => ErrorKind::Request,
            SatelError::Rejected(_) => ErrorKind::Rejected,
        }
    }

    /// Whether this error is transient and the connection should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SatelError::Io(_)
                | SatelError::ConnectTimeout
                | SatelError::Disconnected
                | SatelError::ConnectionLost
        )
    }
}

pub type Result<T> = std::result::Result<T, SatelError>;
