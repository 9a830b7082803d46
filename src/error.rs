//! Error types for Synta protocol operations.

use crate::types::AxisId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Synta operations.
pub type Result<T> = std::result::Result<T, SyntaError>;

/// Error codes reported by the motor controller in a `!` response.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareError {
    /// Unknown command or wrong command length
    #[error("bad packet (code {0})")]
    BadPacket(u8),

    /// Motor not stopped, command rejected in the current state
    #[error("mount busy")]
    MountBusy,

    /// Invalid character in the parameter
    #[error("bad value")]
    BadValue,

    /// Motor controller not initialized
    #[error("motor not initialized")]
    NotInitialized,

    /// Driver sleeping or no motor board answering
    #[error("no mount")]
    NoMount,

    /// PPEC training in progress or no valid PEC data
    #[error("PPEC error (code {0})")]
    PpecError(u8),

    /// Any other code
    #[error("general error (code {0})")]
    GeneralError(u8),
}

impl FirmwareError {
    /// Map the error code nibble of a `!` response.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 | 1 => FirmwareError::BadPacket(code),
            2 => FirmwareError::MountBusy,
            3 => FirmwareError::BadValue,
            4 => FirmwareError::NotInitialized,
            5 => FirmwareError::NoMount,
            7 | 8 => FirmwareError::PpecError(code),
            _ => FirmwareError::GeneralError(code),
        }
    }
}

/// Error types for mount communication.
#[derive(Error, Debug)]
pub enum SyntaError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// No connection is open
    #[error("Not connected")]
    NotConnected,

    /// A connection to another port is already open
    #[error("Already connected to {port}")]
    AlreadyConnected {
        /// Port of the open connection
        port: String,
    },

    /// No complete response before the transaction timeout
    #[error("Communication timeout")]
    Timeout,

    /// Command rejected in the current motor state
    #[error("Mount busy")]
    MountBusy,

    /// Malformed hex/BCD data in a response
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Caller supplied value out of protocol range
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// The controller reported the motor is not initialized
    #[error("Motor not initialized")]
    MotorNotInitialized,

    /// Refused to re-initialize an axis that is already running
    #[error("Axis {0:?} is running")]
    AxisRunning(AxisId),

    /// Decoded firmware error without a more specific mapping
    #[error("Hardware reported error: {0}")]
    HardwareReportedError(FirmwareError),

    /// Position read back after a set differs from the requested one
    #[error("Position mismatch on {axis:?}: requested {requested} rad, read {actual} rad")]
    PositionMismatch {
        /// Axis being positioned
        axis: AxisId,
        /// Requested position in radians
        requested: f64,
        /// Position reported by the controller in radians
        actual: f64,
    },

    /// A wait was aborted through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<FirmwareError> for SyntaError {
    fn from(e: FirmwareError) -> Self {
        match e {
            FirmwareError::MountBusy => SyntaError::MountBusy,
            FirmwareError::NotInitialized => SyntaError::MotorNotInitialized,
            other => SyntaError::HardwareReportedError(other),
        }
    }
}

impl SyntaError {
    /// Whether a failed attempt may succeed when sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyntaError::Timeout | SyntaError::InvalidData(_))
    }

    /// Whether the error means the link itself is gone.
    pub fn is_transport_fault(&self) -> bool {
        match self {
            SyntaError::SerialPort(_) => true,
            SyntaError::Io(e) => e.kind() != std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}
