use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::cmd;
use crate::error::{Result, SyntaError};

/// Motor channel of the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisId {
    /// Right ascension axis
    Primary,
    /// Declination axis
    Secondary,
    /// Both axes, batch operations only
    Both,
}

impl AxisId {
    /// Both physical axes in index order
    pub const AXES: [AxisId; 2] = [AxisId::Primary, AxisId::Secondary];

    /// Digit sent after the command letter
    pub fn as_char(self) -> char {
        match self {
            AxisId::Primary => '1',
            AxisId::Secondary => '2',
            AxisId::Both => '3',
        }
    }

    /// Index into per-axis arrays; `Both` is rejected.
    pub fn index(self) -> Result<usize> {
        match self {
            AxisId::Primary => Ok(0),
            AxisId::Secondary => Ok(1),
            AxisId::Both => Err(SyntaError::BadParameter(
                "axis Both is only valid for stop and initialize".to_string(),
            )),
        }
    }

    /// The physical axes this id addresses
    pub fn expand(self) -> &'static [AxisId] {
        match self {
            AxisId::Primary => &Self::AXES[..1],
            AxisId::Secondary => &Self::AXES[1..],
            AxisId::Both => &Self::AXES,
        }
    }
}

bitflags! {
    /// Extended capability bits reported by the `q` inquiry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Capabilities: u16 {
        const PPEC_TRAINING = 0x0001;
        const PPEC_ON = 0x0002;
        const DUAL_ENCODER = 0x0010;
        const PPEC = 0x0020;
        const HOME_SENSOR = 0x0040;
        const EQ_AZ_MODE = 0x0080;
        const POLAR_LED = 0x0100;
        const INDEPENDENT_AXES = 0x0200;
        const HALF_CURRENT_TRACKING = 0x0400;
        const WIFI = 0x0800;
    }
}

/// Motor board version as reported by the `e` inquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Version in text order: major, minor, mount id
    pub raw: u32,
}

impl FirmwareVersion {
    /// Build from the little-endian decoded value of the `e` response.
    pub fn from_decoded(value: u32) -> Self {
        let raw = ((value & 0xFF) << 16) | (value & 0xFF00) | ((value >> 16) & 0xFF);
        Self { raw }
    }

    pub fn major(&self) -> u8 {
        ((self.raw >> 16) & 0xFF) as u8
    }

    pub fn minor(&self) -> u8 {
        ((self.raw >> 8) & 0xFF) as u8
    }

    pub fn mount_id(&self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// Mount model name for the known ids
    pub fn model(&self) -> &'static str {
        match self.mount_id() {
            0x00 => "EQ6",
            0x01 => "HEQ5",
            0x02 => "EQ5",
            0x03 => "EQ3",
            0x04 => "EQ8",
            0x05 => "AZ-EQ6",
            0x06 => "AZ-EQ5",
            0x0A => "Star Adventurer",
            0x20 => "EQ8-R",
            0x22 => "AZ-EQ6 Pro",
            0x23 => "EQ6-R",
            0x31 => "EQ5 Pro",
            0x80..=0x8F => "AZ GOTO",
            0x90..=0x9F => "Dobsonian",
            0xA5 => "AZ-GTi",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02} ({})", self.major(), self.minor(), self.model())
    }
}

/// Stop variant used by `stop`, chosen at deployment time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    #[default]
    Decelerated,
    Instant,
}

impl StopMode {
    pub fn command(self) -> char {
        match self {
            StopMode::Decelerated => cmd::STOP,
            StopMode::Instant => cmd::STOP_INSTANT,
        }
    }
}

/// Observing hemisphere, sent as part of the motion mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    #[default]
    North,
    South,
}

/// Toggles driven through the `W` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountFeature {
    StartPecTraining,
    StopPecTraining,
    PecOn,
    PecOff,
    EncoderOn,
    EncoderOff,
    ResetHomeIndex,
}

impl MountFeature {
    /// Parameter value of the `W` command
    pub fn code(self) -> u32 {
        match self {
            MountFeature::StartPecTraining => 0x00,
            MountFeature::StopPecTraining => 0x01,
            MountFeature::PecOn => 0x02,
            MountFeature::PecOff => 0x03,
            MountFeature::EncoderOn => 0x04,
            MountFeature::EncoderOff => 0x05,
            MountFeature::ResetHomeIndex => 0x08,
        }
    }
}

/// Outcome of `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// The channel was opened and the handshake completed
    Connected,
    /// A connection was already open; its reference count was raised
    AlreadyConnected,
}

/// Outcome of `disconnect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectStatus {
    /// The last reference was released and the channel closed
    Closed,
    /// Other logical users still hold the connection
    StillOpen { references: usize },
}
