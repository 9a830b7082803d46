//! # Synta Protocol Library
//!
//! A Rust library for driving Synta/SkyWatcher equatorial mount motor
//! controllers over a serial link.
//!
//! ## Features
//!
//! - Framing and little-endian hex codec for the `:<cmd><axis><data>\r` protocol
//! - Reference-counted connection with per-transaction retries
//! - Calibration handshake and angle/rate to step conversions
//! - Slew, GOTO, stop and axis initialization with status tracking
//! - Accessory commands (snap port, polar LED, PEC and encoder features)
//!
//! ## Example
//!
//! ```no_run
//! use synta_protocol::{AxisId, MountConfig, MountController, SIDEREAL_RATE};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut mount = MountController::serial(MountConfig::default());
//!     mount.connect("/dev/ttyUSB0", 9600, 1000, 3)?;
//!     mount.initialize_axes([0.0, 0.0])?;
//!     mount.slew(AxisId::Primary, SIDEREAL_RATE)?;
//!     println!("RA at {:.6} rad", mount.get_position(AxisId::Primary)?);
//!     mount.stop(AxisId::Both)?;
//!     mount.disconnect()?;
//!     Ok(())
//! }
//! ```

pub mod axis;
pub mod calibration;
pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod shared;
pub mod transaction;
pub mod types;

pub use axis::{AxisStatus, MotionState, StatusSource, TrackedStatus};
pub use calibration::{AxisCalibration, Calibration};
pub use channel::{list_ports, PortSettings, SerialChannel, SerialPortChannel};
pub use config::MountConfig;
pub use constants::{MAX_SLEW_SPEED, SIDEREAL_RATE};
pub use error::{FirmwareError, Result, SyntaError};
pub use protocol::MountController;
pub use shared::{CancelToken, MountHandle};
pub use types::*;
