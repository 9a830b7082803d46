//! Protocol constants for Synta motor controller communication.
//!
//! This module defines the framing bytes, command letters, timing parameters
//! and rate thresholds used by the motor controller protocol.

use std::f64::consts::PI;

/// Leading byte of every command sent to the controller
pub const START_CHAR_OUT: u8 = b':';

/// Leading byte of a successful response
pub const START_CHAR_IN: u8 = b'=';

/// Leading byte of an error response
pub const ERROR_CHAR: u8 = b'!';

/// Terminator of commands and responses (carriage return)
pub const END_CHAR: u8 = 0x0D;

/// Command letters understood by the motor controller.
pub mod cmd {
    /// Inquire motor board version
    pub const GET_FIRMWARE_VERSION: char = 'e';
    /// Inquire counts per revolution (steps for 360 degrees)
    pub const GET_STEPS_PER_REVOLUTION: char = 'a';
    /// Inquire timer interrupt frequency
    pub const GET_TIMER_FREQUENCY: char = 'b';
    /// Inquire high speed ratio
    pub const GET_HIGH_SPEED_RATIO: char = 'g';
    /// Inquire PEC period (worm period in steps)
    pub const GET_PEC_PERIOD: char = 's';
    /// Extended inquiry (capability bits)
    pub const GET_CAPABILITIES: char = 'q';
    /// Snap port (camera trigger)
    pub const SET_SNAP_PORT: char = 'O';
    /// Polar scope LED brightness
    pub const SET_POLAR_LED: char = 'V';
    /// Set absolute axis position
    pub const SET_POSITION: char = 'E';
    /// Initialize motor controller (activate coils)
    pub const ACTIVATE_COILS: char = 'F';
    /// Set motion mode
    pub const SET_MOTION_MODE: char = 'G';
    /// Set GOTO target increment
    pub const SET_GOTO_INCREMENT: char = 'H';
    /// Set step period
    pub const SET_STEP_PERIOD: char = 'I';
    /// Start motion
    pub const START_MOTION: char = 'J';
    /// Decelerated stop
    pub const STOP: char = 'K';
    /// Instant stop
    pub const STOP_INSTANT: char = 'L';
    /// Set break point increment
    pub const SET_BREAK_INCREMENT: char = 'M';
    /// Miscellaneous feature toggles
    pub const SET_FEATURE: char = 'W';
    /// Inquire axis position
    pub const GET_POSITION: char = 'j';
    /// Inquire axis status
    pub const GET_STATUS: char = 'f';
}

/// Sidereal rate in radians per second
pub const SIDEREAL_RATE: f64 = 2.0 * PI / 86_164.090_53;

/// Maximum slewing rate accepted by the controller (800x sidereal)
pub const MAX_SLEW_SPEED: f64 = 800.0 * SIDEREAL_RATE;

/// Rates at or above this switch the axis to high speed mode
pub const LOW_SPEED_MARGIN: f64 = 128.0 * SIDEREAL_RATE;

/// Rates at or below this are treated as a stop request
pub const MIN_SLEW_SPEED: f64 = SIDEREAL_RATE / 1000.0;

/// GOTO moves longer than this angle (as rate x 1s) use high speed
pub const LOW_SPEED_GOTO_RATE: f64 = 640.0 * SIDEREAL_RATE;

/// Smallest step period ever transmitted
pub const MIN_SPEED_INT: u32 = 6;

/// Firmware versions whose step period must be reduced by 3
pub const STEP_PERIOD_QUIRK_VERSIONS: [u32; 2] = [0x01_06_00, 0x01_06_01];

/// Amount subtracted from the step period on quirky firmware
pub const STEP_PERIOD_QUIRK_OFFSET: i64 = 3;

/// Firmware positions are offset so that zero sits mid-range
pub const POSITION_OFFSET: i64 = 0x80_0000;

/// Largest value that fits in a 6 digit parameter
pub const MAX_PARAMETER_24: u32 = 0xFF_FFFF;

/// Maximum difference allowed between a set and read-back position (~0.5 arcsec)
pub const POSITION_TOLERANCE: f64 = 3.5e-5;

/// Default break point increment for GOTO moves
pub const DEFAULT_BREAK_STEPS: u32 = 3500;

/// Default baud rate
pub const BAUD_RATE: u32 = 9600;

/// Default transaction timeout in milliseconds
pub const TIMEOUT_MS: u64 = 1000;

/// Upper bound for the transaction timeout in milliseconds
pub const MAX_TIMEOUT_MS: u64 = 50_000;

/// Default number of attempts per transaction
pub const RETRY_COUNT: u32 = 3;

/// Upper bound for the number of attempts per transaction
pub const MAX_RETRY_COUNT: u32 = 100;

/// Interval between status polls while waiting for an axis to stop
pub const POLL_INTERVAL_MS: u64 = 100;

/// Default overall deadline for waiting on an axis to stop
pub const STOP_DEADLINE_MS: u64 = 30_000;

/// Parameter sent with the extended inquiry to request capability bits
pub const CAPABILITY_INQUIRY: u32 = 0x00_0001;
