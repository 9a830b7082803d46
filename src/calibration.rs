//! Conversion between angles, rates and hardware step units.
//!
//! All constants are read from the motor controller during the connection
//! handshake and never change while the connection is open.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::constants::{
    LOW_SPEED_GOTO_RATE, MAX_PARAMETER_24, MIN_SPEED_INT, STEP_PERIOD_QUIRK_OFFSET,
    STEP_PERIOD_QUIRK_VERSIONS,
};
use crate::error::{Result, SyntaError};
use crate::types::{AxisId, Capabilities, FirmwareVersion};

/// Calibration constants of one axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisCalibration {
    /// Steps for a full 360 degree revolution
    pub steps_per_revolution: u32,
    /// Step timer interrupt frequency in Hz
    pub timer_frequency: u32,
    /// Micro-steps per timer tick in high speed mode
    pub high_speed_ratio: u32,
    /// Worm period in steps, informational
    pub pec_period: u32,
    /// GOTO increments above this many steps run at high speed
    pub low_speed_goto_margin: u32,
}

impl AxisCalibration {
    pub fn new(
        steps_per_revolution: u32,
        timer_frequency: u32,
        high_speed_ratio: u32,
        pec_period: u32,
    ) -> Result<Self> {
        if steps_per_revolution == 0 {
            return Err(SyntaError::InvalidData(
                "steps per revolution reported as zero".to_string(),
            ));
        }
        if timer_frequency == 0 {
            return Err(SyntaError::InvalidData(
                "timer frequency reported as zero".to_string(),
            ));
        }
        if high_speed_ratio == 0 {
            return Err(SyntaError::InvalidData(
                "high speed ratio reported as zero".to_string(),
            ));
        }

        let mut calibration = Self {
            steps_per_revolution,
            timer_frequency,
            high_speed_ratio,
            pec_period,
            low_speed_goto_margin: 0,
        };
        calibration.low_speed_goto_margin =
            (LOW_SPEED_GOTO_RATE * calibration.steps_per_radian()).round() as u32;
        Ok(calibration)
    }

    pub fn steps_per_radian(&self) -> f64 {
        self.steps_per_revolution as f64 / TAU
    }

    pub fn radians_per_step(&self) -> f64 {
        TAU / self.steps_per_revolution as f64
    }

    /// Timer ticks per radian; dividing by a rate gives the step period.
    pub fn rate_factor(&self) -> f64 {
        self.timer_frequency as f64 / self.steps_per_radian()
    }

    pub fn angle_to_steps(&self, radians: f64) -> i64 {
        (radians * self.steps_per_radian()).round() as i64
    }

    pub fn steps_to_angle(&self, steps: i64) -> f64 {
        steps as f64 * self.radians_per_step()
    }

    /// Step period for `rate` rad/s before any firmware adjustment.
    pub fn rate_to_period(&self, rate: f64) -> f64 {
        self.rate_factor() / rate.abs()
    }

    /// Fastest rate reachable in low speed mode
    pub fn low_speed_slew_rate(&self) -> f64 {
        self.rate_factor() / MIN_SPEED_INT as f64
    }

    /// Fastest rate reachable in high speed mode
    pub fn high_speed_slew_rate(&self) -> f64 {
        self.low_speed_slew_rate() * self.high_speed_ratio as f64
    }
}

/// Everything learned about the mount during the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub firmware: FirmwareVersion,
    pub capabilities: Capabilities,
    pub axes: [AxisCalibration; 2],
}

impl Calibration {
    pub fn axis(&self, axis: AxisId) -> Result<&AxisCalibration> {
        Ok(&self.axes[axis.index()?])
    }

    pub fn angle_to_steps(&self, axis: AxisId, radians: f64) -> Result<i64> {
        Ok(self.axis(axis)?.angle_to_steps(radians))
    }

    pub fn steps_to_angle(&self, axis: AxisId, steps: i64) -> Result<f64> {
        Ok(self.axis(axis)?.steps_to_angle(steps))
    }

    /// Step period register value for `rate` rad/s.
    ///
    /// In high speed mode the rate is first divided by the high speed ratio.
    /// Some legacy firmware needs the period lowered by 3; the result never
    /// drops below `MIN_SPEED_INT`.
    pub fn rate_to_speed_int(&self, axis: AxisId, rate: f64, high_speed: bool) -> Result<u32> {
        if !rate.is_finite() || rate == 0.0 {
            return Err(SyntaError::BadParameter(format!(
                "rate {rate} has no step period"
            )));
        }
        let calibration = self.axis(axis)?;
        let mut rate = rate.abs();
        if high_speed {
            rate /= calibration.high_speed_ratio as f64;
        }

        let mut speed_int = calibration.rate_to_period(rate).round() as i64;
        if STEP_PERIOD_QUIRK_VERSIONS.contains(&self.firmware.raw) {
            speed_int -= STEP_PERIOD_QUIRK_OFFSET;
        }
        Ok(speed_int.clamp(MIN_SPEED_INT as i64, MAX_PARAMETER_24 as i64) as u32)
    }
}
