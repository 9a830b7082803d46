//! Per-axis motion state and the rules for changing it.
//!
//! The controller only knows what an axis is doing from two sources: a
//! decoded `f` status response, or its own optimistic update right after
//! sending a stop/slew/goto. [`TrackedStatus`] keeps the two apart so that a
//! provisional status is never mistaken for a confirmed one.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::AxisCalibration;
use crate::constants::{LOW_SPEED_MARGIN, MAX_SLEW_SPEED, MIN_SLEW_SPEED};
use crate::types::Hemisphere;

bitflags! {
    /// Status flags of one axis.
    ///
    /// Exactly one of `FULL_STOP`, `SLEWING` and `SLEWING_TO` is set on any
    /// value built through this module; `NOT_INITIALIZED` is independent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AxisStatus: u8 {
        const FULL_STOP = 0x01;
        const SLEWING = 0x02;
        const SLEWING_TO = 0x04;
        const SLEWING_FORWARD = 0x08;
        const HIGH_SPEED = 0x10;
        const NOT_INITIALIZED = 0x20;
    }
}

/// Motion part of an axis status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionState {
    Stopped,
    Slewing { forward: bool, high_speed: bool },
    SlewingTo { forward: bool, high_speed: bool },
}

impl AxisStatus {
    /// Status of a freshly connected, never initialized axis.
    pub fn uninitialized() -> Self {
        AxisStatus::FULL_STOP | AxisStatus::NOT_INITIALIZED
    }

    pub fn new(motion: MotionState, initialized: bool) -> Self {
        let mut status = match motion {
            MotionState::Stopped => AxisStatus::FULL_STOP,
            MotionState::Slewing { forward, high_speed } => {
                AxisStatus::SLEWING | Self::direction_flags(forward, high_speed)
            }
            MotionState::SlewingTo { forward, high_speed } => {
                AxisStatus::SLEWING_TO | Self::direction_flags(forward, high_speed)
            }
        };
        status.set(AxisStatus::NOT_INITIALIZED, !initialized);
        status
    }

    fn direction_flags(forward: bool, high_speed: bool) -> Self {
        let mut flags = AxisStatus::empty();
        flags.set(AxisStatus::SLEWING_FORWARD, forward);
        flags.set(AxisStatus::HIGH_SPEED, high_speed);
        flags
    }

    /// Same initialization state with a different motion.
    pub fn with_motion(self, motion: MotionState) -> Self {
        Self::new(motion, self.is_initialized())
    }

    pub fn motion(&self) -> MotionState {
        let forward = self.contains(AxisStatus::SLEWING_FORWARD);
        let high_speed = self.contains(AxisStatus::HIGH_SPEED);
        if self.contains(AxisStatus::SLEWING_TO) {
            MotionState::SlewingTo { forward, high_speed }
        } else if self.contains(AxisStatus::SLEWING) {
            MotionState::Slewing { forward, high_speed }
        } else {
            MotionState::Stopped
        }
    }

    pub fn is_full_stop(&self) -> bool {
        self.motion() == MotionState::Stopped
    }

    pub fn is_slewing_to(&self) -> bool {
        self.contains(AxisStatus::SLEWING_TO)
    }

    pub fn is_forward(&self) -> bool {
        self.contains(AxisStatus::SLEWING_FORWARD)
    }

    pub fn is_high_speed(&self) -> bool {
        self.contains(AxisStatus::HIGH_SPEED)
    }

    pub fn is_initialized(&self) -> bool {
        !self.contains(AxisStatus::NOT_INITIALIZED)
    }
}

/// Where a cached status came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusSource {
    /// Not queried since the (re)connect; must not be trusted
    Unknown,
    /// Set by the controller after sending a command, not yet confirmed
    Provisional,
    /// Decoded from a status response at the given time
    Confirmed(DateTime<Utc>),
}

/// Last-known status of one axis together with its provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedStatus {
    pub status: AxisStatus,
    pub source: StatusSource,
}

impl Default for TrackedStatus {
    fn default() -> Self {
        Self {
            status: AxisStatus::uninitialized(),
            source: StatusSource::Unknown,
        }
    }
}

impl TrackedStatus {
    pub fn confirm(&mut self, status: AxisStatus) {
        self.status = status;
        self.source = StatusSource::Confirmed(Utc::now());
    }

    /// Optimistic update after a command; overwritten by the next query.
    pub fn assume(&mut self, status: AxisStatus) {
        self.status = status;
        self.source = StatusSource::Provisional;
    }

    /// Keep the value as last-known only, e.g. across a reconnect.
    pub fn invalidate(&mut self) {
        self.source = StatusSource::Unknown;
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.source, StatusSource::Confirmed(_))
    }
}

/// Kind of move requested through the `G` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    Slew,
    Goto,
}

/// Full motion mode sent before starting a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionMode {
    pub kind: MotionKind,
    pub high_speed: bool,
    pub forward: bool,
    pub hemisphere: Hemisphere,
}

impl MotionMode {
    /// Parameter byte of the `G` command.
    ///
    /// High nibble selects the move type: 0 fast goto, 1 slow slew,
    /// 2 slow goto, 3 fast slew. Low nibble: bit0 reverse, bit1 south.
    pub fn code(&self) -> u32 {
        let mode = match (self.kind, self.high_speed) {
            (MotionKind::Goto, true) => 0x0,
            (MotionKind::Slew, false) => 0x1,
            (MotionKind::Goto, false) => 0x2,
            (MotionKind::Slew, true) => 0x3,
        };
        let mut direction = 0x0;
        if !self.forward {
            direction |= 0x1;
        }
        if self.hemisphere == Hemisphere::South {
            direction |= 0x2;
        }
        (mode << 4) | direction
    }

    /// Status the axis is expected to report once started.
    pub fn motion_state(&self) -> MotionState {
        match self.kind {
            MotionKind::Slew => MotionState::Slewing {
                forward: self.forward,
                high_speed: self.high_speed,
            },
            MotionKind::Goto => MotionState::SlewingTo {
                forward: self.forward,
                high_speed: self.high_speed,
            },
        }
    }
}

/// Clamp a requested rate to the protocol maximum.
pub fn clamp_rate(rate: f64) -> f64 {
    rate.clamp(-MAX_SLEW_SPEED, MAX_SLEW_SPEED)
}

/// Whether a rate needs the high speed regime on an axis.
///
/// Switches at 128x sidereal, or earlier when the axis cannot reach the rate
/// with the shortest low speed step period.
pub fn is_high_speed_rate(rate: f64, calibration: &AxisCalibration) -> bool {
    rate.abs() >= LOW_SPEED_MARGIN.min(calibration.low_speed_slew_rate())
}

/// What has to be sent to move an axis at a new rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlewPlan {
    /// The rate is indistinguishable from zero; stop instead
    Stop,
    /// The axis is already moving in a compatible mode; only the period changes
    AdjustSpeed { forward: bool, high_speed: bool },
    /// Motion mode must be (re)sent, after a full stop when `stop_first`
    SetMode { stop_first: bool, forward: bool, high_speed: bool },
}

/// Decide how to reach `rate` (already clamped) from `current`.
pub fn plan_slew(current: AxisStatus, rate: f64, calibration: &AxisCalibration) -> SlewPlan {
    if rate.abs() <= MIN_SLEW_SPEED {
        return SlewPlan::Stop;
    }

    let forward = rate > 0.0;
    let high_speed = is_high_speed_rate(rate, calibration);

    if current.is_full_stop() {
        return SlewPlan::SetMode {
            stop_first: false,
            forward,
            high_speed,
        };
    }

    let must_remode = current.is_slewing_to()
        || current.is_high_speed()
        || high_speed
        || current.is_forward() != forward;

    if must_remode {
        SlewPlan::SetMode {
            stop_first: true,
            forward,
            high_speed,
        }
    } else {
        SlewPlan::AdjustSpeed {
            forward,
            high_speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SIDEREAL_RATE;

    fn eq6() -> AxisCalibration {
        AxisCalibration::new(9_024_000, 64_935, 16, 50_133).unwrap()
    }

    fn slewing(forward: bool, high_speed: bool) -> AxisStatus {
        AxisStatus::new(MotionState::Slewing { forward, high_speed }, true)
    }

    #[test]
    fn built_statuses_assert_one_motion_flag() {
        let exclusive = AxisStatus::FULL_STOP | AxisStatus::SLEWING | AxisStatus::SLEWING_TO;
        for status in [
            AxisStatus::uninitialized(),
            slewing(true, false),
            AxisStatus::new(
                MotionState::SlewingTo {
                    forward: false,
                    high_speed: true,
                },
                false,
            ),
        ] {
            assert_eq!((status & exclusive).bits().count_ones(), 1, "{status:?}");
        }
    }

    #[test]
    fn with_motion_keeps_initialization() {
        let status = AxisStatus::uninitialized().with_motion(MotionState::Slewing {
            forward: true,
            high_speed: false,
        });
        assert!(!status.is_initialized());
        assert!(!status.is_full_stop());
        assert!(slewing(true, true).with_motion(MotionState::Stopped).is_initialized());
    }

    #[test]
    fn near_zero_rate_plans_a_stop() {
        assert_eq!(plan_slew(slewing(true, false), SIDEREAL_RATE / 2000.0, &eq6()), SlewPlan::Stop);
        assert_eq!(plan_slew(slewing(true, false), -SIDEREAL_RATE / 1000.0, &eq6()), SlewPlan::Stop);
    }

    #[test]
    fn stopped_axis_sets_mode_without_stopping() {
        let plan = plan_slew(AxisStatus::new(MotionState::Stopped, true), -SIDEREAL_RATE, &eq6());
        assert_eq!(
            plan,
            SlewPlan::SetMode {
                stop_first: false,
                forward: false,
                high_speed: false
            }
        );
    }

    #[test]
    fn direction_change_requires_stop() {
        let plan = plan_slew(slewing(true, false), -SIDEREAL_RATE, &eq6());
        assert!(matches!(plan, SlewPlan::SetMode { stop_first: true, forward: false, .. }));
    }

    #[test]
    fn same_direction_low_speed_only_adjusts() {
        let plan = plan_slew(slewing(false, false), -4.0 * SIDEREAL_RATE, &eq6());
        assert_eq!(
            plan,
            SlewPlan::AdjustSpeed {
                forward: false,
                high_speed: false
            }
        );
    }

    #[test]
    fn high_speed_on_either_side_requires_stop() {
        assert!(matches!(
            plan_slew(slewing(true, true), 2.0 * SIDEREAL_RATE, &eq6()),
            SlewPlan::SetMode { stop_first: true, high_speed: false, .. }
        ));
        assert!(matches!(
            plan_slew(slewing(true, false), LOW_SPEED_MARGIN, &eq6()),
            SlewPlan::SetMode { stop_first: true, high_speed: true, .. }
        ));
    }

    #[test]
    fn regime_switches_below_margin_when_low_speed_cannot_reach_rate() {
        let axis = eq6();
        let limit = axis.low_speed_slew_rate();
        assert!(limit < LOW_SPEED_MARGIN);
        assert!(is_high_speed_rate(120.0 * SIDEREAL_RATE, &axis));
        assert!(is_high_speed_rate(-limit, &axis));
        assert!(!is_high_speed_rate(0.99 * limit, &axis));

        // a fine-grained axis still switches at the fixed margin
        let fine = AxisCalibration::new(9_024_000, 64_935_000, 16, 0).unwrap();
        assert!(!is_high_speed_rate(120.0 * SIDEREAL_RATE, &fine));
        assert!(is_high_speed_rate(LOW_SPEED_MARGIN, &fine));
    }

    #[test]
    fn goto_in_progress_requires_stop() {
        let status = AxisStatus::new(
            MotionState::SlewingTo {
                forward: true,
                high_speed: false,
            },
            true,
        );
        assert!(matches!(
            plan_slew(status, SIDEREAL_RATE, &eq6()),
            SlewPlan::SetMode { stop_first: true, .. }
        ));
    }

    #[test]
    fn motion_mode_codes() {
        let mut mode = MotionMode {
            kind: MotionKind::Slew,
            high_speed: false,
            forward: true,
            hemisphere: Hemisphere::North,
        };
        assert_eq!(mode.code(), 0x10);
        mode.high_speed = true;
        mode.forward = false;
        assert_eq!(mode.code(), 0x31);
        mode.kind = MotionKind::Goto;
        mode.hemisphere = Hemisphere::South;
        assert_eq!(mode.code(), 0x03);
        mode.high_speed = false;
        assert_eq!(mode.code(), 0x23);
    }

    #[test]
    fn provisional_status_is_not_confirmed() {
        let mut tracked = TrackedStatus::default();
        assert_eq!(tracked.source, StatusSource::Unknown);
        tracked.assume(slewing(true, false));
        assert!(!tracked.is_confirmed());
        tracked.confirm(AxisStatus::new(MotionState::Stopped, true));
        assert!(tracked.is_confirmed());
        tracked.invalidate();
        assert!(!tracked.is_confirmed());
    }

    #[test]
    fn clamp_limits_both_directions() {
        assert_eq!(clamp_rate(1.0), MAX_SLEW_SPEED);
        assert_eq!(clamp_rate(-1.0), -MAX_SLEW_SPEED);
        assert_eq!(clamp_rate(SIDEREAL_RATE), SIDEREAL_RATE);
    }
}
