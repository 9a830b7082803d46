use log::{debug, info, warn};
use std::thread;
use std::time::{Duration, Instant};

use crate::axis::{
    clamp_rate, plan_slew, AxisStatus, MotionKind, MotionMode, MotionState, SlewPlan,
    StatusSource, TrackedStatus,
};
use crate::calibration::{AxisCalibration, Calibration};
use crate::channel::{PortSettings, SerialChannel, SerialPortChannel};
use crate::codec;
use crate::config::{validate_link, MountConfig};
use crate::constants::*;
use crate::connection::Connection;
use crate::error::{Result, SyntaError};
use crate::shared::CancelToken;
use crate::transaction::{Reply, ReplyKind, Transaction};
use crate::types::*;

/// Main motor controller interface
pub struct MountController<C: SerialChannel = SerialPortChannel> {
    connection: Connection<C>,
    config: MountConfig,
    calibration: Option<Calibration>,
    status: [TrackedStatus; 2],
    positions: [f64; 2],
    targets: [f64; 2],
    speeds: [f64; 2],
    cancel: CancelToken,
}

impl MountController<SerialPortChannel> {
    /// Create a controller that talks to an OS serial port
    pub fn serial(config: MountConfig) -> Self {
        Self::new(SerialPortChannel::new(), config)
    }
}

impl<C: SerialChannel> MountController<C> {
    pub fn new(channel: C, config: MountConfig) -> Self {
        Self {
            connection: Connection::new(channel),
            config,
            calibration: None,
            status: [TrackedStatus::default(); 2],
            positions: [0.0; 2],
            targets: [0.0; 2],
            speeds: [0.0; 2],
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Token that aborts waits on this controller from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected() && self.calibration.is_some()
    }

    /// Number of logical users holding the connection
    pub fn connection_count(&self) -> usize {
        self.connection.references()
    }

    /// Constants read during the handshake
    pub fn calibration(&self) -> Result<&Calibration> {
        self.calibration.as_ref().ok_or(SyntaError::NotConnected)
    }

    fn axis_calibration(&self, axis: AxisId) -> Result<AxisCalibration> {
        Ok(*self.calibration()?.axis(axis)?)
    }

    /// Last-known status; only `Confirmed` values reflect the hardware.
    pub fn last_status(&self, axis: AxisId) -> Result<TrackedStatus> {
        Ok(self.status[axis.index()?])
    }

    /// Last position read or set, in radians
    pub fn last_position(&self, axis: AxisId) -> Result<f64> {
        Ok(self.positions[axis.index()?])
    }

    /// Last GOTO target, in radians
    pub fn last_target(&self, axis: AxisId) -> Result<f64> {
        Ok(self.targets[axis.index()?])
    }

    /// Last commanded slew rate, in radians per second
    pub fn last_speed(&self, axis: AxisId) -> Result<f64> {
        Ok(self.speeds[axis.index()?])
    }

    /// Connect using the port and link settings of the config.
    pub fn connect_configured(&mut self) -> Result<ConnectStatus> {
        let port = self.config.port.clone();
        self.connect(&port, self.config.baud_rate, self.config.timeout_ms, self.config.retry)
    }

    /// Open the link and read the calibration constants.
    ///
    /// A nested call while connected only raises the reference count and
    /// returns `AlreadyConnected`; each call must be paired with `disconnect`.
    pub fn connect(
        &mut self,
        port: &str,
        baud_rate: u32,
        timeout_ms: u64,
        retry: u32,
    ) -> Result<ConnectStatus> {
        validate_link(timeout_ms, retry)?;
        if port.is_empty() {
            return Err(SyntaError::BadParameter("empty port name".to_string()));
        }
        if baud_rate == 0 {
            return Err(SyntaError::BadParameter("baud rate must be positive".to_string()));
        }

        let settings = PortSettings {
            port: port.to_string(),
            baud_rate,
            timeout: Duration::from_millis(timeout_ms),
        };

        if self.connection.references() > 0 {
            self.connection.open(&settings, retry)?;
            info!(
                "Already connected to {} ({} users)",
                port,
                self.connection.references()
            );
            return Ok(ConnectStatus::AlreadyConnected);
        }

        self.connection.open(&settings, retry)?;
        match self.handshake() {
            Ok(calibration) => {
                info!("Connected to firmware {} on {}", calibration.firmware, port);
                self.calibration = Some(calibration);
                self.positions = [0.0; 2];
                self.targets = [0.0; 2];
                self.speeds = [0.0; 2];
                for status in &mut self.status {
                    status.invalidate();
                }
                Ok(ConnectStatus::Connected)
            }
            Err(e) => {
                let _ = self.connection.release();
                Err(e)
            }
        }
    }

    /// Release one reference on the link, closing it with the last one.
    pub fn disconnect(&mut self) -> Result<DisconnectStatus> {
        let left = self.connection.release()?;
        if left > 0 {
            return Ok(DisconnectStatus::StillOpen { references: left });
        }
        self.teardown();
        info!("Disconnected");
        Ok(DisconnectStatus::Closed)
    }

    fn teardown(&mut self) {
        self.calibration = None;
        self.positions = [0.0; 2];
        self.targets = [0.0; 2];
        self.speeds = [0.0; 2];
        for status in &mut self.status {
            status.invalidate();
        }
    }

    fn handshake(&mut self) -> Result<Calibration> {
        let firmware =
            FirmwareVersion::from_decoded(self.query(AxisId::Primary, cmd::GET_FIRMWARE_VERSION)?);

        let mut axes = Vec::with_capacity(2);
        for axis in AxisId::AXES {
            let steps = self.query(axis, cmd::GET_STEPS_PER_REVOLUTION)?;
            let frequency = self.query(axis, cmd::GET_TIMER_FREQUENCY)?;
            let ratio = self.query(axis, cmd::GET_HIGH_SPEED_RATIO)?;
            let pec_period = self.query(axis, cmd::GET_PEC_PERIOD)?;
            let calibration = AxisCalibration::new(steps, frequency, ratio, pec_period)?;
            debug!(
                "{:?}: {} steps/rev, {} Hz, high speed x{}, low speed up to {:.5} rad/s",
                axis,
                steps,
                frequency,
                ratio,
                calibration.low_speed_slew_rate()
            );
            axes.push(calibration);
        }

        let capabilities = match self.transact(
            AxisId::Primary,
            cmd::GET_CAPABILITIES,
            CAPABILITY_INQUIRY,
            6,
            ReplyKind::Direct,
        ) {
            Ok(reply) => codec::decode_capabilities(reply.text())?,
            Err(SyntaError::HardwareReportedError(e)) => {
                debug!("Extended inquiry not supported ({e})");
                Capabilities::empty()
            }
            Err(e) => return Err(e),
        };

        Ok(Calibration {
            firmware,
            capabilities,
            axes: [axes[0], axes[1]],
        })
    }

    fn transact(
        &mut self,
        axis: AxisId,
        command: char,
        parameter: u32,
        width: usize,
        kind: ReplyKind,
    ) -> Result<Reply> {
        let timeout = self.connection.timeout()?;
        let mut transaction = Transaction::encode(axis, command, parameter, width, kind, timeout)?;
        if command == cmd::GET_STATUS {
            transaction = transaction.expect_digits(3);
        }

        let result = self.connection.dispatch(&transaction);
        if matches!(result, Err(SyntaError::NotConnected)) && self.connection.references() == 0 {
            self.teardown();
        }
        result
    }

    fn query(&mut self, axis: AxisId, command: char) -> Result<u32> {
        self.transact(axis, command, 0, 0, ReplyKind::Numeric)?.value()
    }

    fn send(&mut self, axis: AxisId, command: char, parameter: u32, width: usize) -> Result<()> {
        self.transact(axis, command, parameter, width, ReplyKind::Direct)?;
        Ok(())
    }

    /// Query the axis status. This and `get_position` are the only ground truth.
    pub fn get_status(&mut self, axis: AxisId) -> Result<AxisStatus> {
        let index = axis.index()?;
        self.calibration()?;
        let reply = self.transact(axis, cmd::GET_STATUS, 0, 0, ReplyKind::Direct)?;
        let status = codec::decode_status(reply.text())?;
        self.status[index].confirm(status);
        Ok(status)
    }

    /// Query the axis position in radians.
    pub fn get_position(&mut self, axis: AxisId) -> Result<f64> {
        let index = axis.index()?;
        let calibration = self.axis_calibration(axis)?;
        let raw = self.query(axis, cmd::GET_POSITION)?;
        let position = calibration.steps_to_angle(raw as i64 - POSITION_OFFSET);
        self.positions[index] = position;
        Ok(position)
    }

    fn position_param(calibration: &AxisCalibration, radians: f64) -> Result<u32> {
        if !radians.is_finite() {
            return Err(SyntaError::BadParameter(format!("position {radians} rad")));
        }
        let raw = calibration.angle_to_steps(radians) + POSITION_OFFSET;
        if !(0..=MAX_PARAMETER_24 as i64).contains(&raw) {
            return Err(SyntaError::BadParameter(format!(
                "position {radians} rad outside the encoder range"
            )));
        }
        Ok(raw as u32)
    }

    /// Overwrite the absolute step position of a stopped axis.
    pub fn set_position(&mut self, axis: AxisId, radians: f64) -> Result<()> {
        let index = axis.index()?;
        let calibration = self.axis_calibration(axis)?;
        let raw = Self::position_param(&calibration, radians)?;
        let cached = self.status[index];
        if cached.source != StatusSource::Unknown && !cached.status.is_full_stop() {
            return Err(SyntaError::AxisRunning(axis));
        }
        self.send(axis, cmd::SET_POSITION, raw, 6)?;
        self.positions[index] = radians;
        Ok(())
    }

    /// Set the starting position of both axes and energise the motors.
    ///
    /// Refused with `AxisRunning` unless both axes are still uninitialized.
    pub fn initialize_axes(&mut self, positions: [f64; 2]) -> Result<()> {
        let calibration = self.calibration()?.clone();
        for (axis, position) in AxisId::AXES.into_iter().zip(positions) {
            Self::position_param(calibration.axis(axis)?, position)?;
        }

        for axis in AxisId::AXES {
            let cached = self.status[axis.index()?];
            if cached.source != StatusSource::Unknown && cached.status.is_initialized() {
                return Err(SyntaError::AxisRunning(axis));
            }
        }
        for axis in AxisId::AXES {
            if self.get_status(axis)?.is_initialized() {
                return Err(SyntaError::AxisRunning(axis));
            }
        }

        for (axis, position) in AxisId::AXES.into_iter().zip(positions) {
            self.set_position(axis, position)?;
        }
        for (axis, requested) in AxisId::AXES.into_iter().zip(positions) {
            let actual = self.get_position(axis)?;
            if (actual - requested).abs() > POSITION_TOLERANCE {
                return Err(SyntaError::PositionMismatch {
                    axis,
                    requested,
                    actual,
                });
            }
        }
        for axis in AxisId::AXES {
            self.send(axis, cmd::ACTIVATE_COILS, 0, 0)?;
            let index = axis.index()?;
            self.status[index].assume(AxisStatus::new(MotionState::Stopped, true));
        }

        info!("Axes initialized at {positions:?} rad");
        Ok(())
    }

    /// Stop `axis` (or both) with the configured stop variant.
    ///
    /// Every addressed axis is sent its stop even when an earlier one fails;
    /// the first failure is returned. Axes that took the command are marked
    /// stopped provisionally, since a decelerated stop may still be running
    /// until `get_status` confirms it.
    pub fn stop(&mut self, axis: AxisId) -> Result<()> {
        self.calibration()?;
        let mut first_error = None;
        for &target in axis.expand() {
            if let Err(e) = self.send(target, self.config.stop_mode.command(), 0, 0) {
                warn!("{target:?} stop failed: {e}");
                first_error.get_or_insert(e);
                continue;
            }
            let index = target.index()?;
            let status = self.status[index].status.with_motion(MotionState::Stopped);
            self.status[index].assume(status);
            self.speeds[index] = 0.0;
            debug!("{target:?} stop sent ({:?})", self.config.stop_mode);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Poll the status until the axis reports a full stop.
    ///
    /// Bounded by the configured stop deadline and aborted by the
    /// controller's cancel token. A cancellation left over from before the
    /// call is discarded.
    pub fn wait_until_stopped(&mut self, axis: AxisId) -> Result<AxisStatus> {
        axis.index()?;
        if self.cancel.take() {
            debug!("Discarded stale cancellation before waiting on {axis:?}");
        }
        let deadline = Instant::now() + self.config.stop_deadline();
        loop {
            if self.cancel.take() {
                return Err(SyntaError::Cancelled);
            }
            let status = self.get_status(axis)?;
            if status.is_full_stop() {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(SyntaError::Timeout);
            }
            thread::sleep(self.config.poll_interval());
        }
    }

    fn stop_and_wait(&mut self, axis: AxisId) -> Result<()> {
        self.stop(axis)?;
        self.wait_until_stopped(axis)?;
        Ok(())
    }

    fn set_motion_mode(&mut self, axis: AxisId, mode: MotionMode) -> Result<()> {
        self.send(axis, cmd::SET_MOTION_MODE, mode.code(), 2)
    }

    /// Move `axis` continuously at `rate` rad/s (negative for reverse).
    ///
    /// Rates beyond 800x sidereal are clamped; near-zero rates stop the axis.
    pub fn slew(&mut self, axis: AxisId, rate: f64) -> Result<()> {
        let index = axis.index()?;
        if !rate.is_finite() {
            return Err(SyntaError::BadParameter(format!("slew rate {rate}")));
        }
        let calibration = self.calibration()?.clone();
        let rate = clamp_rate(rate);
        if rate.abs() <= MIN_SLEW_SPEED {
            return self.stop(axis);
        }

        let current = self.get_status(axis)?;
        let (forward, high_speed) = match plan_slew(current, rate, calibration.axis(axis)?) {
            SlewPlan::Stop => return self.stop(axis),
            SlewPlan::AdjustSpeed {
                forward,
                high_speed,
            } => (forward, high_speed),
            SlewPlan::SetMode {
                stop_first,
                forward,
                high_speed,
            } => {
                if stop_first {
                    debug!("{axis:?} must stop before changing mode");
                    self.stop_and_wait(axis)?;
                }
                let mode = MotionMode {
                    kind: MotionKind::Slew,
                    high_speed,
                    forward,
                    hemisphere: self.config.hemisphere,
                };
                self.set_motion_mode(axis, mode)?;
                (forward, high_speed)
            }
        };

        let speed_int = calibration.rate_to_speed_int(axis, rate, high_speed)?;
        self.send(axis, cmd::SET_STEP_PERIOD, speed_int, 6)?;
        self.send(axis, cmd::START_MOTION, 0, 0)?;

        let status = current.with_motion(MotionState::Slewing {
            forward,
            high_speed,
        });
        self.status[index].assume(status);
        self.speeds[index] = rate;
        debug!("{axis:?} slewing at {rate:.6} rad/s (period {speed_int})");
        Ok(())
    }

    /// Move `axis` to the absolute position `target` in radians.
    pub fn slew_to(&mut self, axis: AxisId, target: f64) -> Result<()> {
        let index = axis.index()?;
        if !target.is_finite() {
            return Err(SyntaError::BadParameter(format!("target {target} rad")));
        }
        let calibration = self.axis_calibration(axis)?;

        let position = self.get_position(axis)?;
        let steps = calibration.angle_to_steps(target - position);
        let distance = steps.unsigned_abs();
        if distance > MAX_PARAMETER_24 as u64 {
            return Err(SyntaError::BadParameter(format!(
                "move of {steps} steps exceeds the GOTO range"
            )));
        }
        if distance == 0 {
            self.targets[index] = target;
            return Ok(());
        }

        let current = self.get_status(axis)?;
        if !current.is_full_stop() {
            self.stop_and_wait(axis)?;
        }

        let forward = steps > 0;
        let high_speed = distance > calibration.low_speed_goto_margin as u64;
        let mode = MotionMode {
            kind: MotionKind::Goto,
            high_speed,
            forward,
            hemisphere: self.config.hemisphere,
        };
        self.set_motion_mode(axis, mode)?;
        self.send(axis, cmd::SET_GOTO_INCREMENT, distance as u32, 6)?;
        self.send(axis, cmd::SET_BREAK_INCREMENT, self.config.break_steps, 6)?;
        self.send(axis, cmd::START_MOTION, 0, 0)?;

        let status = current.with_motion(mode.motion_state());
        self.status[index].assume(status);
        self.targets[index] = target;
        debug!("{axis:?} GOTO {target:.6} rad ({steps} steps)");
        Ok(())
    }

    /// Fire or release the camera snap port
    pub fn set_snap_port(&mut self, on: bool) -> Result<()> {
        self.calibration()?;
        self.send(AxisId::Primary, cmd::SET_SNAP_PORT, u32::from(on), 1)
    }

    /// Set the polar scope LED brightness
    pub fn set_polar_led(&mut self, brightness: u8) -> Result<()> {
        self.calibration()?;
        self.send(AxisId::Primary, cmd::SET_POLAR_LED, u32::from(brightness), 2)
    }

    /// Toggle PEC training, PEC, encoders or reset the home index
    pub fn set_feature(&mut self, axis: AxisId, feature: MountFeature) -> Result<()> {
        self.calibration()?;
        for &target in axis.expand() {
            self.send(target, cmd::SET_FEATURE, feature.code(), 6)?;
        }
        Ok(())
    }
}
