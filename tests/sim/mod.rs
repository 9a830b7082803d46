//! In-process motor controller simulator for the integration tests.
//!
//! Answers the wire protocol the way an EQ6-class board does, keeping just
//! enough per-axis state to model running, stopping and initialization.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use synta_protocol::codec::{decode_hex, encode_parameter};
use synta_protocol::{MountConfig, MountController, PortSettings, Result, SerialChannel, SyntaError};

pub const PORT: &str = "/dev/ttySIM0";
pub const STEPS_PER_REV: u32 = 9_024_000;
pub const TIMER_FREQ: u32 = 64_935;
pub const HIGH_SPEED_RATIO: u32 = 16;
pub const PEC_PERIOD: u32 = 50_133;

/// Raw position register value of angle zero
pub const ZERO_POSITION: u32 = 0x80_0000;

#[derive(Debug, Clone, Default)]
pub struct SimAxis {
    pub position: u32,
    pub initialized: bool,
    pub running: bool,
    pub slew: bool,
    pub forward: bool,
    pub high_speed: bool,
    pub period: u32,
    pub goto_increment: u32,
    pub break_increment: u32,
    stop_countdown: usize,
}

#[derive(Debug)]
pub struct SimState {
    /// Every frame received, without the leading `:` and trailing CR
    pub log: Vec<String>,
    pub axes: [SimAxis; 2],
    pub steps_per_rev: u32,
    pub firmware: String,
    /// Body of the `q` response; `None` answers with an error
    pub capabilities: Option<String>,
    /// Status polls after a decelerated stop before the axis halts
    pub stop_polls: usize,
    pub never_stops: bool,
    /// Added to every position read
    pub position_error_steps: u32,
    pub silent: bool,
    /// Frames answered with a bad packet error
    pub rejected: Vec<String>,
    pub fail_writes: bool,
    pub open: bool,
    pub open_count: usize,
}

impl Default for SimState {
    fn default() -> Self {
        let axis = SimAxis {
            position: ZERO_POSITION,
            forward: true,
            ..SimAxis::default()
        };
        Self {
            log: Vec::new(),
            axes: [axis.clone(), axis],
            steps_per_rev: STEPS_PER_REV,
            firmware: "020300".to_string(),
            capabilities: Some("223000".to_string()),
            stop_polls: 2,
            never_stops: false,
            position_error_steps: 0,
            silent: false,
            rejected: Vec::new(),
            fail_writes: false,
            open: false,
            open_count: 0,
        }
    }
}

fn numeric(value: u32) -> String {
    format!("={}", encode_parameter(value & 0xFF_FFFF, 6).unwrap_or_default())
}

impl SimState {
    pub fn commands(&self) -> Vec<&str> {
        self.log.iter().map(String::as_str).collect()
    }

    pub fn count(&self, frame: &str) -> usize {
        self.log.iter().filter(|f| f.as_str() == frame).count()
    }

    fn status_text(axis: &SimAxis) -> String {
        let mut mode = 0;
        if axis.slew {
            mode |= 0x1;
        }
        if !axis.forward {
            mode |= 0x2;
        }
        if axis.high_speed {
            mode |= 0x4;
        }
        format!(
            "={:X}{}{}",
            mode,
            u8::from(axis.running),
            u8::from(axis.initialized)
        )
    }

    fn answer(&mut self, frame: &str) -> String {
        if self.rejected.iter().any(|r| r == frame) {
            return "!0".to_string();
        }
        let mut chars = frame.chars();
        let (Some(command), Some(axis_char)) = (chars.next(), chars.next()) else {
            return "!0".to_string();
        };
        let digits: String = chars.collect();
        let parameter = if digits.is_empty() {
            0
        } else {
            match decode_hex(&digits) {
                Ok(value) => value,
                Err(_) => return "!3".to_string(),
            }
        };
        let index = match axis_char {
            '1' => 0,
            '2' => 1,
            _ => return "!0".to_string(),
        };

        let never_stops = self.never_stops;
        let stop_polls = self.stop_polls;
        let position_error = self.position_error_steps;
        let steps_per_rev = self.steps_per_rev;
        let axis = &mut self.axes[index];

        match command {
            'e' => format!("={}", self.firmware),
            'a' => numeric(steps_per_rev),
            'b' => numeric(TIMER_FREQ),
            'g' => numeric(HIGH_SPEED_RATIO),
            's' => numeric(PEC_PERIOD),
            'q' => match &self.capabilities {
                Some(body) => format!("={body}"),
                None => "!0".to_string(),
            },
            'f' => {
                if axis.stop_countdown > 0 {
                    axis.stop_countdown -= 1;
                    if axis.stop_countdown == 0 {
                        axis.running = false;
                    }
                }
                Self::status_text(axis)
            }
            'j' => numeric(axis.position.wrapping_add(position_error)),
            'E' => {
                axis.position = parameter;
                "=".to_string()
            }
            'F' => {
                axis.initialized = true;
                "=".to_string()
            }
            'G' => {
                if axis.running {
                    return "!2".to_string();
                }
                let kind = parameter >> 4;
                axis.slew = kind == 1 || kind == 3;
                axis.high_speed = kind == 0 || kind == 3;
                axis.forward = parameter & 0x1 == 0;
                "=".to_string()
            }
            'I' => {
                axis.period = parameter;
                "=".to_string()
            }
            'H' => {
                axis.goto_increment = parameter;
                "=".to_string()
            }
            'M' => {
                axis.break_increment = parameter;
                "=".to_string()
            }
            'J' => {
                if !axis.initialized {
                    return "!4".to_string();
                }
                axis.running = true;
                "=".to_string()
            }
            'K' => {
                if axis.running && !never_stops {
                    axis.stop_countdown = stop_polls;
                    if stop_polls == 0 {
                        axis.running = false;
                    }
                }
                "=".to_string()
            }
            'L' => {
                if !never_stops {
                    axis.running = false;
                    axis.stop_countdown = 0;
                }
                "=".to_string()
            }
            'O' | 'V' | 'W' => "=".to_string(),
            _ => "!0".to_string(),
        }
    }
}

/// Serial channel wired to a shared [`SimState`]
pub struct SimChannel {
    state: Arc<Mutex<SimState>>,
    inbound: VecDeque<u8>,
}

impl SimChannel {
    pub fn new(state: Arc<Mutex<SimState>>) -> Self {
        Self {
            state,
            inbound: VecDeque::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }
}

impl SerialChannel for SimChannel {
    fn open(&mut self, _settings: &PortSettings) -> Result<()> {
        let mut state = self.state();
        state.open = true;
        state.open_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state().open = false;
        self.inbound.clear();
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn clear_input(&mut self) -> Result<()> {
        self.inbound.clear();
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(SyntaError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        let text = String::from_utf8_lossy(data);
        let frame = text.trim_start_matches(':').trim_end_matches('\r').to_string();
        state.log.push(frame.clone());
        if state.silent {
            return Ok(());
        }
        let reply = state.answer(&frame);
        drop(state);
        self.inbound.extend(reply.bytes());
        self.inbound.push_back(b'\r');
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        match self.inbound.pop_front() {
            Some(byte) => Ok(Some(byte)),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(1)));
                Ok(None)
            }
        }
    }
}

/// Settings that keep polling loops short
pub fn test_config() -> MountConfig {
    MountConfig {
        port: PORT.to_string(),
        timeout_ms: 50,
        poll_interval_ms: 1,
        stop_deadline_ms: 2_000,
        ..MountConfig::default()
    }
}

pub fn simulated(state: SimState, config: MountConfig) -> (MountController<SimChannel>, Arc<Mutex<SimState>>) {
    let state = Arc::new(Mutex::new(state));
    let mount = MountController::new(SimChannel::new(Arc::clone(&state)), config);
    (mount, state)
}

/// Connected controller with an empty command log
pub fn connected_with(state: SimState, config: MountConfig) -> (MountController<SimChannel>, Arc<Mutex<SimState>>) {
    let (mut mount, state) = simulated(state, config);
    mount.connect_configured().unwrap();
    state.lock().unwrap().log.clear();
    (mount, state)
}

pub fn connected() -> (MountController<SimChannel>, Arc<Mutex<SimState>>) {
    connected_with(SimState::default(), test_config())
}

/// Connected and initialized at zero on both axes, log cleared
pub fn ready() -> (MountController<SimChannel>, Arc<Mutex<SimState>>) {
    let (mut mount, state) = connected();
    mount.initialize_axes([0.0, 0.0]).unwrap();
    state.lock().unwrap().log.clear();
    (mount, state)
}

pub fn log(state: &Arc<Mutex<SimState>>) -> Vec<String> {
    state.lock().unwrap().log.clone()
}

pub fn clear_log(state: &Arc<Mutex<SimState>>) {
    state.lock().unwrap().log.clear();
}

/// Wire form of a `width`-digit parameter
pub fn hex(value: u32, width: usize) -> String {
    encode_parameter(value, width).unwrap()
}
