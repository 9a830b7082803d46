//! Basic Usage Example
//!
//! This example demonstrates the core functionality of the Synta protocol library:
//! - Listing and selecting serial ports
//! - Connecting and reading the calibration constants
//! - Initializing both axes
//! - Slewing at sidereal rate, a short GOTO, and stopping
//!
//! Usage:
//!   cargo run --example basic_usage                  # Interactive mode
//!   cargo run --example basic_usage -- COM3          # Specify port
//!   cargo run --example basic_usage -- /dev/ttyUSB0
//!
//! Settings other than the port come from `$SYNTA_CONFIG` (default `synta.toml`).
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example basic_usage
//!   RUST_LOG=trace cargo run --example basic_usage   # raw TX/RX bytes

use inquire::Select;
use log::{info, warn};
use std::thread;
use std::time::Duration;
use synta_protocol::{
    list_ports, AxisId, MountConfig, MountController, Result, SyntaError, SIDEREAL_RATE,
};

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Selection cancelled: {}", e),
            )
        })?;

    // Extract just the port name (before " - ")
    let port_name = selection
        .split(" - ")
        .next()
        .unwrap_or_default()
        .to_string();
    Ok(port_name)
}

fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = MountConfig::from_env()?;

    // Port from the command line, then the config file, then interactive selection
    config.port = match std::env::args().nth(1) {
        Some(port) => port,
        None if !config.port.is_empty() => config.port,
        None => select_port()?,
    };

    info!("Connecting to mount on {}...", config.port);
    let mut mount = MountController::serial(config);
    mount.connect_configured()?;

    info!("=== Calibration ===");
    let calibration = mount.calibration()?.clone();
    info!("Firmware {} ({:?})", calibration.firmware, calibration.capabilities);
    for axis in AxisId::AXES {
        let c = calibration.axis(axis)?;
        info!(
            "{:?}: {} steps/rev, timer {} Hz, high speed ratio {}",
            axis, c.steps_per_revolution, c.timer_frequency, c.high_speed_ratio
        );
    }

    info!("=== Initialization ===");
    match mount.initialize_axes([0.0, 0.0]) {
        Ok(()) => info!("✓ Axes initialized at 0,0"),
        Err(SyntaError::AxisRunning(axis)) => warn!("{:?} was already initialized", axis),
        Err(e) => return Err(e),
    }

    info!("=== Tracking at sidereal rate for 5s ===");
    mount.slew(AxisId::Primary, SIDEREAL_RATE)?;
    thread::sleep(Duration::from_secs(5));
    info!(
        "RA position: {:.6} rad",
        mount.get_position(AxisId::Primary)?
    );

    info!("=== GOTO 1 degree on declination ===");
    mount.slew_to(AxisId::Secondary, 1.0_f64.to_radians())?;
    mount.wait_until_stopped(AxisId::Secondary)?;
    info!(
        "Dec position: {:.4} deg",
        mount.get_position(AxisId::Secondary)?.to_degrees()
    );

    mount.stop(AxisId::Both)?;
    mount.wait_until_stopped(AxisId::Primary)?;
    mount.disconnect()?;

    info!("=== Basic Usage Complete ===");

    Ok(())
}
