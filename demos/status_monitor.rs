//! Status Monitor Example
//!
//! Shares one controller between a polling thread and the main thread.
//! The monitor prints confirmed axis status as JSON while the main thread
//! runs a slow slew for 10 seconds.
//!
//! Usage:
//!   cargo run --example status_monitor -- /dev/ttyUSB0

use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use synta_protocol::{AxisId, MountConfig, MountController, MountHandle, Result, SIDEREAL_RATE};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = MountConfig::from_env()?;
    if let Some(port) = std::env::args().nth(1) {
        config.port = port;
    }

    let handle = MountHandle::new(MountController::serial(config));
    handle.with(|mount| mount.connect_configured())?;

    let running = Arc::new(AtomicBool::new(true));
    let monitor = {
        let handle = handle.clone();
        let running = Arc::clone(&running);
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                for axis in AxisId::AXES {
                    let result = handle.with(|mount| {
                        mount.get_status(axis)?;
                        mount.get_position(axis)?;
                        mount.last_status(axis)
                    });
                    match result {
                        Ok(tracked) => match serde_json::to_string(&tracked) {
                            Ok(json) => info!("{:?}: {}", axis, json),
                            Err(e) => error!("Failed to serialize status: {}", e),
                        },
                        Err(e) => error!("{:?} status failed: {}", axis, e),
                    }
                }
                thread::sleep(Duration::from_secs(1));
            }
        })
    };

    handle.with(|mount| mount.slew(AxisId::Primary, 20.0 * SIDEREAL_RATE))?;
    thread::sleep(Duration::from_secs(10));

    running.store(false, Ordering::Relaxed);
    if monitor.join().is_err() {
        error!("Monitor thread panicked");
    }

    handle.with(|mount| {
        mount.stop(AxisId::Both)?;
        mount.disconnect()
    })?;
    Ok(())
}
