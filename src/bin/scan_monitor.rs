//! Connect to a scanner, announce this host as stream target and print frame summaries.
//!
//! Usage: scan_monitor [config.toml] [--frames=N] [--dump]

use anyhow::Context;
use microscan3::dump::{dump_data, frame_summary_line};
use microscan3::{DriverConfig, Microscan3};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let dump = if let Some(pos) = raw_args.iter().position(|a| a == "--dump") {
        raw_args.remove(pos);
        true
    } else {
        false
    };
    let max_frames: Option<u64> = match raw_args.iter().position(|a| a.starts_with("--frames=")) {
        Some(pos) => {
            let arg = raw_args.remove(pos);
            Some(arg["--frames=".len()..].parse::<u64>().context("bad --frames")?)
        }
        None => None,
    };
    let config = match raw_args.into_iter().next().map(PathBuf::from) {
        Some(path) => DriverConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
        None => DriverConfig::default(),
    };

    let mut device = Microscan3::with_session_config(config.communication.clone(), config.session.clone());
    let type_code = device
        .request_type_code(&config.communication)
        .context("reading type code")?;
    println!(
        "type code {} interface {:?} max range {} m",
        type_code.type_code, type_code.interface_type, type_code.max_range
    );
    match device.request_firmware_version() {
        Ok(v) => println!("firmware {}", v),
        Err(e) => log::warn!("firmware version unavailable: {}", e),
    }

    let (tx, rx) = mpsc::channel();
    let local = device.start(move |data| {
        let _ = tx.send(data);
    })?;
    println!("listening for scans on {}", local);
    device
        .change_sensor_settings(&device.settings())
        .context("writing communication settings")?;

    let mut frames = 0u64;
    loop {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(data) => {
                frames += 1;
                if dump {
                    println!("{}", dump_data(&data));
                } else {
                    println!("{}", frame_summary_line(&data));
                }
                if max_frames.map_or(false, |n| frames >= n) {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => log::warn!("no scan data for 5 s"),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    device.stop();
    Ok(())
}
