//! Serial port selection.
//!
//! An explicit `--port` wins, then the configured port. Otherwise the port is
//! auto-detected: USB serial adapters are preferred, and exactly one
//! candidate must remain. Zero or several candidates are usage errors so
//! scripts get a stable exit code instead of a guess.

use {
    crate::{CliError, config::Config},
    anyhow::{Context, Result},
    log::{debug, info},
    sfl::{NativePort, NativePortEnumerator, PortEnumerator, PortInfo, SerialConfig},
    std::time::Duration,
};

/// Baud rate used when neither flags nor configuration name one.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Read timeout the port is opened with; the library adjusts it as needed.
const OPEN_TIMEOUT: Duration = Duration::from_millis(50);

/// Pick the port to use.
pub fn select_port(explicit: Option<&str>, config: &Config) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }
    if let Some(name) = &config.connection.port {
        debug!("Using port from config: {name}");
        return Ok(name.clone());
    }

    let ports = NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")?;
    let port = pick_candidate(ports)?;
    info!("Auto-selected port: {}", port.name);
    Ok(port.name)
}

fn pick_candidate(ports: Vec<PortInfo>) -> Result<PortInfo> {
    let (usb, other): (Vec<_>, Vec<_>) = ports
        .into_iter()
        .partition(|p| p.vid.is_some());
    let mut candidates = if usb.is_empty() { other } else { usb };

    match candidates.len() {
        0 => Err(CliError::Usage("No serial ports found; pass --port".to_string()).into()),
        1 => Ok(candidates.remove(0)),
        _ => {
            let names: Vec<&str> = candidates
                .iter()
                .map(|p| p.name.as_str())
                .collect();
            Err(CliError::Usage(format!(
                "Several serial ports found ({}); pass --port",
                names.join(", ")
            ))
            .into())
        },
    }
}

/// Open `name` at `baud`.
pub fn open_port(name: &str, baud: u32) -> Result<NativePort> {
    let config = SerialConfig::new(name, baud).with_timeout(OPEN_TIMEOUT);
    NativePort::open(&config).with_context(|| format!("Failed to open serial port {name}"))
}
