//! List-ports command.

use anyhow::{Context, Result};
use console::style;
use sfl::{NativePortEnumerator, PortEnumerator, PortInfo};

fn describe(port: &PortInfo) -> String {
    let mut line = style(&port.name).cyan().to_string();
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        line.push_str(&format!(" ({vid:04X}:{pid:04X})"));
    }
    if let Some(product) = port
        .product
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        line.push_str(&format!(" - {}", style(product).dim()));
    }
    line
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    }
    for port in &ports {
        eprintln!("  {} {}", style("•").green(), describe(port));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_usb_port() {
        console::set_colors_enabled(false);
        let port = PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            vid: Some(0x1A86),
            pid: Some(0x7523),
            manufacturer: None,
            product: Some("USB Serial".to_string()),
            serial_number: None,
        };
        assert_eq!(describe(&port), "/dev/ttyUSB0 (1A86:7523) - USB Serial");
    }

    #[test]
    fn test_json_shape() {
        let port = PortInfo {
            name: "COM3".to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        let value = serde_json::to_value(vec![port]).unwrap();
        assert_eq!(value[0]["name"], "COM3");
        assert!(value[0]["vid"].is_null());
    }
}
