//! Simulated target machine for `sfl serve`.
//!
//! Loaded bytes are kept in memory segments. Control transfer cannot run the
//! loaded code, so it reports what would have been booted (and optionally
//! dumps the segments to disk) and ends the process.

use anyhow::{Context, Result};
use console::style;
use serde_json::json;
use sfl::{BootParams, Machine};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

/// Bytes loaded at consecutive addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// First address.
    pub start: u32,
    /// Loaded bytes.
    pub data: Vec<u8>,
}

impl Segment {
    fn end(&self) -> u64 {
        u64::from(self.start) + self.data.len() as u64
    }
}

/// Memory of the simulated target.
#[derive(Debug, Default)]
pub struct SimulatedMachine {
    segments: Vec<Segment>,
    dump: Option<PathBuf>,
}

impl SimulatedMachine {
    /// Machine dumping its segments to `dump` on boot, if given.
    pub fn new(dump: Option<PathBuf>) -> Self {
        Self {
            segments: Vec::new(),
            dump,
        }
    }

    /// Segments in load order; a write continuing the previous one extends it.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total bytes loaded.
    pub fn loaded_bytes(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.data.len())
            .sum()
    }

    /// JSON description of a boot.
    pub fn boot_report(&self, params: BootParams, address: u32) -> serde_json::Value {
        let segments: Vec<serde_json::Value> = self
            .segments
            .iter()
            .map(|s| {
                json!({
                    "start": format!("0x{:08X}", s.start),
                    "length": s.data.len(),
                })
            })
            .collect();

        json!({
            "entry": format!("0x{address:08X}"),
            "params": serde_json::to_value(params).unwrap_or_default(),
            "loaded_bytes": self.loaded_bytes(),
            "segments": segments,
        })
    }

    /// Write every segment to `dir/<start>.bin` and the report to `dir/boot.json`.
    pub fn write_dump(&self, dir: &Path, report: &serde_json::Value) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create dump directory {}", dir.display()))?;
        for segment in &self.segments {
            let path = dir.join(format!("{:08x}.bin", segment.start));
            fs::write(&path, &segment.data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        let path = dir.join("boot.json");
        fs::write(&path, serde_json::to_string_pretty(report)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

impl Machine for SimulatedMachine {
    fn write_memory(&mut self, address: u32, data: &[u8]) -> sfl::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        match self.segments.last_mut() {
            Some(last) if last.end() == u64::from(address) => last.data.extend_from_slice(data),
            _ => self.segments.push(Segment {
                start: address,
                data: data.to_vec(),
            }),
        }
        Ok(())
    }

    fn transfer_control(&mut self, params: BootParams, address: u32) -> ! {
        let report = self.boot_report(params, address);
        if let Some(dir) = &self.dump {
            if let Err(e) = self.write_dump(dir, &report) {
                eprintln!("{} {e:#}", style("Error:").red().bold());
                process::exit(1);
            }
        }

        eprintln!(
            "{} Target jumped to 0x{address:08X} ({} bytes loaded)",
            style("✓").green().bold(),
            self.loaded_bytes()
        );
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
        process::exit(0)
    }
}
