//! Upload command: drive a waiting target through a full load-and-boot session.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sfl::{Port, Uploader, UploaderConfig};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, serial, use_fancy_output, was_interrupted};

/// How the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    /// Boot at this address, or at the first image when `None`.
    Jump(Option<u32>),
    /// Leave the target without booting.
    Abort,
}

/// Everything the user asked to upload.
#[derive(Debug, Clone)]
pub(crate) struct UploadPlan {
    pub(crate) images: Vec<(PathBuf, u32)>,
    pub(crate) cmdline: Option<String>,
    pub(crate) cmdline_address: Option<u32>,
    pub(crate) initrd: Option<(PathBuf, u32)>,
    pub(crate) finish: Finish,
}

/// One step of the session, with file contents already read.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Load {
        label: String,
        address: u32,
        data: Vec<u8>,
    },
    Cmdline(u32),
    Initrd { start: u32, end: u32 },
    Jump(u32),
    Abort,
}

/// Exclusive end of `len` bytes at `address`; may be exactly 4 GiB.
fn check_range(address: u32, len: usize) -> Result<u64> {
    let end = u64::from(address) + len as u64;
    if end > 1 << 32 {
        return Err(CliError::Usage(format!(
            "{len} bytes at 0x{address:08X} do not fit in the 32-bit address space"
        ))
        .into());
    }
    Ok(end)
}

/// Initrd bounds travel as a 32-bit word, so the end itself must fit.
fn initrd_end(start: u32, len: usize) -> Result<u32> {
    let end = check_range(start, len)?;
    u32::try_from(end).map_err(|_| {
        CliError::Usage(format!(
            "initrd at 0x{start:08X} ends at 4 GiB, which INITRDEND cannot express"
        ))
        .into()
    })
}

/// Read all inputs and lay out the session before touching the port.
fn build_steps(plan: &UploadPlan) -> Result<Vec<Step>> {
    let mut steps = Vec::new();

    for (path, address) in &plan.images {
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        check_range(*address, data.len())?;
        steps.push(Step::Load {
            label: path.display().to_string(),
            address: *address,
            data,
        });
    }

    if let Some(address) = plan.cmdline_address {
        if let Some(text) = &plan.cmdline {
            let mut data = text.as_bytes().to_vec();
            data.push(0);
            check_range(address, data.len())?;
            steps.push(Step::Load {
                label: "command line".to_string(),
                address,
                data,
            });
        }
        steps.push(Step::Cmdline(address));
    }

    if let Some((path, start)) = &plan.initrd {
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let end = initrd_end(*start, data.len())?;
        steps.push(Step::Load {
            label: path.display().to_string(),
            address: *start,
            data,
        });
        steps.push(Step::Initrd { start: *start, end });
    }

    steps.push(match plan.finish {
        Finish::Abort => Step::Abort,
        Finish::Jump(Some(address)) => Step::Jump(address),
        Finish::Jump(None) => {
            let (_, address) = plan
                .images
                .first()
                .ok_or_else(|| CliError::Usage("Nothing to boot".to_string()))?;
            Step::Jump(*address)
        },
    });

    Ok(steps)
}

fn total_bytes(steps: &[Step]) -> u64 {
    steps
        .iter()
        .map(|step| match step {
            Step::Load { data, .. } => data.len() as u64,
            _ => 0,
        })
        .sum()
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

fn progress_bar(cli: &Cli, total: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                 {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

fn uploader_config(config: &Config) -> UploaderConfig {
    let mut uploader = UploaderConfig::default();
    if let Some(secs) = config.upload.handshake_timeout_secs {
        uploader.handshake_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = config.upload.ack_timeout_ms {
        uploader.ack_timeout = Duration::from_millis(ms);
    }
    if let Some(retries) = config.upload.max_retries {
        uploader.max_retries = retries;
    }
    uploader
}

fn execute<P: Port>(uploader: &mut Uploader<P>, steps: &[Step], pb: &ProgressBar) -> Result<()> {
    for step in steps {
        ensure_not_interrupted()?;
        match step {
            Step::Load {
                label,
                address,
                data,
            } => {
                pb.set_message(label.clone());
                let base = pb.position();
                uploader
                    .load(*address, data, |sent, _| pb.set_position(base + sent as u64))
                    .with_context(|| format!("Failed to load {label} at 0x{address:08X}"))?;
            },
            Step::Cmdline(address) => uploader.set_cmdline(*address)?,
            Step::Initrd { start, end } => uploader.set_initrd(*start, *end)?,
            Step::Jump(address) => uploader.jump(*address)?,
            Step::Abort => uploader.abort()?,
        }
    }
    Ok(())
}

/// Upload command implementation.
pub(crate) fn cmd_upload(cli: &Cli, config: &Config, plan: &UploadPlan) -> Result<()> {
    let steps = build_steps(plan)?;
    let total = total_bytes(&steps);

    let port_name = serial::select_port(cli.port.as_deref(), config)?;
    let baud = cli.baud(config);
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {baud} baud",
            style("→").cyan(),
            style(&port_name).green()
        );
    }
    let port = serial::open_port(&port_name, baud)?;
    let mut uploader = Uploader::with_config(port, uploader_config(config));

    if !cli.quiet {
        eprintln!(
            "{} Waiting for target, reset the board now...",
            style("⏳").yellow()
        );
    }
    uploader.connect()?;
    if !cli.quiet {
        eprintln!("{} Connected", style("✓").green());
    }

    let pb = progress_bar(cli, total);
    let result = execute(&mut uploader, &steps, &pb);
    // Best effort; the session outcome is what gets reported
    let _ = uploader.close();
    result?;
    pb.finish_and_clear();

    if !cli.quiet {
        let outcome = match steps.last() {
            Some(Step::Jump(address)) => format!("target booting at 0x{address:08X}"),
            _ => "session aborted".to_string(),
        };
        eprintln!(
            "{} Uploaded {total} bytes, {outcome}",
            style("✓").green().bold()
        );
    }
    Ok(())
}
