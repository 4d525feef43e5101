//! sfl CLI - load and boot programs over the SFL serial protocol.
//!
//! ## Features
//!
//! - Upload images, a kernel command line and an initial ramdisk, then jump
//! - Serve a simulated target for testing host tooling
//! - Serial port auto-detection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use sfl::Region;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;
mod sim;

use config::Config;

/// Name of the installed binary.
pub(crate) const BIN_NAME: &str = "sfl";

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and symbols should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or missing setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// Cancelled by the user; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// sfl - load programs into a target's memory over a serial line and boot them.
///
/// Environment variables:
///   SFL_PORT   - Default serial port
///   SFL_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "sfl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "SFL_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "SFL_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Baud rate from the flag, the config file or the default.
    pub(crate) fn baud(&self, config: &Config) -> u32 {
        self.baud
            .or(config.connection.baud)
            .unwrap_or(serial::DEFAULT_BAUD)
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Load images into a waiting target and boot it.
    Upload {
        /// Image to load, as FILE:ADDRESS (repeatable, loaded in order).
        #[arg(required = true, value_name = "FILE:ADDRESS", value_parser = parse_image_arg)]
        images: Vec<(PathBuf, u32)>,

        /// Kernel command line text, loaded NUL-terminated at --cmdline-address.
        #[arg(long, requires = "cmdline_address")]
        cmdline: Option<String>,

        /// Address of the kernel command line.
        #[arg(long, value_parser = parse_hex_u32)]
        cmdline_address: Option<u32>,

        /// Initial ramdisk file, loaded at --initrd-address.
        #[arg(long, requires = "initrd_address")]
        initrd: Option<PathBuf>,

        /// Address of the initial ramdisk.
        #[arg(long, value_parser = parse_hex_u32, requires = "initrd")]
        initrd_address: Option<u32>,

        /// Entry point (defaults to the address of the first image).
        #[arg(long, value_parser = parse_hex_u32)]
        jump: Option<u32>,

        /// End the session with ABORT instead of booting.
        #[arg(long, conflicts_with = "jump")]
        no_jump: bool,
    },

    /// Act as a target: accept a session and report what would be booted.
    Serve {
        /// Writable region as START:SIZE (repeatable; default: all memory).
        #[arg(long = "region", value_name = "START:SIZE")]
        regions: Vec<Region>,

        /// Directory to dump loaded memory and the boot report into.
        #[arg(long, value_name = "DIR")]
        dump: Option<PathBuf>,

        /// Polls to wait for the host's handshake; each empty poll takes
        /// about 1 ms [default: 60000]
        #[arg(long, value_name = "POLLS")]
        handshake_polls: Option<u32>,

        /// Consecutive failures before giving up.
        #[arg(long)]
        max_failures: Option<u8>,

        /// Give up on a stalled frame after this many empty polls.
        #[arg(long, value_name = "POLLS")]
        frame_deadline: Option<u32>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Parse an image argument in format "file:address".
///
/// Splits at the last colon so Windows drive letters survive.
fn parse_image_arg(s: &str) -> Result<(PathBuf, u32), String> {
    let (path, address) = s.rsplit_once(':').ok_or_else(|| {
        format!("Invalid format: '{s}'. Expected 'file:address' (e.g., 'kernel.bin:0x40000000')")
    })?;
    if path.is_empty() {
        return Err(format!("Missing file name in '{s}'"));
    }
    Ok((PathBuf::from(path), parse_hex_u32(address)?))
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if matches!(err.downcast_ref::<sfl::Error>(), Some(sfl::Error::Interrupted)) {
        return 130;
    }
    1
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    sfl::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    match &cli.command {
        Commands::Upload {
            images,
            cmdline,
            cmdline_address,
            initrd,
            initrd_address,
            jump,
            no_jump,
        } => {
            let plan = commands::upload::UploadPlan {
                images: images.clone(),
                cmdline: cmdline.clone(),
                cmdline_address: *cmdline_address,
                initrd: initrd.clone().zip(*initrd_address),
                finish: if *no_jump {
                    commands::upload::Finish::Abort
                } else {
                    commands::upload::Finish::Jump(*jump)
                },
            };
            commands::upload::cmd_upload(cli, &config, &plan)
        },
        Commands::Serve {
            regions,
            dump,
            handshake_polls,
            max_failures,
            frame_deadline,
        } => {
            let options = commands::serve::ServeOptions {
                regions: regions.clone(),
                dump: dump.clone(),
                handshake_polls: *handshake_polls,
                max_failures: *max_failures,
                frame_deadline: *frame_deadline,
            };
            commands::serve::cmd_serve(cli, &config, &options)
        },
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "Specify a shell type, e.g.: sfl completions bash \
                         (or use --install to auto-detect)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();
    debug!(
        "sfl v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}
