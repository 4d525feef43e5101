//! Serve command: run the target side of a session against a simulated machine.

use anyhow::{Context, Result};
use console::style;
use log::info;
use sfl::{
    BoundedMachine, Channel, FrameDeadline, Machine, PortChannel, Region, Session, SessionConfig,
};
use std::path::PathBuf;

use crate::config::Config;
use crate::sim::SimulatedMachine;
use crate::{Cli, serial};

/// Handshake deadline used by `serve` when neither a flag nor the config sets
/// one. Each empty poll waits one port read interval (1 ms), so this is
/// roughly a minute.
pub(crate) const DEFAULT_SERVE_HANDSHAKE_POLLS: u32 = 60_000;

/// Options of `sfl serve`.
#[derive(Debug, Clone, Default)]
pub(crate) struct ServeOptions {
    pub(crate) regions: Vec<Region>,
    pub(crate) dump: Option<PathBuf>,
    pub(crate) handshake_polls: Option<u32>,
    pub(crate) max_failures: Option<u8>,
    pub(crate) frame_deadline: Option<u32>,
}

/// Session configuration from flags, then the config file, then defaults.
fn session_config(options: &ServeOptions, config: &Config) -> SessionConfig {
    let polls = options
        .handshake_polls
        .or(config.serve.handshake_polls)
        .unwrap_or(DEFAULT_SERVE_HANDSHAKE_POLLS);
    let mut session = SessionConfig::default().with_handshake_polls(polls);
    if let Some(max) = options
        .max_failures
        .or(config.serve.max_failures)
    {
        session = session.with_max_failures(max);
    }
    if let Some(polls) = options
        .frame_deadline
        .or(config.serve.frame_deadline)
    {
        session = session.with_frame_deadline(FrameDeadline::Polls(polls));
    }
    session
}

fn regions(options: &ServeOptions, config: &Config) -> Result<Vec<Region>> {
    if options.regions.is_empty() {
        config.serve.parsed_regions()
    } else {
        Ok(options.regions.clone())
    }
}

fn run_session<C: Channel, M: Machine>(
    cli: &Cli,
    channel: C,
    machine: M,
    config: SessionConfig,
) -> Result<()> {
    let end = Session::with_config(channel, machine, config)
        .run()
        .context("Session failed")?;
    if !cli.quiet {
        eprintln!(
            "{} Host aborted after {} frames ({} bytes loaded)",
            style("✓").green(),
            end.frames,
            end.bytes_loaded
        );
    }
    Ok(())
}

/// Serve command implementation.
pub(crate) fn cmd_serve(cli: &Cli, config: &Config, options: &ServeOptions) -> Result<()> {
    let session = session_config(options, config);
    let regions = regions(options, config)?;

    let port_name = serial::select_port(cli.port.as_deref(), config)?;
    let port = serial::open_port(&port_name, cli.baud(config))?;
    let channel = PortChannel::new(port)?;

    if !cli.quiet {
        eprintln!(
            "{} Serving on {}, waiting for a host...",
            style("⏳").yellow(),
            style(&port_name).green()
        );
    }

    let machine = SimulatedMachine::new(options.dump.clone());
    if regions.is_empty() {
        run_session(cli, channel, machine, session)
    } else {
        for region in &regions {
            info!("Writable region {region}");
        }
        run_session(cli, channel, BoundedMachine::new(machine, regions), session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfl::channel::DEFAULT_POLL_INTERVAL;
    use sfl::target::DEFAULT_MAX_FAILURES;
    use std::time::Duration;

    #[test]
    fn test_session_defaults() {
        let session = session_config(&ServeOptions::default(), &Config::default());
        assert_eq!(session.handshake_polls, DEFAULT_SERVE_HANDSHAKE_POLLS);
        assert_eq!(session.max_failures, DEFAULT_MAX_FAILURES);
        assert_eq!(session.frame_deadline, FrameDeadline::Unbounded);
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        config.serve.handshake_polls = Some(10);
        config.serve.max_failures = Some(2);
        let options = ServeOptions {
            max_failures: Some(7),
            frame_deadline: Some(500),
            ..ServeOptions::default()
        };

        let session = session_config(&options, &config);

        assert_eq!(session.handshake_polls, 10);
        assert_eq!(session.max_failures, 7);
        assert_eq!(session.frame_deadline, FrameDeadline::Polls(500));
    }

    #[test]
    fn test_default_handshake_wait_is_about_a_minute() {
        let wait = DEFAULT_POLL_INTERVAL * DEFAULT_SERVE_HANDSHAKE_POLLS;
        assert!(wait >= Duration::from_secs(30));
        assert!(wait <= Duration::from_secs(120));
    }

    #[test]
    fn test_frame_deadline_from_config() {
        let mut config = Config::default();
        config.serve.frame_deadline = Some(2000);

        let session = session_config(&ServeOptions::default(), &config);
        assert_eq!(session.frame_deadline, FrameDeadline::Polls(2000));

        let options = ServeOptions {
            frame_deadline: Some(10),
            ..ServeOptions::default()
        };
        let session = session_config(&options, &config);
        assert_eq!(session.frame_deadline, FrameDeadline::Polls(10));
    }

    #[test]
    fn test_region_flags_replace_config() {
        let mut config = Config::default();
        config.serve.regions = vec!["0x0:0x10".to_string()];

        assert_eq!(
            regions(&ServeOptions::default(), &config).unwrap(),
            vec![Region::new(0, 0x10)]
        );

        let options = ServeOptions {
            regions: vec![Region::new(0x4000_0000, 0x100)],
            ..ServeOptions::default()
        };
        assert_eq!(
            regions(&options, &config).unwrap(),
            vec![Region::new(0x4000_0000, 0x100)]
        );
    }
}
