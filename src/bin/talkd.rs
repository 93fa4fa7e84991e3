//! talk relay daemon
//!
//! Accepts TCP connections, registers the identities clients declare and
//! forwards each message to every connection registered for its receiver.
//!
//! # Usage
//!
//! ```bash
//! # Listen on all interfaces, port 9090
//! talkd
//!
//! # Listen on loopback only, custom port
//! talkd --host 127.0.0.1 --port 7000
//!
//! # Same, from the environment
//! TALK_HOST=127.0.0.1 TALK_PORT=7000 talkd
//!
//! # Enable debug logging
//! talkd --log-level debug
//! RUST_LOG=talkd=debug talkd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use talkd::config::{
    RelayConfig, DEFAULT_HOST, DEFAULT_MAX_FRAME_SIZE, DEFAULT_OUTBOUND_BUFFER, DEFAULT_PORT,
    DEFAULT_WRITE_TIMEOUT,
};
use talkd::registry::spawn_registry;
use talkd::server::RelayServer;

/// talk relay - directed point-to-point message relay
#[derive(Parser, Debug)]
#[command(name = "talkd", version, about)]
struct Args {
    /// Host or IP address to listen on
    #[arg(long, env = "TALK_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(long, env = "TALK_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Frames queued per connection before fan-out to it is skipped
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_BUFFER)]
    outbound_buffer: usize,

    /// Largest accepted frame in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Per-frame socket write timeout in seconds
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT.as_secs())]
    write_timeout_secs: u64,

    /// Disconnect clients that send nothing for this many seconds
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Log level for the relay crates (RUST_LOG still applies to the rest)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig::default()
            .with_host(self.host.clone())
            .with_port(self.port)
            .with_outbound_buffer(self.outbound_buffer)
            .with_max_frame_size(self.max_frame_size)
            .with_write_timeout(Duration::from_secs(self.write_timeout_secs))
            .with_idle_timeout(self.idle_timeout_secs.map(Duration::from_secs))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = &args.log_level;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("talkd={level}").parse()?)
                .add_directive(format!("talk_core={level}").parse()?)
                .add_directive(format!("talk_protocol={level}").parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "talk relay starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry();
    info!("Session registry started");

    let config = args.relay_config();
    let server = RelayServer::bind(config, registry, cancel_token)
        .await
        .context("failed to start relay server")?;

    if let Ok(addr) = server.local_addr() {
        info!(addr = %addr, "Starting server");
    }

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("talk relay stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn default_value(arg: &str) -> String {
        let command = Args::command();
        let arg = command
            .get_arguments()
            .find(|a| a.get_id() == arg)
            .unwrap();
        arg.get_default_values()
            .first()
            .unwrap()
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_defaults_match_relay_config() {
        // host and port also read TALK_HOST / TALK_PORT, so check their
        // declared defaults rather than the parsed values.
        let defaults = RelayConfig::default();
        assert_eq!(default_value("host"), defaults.host);
        assert_eq!(default_value("port"), defaults.port.to_string());

        let args = Args::parse_from(["talkd"]);
        let config = args.relay_config();

        assert_eq!(config.outbound_buffer, defaults.outbound_buffer);
        assert_eq!(config.max_frame_size, defaults.max_frame_size);
        assert_eq!(config.write_timeout, defaults.write_timeout);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn test_idle_timeout_flag() {
        let args = Args::parse_from(["talkd", "--port", "7000", "--idle-timeout-secs", "30"]);
        let config = args.relay_config();

        assert_eq!(config.port, 7000);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
    }
}
