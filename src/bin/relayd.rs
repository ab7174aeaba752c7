//! relayd - browser media chunks to per-session RTMP publishers
//!
//! Runs in the foreground until SIGTERM or SIGINT, accepting media chunks
//! and viewer presence over WebSocket and feeding each session's chunks to
//! its own ffmpeg process. On shutdown every running transcoder is stopped
//! before the process exits.
//!
//! # Usage
//!
//! ```bash
//! relayd
//! relayd --port 4000 --rtmp-base-url rtmp://media.example/live
//! relayd --print-config
//! ```
//!
//! Flags override `PORT`, `RELAY_HOST`, `RTMP_BASE_URL` and `FFMPEG_PATH`.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relayd::config::RelayConfig;
use relayd::registry::spawn_manager;
use relayd::server::RelayServer;

/// Stream relay - per-session ffmpeg transcoders behind a WebSocket
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// Address to listen on [env: RELAY_HOST]
    #[arg(long, value_name = "ADDRESS")]
    host: Option<String>,

    /// Port to listen on [env: PORT]
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Base URL; each stream publishes to <base>/<streamKey> [env: RTMP_BASE_URL]
    #[arg(long, value_name = "URL")]
    rtmp_base_url: Option<String>,

    /// Transcoder executable [env: FFMPEG_PATH]
    #[arg(long, value_name = "PATH")]
    ffmpeg_path: Option<String>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    /// Layers command-line flags over the environment configuration.
    fn apply(&self, mut config: RelayConfig) -> RelayConfig {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(url) = &self.rtmp_base_url {
            config.rtmp_base_url = url.clone();
        }
        if let Some(program) = &self.ffmpeg_path {
            config.transcoder_program = program.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = args.apply(RelayConfig::from_env().context("Invalid configuration")?);
    let bind_addr = config.bind_addr().context("Invalid configuration")?;

    if args.print_config {
        println!("Listening: {bind_addr}");
        println!("Publishing to: {}/<streamKey>", config.rtmp_base_url);
        println!("Transcoder: {}", config.transcoder_program);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_core=info".parse()?)
                .add_directive("relay_protocol=info".parse()?),
        )
        .init();

    serve(config, bind_addr).await
}

async fn serve(config: RelayConfig, bind_addr: SocketAddr) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        rtmp_base_url = %config.rtmp_base_url,
        transcoder = %config.transcoder_program,
        "Relay starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        shutdown_token.cancel();
    });

    let manager = spawn_manager(config.transcoder_config());

    let server = RelayServer::bind(bind_addr, manager.clone(), cancel_token)
        .await
        .context("Failed to start server")?;

    let result = server.run().await;

    // Publishers must not outlive the relay.
    match manager.shutdown().await {
        Ok(stopped) => info!(stopped, "Stopped all transcoders"),
        Err(e) => warn!(error = %e, "Session manager already gone"),
    }

    result.context("Server error")?;

    info!("Relay stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
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

    #[test]
    fn test_flags_override_environment() {
        let args = Args::try_parse_from([
            "relayd",
            "--port",
            "4000",
            "--rtmp-base-url",
            "rtmp://media.test/live",
        ])
        .unwrap();

        let env = RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 3010,
            rtmp_base_url: "rtmp://localhost/live".to_string(),
            transcoder_program: "/opt/ffmpeg".to_string(),
        };
        let config = args.apply(env);

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 4000);
        assert_eq!(config.rtmp_base_url, "rtmp://media.test/live");
        assert_eq!(config.transcoder_program, "/opt/ffmpeg");
        assert!(!args.print_config);
    }

    #[test]
    fn test_no_flags_keep_environment() {
        let args = Args::try_parse_from(["relayd"]).unwrap();
        assert_eq!(args.apply(RelayConfig::default()), RelayConfig::default());
    }

    #[test]
    fn test_invalid_port_flag_rejected() {
        assert!(Args::try_parse_from(["relayd", "--port", "70000"]).is_err());
        assert!(Args::try_parse_from(["relayd", "start"]).is_err());
    }
}
