//! Hosts a Pocket session, or joins one as a headless test participant.
//!
//! ```text
//! pocket-host host --name Jam --password xyz
//! pocket-host join --server 192.168.1.20 --username Alice --password xyz
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pocket::prelude::*;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One 20 ms frame of 48 kHz, 2-channel, 24-bit audio.
const FRAME_BYTES: usize = 48_000 / 50 * 2 * 3;

#[derive(Parser)]
#[command(name = "pocket-host")]
#[command(about = "Host or join a Pocket voice session")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server for a session until Ctrl-C.
    Host {
        /// Session name shown to the host
        #[arg(long, default_value = "Pocket")]
        name: String,

        /// Session password; empty means open
        #[arg(long, default_value = "")]
        password: String,

        /// TOML file with server settings
        #[arg(long)]
        config: Option<PathBuf>,

        /// Interface to bind, overrides the config file
        #[arg(long)]
        bind: Option<String>,

        /// TCP control port, overrides the config file
        #[arg(long)]
        control_port: Option<u16>,

        /// UDP audio port, overrides the config file
        #[arg(long)]
        data_port: Option<u16>,
    },

    /// Join a session and stream silence until Ctrl-C.
    Join {
        /// Server address
        #[arg(long, default_value = "127.0.0.1")]
        server: String,

        /// Server control port
        #[arg(long, default_value = "8080")]
        port: u16,

        #[arg(long, default_value = "")]
        username: String,

        #[arg(long, default_value = "")]
        password: String,

        #[arg(long, default_value = "")]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Args::parse().command {
        Command::Host {
            name,
            password,
            config,
            bind,
            control_port,
            data_port,
        } => {
            let mut server = match config {
                Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
                None => ServerConfig::default(),
            };
            if let Some(bind) = bind {
                server.bind_host = bind;
            }
            if let Some(port) = control_port {
                server.control_port = port;
            }
            if let Some(port) = data_port {
                server.data_port = port;
            }
            host(name, password, server).await
        }
        Command::Join {
            server,
            port,
            username,
            password,
            session,
        } => join(&server, port, &username, &password, &session).await,
    }
}

async fn host(
    name: String,
    password: String,
    config: ServerConfig,
) -> Result<(), BoxError> {
    let mut handle = SessionCoordinator::new(name)
        .password(password)
        .config(config)
        .start()
        .await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = handle.events().recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    handle.stop().await;
    while let Ok(event) = handle.events().try_recv() {
        log_event(&event);
    }
    let stats = handle.relay_stats();
    tracing::info!(
        received = stats.received,
        forwarded = stats.forwarded,
        dropped = stats.dropped,
        "relay totals"
    );
    Ok(())
}

async fn join(
    server: &str,
    port: u16,
    username: &str,
    password: &str,
    session: &str,
) -> Result<(), BoxError> {
    let mut client =
        PocketClient::connect(server, port, username, password, session).await?;
    tracing::info!(participant_id = %client.participant_id(), "joined");

    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    let silence = vec![0u8; FRAME_BYTES];
    let mut heard: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                client.send_audio(silence.clone()).await?;
                while let Ok(event) = client.events().try_recv() {
                    log_event(&event);
                }
            }
            packet = client.recv_audio() => {
                packet?;
                heard += 1;
                if heard % 250 == 0 {
                    tracing::info!(packets = heard, "receiving audio");
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ParticipantJoined(name) => {
            tracing::info!(%name, "participant joined");
        }
        SessionEvent::ParticipantLeft(name) => {
            tracing::info!(%name, "participant left");
        }
        SessionEvent::Status(text) => tracing::info!("{text}"),
    }
}
