//! Demo client: connect, print whatever the server sends, send stdin lines.
//!
//! ```text
//! kingnet 127.0.0.1 7171 --max-message-buffer 8192
//! ```

use std::path::PathBuf;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use kingnet_client::{Connection, ConnectionEvent};
use kingnet_core::ConnectionConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(version, about = "Connect to a KingNet server and exchange raw bytes")]
struct Args {
    /// Server host name or IP address
    host: String,

    /// Server port
    port: u16,

    /// JSON file with connection settings
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Override the maximum message buffer size
    #[clap(long)]
    max_message_buffer: Option<usize>,

    /// Override the connection timeout (milliseconds)
    #[clap(long)]
    connect_timeout_ms: Option<u64>,
}

impl Args {
    fn connection_config(&self) -> anyhow::Result<ConnectionConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                ConnectionConfig::from_json(&json).context("parsing connection config")?
            }
            None => ConnectionConfig::default(),
        };

        if let Some(size) = self.max_message_buffer {
            config.max_message_buffer = size;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = Some(ms);
        }

        config.validate().context("validating connection config")?;
        Ok(config)
    }
}

fn render(payload: &Bytes) -> String {
    let hex: Vec<String> = payload.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "[{} bytes] {} | {}",
        payload.len(),
        hex.join(" "),
        String::from_utf8_lossy(payload)
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "parsed command line arguments");

    let config = args.connection_config()?;
    let (connection, mut events) = Connection::with_channel(config);
    let max = connection.config().max_message_buffer;

    connection
        .connect(&args.host, args.port)
        .await
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Message(payload)) => println!("{}", render(&payload)),
                Some(ConnectionEvent::Disconnected(reason)) => {
                    println!("disconnected: {}", reason);
                    break;
                }
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line.context("reading stdin")? {
                Some(line) if line.is_empty() => {}
                Some(line) => {
                    for chunk in line.into_bytes().chunks(max) {
                        if let Err(e) = connection.send(Bytes::copy_from_slice(chunk)).await {
                            tracing::warn!("send failed: {}", e);
                        }
                    }
                }
                None => {
                    stdin_open = false;
                    connection.close().await;
                }
            },
        }
    }

    if let Some(info) = connection.info() {
        tracing::info!(
            bytes_received = info.bytes_received,
            bytes_sent = info.bytes_sent,
            uptime_ms = info.uptime.num_milliseconds(),
            "session finished"
        );
    }

    Ok(())
}
