//! webos-remote - drive a webOS TV from the command line.
//!
//! Pairs with the device, then runs one subcommand against its websocket API.
//! Logs go to stderr; results are printed to stdout as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;
use webos_core::{CancellationToken, ClientConfig, Dialer, Payload, TvClient};

#[derive(Parser, Debug)]
#[command(name = "webos-remote")]
#[command(about = "Pair with, call and monitor a webOS TV")]
struct Args {
    /// Device host name, IP address or full ws:// / wss:// URL
    #[arg(short, long, default_value = "LGsmartTV.lan")]
    address: String,

    /// Use plain ws:// on port 3000 instead of wss:// on port 3001
    #[arg(long)]
    no_tls: bool,

    /// Client key from an earlier pairing (skips the on-screen prompt)
    #[arg(short = 'k', long, env = "WEBOS_CLIENT_KEY")]
    client_key: Option<String>,

    /// Per-call timeout in seconds
    #[arg(short, long, default_value = "5")]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pair and print the client key to keep for later runs
    Pair,
    /// Call a URI once and print the response payload
    Call {
        /// Request URI, e.g. ssap://audio/getVolume
        uri: String,
        /// JSON object sent as the request payload
        payload: Option<String>,
    },
    /// Subscribe to a URI and print every update until Ctrl-C
    Monitor {
        uri: String,
        payload: Option<String>,
    },
    /// Press remote-control buttons through the pointer input socket
    Button {
        /// Button names, e.g. HOME UP ENTER
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let dialer = Dialer::new().with_tls(!args.no_tls);
    let config = ClientConfig::default().with_call_timeout(Duration::from_secs(args.timeout));

    let connection = dialer
        .dial(&args.address)
        .await
        .with_context(|| format!("Failed to connect to {}", args.address))?;
    let (tv, dispatcher) = TvClient::start(connection, config);

    let new_key = tv
        .register(args.client_key.as_deref())
        .await
        .context("Pairing failed")?;
    if let Some(key) = &new_key {
        if args.client_key.as_deref() != Some(key.as_str()) {
            info!("Device issued a new client key");
        }
    }

    let outcome = run(&tv, &dialer, args.command, new_key).await;

    if let Err(e) = tv.close().await {
        warn!("Close failed: {}", e);
    }
    let reason = dispatcher.join().await;
    info!("Connection closed: {}", reason);

    outcome
}

async fn run(tv: &TvClient, dialer: &Dialer, command: Command, new_key: Option<String>) -> Result<()> {
    match command {
        Command::Pair => {
            match new_key {
                Some(key) => println!("{}", key),
                None => info!("Device kept the existing client key"),
            }
            Ok(())
        }
        Command::Call { uri, payload } => {
            let payload = parse_payload(payload.as_deref())?;
            let response = tv.call(&uri, payload).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Monitor { uri, payload } => {
            let payload = parse_payload(payload.as_deref())?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, unsubscribing");
                }
                on_signal.cancel();
            });

            tv.monitor(
                &uri,
                payload,
                |update| -> Result<()> {
                    println!("{}", serde_json::to_string(&update)?);
                    Ok(())
                },
                &cancel,
            )
            .await
        }
        Command::Button { names } => {
            let (pointer, _drain) = tv.open_pointer_socket(dialer).await?;
            for name in &names {
                pointer.button(name).await?;
            }
            pointer.close().await?;
            Ok(())
        }
    }
}

fn parse_payload(raw: Option<&str>) -> Result<Option<Payload>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw).context("Payload is not valid JSON")? {
        Value::Object(map) => Ok(Some(map)),
        other => bail!("Payload must be a JSON object, got {}", other),
    }
}
