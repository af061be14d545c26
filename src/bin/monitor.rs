//! Loxone WebSocket monitor
//!
//! Connects to a Miniserver, prints every state change with the control and
//! state name from the structure file, and optionally operates controls once
//! the connection is online.

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use loxone_ws_client::{
    client::{event_channel, LoxoneEvent, LoxoneWebSocketClient, TungsteniteTransport},
    logging::{init_logging, LogConfig},
    ClientConfig, ConnectionState, ControlRegistry, LoxoneUuid,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "loxone-ws-monitor")]
#[command(about = "Watch live state updates of a Loxone Miniserver")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Miniserver host (overrides config and LOXONE_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Miniserver port
    #[arg(long)]
    port: Option<u16>,

    /// Username (overrides config and LOXONE_USER)
    #[arg(long)]
    user: Option<String>,

    /// Password; prompted for when missing
    #[arg(long, env = "LOXONE_PASS", hide_env_values = true)]
    password: Option<String>,

    /// Keep-alive interval in seconds
    #[arg(long)]
    keepalive: Option<u64>,

    /// Operate a control once online, as `<uuid>/<operation>` (repeatable)
    #[arg(long = "send", value_name = "UUID/OP")]
    send: Vec<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Log as JSON
    #[arg(long)]
    json: bool,
}

fn parse_action(arg: &str) -> anyhow::Result<(LoxoneUuid, String)> {
    let (uuid, operation) = arg
        .split_once('/')
        .ok_or_else(|| anyhow!("expected <uuid>/<operation>, got {arg}"))?;
    if operation.is_empty() {
        bail!("missing operation in {arg}");
    }
    let uuid = uuid
        .parse::<LoxoneUuid>()
        .with_context(|| format!("invalid identifier in {arg}"))?;
    Ok((uuid, operation.to_string()))
}

async fn run_actions(client: Arc<LoxoneWebSocketClient>, actions: Arc<Vec<(LoxoneUuid, String)>>) {
    for (uuid, operation) in actions.iter() {
        match client.send_action_and_wait(uuid, operation).await {
            Ok(response) => println!(
                "{uuid}/{operation}: {} ({})",
                response.value_str(),
                response.code
            ),
            Err(e) => warn!("{}/{} failed: {}", uuid, operation, e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    config.apply_env()?;
    if let Some(host) = args.host {
        config.loxone.host = host;
    }
    if let Some(port) = args.port {
        config.loxone.port = port;
    }
    if let Some(user) = args.user {
        config.loxone.username = user;
    }
    if let Some(secs) = args.keepalive {
        config.loxone.websocket.keepalive_interval = Duration::from_secs(secs);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.logging.json_format |= args.json;
    config.validate()?;

    init_logging(LogConfig::from(&config.logging))
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    let actions = args
        .send
        .iter()
        .map(|arg| parse_action(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let password = match args.password {
        Some(password) => password,
        None => {
            eprint!("Password for {}: ", config.loxone.username);
            rpassword::read_password().context("Failed to read password")?
        }
    };

    let (events, mut rx) = event_channel(config.loxone.websocket.event_queue_capacity);
    let transport = Arc::new(TungsteniteTransport::new(
        config.loxone.websocket.max_binary_message_bytes(),
    ));
    let close_timeout = config.loxone.websocket.close_timeout;
    let credentials = config.loxone.credentials(password);
    let client = Arc::new(LoxoneWebSocketClient::new(
        config.loxone,
        credentials,
        transport,
        events,
        tokio::runtime::Handle::current(),
    )?);
    let actions = Arc::new(actions);

    client.connect()?;
    let mut registry = ControlRegistry::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                client.disconnect();
                let mut state = client.state_watch();
                let idle = state.wait_for(|s| *s == ConnectionState::Idle);
                if tokio::time::timeout(close_timeout * 2, idle).await.is_err() {
                    warn!("Connection did not close in time");
                }
                break;
            }
            event = rx.recv() => match event {
                None => break,
                Some(LoxoneEvent::ConfigurationReceived(structure)) => {
                    let summary = registry.apply_structure(&structure);
                    println!(
                        "structure: {} ({} controls, {} rooms, {} added)",
                        structure.ms_info.ms_name.as_deref().unwrap_or("Miniserver"),
                        registry.len(),
                        structure.rooms.len(),
                        summary.added,
                    );
                }
                Some(LoxoneEvent::ServerOnline) => {
                    println!("online");
                    if !actions.is_empty() {
                        // The worker only reads responses while this loop drains events
                        tokio::spawn(run_actions(client.clone(), actions.clone()));
                    }
                }
                Some(LoxoneEvent::StateUpdate(update)) => {
                    let timestamp = update.timestamp.format("%H:%M:%S%.3f");
                    let control = registry.apply_update(&update).map(|binding| {
                        (binding.control, binding.name.clone())
                    });
                    match control.and_then(|(control, state)| {
                        registry.control(&control).map(|entry| (entry.name.clone(), state))
                    }) {
                        Some((control, state)) => {
                            println!("{timestamp} {control}/{state} = {}", update.value)
                        }
                        None => println!("{timestamp} {} = {}", update.uuid, update.value),
                    }
                }
                Some(LoxoneEvent::ServerOffline { reason, detail }) => {
                    println!("offline: {reason} ({detail})");
                    break;
                }
                Some(LoxoneEvent::ClientClosing) => println!("closing"),
            }
        }
    }

    Ok(())
}
