mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use host_core::{
    room_identity::RoomIdentity,
    transport::{channel_ws_url, spawn_channel_listener},
    EngineEvent, HttpCommandTransport, RoomEngine,
};
use shared::domain::ParticipantKey;
use storage::SqliteSettings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    /// Room server base url, e.g. http://127.0.0.1:8443
    #[arg(long)]
    server_url: Option<String>,
    /// Sqlite database url or file path for persisted settings
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(database) = args.database {
        settings.database_url = database;
    }

    let store = Arc::new(SqliteSettings::open(&settings.database_url).await?);
    store.health_check().await?;

    let identity = RoomIdentity::load(store.as_ref()).await?;
    if identity.name.is_empty() {
        println!("Hosting an unnamed room");
    } else {
        println!("Hosting '{}' ({})", identity.name, identity.label);
    }

    let transport = Arc::new(HttpCommandTransport::new(&settings.server_url));
    let engine = RoomEngine::start(transport, store.clone()).await?;

    let mut events = engine.subscribe_events();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event printer fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let ws_url = channel_ws_url(&settings.server_url)?;
    let listener = spawn_channel_listener(engine.clone(), &ws_url).await?;
    println!("Connected; commands: accept/reject/remove/whitelist/control <key> [on|off], quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }
        if let Err(message) = run_command(&engine, line).await {
            println!("{message}");
        }
    }

    engine.shutdown().await;
    listener.abort();
    printer.abort();
    Ok(())
}

async fn run_command(engine: &RoomEngine, line: &str) -> Result<(), String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let key = ParticipantKey::new(parts.next().unwrap_or_default());
    let flag = match parts.next() {
        None => true,
        Some("on") => true,
        Some("off") => false,
        Some(other) => return Err(format!("expected on/off, got '{other}'")),
    };

    let outcome = match verb {
        "accept" => engine.accept(&key).await,
        "reject" => engine.reject(&key).await,
        "remove" => engine.remove(&key).await,
        "whitelist" => engine.set_whitelist(&key, flag).await,
        "control" => engine.set_control_enabled(&key, flag).await,
        other => return Err(format!("unknown command '{other}'")),
    };
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => Err(format!("no actionable entry for key '{key}'")),
        Err(err) => Err(format!("command failed: {err}")),
    }
}

fn print_event(event: EngineEvent) {
    match event {
        EngineEvent::RequestsChanged(pending) => {
            println!("-- pending ({}) --", pending.len());
            for request in pending {
                let mark = if request.whitelisted { "*" } else { " " };
                println!("{mark} {}  {}", request.key, request.display_name);
            }
        }
        EngineEvent::RosterChanged(roster) => {
            println!("-- roster ({}) --", roster.len());
            for member in roster {
                let control = if member.control_enabled { "ctrl" } else { "    " };
                println!("{control} {}  {}", member.key, member.display_name);
            }
        }
        EngineEvent::RequestResolved { request, accepted } => {
            let verdict = if accepted { "accepted" } else { "rejected" };
            println!("{} was {verdict}", request.display_name);
        }
        EngineEvent::ParticipantRemoved { participant } => {
            println!("{} was removed", participant.display_name);
        }
        EngineEvent::LogsReplaced(logs) => {
            for line in logs {
                println!("log: {line}");
            }
        }
        EngineEvent::LogAppended(line) => println!("log: {line}"),
        EngineEvent::CommandFailed {
            key,
            action,
            message,
        } => {
            println!("command {action:?} for {key} failed: {message}");
        }
        EngineEvent::Error(message) => println!("channel error: {message}"),
    }
}
