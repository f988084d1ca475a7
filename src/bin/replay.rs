//! mc-session-replay binary
//!
//! Drives a [`Session`] from a recorded script of transport events and prints
//! the resulting telemetry.  Useful for reproducing world-model bugs without
//! a server.
//!
//! ## Script format
//!
//! One JSON object per line; blank lines and lines starting with `#` are
//! skipped.
//!
//! ```text
//! {"type":"connected","remote_address":"127.0.0.1:25565"}
//! {"type":"packet","packet":{"kind":"join_game","entity_id":7}}
//! {"type":"packet","packet":{"kind":"spawn_player","entity_id":7,"uuid":"…","position":{"x":0,"y":64,"z":0}}}
//! {"type":"disconnected","reason":"Server closed"}
//! ```
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                           | Default | Description                  |
//! |-------------------------------|---------|------------------------------|
//! | `MC_SESSION_TICK_INTERVAL_MS` | `50`    | Tick loop period             |
//! | `MC_SESSION_LOG_CAPACITY`     | `100`   | Retained log entries         |
//! | `MC_SESSION_EVENT_BUFFER`     | `1024`  | Event channel depth          |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mc_session::{
    Account, ChannelConnector, ClientToken, GameProfile, ServerEndpoint, Session, SessionConfig,
    SessionEvent, SessionInfo, TransportEvent,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "mc-session-replay", about = "Replay transport events through a client session", version)]
struct Args {
    /// JSON-lines script of transport events
    #[arg(long, env = "MC_REPLAY_SCRIPT")]
    script: PathBuf,

    /// Server host recorded in the session
    #[arg(long, env = "MC_REPLAY_HOST", default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(long, env = "MC_REPLAY_PORT", default_value_t = 25565)]
    port: u16,

    /// Account / profile name
    #[arg(long, env = "MC_REPLAY_USERNAME", default_value = "Player")]
    username: String,

    /// Optional TOML file with session settings
    #[arg(long, env = "MC_REPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// File holding the persistent client token (created if missing)
    #[arg(long, env = "MC_REPLAY_CLIENT_TOKEN")]
    client_token: Option<PathBuf>,

    /// Delay between script lines in milliseconds
    #[arg(long, env = "MC_REPLAY_PACE_MS", default_value_t = 0)]
    pace_ms: u64,

    /// Time to let the session settle after the last line
    #[arg(long, env = "MC_REPLAY_SETTLE_MS", default_value_t = 250)]
    settle_ms: u64,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mc_session=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = SessionConfig::load(args.config.as_deref()).context("loading session config")?;
    let script = load_script(&args.script).await?;
    let client_token = match &args.client_token {
        Some(path) => ClientToken::load_or_create(path)
            .with_context(|| format!("client token at {}", path.display()))?
            .uuid(),
        None => Uuid::new_v4(),
    };

    tracing::info!(
        "Replaying {} events from {} (server={}:{}, pace={}ms)",
        script.len(),
        args.script.display(),
        args.host,
        args.port,
        args.pace_ms,
    );

    let (connector, remotes) = ChannelConnector::new();
    let info = SessionInfo {
        server: ServerEndpoint::new(args.host.clone(), args.port),
        account: Account {
            username: args.username.clone(),
            access_token: String::new(),
        },
    };
    let event_buffer = config.event_buffer;
    let session = Session::new(info, config, Arc::new(connector)).context("creating session")?;

    // Event logger runs on a blocking thread; it ends once the listener is
    // removed and the channel closes.
    let subscription = session.subscribe(event_buffer, false);
    let subscription_id = subscription.id();
    let logger = tokio::task::spawn_blocking(move || {
        for event in subscription.receiver().iter() {
            log_event(&event);
        }
        subscription.dropped()
    });

    let profile = GameProfile::new(Uuid::new_v4(), args.username.clone());
    session.connect(profile, client_token);
    let remote = remotes
        .try_recv()
        .context("session did not open a transport")?;

    let pace = Duration::from_millis(args.pace_ms);
    let play = async {
        for event in script {
            if !remote.push(event) {
                tracing::warn!("transport closed before script finished");
                break;
            }
            if !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
        }
        tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;
    };

    tokio::select! {
        _ = play => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Replay interrupted (SIGINT)");
        }
    }

    print_summary(&session, &remote.sent());

    session.disconnect();
    session.remove_listener(subscription_id);
    let dropped = logger.await.context("event logger panicked")?;
    if dropped > 0 {
        tracing::warn!("{} session events were dropped", dropped);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn load_script(path: &Path) -> Result<Vec<TransportEvent>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("{}:{}", path.display(), n + 1))
        })
        .collect()
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => tracing::info!("state → {}", state),
        SessionEvent::Connected => tracing::info!("connected"),
        SessionEvent::Disconnected { reason } => tracing::info!("disconnected: {}", reason),
        SessionEvent::Chat(message) => tracing::info!("chat: {}", message),
        SessionEvent::Tick => {}
        SessionEvent::EntitySpawned(e) => {
            tracing::debug!("spawn #{} {:?} at {}", e.entity_id, e.kind, e.position)
        }
        SessionEvent::EntityDestroyed(e) => tracing::debug!("destroy #{}", e.entity_id),
        SessionEvent::EntityUpdated(e) => {
            tracing::debug!("update #{} ({} metadata keys)", e.entity_id, e.metadata.len())
        }
    }
}

fn print_summary(session: &Session, sent: &[mc_session::ClientPacket]) {
    println!("state:    {}", session.state());

    let entities = session.entities();
    println!("entities: {}", entities.len());
    for e in &entities {
        println!("  #{:<6} {:?} at {}", e.entity_id, e.kind, e.position);
    }

    match session.player() {
        Some(p) => println!(
            "player:   #{} health={} food={} saturation={}",
            p.entity_id(),
            p.health,
            p.food,
            p.food_saturation
        ),
        None => println!("player:   (not spawned)"),
    }

    println!("log:");
    for entry in session.log_entries() {
        println!("  {:?} {}", entry.level, entry);
    }

    println!("sent:     {}", sent.len());
    for packet in sent {
        match serde_json::to_string(packet) {
            Ok(json) => println!("  {json}"),
            Err(e) => tracing::warn!("Failed to serialise {}: {}", packet.kind(), e),
        }
    }
}
