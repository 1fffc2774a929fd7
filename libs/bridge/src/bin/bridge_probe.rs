//! Command-line probe for a running bridge server
//!
//! Opens a session and issues one command, printing the decoded result.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bridge::{BridgeClient, Callback, RemoteId, Value};
use bridge_config::load_config;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bridge_probe")]
#[command(about = "Issue bridge commands against a remote object server")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to config/bridge.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay to apply (environments/<name>.toml)
    #[arg(short, long)]
    env: Option<String>,

    /// Server address, overrides the configured host
    #[arg(long)]
    host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List users known to the remote
    Users,
    /// Report whether the remote holds existing sync sessions
    Sessions,
    /// Poll for pending callbacks for a while, logging the interval
    Poll {
        /// How long to keep the session open
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },
    /// Read one property of a remote object
    Property {
        /// Object id
        id: String,
        /// Property name
        name: String,
        /// Owning realm id
        #[arg(short, long)]
        realm: Option<String>,
    },
    /// Invoke a method on a remote object
    Call {
        /// Object id
        id: String,
        /// Method name
        name: String,
        /// Arguments as JSON (bare words are sent as strings)
        args: Vec<String>,
        /// Owning realm id
        #[arg(short, long)]
        realm: Option<String>,
    },
}

fn parse_id(raw: &str) -> RemoteId {
    raw.parse::<i64>()
        .map(RemoteId::Int)
        .unwrap_or_else(|_| RemoteId::from(raw))
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw)
        .map(|json| Value::from_json(&json))
        .unwrap_or_else(|_| Value::from(raw))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref(), cli.env.as_deref())
        .context("failed to load bridge configuration")?;
    if let Some(host) = cli.host {
        config = config.with_host(host);
    }

    let client = BridgeClient::connect(&config)?;
    let refresh = Callback::new(|_, _| {
        warn!("remote requested an access token refresh; probe has none to offer");
        Ok(Value::Undefined)
    });
    let session = client.create_session(None, refresh)?;
    info!(host = session.host(), "connected");

    match cli.command {
        Commands::Users => {
            println!("{:#?}", client.get_all_users()?);
        }
        Commands::Sessions => {
            println!("{}", client.has_existing_sessions()?);
        }
        Commands::Poll { seconds } => {
            let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
            while std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(500));
                info!(
                    interval_ms = client.poll_interval().as_millis() as u64,
                    exchanges = client.dispatcher().exchanges(),
                    "polling"
                );
            }
        }
        Commands::Property { id, name, realm } => {
            let realm = realm.as_deref().map(parse_id);
            let value = client.get_property(realm.as_ref(), &parse_id(&id), &name)?;
            println!("{:#?}", value);
        }
        Commands::Call {
            id,
            name,
            args,
            realm,
        } => {
            let realm = realm.as_deref().map(parse_id);
            let args: Vec<Value> = args.iter().map(|raw| parse_arg(raw)).collect();
            let value = client.call_method(realm.as_ref(), &parse_id(&id), &name, &args)?;
            println!("{:#?}", value);
        }
    }

    client.shutdown();
    Ok(())
}
