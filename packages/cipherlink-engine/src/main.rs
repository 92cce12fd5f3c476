//! CipherLink Engine
//!
//! Per-device HTTP service holding one RSA key pair. The key pair is loaded
//! from `<key-dir>/<user-id>.key` or generated on first start.
//!
//! Without `--relay-url` the engine is a local encrypt/decrypt service and
//! the peer key is set by hand through `/set_peer_public_key`. With a relay
//! URL the engine also registers, announces its key and exposes `/send` and
//! `/messages`.

mod api;
mod state;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cipherlink_core::storage::validate_user_id;
use cipherlink_core::{ExchangeConfig, ExchangeSession, KeyStore, RelayClient, RsaEngine};
use color_eyre::eyre::{Result, WrapErr};
use tokio::sync::mpsc;

use state::{AppState, Inbox, RelayLink, DEFAULT_INBOX_CAPACITY};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "cipherlink-engine", version, about = "CipherLink per-device RSA engine")]
struct Args {
    /// User id this engine acts for
    #[arg(long, default_value = "A", env = "USER_ID")]
    user_id: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 5000, env = "PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Directory holding `<user-id>.key`
    #[arg(long, default_value = "keys", env = "KEY_DIR")]
    key_dir: String,

    /// Modulus size for a newly generated key pair
    #[arg(long, default_value_t = cipherlink_core::crypto::DEFAULT_MODULUS_BITS, env = "KEY_BITS")]
    key_bits: u64,

    /// WebSocket URL of a relay, e.g. ws://localhost:8080/ws
    #[arg(long, env = "RELAY_URL")]
    relay_url: Option<String>,

    /// Seconds to wait for a peer key answer
    #[arg(long, default_value_t = 5, env = "PEER_KEY_TIMEOUT_SECS")]
    peer_key_timeout_secs: u64,

    /// Seconds to wait for a delivery status
    #[arg(long, default_value_t = 5, env = "DELIVERY_TIMEOUT_SECS")]
    delivery_timeout_secs: u64,

    /// Decrypted messages kept for `/messages`
    #[arg(long, default_value_t = DEFAULT_INBOX_CAPACITY, env = "INBOX_CAPACITY")]
    inbox_capacity: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cipherlink_engine=info,cipherlink_core=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    validate_user_id(&args.user_id)?;

    // Prime generation is CPU bound.
    let store = KeyStore::new(&args.key_dir);
    let user_id = args.user_id.clone();
    let key_bits = args.key_bits;
    let key_pair = tokio::task::spawn_blocking(move || store.load_or_generate(&user_id, key_bits))
        .await
        .wrap_err("key loading task panicked")??;
    tracing::info!(
        user_id = %args.user_id,
        bits = key_pair.modulus_bits(),
        "Key pair ready"
    );

    let engine = RsaEngine::new(key_pair).into_shared();

    let relay = match args.relay_url.as_deref() {
        Some(url) => {
            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            let client = RelayClient::connect(url, inbox_tx)
                .await
                .wrap_err_with(|| format!("connecting to relay at {}", url))?;

            let config = ExchangeConfig {
                peer_key_timeout: Duration::from_secs(args.peer_key_timeout_secs),
                delivery_timeout: Duration::from_secs(args.delivery_timeout_secs),
            };
            let mut session = ExchangeSession::new(&args.user_id, engine.clone(), client, config);
            session.register()?;
            session.announce_key()?;

            let inbox = Inbox::new(args.inbox_capacity);
            tokio::spawn(state::run_inbox(engine.clone(), inbox_rx, inbox.clone()));

            Some(RelayLink {
                session: Arc::new(tokio::sync::Mutex::new(session)),
                inbox,
            })
        }
        None => None,
    };

    let app_state = AppState {
        user_id: args.user_id.clone(),
        engine,
        relay,
    };
    let app = api::router(app_state);

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("CipherLink engine for {} listening on {}", args.user_id, addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
