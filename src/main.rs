//! Reading tracker chat server - Entry Point
//!
//! Loads configuration, opens the message store, and accepts WebSocket
//! connections until interrupted.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use reading_chat::{
    handle_connection, ChatHub, Config, IdentityDirectory, MemoryStore, MessageStore, SqliteStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=reading_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("reading_chat=info")),
        )
        .init();

    let mut config = Config::from_env()?;

    // Bind address from command line overrides the environment
    if let Some(addr) = env::args().nth(1) {
        config.bind_addr = addr;
    }

    let store: Arc<dyn MessageStore> = match &config.database_url {
        Some(url) => Arc::new(SqliteStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set, messages will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let identities = match &config.identities_file {
        Some(path) => IdentityDirectory::load(path)?,
        None => {
            warn!("CHAT_IDENTITIES_FILE not set, every connection stays anonymous");
            IdentityDirectory::new()
        }
    };

    let hub = Arc::new(ChatHub::new(store, Arc::new(identities), &config));

    // Start TCP listener
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Chat server listening on {}", config.bind_addr);

    // Connection accept loop
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let hub = Arc::clone(&hub);

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, hub).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        }
    }

    hub.shutdown();
    Ok(())
}
