//! Multi-room WebSocket chat hub - Entry Point
//!
//! Loads configuration, creates the hub and the configured rooms, and
//! accepts connections until Ctrl-C. Shutdown cancels the root token and
//! waits for every room to drain within the configured grace period.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_hub::{handle_connection, ChatService, Config, EventApplier, Hub, MemoryStore, RoomId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_hub=info")),
        )
        .init();

    // Config path from command line, else ./chat_hub.toml, else defaults
    let config_path = env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    let addr = config.bind_addr()?;
    let client_config = config.client_config();

    let root = CancellationToken::new();
    let hub = Arc::new(Hub::new(&root, config.hub_config()));
    let store = Arc::new(MemoryStore::new());

    for name in &config.rooms {
        let id = RoomId::new(name.as_str());
        store.create_room(&id)?;
        hub.create_room(id)
            .await
            .with_context(|| format!("Failed to create room {}", name))?;
    }

    let applier: Arc<dyn EventApplier> = Arc::new(ChatService::new(store));

    let cleanup = tokio::spawn({
        let hub = Arc::clone(&hub);
        async move { hub.cleanup().await }
    });

    let listener = TcpListener::bind(addr).await?;
    info!("Chat hub listening on {}", addr);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("New connection from {}", peer);
                    let hub = Arc::clone(&hub);
                    let applier = Arc::clone(&applier);
                    let client_config = client_config.clone();

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, hub, applier, client_config).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
        }
    }

    root.cancel();

    match cleanup.await {
        Ok(Ok(rooms)) => {
            info!("Shut down cleanly ({} rooms)", rooms);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Shutdown fault: {}", e);
            Err(e.into())
        }
        Err(e) => Err(anyhow::anyhow!("Hub cleanup task failed: {}", e)),
    }
}
