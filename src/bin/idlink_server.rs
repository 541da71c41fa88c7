//! idlink HTTP Server
//!
//! A standalone server binary exposing `POST /identify` over HTTP.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;

use idlink::config::{Command, ServerConfig, StorageMode, USAGE};
use idlink::observability::init_logging;
use idlink::storage::open_database;
use idlink::transport::router;
use idlink::{ContactStore, IdentityEngine, InMemoryContactStore};

fn parse_args() -> ServerConfig {
    let env_port = std::env::var("PORT").ok();
    match ServerConfig::parse(std::env::args().skip(1), env_port.as_deref()) {
        Ok(Command::Serve(config)) => config,
        Ok(Command::Help) => {
            println!("{USAGE}");
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args();
    init_logging(config.log_format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "idlink server starting");

    // The persistent store holds an exclusive lock for the process lifetime.
    let store: Arc<dyn ContactStore> = match &config.storage {
        StorageMode::Persistent(dir) => {
            tracing::info!(data_dir = %dir.display(), "opening database");
            let store = open_database(dir, None)?;
            tracing::info!(contacts = store.len()?, "database opened");
            Arc::new(store)
        }
        StorageMode::InMemory => {
            tracing::warn!("running with in-memory storage; contacts are lost on exit");
            Arc::new(InMemoryContactStore::new())
        }
    };

    let engine = Arc::new(IdentityEngine::new(store));
    let app = router(engine);

    let listener = TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening; press Ctrl+C to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    tracing::info!("shut down");
    Ok(())
}
