//! Serve command handler

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use pagelog_core::server;
use pagelog_core::store::{MemoryStore, SqliteStore};
use pagelog_core::{Config, DocumentStore};

use crate::output::Output;

/// Host the local store over WebSocket until interrupted
pub async fn run(config: &Config, listen: &str, memory: bool, output: &Output) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;
    let addr = listener
        .local_addr()
        .context("Failed to read listen address")?;

    if memory {
        output.message(&format!("Serving volatile store on ws://{}", addr));
        serve_until_interrupted(listener, MemoryStore::new(), output).await
    } else {
        let path = config.database_path();
        let store = SqliteStore::open(&path)
            .with_context(|| format!("Failed to open store database at {:?}", path))?;
        output.message(&format!(
            "Serving {} on ws://{}",
            path.display(),
            addr
        ));
        serve_until_interrupted(listener, store, output).await
    }
}

async fn serve_until_interrupted<S: DocumentStore>(
    listener: TcpListener,
    store: S,
    output: &Output,
) -> Result<()> {
    tokio::select! {
        result = server::serve(listener, Arc::new(store)) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            output.message("Shutting down.");
            Ok(())
        }
    }
}
