//! Command handlers

pub mod config;
pub mod identity;
pub mod reading;
pub mod serve;

use std::sync::Arc;

use anyhow::Result;

use pagelog_core::store::{self, Backend, MemoryStore};
use pagelog_core::{spawn_bootstrap, Config, LocalIdentityProvider, Session};

/// Open the configured store (or a volatile one) and start a session on it
///
/// Identity bootstrap runs in the background; the session starts mirroring
/// as soon as it completes.
pub async fn open_session(config: &Config, memory: bool) -> Result<Session<Backend>> {
    let store = open_store(config, memory).await?;
    Ok(start_session(config, Some(store)))
}

/// Open the configured store, or a volatile one when `memory` is set
pub async fn open_store(config: &Config, memory: bool) -> Result<Backend> {
    if memory {
        Ok(Backend::Memory(MemoryStore::new()))
    } else {
        store::open(config).await
    }
}

/// Start a session, with or without a store
pub fn start_session(config: &Config, store: Option<Backend>) -> Session<Backend> {
    let provider = Arc::new(LocalIdentityProvider::from_config(config));
    let identity = spawn_bootstrap(provider, config.bootstrap_token.clone());
    Session::new(store.map(Arc::new), config.app_id.clone(), identity)
}
