//! pagelog Core Library
//!
//! This crate provides the core functionality for pagelog, a daily reading
//! log: users record how many pages they read, and every device signed in as
//! the same user sees the list and totals update live.
//!
//! # Architecture
//!
//! - **Document store**: source of truth, one collection per user
//! - **Sync projection**: live mirror of the collection, replaced wholesale
//!   on every delivery
//! - **Commands**: add/delete only touch the store; the list catches up
//!   through the subscription
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(store::open(&config).await?);
//! let provider = Arc::new(LocalIdentityProvider::from_config(&config));
//! let identity = spawn_bootstrap(provider, config.bootstrap_token.clone());
//!
//! let mut session = Session::new(Some(store), &config.app_id, identity);
//! session.wait_until_loaded().await;
//! session.add_reading("12").await;
//! println!("{} pages today", session.view().today_pages);
//! ```
//!
//! # Modules
//!
//! - `session`: Wires everything together (main entry point)
//! - `store`: Document store interface and its memory, SQLite and remote backends
//! - `server`: Hosts a document store over WebSocket
//! - `identity`: Identity bootstrap
//! - `projection`: Live reading list
//! - `commands`: Add and delete readings
//! - `aggregate`: Totals and per-day statistics
//! - `models`: Data structures for readings and users
//! - `config`: Application configuration

pub mod aggregate;
pub mod commands;
pub mod config;
pub mod identity;
pub mod models;
pub mod projection;
pub mod server;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use commands::{
    AddOutcome, AddRejection, DeleteOutcome, DeleteRejection, InputField, ReadingCommands,
};
pub use config::Config;
pub use identity::{
    bootstrap, issue_token, spawn_bootstrap, IdentityError, IdentityProvider, IdentityState,
    LocalIdentityProvider,
};
pub use models::{parse_pages, EntryError, PagesError, ReadingEntry, ReadingFields, UserId};
pub use projection::{ProjectionState, SyncProjection};
pub use session::{ReadingsView, Session};
pub use store::{Backend, CollectionPath, Document, DocumentStore, StoreError};
