//! Command handlers
//!
//! `add_reading` and `delete_reading` only change the remote collection.
//! Neither touches the displayed list: the change becomes visible when the
//! projection receives the next delivery.
//!
//! Failures are logged and reported in the returned outcome. Nothing here
//! retries on its own.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::identity::IdentityState;
use crate::models::{parse_pages, PagesError, ReadingFields, UserId};
use crate::store::{CollectionPath, DocumentStore};

/// Text of the pages input control, shared between UI and commands
#[derive(Clone)]
pub struct InputField {
    text: Arc<watch::Sender<String>>,
}

impl InputField {
    pub fn new() -> Self {
        let (text, _) = watch::channel(String::new());
        Self {
            text: Arc::new(text),
        }
    }

    pub fn get(&self) -> String {
        self.text.borrow().clone()
    }

    pub fn set(&self, value: impl Into<String>) {
        let value = value.into();
        self.text.send_if_modified(|text| {
            if *text == value {
                false
            } else {
                *text = value;
                true
            }
        });
    }

    /// Apply an edit to the current text
    pub fn update(&self, edit: impl FnOnce(&mut String)) {
        self.text.send_modify(edit);
    }

    pub fn clear(&self) {
        self.set(String::new());
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.text.subscribe()
    }
}

impl Default for InputField {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an add was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddRejection {
    /// Input is not a whole number
    InvalidInput,
    /// Input is zero or negative
    NotPositive,
    /// No store is connected
    NoStore,
    /// No user is signed in
    NoIdentity,
    /// Another add is still in flight
    AlreadyAdding,
}

/// Result of [`ReadingCommands::add_reading`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Inserted; the store assigned `id`
    Added { id: String },
    /// Guard rejected the input; no store call was made
    Rejected(AddRejection),
    /// The insert failed; the input is left for a retry
    Failed(String),
}

/// Why a delete was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteRejection {
    NoStore,
    NoIdentity,
}

/// Result of [`ReadingCommands::delete_reading`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Rejected(DeleteRejection),
    Failed(String),
}

/// Holds the adding flag for the duration of one insert
struct AddingGuard<'a> {
    flag: &'a watch::Sender<bool>,
}

impl<'a> AddingGuard<'a> {
    /// Set the flag unless already set
    fn acquire(flag: &'a watch::Sender<bool>) -> Option<Self> {
        let acquired = flag.send_if_modified(|adding| {
            if *adding {
                false
            } else {
                *adding = true;
                true
            }
        });
        acquired.then(|| Self { flag })
    }
}

impl Drop for AddingGuard<'_> {
    fn drop(&mut self) {
        self.flag.send_replace(false);
    }
}

/// Add and delete readings in the signed-in user's collection
///
/// Cheap to clone; clones share the input field and the adding flag, so the
/// single-flight guard holds across clones.
pub struct ReadingCommands<S> {
    store: Option<Arc<S>>,
    app_id: Arc<str>,
    identity: watch::Receiver<IdentityState>,
    input: InputField,
    adding: Arc<watch::Sender<bool>>,
}

impl<S> Clone for ReadingCommands<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            app_id: self.app_id.clone(),
            identity: self.identity.clone(),
            input: self.input.clone(),
            adding: self.adding.clone(),
        }
    }
}

impl<S: DocumentStore> ReadingCommands<S> {
    pub fn new(
        store: Option<Arc<S>>,
        app_id: impl Into<String>,
        identity: watch::Receiver<IdentityState>,
        input: InputField,
    ) -> Self {
        let (adding, _) = watch::channel(false);
        Self {
            store,
            app_id: Arc::from(app_id.into()),
            identity,
            input,
            adding: Arc::new(adding),
        }
    }

    pub fn input(&self) -> &InputField {
        &self.input
    }

    /// Whether an add is in flight
    pub fn is_adding(&self) -> bool {
        *self.adding.borrow()
    }

    pub fn subscribe_adding(&self) -> watch::Receiver<bool> {
        self.adding.subscribe()
    }

    fn user_id(&self) -> Option<UserId> {
        self.identity.borrow().user_id.clone()
    }

    /// Add a reading parsed from `text`
    ///
    /// Rejected without a store call unless the text is a positive whole
    /// number, a store and a user are present, and no other add is in flight.
    /// A second add while one is pending is dropped, not queued. On success
    /// the input field is cleared; on failure it is left as is.
    pub async fn add_reading(&self, text: &str) -> AddOutcome {
        let pages = match parse_pages(text) {
            Ok(pages) => pages,
            Err(e) => {
                debug!("Rejected add: {}", e);
                return AddOutcome::Rejected(match e {
                    PagesError::Invalid(_) => AddRejection::InvalidInput,
                    PagesError::NotPositive => AddRejection::NotPositive,
                });
            }
        };

        let Some(store) = self.store.as_ref() else {
            debug!("Rejected add: no store");
            return AddOutcome::Rejected(AddRejection::NoStore);
        };

        let Some(user_id) = self.user_id() else {
            debug!("Rejected add: no identity");
            return AddOutcome::Rejected(AddRejection::NoIdentity);
        };

        let Some(_guard) = AddingGuard::acquire(&self.adding) else {
            debug!("Rejected add: another add is in flight");
            return AddOutcome::Rejected(AddRejection::AlreadyAdding);
        };

        let collection = CollectionPath::readings(&self.app_id, &user_id);
        match store
            .insert(&collection, ReadingFields::now(pages).into_fields())
            .await
        {
            Ok(id) => {
                info!("Added reading {} ({} pages)", id, pages);
                self.input.clear();
                AddOutcome::Added { id }
            }
            Err(e) => {
                error!("Failed to add reading: {}", e);
                AddOutcome::Failed(e.to_string())
            }
        }
    }

    /// Add a reading from the current input field text
    pub async fn submit(&self) -> AddOutcome {
        let text = self.input.get();
        self.add_reading(&text).await
    }

    /// Delete the reading with `id`
    ///
    /// The entry stays visible until the projection's next delivery.
    pub async fn delete_reading(&self, id: &str) -> DeleteOutcome {
        let Some(store) = self.store.as_ref() else {
            debug!("Rejected delete: no store");
            return DeleteOutcome::Rejected(DeleteRejection::NoStore);
        };

        let Some(user_id) = self.user_id() else {
            debug!("Rejected delete: no identity");
            return DeleteOutcome::Rejected(DeleteRejection::NoIdentity);
        };

        let collection = CollectionPath::readings(&self.app_id, &user_id);
        match store.delete_by_id(&collection, id).await {
            Ok(()) => {
                info!("Deleted reading {}", id);
                DeleteOutcome::Deleted
            }
            Err(e) => {
                error!("Failed to delete reading {}: {}", id, e);
                DeleteOutcome::Failed(e.to_string())
            }
        }
    }
}
