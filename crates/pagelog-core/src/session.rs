//! Reading session
//!
//! Ties identity, the sync projection and the command handlers together
//! behind one value that a front end renders from and sends intents to.

use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use tokio::sync::watch;

use crate::aggregate::{today_pages, today_pages_in};
use crate::commands::{AddOutcome, DeleteOutcome, InputField, ReadingCommands};
use crate::identity::IdentityState;
use crate::models::{ReadingEntry, UserId};
use crate::projection::{ProjectionState, SyncProjection};
use crate::store::{CollectionPath, DocumentStore};

/// Everything a front end needs to draw the reading log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingsView {
    /// Readings, most recent first
    pub readings: Vec<ReadingEntry>,
    pub total_pages: u64,
    pub today_pages: u64,
    pub is_loading: bool,
    pub is_adding: bool,
    pub user_id: Option<UserId>,
    /// Why the list stopped updating, if it did
    pub last_error: Option<String>,
}

/// One user-facing reading log
pub struct Session<S: DocumentStore> {
    store: Option<Arc<S>>,
    app_id: String,
    identity: watch::Receiver<IdentityState>,
    projection: SyncProjection,
    projection_rx: watch::Receiver<ProjectionState>,
    commands: ReadingCommands<S>,
    input_rx: watch::Receiver<String>,
    adding_rx: watch::Receiver<bool>,
}

impl<S: DocumentStore> Session<S> {
    /// Build a session and start mirroring if an identity is already known
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        store: Option<Arc<S>>,
        app_id: impl Into<String>,
        identity: watch::Receiver<IdentityState>,
    ) -> Self {
        let app_id = app_id.into();
        let input = InputField::new();
        let input_rx = input.subscribe();
        let commands = ReadingCommands::new(store.clone(), app_id.clone(), identity.clone(), input);
        let adding_rx = commands.subscribe_adding();
        let projection = SyncProjection::new();
        let projection_rx = projection.subscribe();

        let mut session = Self {
            store,
            app_id,
            identity,
            projection,
            projection_rx,
            commands,
            input_rx,
            adding_rx,
        };
        session.sync_identity();
        session
    }

    /// Collection the current identity should be mirroring
    fn expected_collection(&self) -> Option<CollectionPath> {
        self.store.as_ref()?;
        let user_id = self.identity.borrow().user_id.clone()?;
        Some(CollectionPath::readings(&self.app_id, &user_id))
    }

    /// Point the projection at the current identity's collection
    ///
    /// Re-subscribes when the user changed and tears down when there is no
    /// store or no user.
    pub fn sync_identity(&mut self) {
        match (self.store.clone(), self.expected_collection()) {
            (Some(store), Some(collection)) => self.projection.activate(store.as_ref(), collection),
            _ => self.projection.deactivate(),
        }
    }

    /// Whether the projection mirrors the current identity's collection
    fn is_current(&self) -> bool {
        self.projection.collection() == self.expected_collection().as_ref()
    }

    fn is_loading(&self, projection: &ProjectionState) -> bool {
        let identity = self.identity.borrow();
        if !identity.ready {
            return true;
        }
        if identity.user_id.is_none() {
            return false;
        }
        drop(identity);

        match self.expected_collection() {
            Some(_) => !self.is_current() || projection.is_loading,
            None => false,
        }
    }

    /// Current view, with "today" in the local time zone
    pub fn view(&self) -> ReadingsView {
        self.view_with(|readings| today_pages(readings, Local::now()))
    }

    /// Current view, with "today" taken in `now`'s time zone
    pub fn view_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> ReadingsView {
        self.view_with(|readings| today_pages_in(readings, now))
    }

    /// A projection still holding another user's collection shows nothing
    /// until the next sync re-points it.
    fn view_with(&self, today: impl FnOnce(&[ReadingEntry]) -> u64) -> ReadingsView {
        let mut projection = self.projection.state();
        let is_loading = self.is_loading(&projection);
        if !self.is_current() {
            projection = ProjectionState::default();
        }

        ReadingsView {
            today_pages: today(&projection.readings),
            total_pages: projection.total_pages,
            is_loading,
            is_adding: self.commands.is_adding(),
            user_id: self.identity.borrow().user_id.clone(),
            last_error: projection.last_error,
            readings: projection.readings,
        }
    }

    /// Wait for the first delivery, or for identity to fail
    pub async fn wait_until_loaded(&mut self) {
        loop {
            self.sync_identity();
            let projection = self.projection.state();
            if !self.is_loading(&projection) {
                return;
            }
            self.changed().await;
        }
    }

    /// Wait until something on screen may have changed
    ///
    /// Identity changes are applied to the projection before returning.
    pub async fn changed(&mut self) {
        tokio::select! {
            Ok(()) = self.projection_rx.changed() => {}
            Ok(()) = self.identity.changed() => {
                self.sync_identity();
            }
            Ok(()) = self.input_rx.changed() => {}
            Ok(()) = self.adding_rx.changed() => {}
            else => std::future::pending::<()>().await,
        }
    }

    pub fn input(&self) -> &InputField {
        self.commands.input()
    }

    /// Command handlers, cloneable for spawning
    pub fn commands(&self) -> ReadingCommands<S> {
        self.commands.clone()
    }

    pub async fn add_reading(&self, text: &str) -> AddOutcome {
        self.commands.add_reading(text).await
    }

    pub async fn delete_reading(&self, id: &str) -> DeleteOutcome {
        self.commands.delete_reading(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{ids, reading_doc, ScriptedStore};
    use chrono::{FixedOffset, Utc};
    use std::time::Duration;

    fn collection(user: &str) -> CollectionPath {
        CollectionPath::readings("test", &UserId::new(user))
    }

    fn scripted_session(
        identity: IdentityState,
    ) -> (
        ScriptedStore,
        watch::Sender<IdentityState>,
        Session<ScriptedStore>,
    ) {
        let store = ScriptedStore::new();
        let (tx, rx) = watch::channel(identity);
        let session = Session::new(Some(Arc::new(store.clone())), "test", rx);
        (store, tx, session)
    }

    async fn settle(session: &mut Session<ScriptedStore>, check: impl Fn(&ReadingsView) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check(&session.view()) {
                session.changed().await;
            }
        })
        .await
        .expect("session did not settle");
    }

    #[tokio::test]
    async fn test_delivery_scenario() {
        let (store, _tx, mut session) =
            scripted_session(IdentityState::established(UserId::new("u1")));
        assert!(session.view().is_loading);

        let now = Utc::now();
        let t0 = now.timestamp_millis() - 1000;
        store.deliver(
            &collection("u1"),
            vec![reading_doc("a", 5, t0), reading_doc("b", 3, t0 + 1)],
        );
        session.wait_until_loaded().await;

        let view = session.view_at(&now);
        assert_eq!(ids(&view.readings), vec!["b", "a"]);
        assert_eq!(view.total_pages, 8);
        assert_eq!(view.today_pages, 8);
        assert!(!view.is_loading);
        assert_eq!(view.user_id, Some(UserId::new("u1")));
    }

    #[tokio::test]
    async fn test_delete_is_not_optimistic() {
        let (store, _tx, mut session) =
            scripted_session(IdentityState::established(UserId::new("u1")));
        store.deliver(
            &collection("u1"),
            vec![reading_doc("a", 5, 100), reading_doc("b", 3, 101)],
        );
        session.wait_until_loaded().await;

        assert_eq!(session.delete_reading("a").await, DeleteOutcome::Deleted);
        assert_eq!(store.deletes().len(), 1);
        assert_eq!(ids(&session.view().readings), vec!["b", "a"]);

        store.deliver(&collection("u1"), vec![reading_doc("b", 3, 101)]);
        settle(&mut session, |v| v.readings.len() == 1).await;
        let view = session.view();
        assert_eq!(ids(&view.readings), vec!["b"]);
        assert_eq!(view.total_pages, 3);
    }

    #[tokio::test]
    async fn test_add_is_not_optimistic() {
        let (store, _tx, mut session) =
            scripted_session(IdentityState::established(UserId::new("u1")));
        store.deliver(&collection("u1"), vec![]);
        session.wait_until_loaded().await;

        session.input().set("4");
        assert!(matches!(
            session.add_reading("4").await,
            AddOutcome::Added { .. }
        ));
        assert!(session.view().readings.is_empty());
        assert_eq!(session.input().get(), "");
    }

    #[tokio::test]
    async fn test_pending_identity_is_loading() {
        let (store, tx, mut session) = scripted_session(IdentityState::pending());
        assert!(session.view().is_loading);
        assert_eq!(store.open_subscriptions(&collection("u1")), 0);
        assert_eq!(
            session.add_reading("5").await,
            AddOutcome::Rejected(crate::commands::AddRejection::NoIdentity)
        );

        tx.send_replace(IdentityState::established(UserId::new("u1")));
        session.changed().await;
        assert_eq!(store.open_subscriptions(&collection("u1")), 1);
        assert!(session.view().is_loading);
    }

    #[tokio::test]
    async fn test_failed_identity_disables_session() {
        let (store, _tx, mut session) = scripted_session(IdentityState::failed());
        session.wait_until_loaded().await;

        let view = session.view();
        assert!(!view.is_loading);
        assert!(view.user_id.is_none());
        assert!(view.readings.is_empty());

        assert!(matches!(
            session.add_reading("5").await,
            AddOutcome::Rejected(_)
        ));
        assert!(store.inserts().is_empty());
    }

    #[tokio::test]
    async fn test_identity_change_resubscribes() {
        let (store, tx, mut session) =
            scripted_session(IdentityState::established(UserId::new("u1")));
        store.deliver(&collection("u1"), vec![reading_doc("a", 5, 1)]);
        session.wait_until_loaded().await;

        tx.send_replace(IdentityState::established(UserId::new("u2")));
        settle(&mut session, |v| v.user_id == Some(UserId::new("u2"))).await;
        session.sync_identity();

        let view = session.view();
        assert!(view.readings.is_empty());
        assert!(view.is_loading);
        assert_eq!(store.open_subscriptions(&collection("u2")), 1);

        store.deliver(&collection("u2"), vec![reading_doc("c", 2, 3)]);
        session.wait_until_loaded().await;
        assert_eq!(ids(&session.view().readings), vec!["c"]);
    }

    #[tokio::test]
    async fn test_view_hides_previous_user_before_resync() {
        let (store, tx, mut session) =
            scripted_session(IdentityState::established(UserId::new("u1")));
        store.deliver(&collection("u1"), vec![reading_doc("a", 5, 1)]);
        session.wait_until_loaded().await;
        assert_eq!(ids(&session.view().readings), vec!["a"]);

        tx.send_replace(IdentityState::established(UserId::new("u2")));

        let view = session.view();
        assert_eq!(view.user_id, Some(UserId::new("u2")));
        assert!(view.readings.is_empty());
        assert_eq!(view.total_pages, 0);
        assert_eq!(view.today_pages, 0);
        assert!(view.is_loading);
    }

    #[tokio::test]
    async fn test_no_store_is_not_loading() {
        let (_tx, rx) = watch::channel(IdentityState::established(UserId::new("u1")));
        let mut session: Session<MemoryStore> = Session::new(None, "test", rx);
        session.wait_until_loaded().await;
        assert!(!session.view().is_loading);
    }

    #[tokio::test]
    async fn test_changed_wakes_on_input() {
        let (_store, _tx, mut session) =
            scripted_session(IdentityState::established(UserId::new("u1")));
        let input = session.input().clone();
        input.set("3");
        tokio::time::timeout(Duration::from_secs(1), session.changed())
            .await
            .expect("input change did not wake the session");
    }

    #[tokio::test]
    async fn test_today_pages_in_other_time_zone() {
        let (store, _tx, mut session) =
            scripted_session(IdentityState::established(UserId::new("u1")));

        // 2024-03-09 23:30 UTC
        let late = 1_710_027_000_000;
        store.deliver(&collection("u1"), vec![reading_doc("a", 4, late)]);
        session.wait_until_loaded().await;

        let utc_noon = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let plus_two = utc_noon.with_timezone(&FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(session.view_at(&utc_noon).today_pages, 0);
        assert_eq!(session.view_at(&plus_two).today_pages, 4);
    }

    #[tokio::test]
    async fn test_end_to_end_with_memory_store() {
        let store = Arc::new(MemoryStore::new());
        let (_tx, rx) = watch::channel(IdentityState::established(UserId::new("u1")));
        let mut session = Session::new(Some(store.clone()), "test", rx);
        session.wait_until_loaded().await;

        session.add_reading("6").await;
        session.add_reading("2").await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.view().readings.len() < 2 {
                session.changed().await;
            }
        })
        .await
        .unwrap();

        let view = session.view();
        assert_eq!(view.total_pages, 8);
        assert_eq!(view.today_pages, 8);

        let id = view.readings[0].id.clone();
        session.delete_reading(&id).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.view().readings.len() > 1 {
                session.changed().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(store.documents(&collection("u1")).len(), 1);
    }
}
