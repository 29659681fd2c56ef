//! Real-time remote document channel for one user's favorites.
//!
//! Each user owns a single document holding a `favorites` array plus
//! arbitrary profile fields managed by other subsystems. This module only
//! touches the `favorites` field, and always through atomic set-union or
//! set-difference operations so concurrent devices cannot lose each other's
//! writes to a read-modify-write cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::favorites::error::{
    permission_denied, remote_unavailable, FavoritesError, FavoritesResult,
};
use crate::favorites::pending::FavoriteOperation;
use crate::util::subscribe::{NextFn, SettledFn, Unsubscribe};

const FAVORITES_FIELD: &str = "favorites";

/// Callback receiving every snapshot pushed on a subscription channel.
pub type SnapshotCallback = NextFn<RemoteSnapshot>;

/// One-shot callback invoked when a remote mutation settles.
pub type MutationCallback = SettledFn<FavoritesError>;

/// Full state of the remote `favorites` field at a point in time.
///
/// `effective_time` is the server-side time the snapshot reflects; the engine
/// compares it against pending local intents during reconciliation.
#[derive(Clone, Debug)]
pub struct RemoteSnapshot {
    pub favorites: Vec<String>,
    pub effective_time: DateTime<Utc>,
}

/// Live subscription channel to one user's document.
///
/// `subscribe` fires the callback once immediately with the current remote
/// state (lazily creating the document with an empty `favorites` field for a
/// brand-new user) and again on every subsequent change, including this
/// client's own mutations.
pub trait RemoteStore: Send + Sync {
    fn subscribe(
        &self,
        user_id: &str,
        on_snapshot: SnapshotCallback,
    ) -> FavoritesResult<RemoteSubscription>;

    /// Atomic set-add of `item` to the user's `favorites` field.
    fn add_item(&self, user_id: &str, item: &str, on_settled: MutationCallback);

    /// Atomic set-remove of `item` from the user's `favorites` field.
    fn remove_item(&self, user_id: &str, item: &str, on_settled: MutationCallback);
}

/// Registration handle for a snapshot listener; detaches on drop.
///
/// Detaching only stops delivery for this handle. Callers that need to fence
/// off late snapshots entirely (the channel may already have one in flight)
/// must guard with their own generation check.
pub struct RemoteSubscription {
    unsubscribe: Option<Unsubscribe>,
}

impl RemoteSubscription {
    pub fn new(unsubscribe: Unsubscribe) -> Self {
        Self {
            unsubscribe: Some(unsubscribe),
        }
    }

    pub fn detach(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for RemoteSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

/// One issued mutation, recorded by [`InMemoryRemoteStore`] for assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMutationRecord {
    pub user_id: String,
    pub operation: FavoriteOperation,
    pub item: String,
}

struct UserDocument {
    fields: Map<String, Value>,
    updated_at: DateTime<Utc>,
}

impl UserDocument {
    fn new() -> Self {
        let mut fields = Map::new();
        fields.insert(FAVORITES_FIELD.to_string(), Value::Array(Vec::new()));
        Self {
            fields,
            updated_at: Utc::now(),
        }
    }

    fn favorites(&self) -> Vec<String> {
        self.fields
            .get(FAVORITES_FIELD)
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply(&mut self, operation: FavoriteOperation, item: &str) {
        let entries = match self
            .fields
            .entry(FAVORITES_FIELD.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(entries) => entries,
            other => {
                // Normalize a foreign write of the wrong shape back to an array.
                *other = Value::Array(Vec::new());
                match other {
                    Value::Array(entries) => entries,
                    _ => unreachable!(),
                }
            }
        };
        let present = entries.iter().any(|entry| entry.as_str() == Some(item));
        match operation {
            FavoriteOperation::Add => {
                if !present {
                    entries.push(Value::String(item.to_string()));
                }
            }
            FavoriteOperation::Remove => {
                entries.retain(|entry| entry.as_str() != Some(item));
            }
        }
        self.updated_at = Utc::now();
    }
}

struct HeldMutation {
    user_id: String,
    operation: FavoriteOperation,
    item: String,
    on_settled: MutationCallback,
}

#[derive(Default)]
struct StoreState {
    documents: HashMap<String, UserDocument>,
    listeners: HashMap<String, Vec<(u64, SnapshotCallback)>>,
    held: Vec<HeldMutation>,
    hold: bool,
    fail: bool,
    deny: bool,
    log: Vec<RemoteMutationRecord>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    listener_counter: AtomicU64,
}

/// In-process backend implementing the full channel contract: lazy document
/// creation, listener fan-out, and mutation echo. Doubles as a deterministic
/// harness: mutations can be held in flight, forced to fail, and arbitrary
/// snapshots can be injected, which is how the engine tests model stale
/// deliveries and second devices.
#[derive(Clone)]
pub struct InMemoryRemoteStore {
    inner: Arc<StoreInner>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::default()),
                listener_counter: AtomicU64::new(0),
            }),
        }
    }

    /// While `true`, mutations are acknowledged into an in-flight queue and
    /// neither apply nor settle until [`release_mutations`](Self::release_mutations).
    pub fn hold_mutations(&self, hold: bool) {
        self.inner.state.lock().unwrap().hold = hold;
    }

    /// Applies all held mutations in issue order, echoing snapshots and
    /// settling their callbacks.
    pub fn release_mutations(&self) {
        let held: Vec<HeldMutation> = {
            let mut state = self.inner.state.lock().unwrap();
            state.held.drain(..).collect()
        };
        for mutation in held {
            let (snapshot, listeners) = {
                let mut state = self.inner.state.lock().unwrap();
                commit(&mut state, &mutation.user_id, mutation.operation, &mutation.item)
            };
            notify(&listeners, &snapshot);
            (mutation.on_settled)(Ok(()));
        }
    }

    /// While `true`, mutations settle with `RemoteUnavailable` and leave the
    /// document untouched.
    pub fn fail_mutations(&self, fail: bool) {
        self.inner.state.lock().unwrap().fail = fail;
    }

    /// While `true`, mutations settle with `PermissionDenied`, as a security
    /// rule rejecting the write would.
    pub fn deny_mutations(&self, deny: bool) {
        self.inner.state.lock().unwrap().deny = deny;
    }

    /// Delivers an arbitrary snapshot to the user's listeners without
    /// touching the stored document. Models a stale or foreign delivery.
    pub fn push_snapshot(
        &self,
        user_id: &str,
        favorites: Vec<String>,
        effective_time: DateTime<Utc>,
    ) {
        let listeners = {
            let state = self.inner.state.lock().unwrap();
            cloned_listeners(&state, user_id)
        };
        let snapshot = RemoteSnapshot {
            favorites,
            effective_time,
        };
        notify(&listeners, &snapshot);
    }

    /// Replaces the user's document fields wholesale, as another subsystem
    /// writing the profile would.
    pub fn seed_document(&self, user_id: &str, fields: Map<String, Value>) {
        let mut state = self.inner.state.lock().unwrap();
        let document = state
            .documents
            .entry(user_id.to_string())
            .or_insert_with(UserDocument::new);
        document.fields = fields;
        document.updated_at = Utc::now();
    }

    /// Current `favorites` field of the stored document, if one exists.
    pub fn document_favorites(&self, user_id: &str) -> Option<Vec<String>> {
        let state = self.inner.state.lock().unwrap();
        state.documents.get(user_id).map(UserDocument::favorites)
    }

    /// Full field map of the stored document, if one exists.
    pub fn document_fields(&self, user_id: &str) -> Option<Map<String, Value>> {
        let state = self.inner.state.lock().unwrap();
        state.documents.get(user_id).map(|doc| doc.fields.clone())
    }

    /// Every mutation issued against this store, in call order, including
    /// held and failed ones.
    pub fn mutation_log(&self) -> Vec<RemoteMutationRecord> {
        self.inner.state.lock().unwrap().log.clone()
    }

    fn mutate(
        &self,
        user_id: &str,
        operation: FavoriteOperation,
        item: &str,
        on_settled: MutationCallback,
    ) {
        enum Outcome {
            Failed(FavoritesError, MutationCallback),
            Held,
            Applied(RemoteSnapshot, Vec<SnapshotCallback>, MutationCallback),
        }

        let outcome = {
            let mut state = self.inner.state.lock().unwrap();
            state.log.push(RemoteMutationRecord {
                user_id: user_id.to_string(),
                operation,
                item: item.to_string(),
            });
            if state.fail {
                let err = remote_unavailable(format!(
                    "favorites {} rejected for user {user_id}",
                    operation.as_str()
                ));
                Outcome::Failed(err, on_settled)
            } else if state.deny {
                let err =
                    permission_denied(format!("favorites write denied for user {user_id}"));
                Outcome::Failed(err, on_settled)
            } else if state.hold {
                state.held.push(HeldMutation {
                    user_id: user_id.to_string(),
                    operation,
                    item: item.to_string(),
                    on_settled,
                });
                Outcome::Held
            } else {
                let (snapshot, listeners) = commit(&mut state, user_id, operation, item);
                Outcome::Applied(snapshot, listeners, on_settled)
            }
        };

        match outcome {
            Outcome::Failed(err, on_settled) => on_settled(Err(err)),
            Outcome::Held => {}
            Outcome::Applied(snapshot, listeners, on_settled) => {
                notify(&listeners, &snapshot);
                on_settled(Ok(()));
            }
        }
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cloned_listeners(state: &StoreState, user_id: &str) -> Vec<SnapshotCallback> {
    state
        .listeners
        .get(user_id)
        .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
        .unwrap_or_default()
}

fn commit(
    state: &mut StoreState,
    user_id: &str,
    operation: FavoriteOperation,
    item: &str,
) -> (RemoteSnapshot, Vec<SnapshotCallback>) {
    let document = state
        .documents
        .entry(user_id.to_string())
        .or_insert_with(UserDocument::new);
    document.apply(operation, item);
    let snapshot = RemoteSnapshot {
        favorites: document.favorites(),
        effective_time: document.updated_at,
    };
    (snapshot, cloned_listeners(state, user_id))
}

fn notify(listeners: &[SnapshotCallback], snapshot: &RemoteSnapshot) {
    for listener in listeners {
        listener(snapshot.clone());
    }
}

impl RemoteStore for InMemoryRemoteStore {
    fn subscribe(
        &self,
        user_id: &str,
        on_snapshot: SnapshotCallback,
    ) -> FavoritesResult<RemoteSubscription> {
        let id = self.inner.listener_counter.fetch_add(1, Ordering::SeqCst);
        let initial = {
            let mut state = self.inner.state.lock().unwrap();
            let document = state
                .documents
                .entry(user_id.to_string())
                .or_insert_with(UserDocument::new);
            let snapshot = RemoteSnapshot {
                favorites: document.favorites(),
                effective_time: document.updated_at,
            };
            state
                .listeners
                .entry(user_id.to_string())
                .or_default()
                .push((id, Arc::clone(&on_snapshot)));
            snapshot
        };
        on_snapshot(initial);

        let store = Arc::downgrade(&self.inner);
        let user = user_id.to_string();
        Ok(RemoteSubscription::new(Box::new(move || {
            if let Some(inner) = store.upgrade() {
                let mut state = inner.state.lock().unwrap();
                if let Some(entries) = state.listeners.get_mut(&user) {
                    entries.retain(|(entry_id, _)| *entry_id != id);
                    if entries.is_empty() {
                        state.listeners.remove(&user);
                    }
                }
            }
        })))
    }

    fn add_item(&self, user_id: &str, item: &str, on_settled: MutationCallback) {
        self.mutate(user_id, FavoriteOperation::Add, item, on_settled);
    }

    fn remove_item(&self, user_id: &str, item: &str, on_settled: MutationCallback) {
        self.mutate(user_id, FavoriteOperation::Remove, item, on_settled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capture() -> (SnapshotCallback, Arc<Mutex<Vec<Vec<String>>>>) {
        let events: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let callback: SnapshotCallback = Arc::new(move |snapshot: RemoteSnapshot| {
            captured.lock().unwrap().push(snapshot.favorites);
        });
        (callback, events)
    }

    fn settled_ok() -> MutationCallback {
        Box::new(|result: FavoritesResult<()>| assert!(result.is_ok()))
    }

    #[test]
    fn subscribe_lazily_creates_document_and_fires_immediately() {
        let store = InMemoryRemoteStore::new();
        let (callback, events) = capture();
        let _subscription = store.subscribe("u1", callback).unwrap();

        assert_eq!(events.lock().unwrap().as_slice(), &[Vec::<String>::new()]);
        assert_eq!(store.document_favorites("u1"), Some(Vec::new()));
    }

    #[test]
    fn mutations_echo_to_every_listener() {
        let store = InMemoryRemoteStore::new();
        let (device_a, events_a) = capture();
        let (device_b, events_b) = capture();
        let _sub_a = store.subscribe("u1", device_a).unwrap();
        let _sub_b = store.subscribe("u1", device_b).unwrap();

        store.add_item("u1", "line one", settled_ok());
        store.add_item("u1", "line one", settled_ok()); // set semantics, no dup
        store.remove_item("u1", "missing", settled_ok());

        let expected: Vec<Vec<String>> = vec![
            vec![],
            vec!["line one".into()],
            vec!["line one".into()],
            vec!["line one".into()],
        ];
        assert_eq!(events_a.lock().unwrap().as_slice(), expected.as_slice());
        assert_eq!(events_b.lock().unwrap().as_slice(), expected.as_slice());
    }

    #[test]
    fn detached_listener_misses_later_echoes() {
        let store = InMemoryRemoteStore::new();
        let (callback, events) = capture();
        let mut subscription = store.subscribe("u1", callback).unwrap();

        store.add_item("u1", "first", settled_ok());
        subscription.detach();
        store.add_item("u1", "second", settled_ok());

        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[vec![], vec![String::from("first")]]
        );
    }

    #[test]
    fn mutations_leave_foreign_profile_fields_alone() {
        let store = InMemoryRemoteStore::new();
        let mut fields = Map::new();
        fields.insert("displayName".into(), json!("Casa Nova"));
        fields.insert(FAVORITES_FIELD.into(), json!(["kept"]));
        store.seed_document("u1", fields);

        store.add_item("u1", "added", settled_ok());

        let doc = store.document_fields("u1").unwrap();
        assert_eq!(doc.get("displayName"), Some(&json!("Casa Nova")));
        assert_eq!(doc.get(FAVORITES_FIELD), Some(&json!(["kept", "added"])));
    }

    #[test]
    fn held_mutations_apply_in_order_on_release() {
        let store = InMemoryRemoteStore::new();
        let (callback, events) = capture();
        let _subscription = store.subscribe("u1", callback).unwrap();

        store.hold_mutations(true);
        let settled: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        for item in ["a", "b"] {
            let settled = settled.clone();
            store.add_item(
                "u1",
                item,
                Box::new(move |result| settled.lock().unwrap().push(result.is_ok())),
            );
        }
        assert_eq!(events.lock().unwrap().len(), 1); // initial snapshot only
        assert!(settled.lock().unwrap().is_empty());
        assert_eq!(store.document_favorites("u1"), Some(Vec::new()));

        store.hold_mutations(false);
        store.release_mutations();

        assert_eq!(
            store.document_favorites("u1"),
            Some(vec![String::from("a"), String::from("b")])
        );
        assert_eq!(settled.lock().unwrap().as_slice(), &[true, true]);
        assert_eq!(events.lock().unwrap().len(), 3);
    }

    #[test]
    fn failed_mutations_settle_with_error_and_change_nothing() {
        let store = InMemoryRemoteStore::new();
        store.fail_mutations(true);

        let observed: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let captured = observed.clone();
        store.add_item(
            "u1",
            "line",
            Box::new(move |result| {
                *captured.lock().unwrap() = result.err().map(|err| err.code_str().to_string());
            }),
        );

        assert_eq!(
            observed.lock().unwrap().as_deref(),
            Some("favorites/remote-unavailable")
        );
        assert_eq!(store.document_favorites("u1"), None);
        assert_eq!(store.mutation_log().len(), 1);
    }

    #[test]
    fn denied_mutations_settle_with_permission_error_and_change_nothing() {
        let store = InMemoryRemoteStore::new();
        store.deny_mutations(true);

        let observed: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let captured = observed.clone();
        store.remove_item(
            "u1",
            "line",
            Box::new(move |result| {
                *captured.lock().unwrap() = result.err().map(|err| err.code_str().to_string());
            }),
        );

        assert_eq!(
            observed.lock().unwrap().as_deref(),
            Some("favorites/permission-denied")
        );
        assert_eq!(store.document_favorites("u1"), None);
    }
}
