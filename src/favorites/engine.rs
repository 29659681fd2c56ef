//! Canonical in-memory view of one user's saved lines.
//!
//! The engine applies every mutation optimistically to memory and the local
//! cache before any remote traffic happens, then reconciles incoming remote
//! snapshots against the set of still-pending local intents. Conflict
//! resolution is last-writer-wins at item granularity: a pending mutation
//! issued after a snapshot's effective time outranks that snapshot's view of
//! the item. Remote failures never roll the optimistic state back; the design
//! favors availability over strict consistency and only logs them.
//!
//! All callbacks (snapshot delivery, mutation settlement, connectivity
//! changes) funnel through a generation check so that `teardown` synchronously
//! fences off anything still in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::favorites::local::LocalStore;
use crate::favorites::network::{NetworkMonitor, NetworkSubscription};
use crate::favorites::pending::{FavoriteOperation, PendingMutation};
use crate::favorites::remote::{
    MutationCallback, RemoteSnapshot, RemoteStore, RemoteSubscription, SnapshotCallback,
};

/// Where the engine currently is in its sync lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Before any load attempt.
    Uninitialized,
    /// No remote identity; the local cache is the sole source of truth.
    LocalOnly,
    /// Remote subscription established, no snapshot received yet.
    Syncing,
    /// At least one remote snapshot received; remote is authoritative.
    Live,
    /// Connectivity lost; mutations queue until it returns.
    Offline,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::LocalOnly => "local-only",
            SyncState::Syncing => "syncing",
            SyncState::Live => "live",
            SyncState::Offline => "offline",
        }
    }
}

/// Result of a [`FavoritesEngine::toggle`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub was_added: bool,
}

struct EngineState {
    user_id: Option<String>,
    favorites: Vec<String>,
    sync_state: SyncState,
    pending: Vec<PendingMutation>,
    generation: u64,
    seen_snapshot: bool,
    remote_subscription: Option<RemoteSubscription>,
    network_subscription: Option<NetworkSubscription>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            user_id: None,
            favorites: Vec::new(),
            sync_state: SyncState::Uninitialized,
            pending: Vec::new(),
            generation: 0,
            seen_snapshot: false,
            remote_subscription: None,
            network_subscription: None,
        }
    }
}

struct EngineInner {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    network: NetworkMonitor,
    state: Mutex<EngineState>,
    mutation_counter: AtomicU64,
}

/// Facade owning the favorites sync state machine.
#[derive(Clone)]
pub struct FavoritesEngine {
    inner: Arc<EngineInner>,
}

impl FavoritesEngine {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        network: NetworkMonitor,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                local,
                remote,
                network,
                state: Mutex::new(EngineState::new()),
                mutation_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Loads the local cache synchronously and, when a user identity is
    /// present, opens the remote subscription. Idempotent: calling again
    /// tears the previous session down first.
    pub fn initialize(&self, user_id: Option<&str>) {
        let (old_remote, old_network, generation) = {
            let mut state = self.inner.state.lock().unwrap();
            state.generation += 1;
            state.pending.clear();
            state.seen_snapshot = false;
            state.user_id = user_id.map(str::to_string);
            let old_remote = state.remote_subscription.take();
            let old_network = state.network_subscription.take();

            state.favorites = match self.inner.local.load() {
                Ok(items) => items,
                Err(err) => {
                    log::warn!("favorites cache load failed, starting empty: {err}");
                    Vec::new()
                }
            };
            state.sync_state = match user_id {
                Some(_) if self.inner.network.is_online() => SyncState::Syncing,
                Some(_) => SyncState::Offline,
                None => SyncState::LocalOnly,
            };
            (old_remote, old_network, state.generation)
        };
        // Previous-session handles unsubscribe on drop, outside our lock.
        drop(old_remote);
        drop(old_network);

        let user = match user_id {
            Some(user) => user,
            None => return,
        };

        let weak = Arc::downgrade(&self.inner);
        let network_subscription = self.inner.network.on_change(move |online| {
            if let Some(inner) = weak.upgrade() {
                EngineInner::handle_connectivity(&inner, generation, online);
            }
        });
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.generation != generation {
                // A newer initialize or teardown won the race; the handle
                // drops here.
                return;
            }
            state.network_subscription = Some(network_subscription);
        }

        EngineInner::establish_subscription(&self.inner, generation, user);
    }

    /// Adds `item` when absent, removes it when present. The in-memory set
    /// and the local cache reflect the new state before this returns; the
    /// remote mutation is issued fire-and-forget afterwards.
    pub fn toggle(&self, item: &str) -> ToggleOutcome {
        let (was_added, issue) = {
            let mut state = self.inner.state.lock().unwrap();
            let was_added = match state.favorites.iter().position(|entry| entry == item) {
                Some(index) => {
                    state.favorites.remove(index);
                    false
                }
                None => {
                    state.favorites.push(item.to_string());
                    true
                }
            };
            if let Err(err) = self.inner.local.save(&state.favorites) {
                log::warn!("favorites cache write failed: {err}");
            }

            let operation = if was_added {
                FavoriteOperation::Add
            } else {
                FavoriteOperation::Remove
            };
            let user = state.user_id.clone();
            let issue = match user {
                None => None,
                Some(_)
                    if matches!(
                        state.sync_state,
                        SyncState::LocalOnly | SyncState::Uninitialized
                    ) =>
                {
                    None
                }
                Some(user) => {
                    let id = self.inner.mutation_counter.fetch_add(1, Ordering::SeqCst);
                    // One outstanding intent per item; the newest wins.
                    state.pending.retain(|pending| pending.item != item);
                    state.pending.push(PendingMutation::new(id, item, operation));
                    if state.sync_state == SyncState::Offline {
                        None
                    } else {
                        Some((user, operation, id, state.generation))
                    }
                }
            };
            (was_added, issue)
        };

        if let Some((user, operation, id, generation)) = issue {
            EngineInner::issue_mutation(&self.inner, generation, &user, item, operation, id);
        }
        ToggleOutcome { was_added }
    }

    /// Current favorites in insertion order. Pure read.
    pub fn current(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().favorites.clone()
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.state.lock().unwrap().sync_state
    }

    /// Number of local mutations whose remote write has not settled yet.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }

    /// Unsubscribes from the remote channel, drops pending intents and
    /// resets to `Uninitialized`. Late snapshot or settlement callbacks from
    /// the previous session become no-ops immediately.
    pub fn teardown(&self) {
        let (remote_subscription, network_subscription) = {
            let mut state = self.inner.state.lock().unwrap();
            state.generation += 1;
            state.pending.clear();
            state.seen_snapshot = false;
            state.user_id = None;
            state.sync_state = SyncState::Uninitialized;
            (
                state.remote_subscription.take(),
                state.network_subscription.take(),
            )
        };
        drop(remote_subscription);
        drop(network_subscription);
    }
}

impl EngineInner {
    /// Opens the remote channel for `user_id`. On failure the engine falls
    /// back to `Offline`; the next online transition retries.
    fn establish_subscription(inner: &Arc<EngineInner>, generation: u64, user_id: &str) {
        let weak = Arc::downgrade(inner);
        let on_snapshot: SnapshotCallback = Arc::new(move |snapshot: RemoteSnapshot| {
            if let Some(inner) = weak.upgrade() {
                EngineInner::apply_remote_snapshot(&inner, generation, snapshot);
            }
        });
        match inner.remote.subscribe(user_id, on_snapshot) {
            Ok(subscription) => {
                let mut state = inner.state.lock().unwrap();
                if state.generation == generation {
                    state.remote_subscription = Some(subscription);
                }
            }
            Err(err) => {
                log::warn!("favorites subscription failed for user {user_id}: {err}");
                let mut state = inner.state.lock().unwrap();
                if state.generation == generation {
                    state.sync_state = SyncState::Offline;
                }
            }
        }
    }

    fn issue_mutation(
        inner: &Arc<EngineInner>,
        generation: u64,
        user_id: &str,
        item: &str,
        operation: FavoriteOperation,
        mutation_id: u64,
    ) {
        let weak = Arc::downgrade(inner);
        let logged_item = item.to_string();
        let on_settled: MutationCallback = Box::new(move |result| {
            if let Err(err) = &result {
                // Deliberately no rollback: the optimistic local state stays
                // user-visible and convergence is left to later snapshots.
                log::warn!(
                    "remote favorites {} failed for {logged_item:?}: {err}",
                    operation.as_str()
                );
            }
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.lock().unwrap();
                if state.generation == generation {
                    state.pending.retain(|pending| pending.id != mutation_id);
                }
            }
        });
        match operation {
            FavoriteOperation::Add => inner.remote.add_item(user_id, item, on_settled),
            FavoriteOperation::Remove => inner.remote.remove_item(user_id, item, on_settled),
        }
    }

    fn apply_remote_snapshot(inner: &Arc<EngineInner>, generation: u64, snapshot: RemoteSnapshot) {
        let mut state = inner.state.lock().unwrap();
        if state.generation != generation {
            return;
        }
        state.seen_snapshot = true;

        let mut changed = false;
        {
            let EngineState {
                favorites, pending, ..
            } = &mut *state;

            // A snapshot that already reflects a pending intent settles it.
            pending.retain(|entry| !entry.confirmed_by(&snapshot.favorites));

            // Drop local items the snapshot lacks, unless a newer pending Add
            // masks the eviction.
            favorites.retain(|item| {
                if snapshot.favorites.iter().any(|entry| entry == item) {
                    return true;
                }
                let masked = pending.iter().any(|entry| {
                    entry.item == *item
                        && entry.operation == FavoriteOperation::Add
                        && entry.newer_than(snapshot.effective_time)
                });
                if !masked {
                    changed = true;
                }
                masked
            });

            // Adopt snapshot items we lack, unless a newer pending Remove
            // masks the re-add.
            for item in &snapshot.favorites {
                if favorites.iter().any(|entry| entry == item) {
                    continue;
                }
                let masked = pending.iter().any(|entry| {
                    entry.item == *item
                        && entry.operation == FavoriteOperation::Remove
                        && entry.newer_than(snapshot.effective_time)
                });
                if !masked {
                    favorites.push(item.clone());
                    changed = true;
                }
            }

            if changed {
                if let Err(err) = inner.local.save(favorites) {
                    log::warn!("favorites cache write failed during reconciliation: {err}");
                }
            }
        }

        // While offline the cache stays authoritative even if a late snapshot
        // sneaks through; the data above is still reconciled.
        if state.sync_state != SyncState::Offline {
            state.sync_state = SyncState::Live;
        }
    }

    fn handle_connectivity(inner: &Arc<EngineInner>, generation: u64, online: bool) {
        let (resubscribe, to_reissue) = {
            let mut state = inner.state.lock().unwrap();
            if state.generation != generation {
                return;
            }
            if matches!(
                state.sync_state,
                SyncState::Uninitialized | SyncState::LocalOnly
            ) {
                return;
            }
            if !online {
                state.sync_state = SyncState::Offline;
                return;
            }
            state.sync_state = if state.seen_snapshot {
                SyncState::Live
            } else {
                SyncState::Syncing
            };
            let user = match &state.user_id {
                Some(user) => user.clone(),
                None => return,
            };
            // A session whose subscribe call failed has no channel; retry it
            // before pushing queued writes.
            let resubscribe = state
                .remote_subscription
                .is_none()
                .then(|| user.clone());
            let to_reissue = state
                .pending
                .iter()
                .map(|entry| (user.clone(), entry.item.clone(), entry.operation, entry.id))
                .collect::<Vec<_>>();
            (resubscribe, to_reissue)
        };
        if let Some(user) = resubscribe {
            EngineInner::establish_subscription(inner, generation, &user);
        }
        // Queued while offline, re-issued in creation order.
        for (user, item, operation, id) in to_reissue {
            EngineInner::issue_mutation(inner, generation, &user, &item, operation, id);
        }
    }
}
