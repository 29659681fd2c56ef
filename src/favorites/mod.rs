pub mod engine;
pub mod error;
pub mod local;
pub mod network;
pub mod pending;
pub mod remote;

pub use engine::{FavoritesEngine, SyncState, ToggleOutcome};
pub use error::{FavoritesError, FavoritesErrorCode, FavoritesResult};
pub use local::{FileLocalStore, LocalStore, MemoryLocalStore};
pub use network::{NetworkMonitor, NetworkSubscription};
pub use pending::{FavoriteOperation, PendingMutation};
pub use remote::{
    InMemoryRemoteStore, MutationCallback, RemoteMutationRecord, RemoteSnapshot, RemoteStore,
    RemoteSubscription, SnapshotCallback,
};
