//! Offline-first synchronization engine for a user's saved lines.
//!
//! The [`favorites::FavoritesEngine`] keeps one canonical in-memory favorites
//! set consistent across a synchronous local cache, a real-time remote
//! document store and intermittent connectivity. Mutations apply optimistically
//! before any network traffic; remote snapshots are reconciled with per-item
//! last-writer-wins against still-pending local intents, so the UI never
//! blocks on the network and replicas converge eventually.

pub mod favorites;
pub mod util;
