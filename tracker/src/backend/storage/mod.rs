//! # Storage Module
//!
//! Handles all data persistence for the cattle tracker.
//!
//! The domain layer only ever sees [`PersistenceBackend`]. Which
//! implementation sits behind it is decided once at startup:
//!
//! - [`LocalBackend`]: entries, objects and the active pointer in a
//!   [`KeyValueStore`] (JSON files under the data directory, or memory in
//!   tests);
//! - [`RemoteBackend`]: the tracker server over HTTP, with only the active
//!   pointer and session token kept locally.
//!
//! ## Record integrity
//!
//! Every string of every record is sanitized before it is written and again
//! when it is read back. Loading drops records whose `cattleId` is unusable,
//! backfills fields added by later schema versions and synthesizes the
//! insemination history of old records. See [`sanitize`] and [`integrity`].
//!
//! ## Failure semantics
//!
//! Per-record problems are repaired or dropped and never fail a load.
//! Whole-operation problems (quota, I/O, network) are returned to the caller
//! and leave the stored collection untouched.

pub mod error;
pub mod integrity;
pub mod keys;
pub mod kv;
pub mod local;
pub mod remote;
pub mod sanitize;
pub mod traits;

pub use error::StorageError;
pub use kv::{FileKeyValueStore, MemoryKeyValueStore};
pub use local::{LocalBackend, LocalEntryStore, ObjectRegistry};
pub use remote::{ApiClient, RemoteBackend, RemoteError};
pub use traits::{BackendMode, KeyValueStore, PersistenceBackend};
