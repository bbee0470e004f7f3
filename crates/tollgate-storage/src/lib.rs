//! Tollgate Storage - namespaced key-value persistence.
//!
//! Approval records and thread snapshots are persisted through the
//! [`KvStore`] trait: byte-level `get`/`set`/`delete` with namespaced keys
//! and optional per-key TTL. [`MemoryKvStore`] is the in-process
//! implementation; durable backends implement the same trait.
//!
//! [`ScopedKvStore`] pre-binds a namespace and adds typed JSON helpers.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use kv::{KvStore, MemoryKvStore, ScopedKvStore};
