//! # qdb: an embedded, single-process persistent key/value store
//!
//! `qdb` keys records by a caller-supplied 64-bit identifier and stores
//! opaque byte values of arbitrary length. A store is a directory holding
//! a compact *snapshot* file and an *append log* extending it; opening the
//! store fuses the newer snapshot with the longest valid prefix of its
//! log, and `defrag()` periodically rewrites a fresh snapshot to bound
//! the log's size.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Engine                                               │
//! │  ├─ recovers: newer of qdb.0/qdb.1 + qdb.log replay   │
//! │  ├─ put/del: log-append, then update the in-memory    │
//! │  │           index                                    │
//! │  └─ defrag: rewrite a new snapshot, retire the old     │
//! │             snapshot and log                          │
//! └───────────────────────┬───────────────────────────────┘
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!     snapshot.rs      log.rs        index.rs
//!   (qdb.0 / qdb.1)   (qdb.log)   (key → payload?/location)
//! ```
//!
//! ## What this crate does not do
//!
//! No ordered iteration, no range scans, no multi-key transactions, no
//! concurrent writer processes on the same directory, no replication, no
//! hashing of application keys into the 64-bit identifier space — the
//! caller supplies that. See each module's docs for the on-disk formats
//! and recovery rules this crate does implement.
//!
//! ## Example
//!
//! ```
//! use qdb::{Engine, EngineOptions};
//! use tempfile::tempdir;
//!
//! let dir = tempdir().unwrap();
//! let engine = Engine::open(dir.path(), EngineOptions::new()).unwrap();
//! engine.put(7, vec![0xDE, 0xAD]);
//! assert_eq!(engine.get(7).as_deref(), Some(&[0xDE, 0xAD][..]));
//! assert_eq!(engine.count(), 1);
//! engine.close().unwrap();
//! ```

mod codec;
mod config;
mod engine;
mod error;
mod index;
mod location;
mod log;
mod snapshot;

pub use config::{EngineOptions, KeepInMemPredicate};
pub use engine::Engine;
pub use error::EngineError;
pub use location::Location;
