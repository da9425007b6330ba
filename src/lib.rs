//! Embedded, single-file-pair record store.
//!
//! Typed records are appended as length-prefixed frames to `<name>.db`; a
//! durable primary-key index is persisted as one serialized blob in
//! `<name>.idx`; optional secondary indexes (unique or non-unique) live in
//! memory for the session and are rebuilt by full scan. A free-space
//! management tree ([`FreeTree`]) tracks contiguous block ranges with
//! best-fit allocation and merge-on-free.
//!
//! ```no_run
//! use larder::{JsonCodec, OpenMode, Store};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Reading {
//!     id: u64,
//!     value: i64,
//! }
//!
//! # fn main() -> larder::Result<()> {
//! let mut store: Store<u64, Reading> = Store::open(
//!     "/tmp/sensors",
//!     "readings",
//!     JsonCodec,
//!     |r: &Reading| r.id,
//!     OpenMode::OpenOrCreate,
//! )?;
//! store.insert(&Reading { id: 1, value: 18 })?;
//! assert_eq!(store.read(&1)?.value, 18);
//! store.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! The store is single-threaded and single-process: no internal locking,
//! no async, exclusive ownership of both file handles between open and
//! close.

#![warn(missing_docs)]

/// Pluggable record serialization.
pub mod codec;

/// Error taxonomy shared by every module.
pub mod error;

/// Free-space management tree.
pub mod free;

/// Primary-key and secondary in-memory indexes.
pub mod index;

/// Positioned file I/O.
pub mod io;

/// The record store itself.
pub mod store;

pub use codec::{Codec, JsonCodec};
pub use error::{LarderError, Result};
pub use free::FreeTree;
pub use index::{PkIndex, SecondaryIndex};
pub use store::{OpenMode, Store, StoreOptions, FRAME_PREFIX_SIZE};
