#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// Error types returned by tables and allocators.
pub mod error;

/// Runtime flags controlling growth, case handling and locking.
pub mod flags;

/// A string-keyed map built on the Robin Hood `HashTable`.
pub mod hash_map;

pub mod hash_table;

/// A set of byte strings built on the Robin Hood `HashTable`.
pub mod hash_set;

pub mod hasher;

pub mod key;

pub mod memory;

pub mod shared;

pub mod value;

pub use error::AllocatorError;
pub use error::TableError;
pub use flags::TableFlags;
pub use hash_map::StringMap;
pub use hash_set::ByteSet;
pub use hash_table::HashTable;
pub use hash_table::TableBuilder;
pub use shared::SharedTable;
pub use shared::TableGuard;
