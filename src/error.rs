use thiserror::Error;

/// Errors reported by [`HashTable`](crate::HashTable) and the containers built
/// on top of it.
///
/// A failed operation never leaves the table half-modified: if `put`,
/// `reserve` or `rehash` return an error, every entry that was present before
/// the call is still present with its old value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    /// The table's allocator could not provide `size` bytes.
    #[error("allocation of {size} bytes failed")]
    AllocationFailed {
        /// Number of bytes requested from the allocator
        size: usize,
    },

    /// The requested capacity cannot be represented.
    #[error("requested capacity overflows the address space")]
    CapacityOverflow,

    /// The table is frozen and every slot is occupied.
    #[error("table is frozen with all {capacity} slots occupied")]
    TableFull {
        /// Number of slots in the table
        capacity: usize,
    },

    /// The requested change is only allowed on an empty table.
    #[error("operation requires an empty table")]
    NotEmpty,
}

/// Errors reported while building an allocator from an
/// [`AllocatorConfig`](crate::memory::AllocatorConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocatorError {
    /// The configuration is not usable.
    #[error("invalid allocator configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration
        reason: &'static str,
    },

    /// The backing memory for the allocator could not be obtained.
    #[error("could not reserve {size} bytes of backing memory")]
    OutOfMemory {
        /// Number of bytes requested
        size: usize,
    },
}
