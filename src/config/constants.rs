//! # Loam Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Constants that depend
//! on each other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (16384 bytes)
//!       │
//!       ├─> PAGE_BASE_HEADER_SIZE (16 bytes, fixed)
//!       │     Bytes [0, NEXT_FREE_POSITION) belong to the base frame header
//!       │     (page kind + checksum); node-owned fields start after it.
//!       │
//!       └─> CLONE_BUFFER_SIZE must divide PAGE_SIZE evenly so node cloning
//!           copies the page in whole chunks.
//!
//! ENCODERS_VERSION (0)
//!       │
//!       └─> Persisted in a 4-bit flag field on every node page; providers
//!           refuse versions they do not know. At most 16 versions exist.
//!
//! INLINE_KEYS_THRESHOLD / INLINE_VALUES_THRESHOLD (8 bytes)
//!       │
//!       └─> A codec of bound size at or under the threshold stores its bytes
//!           inline in the slot; anything else goes out-of-line through a
//!           fixed-width data-region offset. Writers and readers of a page
//!           generation must agree on these.
//! ```
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use crate::config::{PAGE_SIZE, ENCODERS_VERSION};
//! ```

// ============================================================================
// PAGE LAYOUT CONSTANTS
// These define the fundamental page structure shared by the cache and nodes
// ============================================================================

/// Size of each page in bytes (16KB).
/// This is the fundamental unit of caching and the fixed size of every node.
pub const PAGE_SIZE: usize = 16384;

/// Size of the base frame header in bytes.
/// Every page begins with this header containing the page kind and checksum.
pub const PAGE_BASE_HEADER_SIZE: usize = 16;

/// First byte offset available to the page's owner (the node layer).
pub const NEXT_FREE_POSITION: usize = PAGE_BASE_HEADER_SIZE;

/// Chunk size for whole-page copies during node cloning.
pub const CLONE_BUFFER_SIZE: usize = 4096;

const _: () = assert!(
    PAGE_SIZE % CLONE_BUFFER_SIZE == 0,
    "CLONE_BUFFER_SIZE must divide PAGE_SIZE so clones copy whole chunks"
);

// ============================================================================
// ENCODER CONFIGURATION
// The codec set used to read and write node records, persisted per page
// ============================================================================

/// Current encoder-set version, persisted in each node's flag byte.
pub const ENCODERS_VERSION: u8 = 0;

/// Highest representable encoder version (the flag field is 4 bits wide).
pub const MAX_ENCODERS_VERSION: u8 = 15;

/// Keys whose codec is of bound size at or under this many bytes are stored
/// inline in the record slot.
pub const INLINE_KEYS_THRESHOLD: usize = 8;

/// Values whose codec is of bound size at or under this many bytes are stored
/// inline in the record slot (leaf nodes only).
pub const INLINE_VALUES_THRESHOLD: usize = 8;

const _: () = assert!(
    ENCODERS_VERSION <= MAX_ENCODERS_VERSION,
    "ENCODERS_VERSION must fit the 4-bit flag field"
);

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Number of shards for the page cache.
/// Higher values reduce lock contention but increase memory overhead.
pub const CACHE_SHARD_COUNT: usize = 64;
