//! # B+Tree Node Layer
//!
//! This module implements the node tier of the LSM index: the complete
//! bit-level discipline for storing, locating, inserting, deleting and
//! redistributing ordered key/value records inside one fixed-size page.
//!
//! ## Node Anatomy
//!
//! ```text
//! +-------------------------------+
//! | Frame header (16 B)           |  Owned by the storage layer
//! +-------------------------------+
//! | Node header (53 B)            |  free-data-position, flags, size,
//! |                               |  tree-size, left pointer/marker,
//! |                               |  sibling links
//! +-------------------------------+
//! | Slot directory                |  size * record_size, grows downward
//! +-------------------------------+
//! | Free space                    |
//! +-------------------------------+
//! | Data region                   |  out-of-line keys/values, grows upward
//! |                               |  from the page end
//! +-------------------------------+
//! ```
//!
//! Leaf slots carry a key part and a value part; internal slots carry a key
//! part, a child pointer and a *marker* - a `(block_index, pages_used)` pair
//! linking the separator to a block in a lower LSM level. Keys and values
//! whose codec is small and of bound size live inline in the slot; everything
//! else lives in the data region behind a fixed-width offset.
//!
//! ## Sessions
//!
//! Every access is bracketed by a session that holds the page latch and
//! caches the mutable header fields. Read sessions (`Node<PageReader>`) lack
//! the mutation API at the type level; write sessions (`Node<PageWriter>`)
//! write back only dirty header fields on close. See [`Node`].
//!
//! ## Search Encoding
//!
//! Searches report a signed index: a non-negative slot index on a match,
//! `-(insertion_point + 1)` on a miss. The helpers in [`search`] convert
//! between the encodings and are part of the public contract.
//!
//! ## Module Organization
//!
//! - `node`: the node itself - sessions, records, markers, split support
//! - `layout`: header offsets, flag bits, record-shape descriptor
//! - `search`: signed search-index helpers

mod layout;
mod node;
pub mod search;

pub use layout::{HALF_SIZE, MAX_ENTRY_SIZE, RECORDS_OFFSET};
pub use node::{KeyOf, Marker, Node, ValueOf};
pub use search::{
    is_insertion_point, is_preceding, to_index, to_insertion_point, to_minus_one_based_index,
    SearchOutcome,
};
