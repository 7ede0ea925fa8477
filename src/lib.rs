//! # Loam - LSM-Tree Index Node Layer
//!
//! Loam implements the mutable top tier of an LSM-tree index: the on-page
//! B+tree node and record manager, together with the storage primitives it
//! consumes. The design prioritizes:
//!
//! - **Bit-exact page layout**: every node lives in one fixed-size page with
//!   a two-sided slot directory and a big-endian binary format
//! - **Zero allocation on hot paths**: record layout decisions are computed
//!   once per session, not per access
//! - **Latch-disciplined concurrency**: all node access is bracketed by
//!   read/write sessions holding the page cache's shared/exclusive latches
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Tree orchestration (out of scope) │
//! ├─────────────────────────────────────┤
//! │   Node layer (sessions, records,    │
//! │   markers, split support)           │
//! ├─────────────────────────────────────┤
//! │   Encoder contract (versioned       │
//! │   key/value/pointer/position codecs)│
//! ├─────────────────────────────────────┤
//! │   Storage layer (page cursor,       │
//! │   latched SIEVE page cache)         │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Node Pages
//!
//! A node occupies exactly one `PAGE_SIZE` page. Records are managed through
//! a slot directory growing from the front of the page and a variable-length
//! data region growing from the back; out-of-line keys and values live in the
//! data region and are addressed by fixed-width offsets stored in the slots.
//! Internal nodes additionally attach a *marker* to every separator, linking
//! it to a block in a lower LSM level.
//!
//! ## Sessions
//!
//! Every node access is wrapped in exactly one session:
//!
//! ```text
//! let page = cache.get_or_insert(7, |_| Ok(()))?;
//! let mut latch = page.latch_exclusive();
//! let mut node = Node::begin_create(latch.writer(), U32Codec, U64Codec)?;
//! node.create(true)?;
//! // ... mutate ...
//! node.end_write()?;    // writes back dirty header fields
//! ```
//!
//! Read sessions hold the shared latch and statically lack the mutation API;
//! write sessions hold the exclusive latch and flush dirty header fields on
//! close.
//!
//! ## Module Overview
//!
//! - [`config`]: centralized constants and compile-time layout assertions
//! - [`storage`]: page cursor primitives and the latched page cache
//! - [`encoding`]: the versioned encoder contract and shipped codecs
//! - [`tree`]: the B+tree node itself - sessions, search, records, markers

pub mod config;
pub mod encoding;
pub mod storage;
pub mod tree;

pub use storage::{PageCache, PageRef};
pub use tree::{Marker, Node};
