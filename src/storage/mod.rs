//! # Storage Module
//!
//! This module provides the storage layer underneath the node tier: the
//! byte-addressable page primitive and the page cache that owns every page
//! buffer in the process.
//!
//! ## Architecture Overview
//!
//! The cache hands out pinned page frames; each frame carries its own
//! shared/exclusive latch. A latched frame yields a cursor (`PageReader` or
//! `PageWriter`) through which all reads and writes flow. The node layer
//! never touches page bytes except through a cursor, which keeps every access
//! bounds-checked and keeps the big-endian byte discipline in one place.
//!
//! ```text
//! PageCache ──get_or_insert──> PageRef (pinned)
//!                                │
//!                 ┌──────────────┴──────────────┐
//!          latch_shared()                latch_exclusive()
//!                 │                             │
//!           SharedPage ─reader()─>        ExclusivePage ─writer()─>
//!           PageReader (&[u8])            PageWriter (&mut [u8])
//! ```
//!
//! ## Page Format
//!
//! Every page begins with a fixed 16-byte frame header (kind byte + CRC32
//! checksum, see [`FrameHeader`]); the bytes from `NEXT_FREE_POSITION`
//! onward belong to the page's owner. All multi-byte integers on a page are
//! big-endian.
//!
//! ## Thread Safety
//!
//! `PageCache` is `Send + Sync`. Frames are latched individually with
//! `parking_lot::RwLock`; pin counts prevent eviction of in-use frames.
//!
//! ## Module Organization
//!
//! - `page`: cursor traits and implementations, frame header, validation
//! - `cache`: sharded SIEVE page cache with per-frame latches

mod cache;
mod page;

pub use cache::{ExclusivePage, PageCache, PageRef, SharedPage};
pub use page::{
    validate_page, FrameHeader, PageKind, PageRead, PageReader, PageWrite, PageWriter,
};
