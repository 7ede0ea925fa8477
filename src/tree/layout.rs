//! # Node Header Layout and Record Shape
//!
//! This module pins down the bit-exact on-page format of a node. All offsets
//! are bytes from the page start; the node owns everything from
//! `NEXT_FREE_POSITION` onward, the base frame header owns what precedes it.
//!
//! ## Header Layout
//!
//! ```text
//! Offset  Size  Field               Description
//! ------  ----  ------------------  -----------------------------------------
//! +0      4     free-data-position  Lowest-addressed byte of the data region
//! +4      1     flags               Bitfield, see below
//! +5      4     size                Record count (i32)
//! +9      8     tree-size           Whole-tree element count (root page only)
//! +17     8     left-pointer        Internal: child for keys below record 0
//! +25     8     left-marker-block   Block index of the leftmost marker (-1)
//! +33     4     left-marker-usage   Pages-used counter of the leftmost marker
//! +37     8     left-sibling        Predecessor node at the same level
//! +45     8     right-sibling       Successor node at the same level
//! +53     ...   slot directory      size * record_size bytes, grows upward
//! ```
//!
//! The data region grows downward from the page end; free space is whatever
//! separates it from the slot directory.
//!
//! ## Flag Byte (LSB = bit 0)
//!
//! ```text
//! bit 0     leaf
//! bit 1     continued-from (key range continues from the previous page)
//! bit 2     continued-to   (key range continues to the next page)
//! bits 3-6  encoders version (u4)
//! bit 7     extension (reserved, must be 0)
//! ```
//!
//! ## Record Shape
//!
//! The record (slot) width is uniform per page and decided once per session
//! from the instantiated codecs:
//!
//! - key part: the key bytes inline, or a fixed-width data-region position
//! - value part, leaf: the value bytes inline, or a fixed-width position
//! - value part, internal: child pointer, then the marker
//!   `(block_index, pages_used)`
//!
//! ## Entry Size Bound
//!
//! `MAX_ENTRY_SIZE` is half the record area, which forces every page to hold
//! at least two records and guarantees a split can always make progress.

use crate::config::{
    INLINE_KEYS_THRESHOLD, INLINE_VALUES_THRESHOLD, NEXT_FREE_POSITION, PAGE_SIZE,
};
use crate::encoding::{Encoder, PageIndexCodec, PagePositionCodec};

pub(crate) const FREE_DATA_POSITION_OFFSET: usize = NEXT_FREE_POSITION;
pub(crate) const FLAGS_OFFSET: usize = FREE_DATA_POSITION_OFFSET + 4;
pub(crate) const SIZE_OFFSET: usize = FLAGS_OFFSET + 1;
pub(crate) const TREE_SIZE_OFFSET: usize = SIZE_OFFSET + 4;
pub(crate) const LEFT_POINTER_OFFSET: usize = TREE_SIZE_OFFSET + 8;
pub(crate) const LEFT_MARKER_BLOCK_OFFSET: usize = LEFT_POINTER_OFFSET + 8;
pub(crate) const LEFT_MARKER_USAGE_OFFSET: usize = LEFT_MARKER_BLOCK_OFFSET + 8;
pub(crate) const LEFT_SIBLING_OFFSET: usize = LEFT_MARKER_USAGE_OFFSET + 4;
pub(crate) const RIGHT_SIBLING_OFFSET: usize = LEFT_SIBLING_OFFSET + 8;

/// First byte of the slot directory.
pub const RECORDS_OFFSET: usize = RIGHT_SIBLING_OFFSET + 8;

/// Half of the record area; the split planner's target for free bytes.
pub const HALF_SIZE: usize = (PAGE_SIZE - RECORDS_OFFSET) / 2;

/// Largest admissible full entry size. Entries above this are rejected as
/// irrecoverable data errors: no split could ever accommodate them.
pub const MAX_ENTRY_SIZE: usize = HALF_SIZE;

pub(crate) const LEAF_FLAG: u8 = 0b0000_0001;
pub(crate) const CONTINUED_FROM_FLAG: u8 = 0b0000_0010;
pub(crate) const CONTINUED_TO_FLAG: u8 = 0b0000_0100;
pub(crate) const ENCODERS_VERSION_MASK: u8 = 0b0111_1000;
pub(crate) const ENCODERS_VERSION_SHIFT: u8 = 3;
pub(crate) const EXTENSION_FLAG: u8 = 0b1000_0000;

const _: () = assert!(
    RECORDS_OFFSET < PAGE_SIZE,
    "node header must leave room for records"
);

const _: () = assert!(
    2 * MAX_ENTRY_SIZE <= PAGE_SIZE - RECORDS_OFFSET,
    "every page must be able to hold at least two maximum-size entries"
);

pub(crate) const FREE_DATA_POSITION_FIELD: u8 = 0b0001;
pub(crate) const FLAGS_FIELD: u8 = 0b0010;
pub(crate) const SIZE_FIELD: u8 = 0b0100;
pub(crate) const TREE_SIZE_FIELD: u8 = 0b1000;

/// Cached header fields of an open session, with loaded/dirty bookkeeping.
/// `flags` and `size` are fetched eagerly on session start; the free data
/// position and tree size load lazily on first demand. A session close
/// writes back only the dirty fields.
#[derive(Debug, Default)]
pub(crate) struct HeaderFields {
    pub free_data_position: u32,
    pub flags: u8,
    pub size: i32,
    pub tree_size: i64,
    pub loaded: u8,
    pub dirty: u8,
}

impl HeaderFields {
    pub fn is_loaded(&self, field: u8) -> bool {
        self.loaded & field != 0
    }

    pub fn mark_loaded(&mut self, field: u8) {
        self.loaded |= field;
    }

    pub fn is_dirty(&self, field: u8) -> bool {
        self.dirty & field != 0
    }

    pub fn mark_changed(&mut self, field: u8) {
        self.dirty |= field;
        self.loaded |= field;
    }
}

/// Record shape of an open session, computed once from the instantiated
/// codecs and the leaf flag so per-record paths never re-derive it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordLayout {
    pub keys_inlined: bool,
    pub values_inlined: bool,
    pub record_size: usize,
    pub marker_size: usize,
}

impl RecordLayout {
    pub fn compute<KE: Encoder, VE: Encoder>(
        key_encoder: &KE,
        value_encoder: &VE,
        positions: &PagePositionCodec,
        pointers: &PageIndexCodec,
        leaf: bool,
    ) -> Self {
        let keys_inlined =
            key_encoder.is_of_bound_size() && key_encoder.maximum_size() <= INLINE_KEYS_THRESHOLD;
        let values_inlined = value_encoder.is_of_bound_size()
            && value_encoder.maximum_size() <= INLINE_VALUES_THRESHOLD;

        let mut record_size = if keys_inlined {
            key_encoder.maximum_size()
        } else {
            positions.maximum_size()
        };

        let mut marker_size = 0;
        if leaf {
            record_size += if values_inlined {
                value_encoder.maximum_size()
            } else {
                positions.maximum_size()
            };
        } else {
            marker_size = pointers.maximum_size() + positions.maximum_size();
            record_size += pointers.maximum_size() + marker_size;
        }

        Self {
            keys_inlined,
            values_inlined,
            record_size,
            marker_size,
        }
    }
}
