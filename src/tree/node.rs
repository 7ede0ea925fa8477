//! # B+Tree Node
//!
//! One node occupies exactly one page. This module owns everything between
//! the page bytes and the tree walker: the session protocol, the slot
//! directory and data-region allocator, leaf and internal record operations,
//! markers, and split support.
//!
//! ## Session Protocol
//!
//! Every access is wrapped in exactly one session:
//!
//! - **Read session** (`begin_read`/`end_read`): shared latch held by the
//!   caller; `flags` and `size` are fetched eagerly, the free data position
//!   and tree size lazily on first demand. Closing asserts nothing was
//!   dirtied - the mutation API does not even exist on read sessions.
//! - **Write session** (`begin_write`/`end_write`): exclusive latch; closing
//!   writes back only the header fields whose dirty bit is set.
//! - **Create session** (`begin_create` + `create`): exclusive latch on a
//!   fresh or recycled page; `create` must run before any other operation.
//!
//! The record shape (inline vs out-of-line key/value, slot width, marker
//! width) is computed once at session start from the codecs selected by the
//! on-page encoders version; per-record paths branch on the cached
//! descriptor, never on the codecs.
//!
//! ## Allocator
//!
//! The slot directory grows from `RECORDS_OFFSET` toward higher addresses;
//! the data region grows from the page end toward lower addresses. Deleting
//! out-of-line bytes compacts the data region upward and patches every slot
//! offset below the freed range, so the region never fragments across
//! session boundaries.
//!
//! ## Errors vs Bugs
//!
//! Contract violations that depend on data (oversized entries, unknown
//! encoder versions, corrupt offsets) surface as `eyre` errors. Caller bugs
//! (marker access on a leaf, out-of-range indices, left-pointer access on a
//! leaf, dirtying a read session) are assertions.

use std::fmt;

use eyre::{ensure, Result};
use smallvec::SmallVec;
use tracing::debug;

use super::layout::{
    HeaderFields, RecordLayout, CONTINUED_FROM_FLAG, CONTINUED_TO_FLAG, ENCODERS_VERSION_MASK,
    ENCODERS_VERSION_SHIFT, EXTENSION_FLAG, FLAGS_FIELD, FLAGS_OFFSET, FREE_DATA_POSITION_FIELD,
    FREE_DATA_POSITION_OFFSET, HALF_SIZE, LEAF_FLAG, LEFT_MARKER_BLOCK_OFFSET,
    LEFT_MARKER_USAGE_OFFSET, LEFT_POINTER_OFFSET, LEFT_SIBLING_OFFSET, MAX_ENTRY_SIZE,
    RECORDS_OFFSET, RIGHT_SIBLING_OFFSET, SIZE_FIELD, SIZE_OFFSET, TREE_SIZE_FIELD,
    TREE_SIZE_OFFSET,
};
use super::search::{is_insertion_point, to_index, to_minus_one_based_index, SearchOutcome};
use crate::config::{CLONE_BUFFER_SIZE, ENCODERS_VERSION, PAGE_SIZE};
use crate::encoding::{Encoder, EncoderProvider, PageIndexCodec, PagePositionCodec};
use crate::storage::{PageKind, PageRead, PageReader, PageWrite, PageWriter};

/// Decoded key type of a key-codec provider.
pub type KeyOf<KP> = <<KP as EncoderProvider>::Encoder as Encoder>::Value;

/// Decoded value type of a value-codec provider.
pub type ValueOf<VP> = <<VP as EncoderProvider>::Encoder as Encoder>::Value;

/// A separator's link to a block in a lower LSM level. `block_index == 0`
/// means no block is assigned. Logical index -1 names the leftmost marker,
/// stored in the node header rather than in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub index: i32,
    pub block_index: u64,
    pub pages_used: u32,
}

impl Marker {
    pub fn is_empty(&self) -> bool {
        self.block_index == 0
    }
}

/// A node session over a latched page. `P` is the page cursor: read sessions
/// use [`PageReader`], write and create sessions use [`PageWriter`]; the
/// mutation API only exists when `P: PageWrite`.
#[derive(Debug)]
pub struct Node<P, KP: EncoderProvider, VP: EncoderProvider> {
    page: P,
    keys: KP,
    values: VP,
    key_encoder: KP::Encoder,
    value_encoder: VP::Encoder,
    positions: PagePositionCodec,
    pointers: PageIndexCodec,
    layout: RecordLayout,
    fields: HeaderFields,
}

impl<'a, KP, VP> Node<PageReader<'a>, KP, VP>
where
    KP: EncoderProvider,
    VP: EncoderProvider,
{
    /// Opens a read session. The caller holds the shared latch for the
    /// lifetime of the returned node.
    pub fn begin_read(page: PageReader<'a>, keys: KP, values: VP) -> Result<Self> {
        Self::open(page, keys, values)
    }

    /// Closes the read session, returning the cursor.
    pub fn end_read(self) -> PageReader<'a> {
        assert!(
            self.fields.dirty == 0,
            "read session closed with dirty header fields"
        );
        self.page
    }
}

impl<'a, KP, VP> Node<PageWriter<'a>, KP, VP>
where
    KP: EncoderProvider,
    VP: EncoderProvider,
{
    /// Opens a write session. The caller holds the exclusive latch for the
    /// lifetime of the returned node.
    pub fn begin_write(page: PageWriter<'a>, keys: KP, values: VP) -> Result<Self> {
        Self::open(page, keys, values)
    }

    /// Opens a create session on a fresh or recycled page. The page header
    /// is not read; the caller must invoke [`Node::create`] exactly once
    /// before any other operation.
    pub fn begin_create(page: PageWriter<'a>, keys: KP, values: VP) -> Result<Self> {
        let key_encoder = keys.encoder(ENCODERS_VERSION)?;
        let value_encoder = values.encoder(ENCODERS_VERSION)?;
        let positions = PagePositionCodec::for_version(ENCODERS_VERSION)?;
        let pointers = PageIndexCodec::for_version(ENCODERS_VERSION)?;
        let layout =
            RecordLayout::compute(&key_encoder, &value_encoder, &positions, &pointers, true);

        let mut fields = HeaderFields::default();
        fields.mark_loaded(FLAGS_FIELD | SIZE_FIELD);

        Ok(Self {
            page,
            keys,
            values,
            key_encoder,
            value_encoder,
            positions,
            pointers,
            layout,
            fields,
        })
    }

    /// Closes the write session, writing back the dirty header fields and
    /// returning the cursor.
    pub fn end_write(mut self) -> Result<PageWriter<'a>> {
        self.flush_fields()?;
        Ok(self.page)
    }
}

impl<P, KP, VP> Node<P, KP, VP>
where
    P: PageRead,
    KP: EncoderProvider,
    VP: EncoderProvider,
{
    fn open(page: P, keys: KP, values: VP) -> Result<Self> {
        let flags = page.get_u8_at(FLAGS_OFFSET)?;
        let size = page.get_i32_at(SIZE_OFFSET)?;
        ensure!(
            size >= 0,
            "negative record count {} on page {}",
            size,
            page.page_index()
        );
        ensure!(
            flags & EXTENSION_FLAG == 0,
            "extension flag set on page {}; no extensions exist in this version",
            page.page_index()
        );

        let version = (flags & ENCODERS_VERSION_MASK) >> ENCODERS_VERSION_SHIFT;
        let key_encoder = keys.encoder(version)?;
        let value_encoder = values.encoder(version)?;
        let positions = PagePositionCodec::for_version(version)?;
        let pointers = PageIndexCodec::for_version(version)?;

        let leaf = flags & LEAF_FLAG != 0;
        let layout =
            RecordLayout::compute(&key_encoder, &value_encoder, &positions, &pointers, leaf);

        let mut fields = HeaderFields::default();
        fields.flags = flags;
        fields.size = size;
        fields.mark_loaded(FLAGS_FIELD | SIZE_FIELD);

        Ok(Self {
            page,
            keys,
            values,
            key_encoder,
            value_encoder,
            positions,
            pointers,
            layout,
            fields,
        })
    }

    pub fn page_index(&self) -> u64 {
        self.page.page_index()
    }

    pub fn size(&self) -> usize {
        self.fields.size as usize
    }

    pub fn is_leaf(&self) -> bool {
        self.fields.flags & LEAF_FLAG != 0
    }

    pub fn is_continued_from(&self) -> bool {
        self.fields.flags & CONTINUED_FROM_FLAG != 0
    }

    pub fn is_continued_to(&self) -> bool {
        self.fields.flags & CONTINUED_TO_FLAG != 0
    }

    pub fn encoders_version(&self) -> u8 {
        (self.fields.flags & ENCODERS_VERSION_MASK) >> ENCODERS_VERSION_SHIFT
    }

    pub fn free_data_position(&mut self) -> Result<u32> {
        if !self.fields.is_loaded(FREE_DATA_POSITION_FIELD) {
            self.fields.free_data_position = self.page.get_u32_at(FREE_DATA_POSITION_OFFSET)?;
            self.fields.mark_loaded(FREE_DATA_POSITION_FIELD);
        }
        Ok(self.fields.free_data_position)
    }

    /// Whole-tree element count. Only meaningful on the tree's designated
    /// root page; the caller owns the semantics.
    pub fn tree_size(&mut self) -> Result<i64> {
        if !self.fields.is_loaded(TREE_SIZE_FIELD) {
            self.fields.tree_size = self.page.get_i64_at(TREE_SIZE_OFFSET)?;
            self.fields.mark_loaded(TREE_SIZE_FIELD);
        }
        Ok(self.fields.tree_size)
    }

    pub fn left_pointer(&self) -> Result<u64> {
        assert!(!self.is_leaf(), "left pointer access on a leaf node");
        self.page.get_u64_at(LEFT_POINTER_OFFSET)
    }

    pub fn left_sibling(&self) -> Result<u64> {
        self.page.get_u64_at(LEFT_SIBLING_OFFSET)
    }

    pub fn right_sibling(&self) -> Result<u64> {
        self.page.get_u64_at(RIGHT_SIBLING_OFFSET)
    }

    /// Bytes available between the slot directory and the data region.
    pub fn free_bytes(&mut self) -> Result<usize> {
        let free_data_position = self.free_data_position()? as usize;
        let used = RECORDS_OFFSET + self.size() * self.layout.record_size;
        ensure!(
            free_data_position >= used,
            "slot directory overlaps the data region on page {}",
            self.page.page_index()
        );
        Ok(free_data_position - used)
    }

    /// True if an entry of `size_delta` more bytes fits on the page. Callers
    /// must test before inserting; insertion does not re-check.
    pub fn delta_fits(&mut self, size_delta: usize) -> Result<bool> {
        Ok(size_delta <= self.free_bytes()?)
    }

    /// Full on-page footprint of an entry: key and value bytes plus the
    /// fixed-width offsets and, on internal nodes, the pointer-and-marker
    /// block.
    pub fn full_entry_size(&self, key_size: usize, value_size: usize) -> usize {
        let mut size = key_size + value_size;
        if !self.layout.keys_inlined {
            size += self.positions.maximum_size();
        }
        if self.is_leaf() {
            if !self.layout.values_inlined {
                size += self.positions.maximum_size();
            }
        } else {
            size += self.layout.marker_size;
        }
        size
    }

    pub fn check_entry_size(&self, entry_size: usize) -> Result<()> {
        ensure!(
            entry_size <= MAX_ENTRY_SIZE,
            "entry size {} exceeds the maximum of {}",
            entry_size,
            MAX_ENTRY_SIZE
        );
        Ok(())
    }

    /// Binary search over the slot directory. A match yields the slot index;
    /// a miss yields `-(insertion_point + 1)`.
    pub fn index_of(&mut self, key: &KeyOf<KP>) -> Result<i32>
    where
        KeyOf<KP>: Ord,
    {
        Ok(self.binary_search(key)?.to_signed())
    }

    fn binary_search(&mut self, key: &KeyOf<KP>) -> Result<SearchOutcome>
    where
        KeyOf<KP>: Ord,
    {
        let mut low = 0usize;
        let mut high = self.size();

        while low < high {
            let mid = low + (high - low) / 2;
            let mid_key = self.get_key(mid)?;

            match key.cmp(&mid_key) {
                std::cmp::Ordering::Greater => low = mid + 1,
                std::cmp::Ordering::Less => high = mid,
                std::cmp::Ordering::Equal => return Ok(SearchOutcome::Found(mid)),
            }
        }

        Ok(SearchOutcome::Miss(low))
    }

    pub fn key_at(&mut self, index: usize) -> Result<KeyOf<KP>> {
        assert!(
            index < self.size(),
            "record index {} out of bounds (size={})",
            index,
            self.size()
        );
        self.get_key(index)
    }

    pub fn value_at(&mut self, index: usize) -> Result<ValueOf<VP>> {
        assert!(self.is_leaf(), "value access on an internal node");
        assert!(
            index < self.size(),
            "record index {} out of bounds (size={})",
            index,
            self.size()
        );
        self.navigate_to_value(index)?;
        self.value_encoder.decode(&mut self.page)
    }

    /// Child pointer guarding a search result: on a miss at position 0 the
    /// left pointer, otherwise the pointer of the slot at or preceding the
    /// search key.
    pub fn pointer_at(&mut self, search_index: i32) -> Result<u64> {
        if is_insertion_point(search_index) {
            let index = to_index(search_index);
            if index == 0 {
                self.left_pointer()
            } else {
                self.child_pointer((index - 1) as usize)
            }
        } else {
            self.child_pointer(search_index as usize)
        }
    }

    fn child_pointer(&mut self, index: usize) -> Result<u64> {
        assert!(!self.is_leaf(), "child pointer access on a leaf node");
        assert!(
            index < self.size(),
            "record index {} out of bounds (size={})",
            index,
            self.size()
        );
        let position = self.record_value_position(index);
        self.page.set_position(position);
        self.pointers.decode(&mut self.page)
    }

    pub fn key_size_at(&mut self, index: usize) -> Result<usize> {
        if self.layout.keys_inlined {
            Ok(self.key_encoder.maximum_size())
        } else {
            self.navigate_to_key(index)?;
            self.key_encoder.exact_size_in_stream(&mut self.page)
        }
    }

    pub fn value_size_at(&mut self, index: usize) -> Result<usize> {
        assert!(self.is_leaf(), "value access on an internal node");
        if self.layout.values_inlined {
            Ok(self.value_encoder.maximum_size())
        } else {
            self.navigate_to_value(index)?;
            self.value_encoder.exact_size_in_stream(&mut self.page)
        }
    }

    pub fn left_most_marker_index(&self) -> i32 {
        -1
    }

    /// Index of the rightmost non-empty marker, or -1 if every slot marker
    /// is empty.
    pub fn right_most_marker_index(&mut self) -> Result<i32> {
        for i in (0..self.size()).rev() {
            self.navigate_to_marker(i as i32)?;
            let block_index = self.pointers.decode(&mut self.page)?;
            if block_index != 0 {
                return Ok(i as i32);
            }
        }
        Ok(self.left_most_marker_index())
    }

    pub fn marker_at(&mut self, index: i32) -> Result<Marker> {
        self.navigate_to_marker(index)?;
        let block_index = self.pointers.decode(&mut self.page)?;
        let pages_used = self.positions.decode(&mut self.page)?;
        Ok(Marker {
            index,
            block_index,
            pages_used,
        })
    }

    pub fn marker_block_index_at(&mut self, index: i32) -> Result<u64> {
        self.navigate_to_marker(index)?;
        self.pointers.decode(&mut self.page)
    }

    /// Nearest non-empty marker at or below the search result. The leftmost
    /// marker is never empty in a well-formed tree; finding it empty is
    /// corruption.
    pub fn nearest_marker(&mut self, search_index: i32) -> Result<Marker> {
        let mut index = to_minus_one_based_index(search_index);
        loop {
            self.navigate_to_marker(index)?;
            let block_index = self.pointers.decode(&mut self.page)?;
            if block_index != 0 {
                let pages_used = self.positions.decode(&mut self.page)?;
                return Ok(Marker {
                    index,
                    block_index,
                    pages_used,
                });
            }
            ensure!(
                index > -1,
                "leftmost marker is empty on page {}",
                self.page.page_index()
            );
            index -= 1;
        }
    }

    /// Number of tail records whose removal brings the free space up to
    /// [`HALF_SIZE`]. Never exceeds the record count.
    pub fn count_entries_to_move_until_half_free(&mut self) -> Result<usize> {
        let size = self.size();
        let leaf = self.is_leaf();

        let mut entries_to_move = 0;
        let mut bytes_free = self.free_bytes()?;
        for i in (0..size).rev() {
            if bytes_free >= HALF_SIZE {
                break;
            }

            self.navigate_to_key(i)?;
            let key_size = self.key_encoder.exact_size_in_stream(&mut self.page)?;

            let value_size = if leaf {
                self.navigate_to_value(i)?;
                self.value_encoder.exact_size_in_stream(&mut self.page)?
            } else {
                self.pointers.maximum_size()
            };

            bytes_free += self.full_entry_size(key_size, value_size);
            entries_to_move += 1;
        }

        Ok(entries_to_move)
    }

    /// One-line human-readable rendering. Diagnostic only; nothing may
    /// depend on its format.
    pub fn dump(&mut self) -> Result<String>
    where
        KeyOf<KP>: fmt::Debug,
        ValueOf<VP>: fmt::Debug,
    {
        let mut out = String::new();
        out.push_str(if self.is_leaf() { "leaf " } else { "internal " });
        out.push_str(&format!("{}: ", self.page.page_index()));

        if self.is_continued_from() {
            out.push_str("... ");
        }
        let left_sibling = self.left_sibling()?;
        if left_sibling != 0 {
            out.push_str(&format!("<-{} ", left_sibling));
        }

        let size = self.size() as i32;
        for i in -1..size {
            if self.is_leaf() {
                if i > -1 {
                    let key = self.key_at(i as usize)?;
                    let value = self.value_at(i as usize)?;
                    out.push_str(&format!("{:?} {:?}, ", key, value));
                }
            } else {
                let marker = self.marker_at(i)?;
                if !marker.is_empty() {
                    out.push_str(&format!(
                        "M({}, {}), ",
                        marker.block_index, marker.pages_used
                    ));
                }

                let pointer = self.pointer_at(i)?;
                if i == -1 {
                    out.push_str(&format!("P({}), ", pointer));
                } else {
                    let key = self.key_at(i as usize)?;
                    out.push_str(&format!("{:?} P({}), ", key, pointer));
                }
            }
        }

        let right_sibling = self.right_sibling()?;
        if right_sibling != 0 {
            out.push_str(&format!("{}-> ", right_sibling));
        }
        if self.is_continued_to() {
            out.push_str("...");
        }

        Ok(out)
    }

    fn get_key(&mut self, index: usize) -> Result<KeyOf<KP>> {
        self.navigate_to_key(index)?;
        self.key_encoder.decode(&mut self.page)
    }

    fn navigate_to_key(&mut self, index: usize) -> Result<()> {
        let position = self.record_key_position(index);
        self.page.set_position(position);

        if !self.layout.keys_inlined {
            let data_position = self.positions.decode(&mut self.page)?;
            self.page.set_position(data_position as usize);
        }
        Ok(())
    }

    fn navigate_to_value(&mut self, index: usize) -> Result<()> {
        let position = self.record_value_position(index);
        self.page.set_position(position);

        if !self.layout.values_inlined {
            let data_position = self.positions.decode(&mut self.page)?;
            self.page.set_position(data_position as usize);
        }
        Ok(())
    }

    fn navigate_to_marker(&mut self, index: i32) -> Result<()> {
        assert!(!self.is_leaf(), "marker access on a leaf node");
        assert!(
            index >= -1 && index < self.fields.size,
            "marker index {} out of bounds (size={})",
            index,
            self.fields.size
        );
        let position = if index == -1 {
            LEFT_MARKER_BLOCK_OFFSET
        } else {
            self.record_marker_position(index as usize)
        };
        self.page.set_position(position);
        Ok(())
    }

    fn record_key_position(&self, index: usize) -> usize {
        RECORDS_OFFSET + index * self.layout.record_size
    }

    fn record_value_position(&self, index: usize) -> usize {
        self.record_key_position(index)
            + if self.layout.keys_inlined {
                self.key_encoder.maximum_size()
            } else {
                self.positions.maximum_size()
            }
    }

    fn record_marker_position(&self, index: usize) -> usize {
        self.record_value_position(index) + self.pointers.maximum_size()
    }

    fn read_key_with_size(&mut self, index: usize) -> Result<(KeyOf<KP>, usize)> {
        self.navigate_to_key(index)?;
        let start = self.page.position();
        let key = self.key_encoder.decode(&mut self.page)?;
        Ok((key, self.page.position() - start))
    }

    fn read_value_with_size(&mut self, index: usize) -> Result<(ValueOf<VP>, usize)> {
        self.navigate_to_value(index)?;
        let start = self.page.position();
        let value = self.value_encoder.decode(&mut self.page)?;
        Ok((value, self.page.position() - start))
    }
}

impl<P, KP, VP> Node<P, KP, VP>
where
    P: PageWrite,
    KP: EncoderProvider,
    VP: EncoderProvider,
{
    /// Initializes a freshly allocated (or recycled) page as an empty node.
    /// Must be the first operation of a create session.
    pub fn create(&mut self, leaf: bool) -> Result<()> {
        self.page.put_u8_at(0, PageKind::Node as u8)?;

        self.set_free_data_position(PAGE_SIZE as u32);
        self.set_leaf(leaf);
        self.set_continued_from(false);
        self.set_continued_to(false);
        self.set_encoders_version(ENCODERS_VERSION);
        self.set_flag(EXTENSION_FLAG, false);
        self.set_size(0);
        self.set_tree_size(0);

        self.page.put_u64_at(LEFT_SIBLING_OFFSET, 0)?;
        self.page.put_u64_at(RIGHT_SIBLING_OFFSET, 0)?;
        self.page.put_u64_at(LEFT_POINTER_OFFSET, 0)?;
        self.page.put_u64_at(LEFT_MARKER_BLOCK_OFFSET, 0)?;
        self.page.put_u32_at(LEFT_MARKER_USAGE_OFFSET, 0)?;

        self.reinitialize_layout();
        debug!(page_no = self.page.page_index(), leaf, "node.create");
        Ok(())
    }

    /// Minimal initialization for a page about to be overwritten by
    /// [`Node::clone_from`]: only the free-data-position is made sane so
    /// free-space accounting works while a split stages the copy.
    pub fn stage_clone_target(&mut self) {
        self.set_free_data_position(PAGE_SIZE as u32);
    }

    /// Resets the node to an empty internal node, preserving nothing of its
    /// contents.
    pub fn convert_to_non_leaf(&mut self) -> Result<()> {
        self.set_free_data_position(PAGE_SIZE as u32);
        self.set_leaf(false);
        self.set_continued_from(false);
        self.set_continued_to(false);
        self.set_encoders_version(ENCODERS_VERSION);
        self.set_flag(EXTENSION_FLAG, false);
        self.set_size(0);

        self.page.put_u64_at(LEFT_POINTER_OFFSET, 0)?;
        self.page.put_u64_at(LEFT_MARKER_BLOCK_OFFSET, 0)?;
        self.page.put_u32_at(LEFT_MARKER_USAGE_OFFSET, 0)?;

        self.reinitialize_layout();
        debug!(page_no = self.page.page_index(), "node.convert_to_non_leaf");
        Ok(())
    }

    pub fn set_free_data_position(&mut self, value: u32) {
        self.fields.mark_changed(FREE_DATA_POSITION_FIELD);
        self.fields.free_data_position = value;
    }

    pub fn set_size(&mut self, value: i32) {
        self.fields.mark_changed(SIZE_FIELD);
        self.fields.size = value;
    }

    pub fn set_tree_size(&mut self, value: i64) {
        self.fields.mark_changed(TREE_SIZE_FIELD);
        self.fields.tree_size = value;
    }

    pub fn set_continued_from(&mut self, value: bool) {
        self.set_flag(CONTINUED_FROM_FLAG, value);
    }

    pub fn set_continued_to(&mut self, value: bool) {
        self.set_flag(CONTINUED_TO_FLAG, value);
    }

    pub fn set_left_pointer(&mut self, pointer: u64) -> Result<()> {
        assert!(!self.is_leaf(), "left pointer access on a leaf node");
        self.page.put_u64_at(LEFT_POINTER_OFFSET, pointer)
    }

    pub fn set_left_sibling(&mut self, pointer: u64) -> Result<()> {
        self.page.put_u64_at(LEFT_SIBLING_OFFSET, pointer)
    }

    pub fn set_right_sibling(&mut self, pointer: u64) -> Result<()> {
        self.page.put_u64_at(RIGHT_SIBLING_OFFSET, pointer)
    }

    /// Inserts a key/value record at a leaf insertion point (the negative
    /// encoding produced by a missed search).
    pub fn insert_value(
        &mut self,
        insertion_point: i32,
        key: &KeyOf<KP>,
        key_size: usize,
        value: &ValueOf<VP>,
        value_size: usize,
    ) -> Result<()> {
        assert!(self.is_leaf(), "leaf insert on an internal node");
        assert!(
            is_insertion_point(insertion_point),
            "leaf insert requires an insertion point, got index {}",
            insertion_point
        );
        let index = to_index(insertion_point) as usize;
        assert!(
            index <= self.size(),
            "insertion index {} out of bounds (size={})",
            index,
            self.size()
        );
        self.add_key_value(index, key, key_size, value, value_size)
    }

    /// Inserts a separator record `(key, child_pointer, marker)` at a plain
    /// index of an internal node.
    pub fn insert_pointer(
        &mut self,
        index: usize,
        key: &KeyOf<KP>,
        key_size: usize,
        pointer: u64,
        marker_block_index: u64,
        marker_pages_used: u32,
    ) -> Result<()> {
        assert!(!self.is_leaf(), "pointer insert on a leaf node");
        assert!(
            index <= self.size(),
            "insertion index {} out of bounds (size={})",
            index,
            self.size()
        );
        self.add_key_pointer(
            index,
            key,
            key_size,
            pointer,
            marker_block_index,
            marker_pages_used,
        )
    }

    /// Overwrites the value of leaf record `index`. Out-of-line values that
    /// change size are reallocated in the data region; same-size updates
    /// rewrite in place and leave the free data position untouched.
    pub fn update_value(
        &mut self,
        index: usize,
        value: &ValueOf<VP>,
        value_size: usize,
        current_value_size: usize,
    ) -> Result<()> {
        assert!(self.is_leaf(), "value update on an internal node");
        assert!(
            index < self.size(),
            "record index {} out of bounds (size={})",
            index,
            self.size()
        );

        self.navigate_to_value(index)?;

        if !self.layout.values_inlined && value_size != current_value_size {
            let value_position = self.page.position() as u32;
            let free_position = self.free_data_position()?;
            let compacted = self.delete_data(free_position, value_position, current_value_size)?;
            let data_position = allocate_data(compacted, value_size);

            let slot_position = self.record_value_position(index);
            self.page.set_position(slot_position);
            self.positions.encode(&data_position, &mut self.page)?;

            self.set_free_data_position(data_position);
            self.page.set_position(data_position as usize);
        }

        self.value_encoder.encode(value, &mut self.page)
    }

    /// Overwrites a child pointer; index -1 names the left pointer.
    pub fn update_pointer(&mut self, index: i32, pointer: u64) -> Result<()> {
        if index == -1 {
            self.set_left_pointer(pointer)
        } else {
            assert!(!self.is_leaf(), "child pointer access on a leaf node");
            assert!(
                (index as usize) < self.size(),
                "record index {} out of bounds (size={})",
                index,
                self.size()
            );
            let position = self.record_value_position(index as usize);
            self.page.set_position(position);
            self.pointers.encode(&pointer, &mut self.page)
        }
    }

    pub fn update_marker(
        &mut self,
        index: i32,
        block_index: u64,
        pages_used: u32,
    ) -> Result<()> {
        self.navigate_to_marker(index)?;
        self.pointers.encode(&block_index, &mut self.page)?;
        self.positions.encode(&pages_used, &mut self.page)
    }

    /// Updates only the pages-used counter of a marker.
    pub fn update_marker_usage(&mut self, index: i32, pages_used: u32) -> Result<()> {
        self.navigate_to_marker(index)?;
        let skip = self.pointers.maximum_size();
        self.page.seek(skip);
        self.positions.encode(&pages_used, &mut self.page)
    }

    /// Removes record `index`, releasing any out-of-line bytes it owned.
    /// `key_size` and `value_size` are the exact encoded sizes of the
    /// record's key and value.
    pub fn delete(&mut self, index: usize, key_size: usize, value_size: usize) -> Result<()> {
        assert!(
            index < self.size(),
            "record index {} out of bounds (size={})",
            index,
            self.size()
        );

        if !self.layout.keys_inlined {
            let slot_position = self.record_key_position(index);
            self.page.set_position(slot_position);
            let key_data_position = self.positions.decode(&mut self.page)?;
            let free_position = self.free_data_position()?;
            let reclaimed = self.delete_data(free_position, key_data_position, key_size)?;
            self.set_free_data_position(reclaimed);
        }

        if self.is_leaf() && !self.layout.values_inlined {
            let slot_position = self.record_value_position(index);
            self.page.set_position(slot_position);
            let value_data_position = self.positions.decode(&mut self.page)?;
            let free_position = self.free_data_position()?;
            let reclaimed = self.delete_data(free_position, value_data_position, value_size)?;
            self.set_free_data_position(reclaimed);
        }

        self.delete_record(index)?;
        let new_size = self.fields.size - 1;
        self.set_size(new_size);
        Ok(())
    }

    /// Moves the last `length` records to positions `[0, length)` of the
    /// empty node `destination`, then compacts this node down to its first
    /// `size - length` records. Re-encoding both halves from scratch
    /// eliminates any data-region fragmentation.
    pub fn move_tail_to<Q: PageWrite>(
        &mut self,
        destination: &mut Node<Q, KP, VP>,
        length: usize,
    ) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        assert!(
            length <= self.size(),
            "tail length {} out of bounds (size={})",
            length,
            self.size()
        );

        if self.is_leaf() {
            self.leaf_move_tail_to(destination, length)
        } else {
            self.non_leaf_move_tail_to(destination, length)
        }
    }

    fn leaf_move_tail_to<Q: PageWrite>(
        &mut self,
        destination: &mut Node<Q, KP, VP>,
        length: usize,
    ) -> Result<()> {
        let size = self.size();
        let remaining = size - length;

        for i in 0..length {
            let index = remaining + i;
            let (key, key_size) = self.read_key_with_size(index)?;
            let (value, value_size) = self.read_value_with_size(index)?;
            destination.add_key_value(i, &key, key_size, &value, value_size)?;
        }

        let mut retained: SmallVec<[(KeyOf<KP>, usize, ValueOf<VP>, usize); 16]> =
            SmallVec::new();
        for i in 0..remaining {
            let (key, key_size) = self.read_key_with_size(i)?;
            let (value, value_size) = self.read_value_with_size(i)?;
            retained.push((key, key_size, value, value_size));
        }

        self.clear();
        for (i, (key, key_size, value, value_size)) in retained.iter().enumerate() {
            self.add_key_value(i, key, *key_size, value, *value_size)?;
        }
        Ok(())
    }

    fn non_leaf_move_tail_to<Q: PageWrite>(
        &mut self,
        destination: &mut Node<Q, KP, VP>,
        length: usize,
    ) -> Result<()> {
        let size = self.size();
        let remaining = size - length;

        for i in 0..length {
            let index = remaining + i;
            let (key, key_size) = self.read_key_with_size(index)?;

            let position = self.record_value_position(index);
            self.page.set_position(position);
            let pointer = self.pointers.decode(&mut self.page)?;
            let block_index = self.pointers.decode(&mut self.page)?;
            let pages_used = self.positions.decode(&mut self.page)?;

            destination.add_key_pointer(i, &key, key_size, pointer, block_index, pages_used)?;
        }

        let mut retained: SmallVec<[(KeyOf<KP>, usize, u64, u64, u32); 16]> = SmallVec::new();
        for i in 0..remaining {
            let (key, key_size) = self.read_key_with_size(i)?;

            let position = self.record_value_position(i);
            self.page.set_position(position);
            let pointer = self.pointers.decode(&mut self.page)?;
            let block_index = self.pointers.decode(&mut self.page)?;
            let pages_used = self.positions.decode(&mut self.page)?;

            retained.push((key, key_size, pointer, block_index, pages_used));
        }

        self.clear();
        for (i, (key, key_size, pointer, block_index, pages_used)) in
            retained.iter().enumerate()
        {
            self.add_key_pointer(i, key, *key_size, *pointer, *block_index, *pages_used)?;
        }
        Ok(())
    }

    /// Makes this node a byte-identical copy of `source`. The source page
    /// must be clean (its session's header fields flushed); the clone's
    /// cached state is refreshed from the copied image.
    pub fn clone_from<Q: PageRead>(&mut self, source: &mut Node<Q, KP, VP>) -> Result<()> {
        self.page.set_position(0);
        source.page.set_position(0);

        for _ in 0..PAGE_SIZE / CLONE_BUFFER_SIZE {
            let chunk = source.page.read_bytes(CLONE_BUFFER_SIZE)?;
            self.page.write_bytes(chunk)?;
        }

        self.fields = HeaderFields::default();
        self.fields.flags = self.page.get_u8_at(FLAGS_OFFSET)?;
        self.fields.size = self.page.get_i32_at(SIZE_OFFSET)?;
        self.fields.mark_loaded(FLAGS_FIELD | SIZE_FIELD);
        self.reinitialize()
    }

    fn add_key_value(
        &mut self,
        index: usize,
        key: &KeyOf<KP>,
        key_size: usize,
        value: &ValueOf<VP>,
        value_size: usize,
    ) -> Result<()> {
        self.allocate_record(index)?;
        self.emit_key(key, key_size)?;

        let position = self.record_value_position(index);
        self.page.set_position(position);
        if self.layout.values_inlined {
            self.value_encoder.encode(value, &mut self.page)?;
        } else {
            let data_position = allocate_data(self.free_data_position()?, value_size);
            self.positions.encode(&data_position, &mut self.page)?;

            self.page.set_position(data_position as usize);
            self.value_encoder.encode(value, &mut self.page)?;

            self.set_free_data_position(data_position);
        }

        let new_size = self.fields.size + 1;
        self.set_size(new_size);
        Ok(())
    }

    fn add_key_pointer(
        &mut self,
        index: usize,
        key: &KeyOf<KP>,
        key_size: usize,
        pointer: u64,
        block_index: u64,
        pages_used: u32,
    ) -> Result<()> {
        self.allocate_record(index)?;
        self.emit_key(key, key_size)?;

        let position = self.record_value_position(index);
        self.page.set_position(position);
        self.pointers.encode(&pointer, &mut self.page)?;
        self.pointers.encode(&block_index, &mut self.page)?;
        self.positions.encode(&pages_used, &mut self.page)?;

        let new_size = self.fields.size + 1;
        self.set_size(new_size);
        Ok(())
    }

    fn emit_key(&mut self, key: &KeyOf<KP>, key_size: usize) -> Result<()> {
        if self.layout.keys_inlined {
            self.key_encoder.encode(key, &mut self.page)
        } else {
            let data_position = allocate_data(self.free_data_position()?, key_size);
            self.positions.encode(&data_position, &mut self.page)?;

            self.page.set_position(data_position as usize);
            self.key_encoder.encode(key, &mut self.page)?;

            self.set_free_data_position(data_position);
            Ok(())
        }
    }

    /// Shifts slots `[index, size)` one slot width rightward and leaves the
    /// cursor at the new slot. Does not change the record count.
    fn allocate_record(&mut self, index: usize) -> Result<()> {
        let record_position = self.record_key_position(index);

        if index < self.size() {
            let record_size = self.layout.record_size;
            let moved = (self.size() - index) * record_size;
            self.page
                .move_data(record_position, record_position + record_size, moved)?;
        }

        self.page.set_position(record_position);
        Ok(())
    }

    /// Shifts slots `[index + 1, size)` one slot width leftward. Does not
    /// change the record count.
    fn delete_record(&mut self, index: usize) -> Result<()> {
        let record_position = self.record_key_position(index);

        if index < self.size() - 1 {
            let record_size = self.layout.record_size;
            let moved = (self.size() - index - 1) * record_size;
            self.page
                .move_data(record_position + record_size, record_position, moved)?;
        }
        Ok(())
    }

    /// Releases `length` bytes of out-of-line data at `position`: compacts
    /// the data region upward and patches every slot offset below the freed
    /// range. Returns the new free data position.
    fn delete_data(&mut self, free_position: u32, position: u32, length: usize) -> Result<u32> {
        if position > free_position {
            self.page.move_data(
                free_position as usize,
                free_position as usize + length,
                (position - free_position) as usize,
            )?;

            let layout = self.layout;
            let key_skip = self.key_encoder.maximum_size();
            let value_skip = if self.is_leaf() && layout.values_inlined {
                self.value_encoder.maximum_size()
            } else {
                self.pointers.maximum_size() + layout.marker_size
            };
            let leaf = self.is_leaf();
            let size = self.size();

            self.page.set_position(RECORDS_OFFSET);
            for _ in 0..size {
                if layout.keys_inlined {
                    self.page.seek(key_skip);
                } else {
                    let slot_position = self.page.position();
                    let key_data_position = self.positions.decode(&mut self.page)?;
                    if key_data_position < position {
                        self.page.set_position(slot_position);
                        self.positions
                            .encode(&(key_data_position + length as u32), &mut self.page)?;
                    }
                }

                if !leaf || layout.values_inlined {
                    self.page.seek(value_skip);
                } else {
                    let slot_position = self.page.position();
                    let value_data_position = self.positions.decode(&mut self.page)?;
                    if value_data_position < position {
                        self.page.set_position(slot_position);
                        self.positions
                            .encode(&(value_data_position + length as u32), &mut self.page)?;
                    }
                }
            }
        }

        Ok(free_position + length as u32)
    }

    fn clear(&mut self) {
        self.set_size(0);
        self.set_free_data_position(PAGE_SIZE as u32);
    }

    fn set_flags(&mut self, value: u8) {
        self.fields.mark_changed(FLAGS_FIELD);
        self.fields.flags = value;
    }

    fn set_flag(&mut self, mask: u8, value: bool) {
        let flags = if value {
            self.fields.flags | mask
        } else {
            self.fields.flags & !mask
        };
        self.set_flags(flags);
    }

    fn set_leaf(&mut self, value: bool) {
        self.set_flag(LEAF_FLAG, value);
    }

    fn set_encoders_version(&mut self, version: u8) {
        let flags = (version << ENCODERS_VERSION_SHIFT & ENCODERS_VERSION_MASK)
            | (self.fields.flags & !ENCODERS_VERSION_MASK);
        self.set_flags(flags);
    }

    fn reinitialize_layout(&mut self) {
        self.layout = RecordLayout::compute(
            &self.key_encoder,
            &self.value_encoder,
            &self.positions,
            &self.pointers,
            self.is_leaf(),
        );
    }

    fn reinitialize(&mut self) -> Result<()> {
        let version = self.encoders_version();
        self.key_encoder = self.keys.encoder(version)?;
        self.value_encoder = self.values.encoder(version)?;
        self.positions = PagePositionCodec::for_version(version)?;
        self.pointers = PageIndexCodec::for_version(version)?;
        self.reinitialize_layout();
        Ok(())
    }

    fn flush_fields(&mut self) -> Result<()> {
        if self.fields.dirty != 0 {
            if self.fields.is_dirty(FREE_DATA_POSITION_FIELD) {
                self.page
                    .put_u32_at(FREE_DATA_POSITION_OFFSET, self.fields.free_data_position)?;
            }
            if self.fields.is_dirty(FLAGS_FIELD) {
                self.page.put_u8_at(FLAGS_OFFSET, self.fields.flags)?;
            }
            if self.fields.is_dirty(SIZE_FIELD) {
                self.page.put_i32_at(SIZE_OFFSET, self.fields.size)?;
            }
            if self.fields.is_dirty(TREE_SIZE_FIELD) {
                self.page.put_i64_at(TREE_SIZE_OFFSET, self.fields.tree_size)?;
            }
        }

        self.fields.loaded = 0;
        self.fields.dirty = 0;
        Ok(())
    }
}

fn allocate_data(free_position: u32, length: usize) -> u32 {
    free_position - length as u32
}

#[cfg(test)]
mod tests {
    use super::super::search::to_insertion_point;
    use super::*;
    use crate::encoding::{BytesCodec, U32Codec, U64Codec};

    fn make_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    type U32Node<'a> = Node<PageWriter<'a>, U32Codec, U64Codec>;
    type BytesLeaf<'a> = Node<PageWriter<'a>, BytesCodec, BytesCodec>;

    fn create_u32_leaf(page: &mut [u8]) -> U32Node<'_> {
        let writer = PageWriter::new(page, 1);
        let mut node = Node::begin_create(writer, U32Codec, U64Codec).unwrap();
        node.create(true).unwrap();
        node
    }

    fn create_u32_internal(page: &mut [u8]) -> U32Node<'_> {
        let writer = PageWriter::new(page, 1);
        let mut node = Node::begin_create(writer, U32Codec, U64Codec).unwrap();
        node.create(false).unwrap();
        node
    }

    fn insert_u32(node: &mut U32Node<'_>, key: u32, value: u64) {
        let search_index = node.index_of(&key).unwrap();
        assert!(is_insertion_point(search_index), "key {} already present", key);

        let entry_size = node.full_entry_size(4, 8);
        node.check_entry_size(entry_size).unwrap();
        assert!(node.delta_fits(entry_size).unwrap());

        node.insert_value(search_index, &key, 4, &value, 8).unwrap();
    }

    fn insert_bytes(node: &mut BytesLeaf<'_>, key: &[u8], value: &[u8]) {
        let key = key.to_vec();
        let value = value.to_vec();
        let search_index = node.index_of(&key).unwrap();
        assert!(is_insertion_point(search_index));

        let key_size = BytesCodec::encoded_size(&key);
        let value_size = BytesCodec::encoded_size(&value);
        let entry_size = node.full_entry_size(key_size, value_size);
        assert!(node.delta_fits(entry_size).unwrap());

        node.insert_value(search_index, &key, key_size, &value, value_size)
            .unwrap();
    }

    #[test]
    fn create_leaf_initializes_header() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);

        assert_eq!(node.size(), 0);
        assert!(node.is_leaf());
        assert!(!node.is_continued_from());
        assert!(!node.is_continued_to());
        assert_eq!(node.encoders_version(), ENCODERS_VERSION);
        assert_eq!(node.free_data_position().unwrap(), PAGE_SIZE as u32);
        assert_eq!(node.free_bytes().unwrap(), PAGE_SIZE - RECORDS_OFFSET);
        assert_eq!(node.tree_size().unwrap(), 0);
        assert_eq!(node.left_sibling().unwrap(), 0);
        assert_eq!(node.right_sibling().unwrap(), 0);
    }

    #[test]
    fn leaf_insert_and_lookup_roundtrip() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);

        insert_u32(&mut node, 1, 10);
        insert_u32(&mut node, 3, 30);
        insert_u32(&mut node, 2, 20);

        assert_eq!(node.size(), 3);
        assert_eq!(node.index_of(&2).unwrap(), 1);
        assert_eq!(node.value_at(1).unwrap(), 20);
        for (index, key) in [1u32, 2, 3].iter().enumerate() {
            assert_eq!(node.key_at(index).unwrap(), *key);
        }
    }

    #[test]
    fn missed_search_encodes_insertion_point() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);

        insert_u32(&mut node, 10, 1);
        insert_u32(&mut node, 20, 2);

        assert_eq!(node.index_of(&5).unwrap(), to_insertion_point(0));
        assert_eq!(node.index_of(&15).unwrap(), to_insertion_point(1));
        assert_eq!(node.index_of(&25).unwrap(), to_insertion_point(2));
    }

    #[test]
    fn leaf_delete_middle_reclaims_slot() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);

        insert_u32(&mut node, 1, 10);
        insert_u32(&mut node, 2, 20);
        insert_u32(&mut node, 3, 30);

        let free_before = node.free_bytes().unwrap();
        node.delete(1, 4, 8).unwrap();

        assert_eq!(node.size(), 2);
        assert_eq!(node.key_at(0).unwrap(), 1);
        assert_eq!(node.key_at(1).unwrap(), 3);
        assert_eq!(node.value_at(1).unwrap(), 30);
        assert_eq!(node.free_bytes().unwrap(), free_before + 12);
    }

    #[test]
    fn delete_last_remaining_record_empties_node() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);

        insert_u32(&mut node, 7, 70);
        node.delete(0, 4, 8).unwrap();

        assert_eq!(node.size(), 0);
        assert_eq!(node.free_data_position().unwrap(), PAGE_SIZE as u32);
        assert_eq!(node.free_bytes().unwrap(), PAGE_SIZE - RECORDS_OFFSET);
    }

    #[test]
    fn internal_insert_with_marker() {
        let mut page = make_page();
        let mut node = create_u32_internal(&mut page);

        node.set_left_pointer(100).unwrap();
        node.insert_pointer(0, &5, 4, 200, 7, 3).unwrap();

        assert_eq!(node.size(), 1);
        let below = node.index_of(&3).unwrap();
        assert_eq!(node.pointer_at(below).unwrap(), 100);
        let at = node.index_of(&5).unwrap();
        assert_eq!(node.pointer_at(at).unwrap(), 200);
        let above = node.index_of(&9).unwrap();
        assert_eq!(node.pointer_at(above).unwrap(), 200);

        let marker = node.marker_at(0).unwrap();
        assert_eq!(marker, Marker { index: 0, block_index: 7, pages_used: 3 });
        assert_eq!(node.marker_block_index_at(0).unwrap(), 7);

        let idx = node.index_of(&4).unwrap();
        let near = node.nearest_marker(idx).unwrap();
        assert_eq!(near.block_index, 7);
        assert_eq!(near.index, 0);
    }

    #[test]
    fn nearest_marker_skips_empty_markers() {
        let mut page = make_page();
        let mut node = create_u32_internal(&mut page);

        node.update_marker(-1, 42, 1).unwrap();
        node.insert_pointer(0, &10, 4, 200, 0, 0).unwrap();
        node.insert_pointer(1, &20, 4, 300, 0, 0).unwrap();

        let search_index = node.index_of(&25).unwrap();
        let marker = node.nearest_marker(search_index).unwrap();
        assert_eq!(marker.index, -1);
        assert_eq!(marker.block_index, 42);
        assert_eq!(marker.pages_used, 1);
    }

    #[test]
    fn nearest_marker_with_empty_leftmost_is_corruption() {
        let mut page = make_page();
        let mut node = create_u32_internal(&mut page);

        node.insert_pointer(0, &10, 4, 200, 0, 0).unwrap();

        let idx = node.index_of(&5).unwrap();
        let result = node.nearest_marker(idx);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("leftmost marker is empty"));
    }

    #[test]
    fn right_most_marker_scan() {
        let mut page = make_page();
        let mut node = create_u32_internal(&mut page);

        node.insert_pointer(0, &10, 4, 200, 0, 0).unwrap();
        node.insert_pointer(1, &20, 4, 300, 0, 0).unwrap();
        assert_eq!(node.right_most_marker_index().unwrap(), -1);
        assert_eq!(node.left_most_marker_index(), -1);

        node.update_marker(0, 9, 2).unwrap();
        assert_eq!(node.right_most_marker_index().unwrap(), 0);

        node.update_marker(1, 11, 4).unwrap();
        assert_eq!(node.right_most_marker_index().unwrap(), 1);
    }

    #[test]
    fn update_marker_usage_preserves_block_index() {
        let mut page = make_page();
        let mut node = create_u32_internal(&mut page);

        node.insert_pointer(0, &10, 4, 200, 8, 1).unwrap();
        node.update_marker_usage(0, 6).unwrap();

        let marker = node.marker_at(0).unwrap();
        assert_eq!(marker.block_index, 8);
        assert_eq!(marker.pages_used, 6);

        node.update_marker(-1, 3, 1).unwrap();
        node.update_marker_usage(-1, 9).unwrap();
        let leftmost = node.marker_at(-1).unwrap();
        assert_eq!(leftmost.block_index, 3);
        assert_eq!(leftmost.pages_used, 9);
    }

    #[test]
    fn update_pointer_including_left() {
        let mut page = make_page();
        let mut node = create_u32_internal(&mut page);

        node.set_left_pointer(100).unwrap();
        node.insert_pointer(0, &5, 4, 200, 0, 0).unwrap();

        node.update_pointer(-1, 111).unwrap();
        node.update_pointer(0, 222).unwrap();

        assert_eq!(node.left_pointer().unwrap(), 111);
        assert_eq!(node.pointer_at(0).unwrap(), 222);
        let marker = node.marker_at(0).unwrap();
        assert!(marker.is_empty());
    }

    #[test]
    fn out_of_line_records_roundtrip() {
        let mut page = make_page();
        let writer = PageWriter::new(&mut page, 1);
        let mut node = Node::begin_create(writer, BytesCodec, BytesCodec).unwrap();
        node.create(true).unwrap();

        insert_bytes(&mut node, b"bravo", b"second value");
        insert_bytes(&mut node, b"alpha", b"first");
        insert_bytes(&mut node, b"charlie", b"third value, longer");

        assert_eq!(node.size(), 3);
        assert_eq!(node.key_at(0).unwrap(), b"alpha");
        assert_eq!(node.key_at(1).unwrap(), b"bravo");
        assert_eq!(node.key_at(2).unwrap(), b"charlie");
        assert_eq!(node.value_at(0).unwrap(), b"first");

        assert_eq!(node.key_size_at(1).unwrap(), 1 + 5);
        assert_eq!(node.value_size_at(1).unwrap(), 1 + 12);
    }

    #[test]
    fn delete_out_of_line_record_compacts_and_patches_offsets() {
        let mut page = make_page();
        let writer = PageWriter::new(&mut page, 1);
        let mut node = Node::begin_create(writer, BytesCodec, BytesCodec).unwrap();
        node.create(true).unwrap();

        insert_bytes(&mut node, b"alpha", b"aaaa");
        insert_bytes(&mut node, b"bravo", b"bbbb");
        insert_bytes(&mut node, b"charlie", b"cccc");

        let free_before = node.free_bytes().unwrap();
        let key_size = node.key_size_at(0).unwrap();
        let value_size = node.value_size_at(0).unwrap();
        let entry_size = node.full_entry_size(key_size, value_size);

        node.delete(0, key_size, value_size).unwrap();

        assert_eq!(node.size(), 2);
        assert_eq!(node.key_at(0).unwrap(), b"bravo");
        assert_eq!(node.value_at(0).unwrap(), b"bbbb");
        assert_eq!(node.key_at(1).unwrap(), b"charlie");
        assert_eq!(node.value_at(1).unwrap(), b"cccc");
        assert_eq!(node.free_bytes().unwrap(), free_before + entry_size);

        for _ in 0..2 {
            let key_size = node.key_size_at(0).unwrap();
            let value_size = node.value_size_at(0).unwrap();
            node.delete(0, key_size, value_size).unwrap();
        }
        assert_eq!(node.size(), 0);
        assert_eq!(node.free_data_position().unwrap(), PAGE_SIZE as u32);
    }

    #[test]
    fn update_value_same_size_rewrites_in_place() {
        let mut page = make_page();
        let writer = PageWriter::new(&mut page, 1);
        let mut node = Node::begin_create(writer, BytesCodec, BytesCodec).unwrap();
        node.create(true).unwrap();

        insert_bytes(&mut node, b"key", b"aaaa");
        let free_position_before = node.free_data_position().unwrap();

        let replacement = b"zzzz".to_vec();
        let size = BytesCodec::encoded_size(&replacement);
        node.update_value(0, &replacement, size, size).unwrap();

        assert_eq!(node.value_at(0).unwrap(), b"zzzz");
        assert_eq!(node.free_data_position().unwrap(), free_position_before);
    }

    #[test]
    fn update_value_different_size_reallocates() {
        let mut page = make_page();
        let writer = PageWriter::new(&mut page, 1);
        let mut node = Node::begin_create(writer, BytesCodec, BytesCodec).unwrap();
        node.create(true).unwrap();

        insert_bytes(&mut node, b"first", b"small");
        insert_bytes(&mut node, b"second", b"other");

        let current = node.value_size_at(0).unwrap();
        let replacement = b"a considerably longer value".to_vec();
        let new_size = BytesCodec::encoded_size(&replacement);
        node.update_value(0, &replacement, new_size, current).unwrap();

        assert_eq!(node.value_at(0).unwrap(), replacement);
        assert_eq!(node.key_at(0).unwrap(), b"first");
        assert_eq!(node.value_at(1).unwrap(), b"other");

        let free_before = node.free_bytes().unwrap();
        let shrunk = b"tiny".to_vec();
        let shrunk_size = BytesCodec::encoded_size(&shrunk);
        node.update_value(0, &shrunk, shrunk_size, new_size).unwrap();

        assert_eq!(node.value_at(0).unwrap(), b"tiny");
        assert_eq!(
            node.free_bytes().unwrap(),
            free_before + new_size - shrunk_size
        );
    }

    #[test]
    fn update_inline_value_in_place() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);

        insert_u32(&mut node, 5, 50);
        let free_position_before = node.free_data_position().unwrap();

        node.update_value(0, &55, 8, 8).unwrap();

        assert_eq!(node.value_at(0).unwrap(), 55);
        assert_eq!(node.free_data_position().unwrap(), free_position_before);
    }

    #[test]
    fn entry_size_accounting_matches_layout() {
        let mut page = make_page();
        let node = create_u32_leaf(&mut page);
        assert_eq!(node.full_entry_size(4, 8), 12);

        let mut page = make_page();
        let node = create_u32_internal(&mut page);
        assert_eq!(node.full_entry_size(4, 8), 4 + 8 + 12);
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let mut page = make_page();
        let node = create_u32_leaf(&mut page);

        assert!(node.check_entry_size(MAX_ENTRY_SIZE).is_ok());
        let result = node.check_entry_size(MAX_ENTRY_SIZE + 1);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds the maximum"));
    }

    #[test]
    fn count_entries_to_move_frees_half_the_page() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);

        let mut next_key = 1u32;
        loop {
            let entry_size = node.full_entry_size(4, 8);
            if !node.delta_fits(entry_size).unwrap() {
                break;
            }
            insert_u32(&mut node, next_key, next_key as u64 * 10);
            next_key += 1;
        }

        let size = node.size();
        let to_move = node.count_entries_to_move_until_half_free().unwrap();
        assert!(to_move > 0);
        assert!(to_move <= size);

        let mut freed = node.free_bytes().unwrap();
        for i in (size - to_move..size).rev() {
            let key_size = node.key_size_at(i).unwrap();
            freed += node.full_entry_size(key_size, 8);
        }
        assert!(freed >= HALF_SIZE);
    }

    #[test]
    fn count_entries_is_zero_when_half_free_already() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);

        insert_u32(&mut node, 1, 1);
        assert_eq!(node.count_entries_to_move_until_half_free().unwrap(), 0);
    }

    #[test]
    fn leaf_move_tail_preserves_key_sequence() {
        let mut source_page = make_page();
        let mut destination_page = make_page();

        let mut source = create_u32_leaf(&mut source_page);
        for key in 1..=10u32 {
            insert_u32(&mut source, key, key as u64 * 10);
        }

        let writer = PageWriter::new(&mut destination_page, 2);
        let mut destination = Node::begin_create(writer, U32Codec, U64Codec).unwrap();
        destination.create(true).unwrap();

        let free_before = source.free_bytes().unwrap();
        source.move_tail_to(&mut destination, 4).unwrap();

        assert_eq!(source.size(), 6);
        assert_eq!(destination.size(), 4);
        assert!(source.free_bytes().unwrap() > free_before);

        for key in 1..=6u32 {
            assert_eq!(source.key_at(key as usize - 1).unwrap(), key);
            assert_eq!(source.value_at(key as usize - 1).unwrap(), key as u64 * 10);
        }
        for key in 7..=10u32 {
            assert_eq!(destination.key_at(key as usize - 7).unwrap(), key);
            assert_eq!(
                destination.value_at(key as usize - 7).unwrap(),
                key as u64 * 10
            );
        }
        assert!(source.key_at(5).unwrap() < destination.key_at(0).unwrap());
    }

    #[test]
    fn internal_move_tail_preserves_pointers_and_markers() {
        let mut source_page = make_page();
        let mut destination_page = make_page();

        let mut source = create_u32_internal(&mut source_page);
        source.set_left_pointer(1000).unwrap();
        for i in 0..6u32 {
            source
                .insert_pointer(i as usize, &(i * 10 + 10), 4, 2000 + i as u64, 50 + i as u64, i)
                .unwrap();
        }

        let writer = PageWriter::new(&mut destination_page, 2);
        let mut destination = Node::begin_create(writer, U32Codec, U64Codec).unwrap();
        destination.create(false).unwrap();

        source.move_tail_to(&mut destination, 2).unwrap();

        assert_eq!(source.size(), 4);
        assert_eq!(destination.size(), 2);

        for i in 0..4u32 {
            assert_eq!(source.key_at(i as usize).unwrap(), i * 10 + 10);
            assert_eq!(source.pointer_at(i as i32).unwrap(), 2000 + i as u64);
            let marker = source.marker_at(i as i32).unwrap();
            assert_eq!(marker.block_index, 50 + i as u64);
            assert_eq!(marker.pages_used, i);
        }
        for i in 0..2u32 {
            let original = i + 4;
            assert_eq!(destination.key_at(i as usize).unwrap(), original * 10 + 10);
            assert_eq!(
                destination.pointer_at(i as i32).unwrap(),
                2000 + original as u64
            );
            let marker = destination.marker_at(i as i32).unwrap();
            assert_eq!(marker.block_index, 50 + original as u64);
        }
    }

    #[test]
    fn move_tail_of_out_of_line_records_defragments() {
        let mut source_page = make_page();
        let mut destination_page = make_page();

        let writer = PageWriter::new(&mut source_page, 1);
        let mut source = Node::begin_create(writer, BytesCodec, BytesCodec).unwrap();
        source.create(true).unwrap();

        insert_bytes(&mut source, b"aa", b"value one");
        insert_bytes(&mut source, b"bb", b"value two");
        insert_bytes(&mut source, b"cc", b"value three");
        insert_bytes(&mut source, b"dd", b"value four");

        let writer = PageWriter::new(&mut destination_page, 2);
        let mut destination = Node::begin_create(writer, BytesCodec, BytesCodec).unwrap();
        destination.create(true).unwrap();

        source.move_tail_to(&mut destination, 2).unwrap();

        assert_eq!(source.size(), 2);
        assert_eq!(source.key_at(0).unwrap(), b"aa");
        assert_eq!(source.value_at(1).unwrap(), b"value two");
        assert_eq!(destination.key_at(0).unwrap(), b"cc");
        assert_eq!(destination.value_at(1).unwrap(), b"value four");
    }

    #[test]
    fn clone_produces_byte_identical_page() {
        let mut source_page = make_page();
        {
            let mut source = create_u32_leaf(&mut source_page);
            for key in 1..=5u32 {
                insert_u32(&mut source, key, key as u64);
            }
            source.set_right_sibling(77).unwrap();
            source.end_write().unwrap();
        }

        let mut clone_page = make_page();
        {
            let reader = PageReader::new(&source_page, 1);
            let mut source = Node::begin_read(reader, U32Codec, U64Codec).unwrap();

            let writer = PageWriter::new(&mut clone_page, 2);
            let mut clone = Node::begin_write(writer, U32Codec, U64Codec).unwrap();
            clone.clone_from(&mut source).unwrap();

            assert_eq!(clone.size(), 5);
            assert_eq!(clone.key_at(2).unwrap(), 3);
            assert_eq!(clone.value_at(4).unwrap(), 5);
            assert_eq!(clone.right_sibling().unwrap(), 77);

            clone.end_write().unwrap();
            source.end_read();
        }

        assert_eq!(source_page, clone_page);
    }

    #[test]
    fn convert_to_non_leaf_resets_contents() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);

        insert_u32(&mut node, 1, 10);
        insert_u32(&mut node, 2, 20);

        node.convert_to_non_leaf().unwrap();

        assert!(!node.is_leaf());
        assert_eq!(node.size(), 0);
        assert_eq!(node.free_data_position().unwrap(), PAGE_SIZE as u32);
        assert_eq!(node.encoders_version(), ENCODERS_VERSION);
        assert_eq!(node.left_pointer().unwrap(), 0);
        assert!(node.marker_at(-1).unwrap().is_empty());

        node.set_left_pointer(500).unwrap();
        node.insert_pointer(0, &10, 4, 600, 0, 0).unwrap();
        let idx = node.index_of(&4).unwrap();
        assert_eq!(node.pointer_at(idx).unwrap(), 500);
    }

    #[test]
    fn write_session_without_mutation_leaves_page_unchanged() {
        let mut page = make_page();
        {
            let mut node = create_u32_leaf(&mut page);
            insert_u32(&mut node, 1, 10);
            node.end_write().unwrap();
        }

        let snapshot = page.clone();
        {
            let writer = PageWriter::new(&mut page, 1);
            let node = Node::begin_write(writer, U32Codec, U64Codec).unwrap();
            node.end_write().unwrap();
        }

        assert_eq!(page, snapshot);
    }

    #[test]
    fn dirty_fields_are_flushed_on_end_write_only() {
        let mut page = make_page();
        {
            let mut node = create_u32_leaf(&mut page);
            insert_u32(&mut node, 1, 10);

            assert_eq!(node.page.get_i32_at(SIZE_OFFSET).unwrap(), 0);

            node.end_write().unwrap();
        }

        let reader = PageReader::new(&page, 1);
        assert_eq!(reader.get_i32_at(SIZE_OFFSET).unwrap(), 1);
    }

    #[test]
    fn read_session_sees_flushed_state() {
        let mut page = make_page();
        {
            let mut node = create_u32_leaf(&mut page);
            insert_u32(&mut node, 4, 40);
            node.set_tree_size(123);
            node.end_write().unwrap();
        }

        let reader = PageReader::new(&page, 1);
        let mut node = Node::begin_read(reader, U32Codec, U64Codec).unwrap();

        assert!(node.is_leaf());
        assert_eq!(node.size(), 1);
        assert_eq!(node.tree_size().unwrap(), 123);
        assert_eq!(node.value_at(0).unwrap(), 40);
        node.end_read();
    }

    #[test]
    fn unknown_encoders_version_is_rejected() {
        let mut page = make_page();
        {
            let mut node = create_u32_leaf(&mut page);
            node.end_write().unwrap();
        }

        page[FLAGS_OFFSET] |= 3 << ENCODERS_VERSION_SHIFT;

        let reader = PageReader::new(&page, 1);
        let result = Node::begin_read(reader, U32Codec, U64Codec);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("unsupported encoders version"));
    }

    #[test]
    fn extension_flag_is_rejected() {
        let mut page = make_page();
        {
            let mut node = create_u32_leaf(&mut page);
            node.end_write().unwrap();
        }

        page[FLAGS_OFFSET] |= EXTENSION_FLAG;

        let reader = PageReader::new(&page, 1);
        let result = Node::begin_read(reader, U32Codec, U64Codec);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("extension flag"));
    }

    #[test]
    fn sibling_and_continuation_flags_roundtrip() {
        let mut page = make_page();
        {
            let mut node = create_u32_leaf(&mut page);
            node.set_left_sibling(11).unwrap();
            node.set_right_sibling(12).unwrap();
            node.set_continued_from(true);
            node.set_continued_to(true);
            node.end_write().unwrap();
        }

        let reader = PageReader::new(&page, 1);
        let node = Node::begin_read(reader, U32Codec, U64Codec).unwrap();
        assert_eq!(node.left_sibling().unwrap(), 11);
        assert_eq!(node.right_sibling().unwrap(), 12);
        assert!(node.is_continued_from());
        assert!(node.is_continued_to());
    }

    #[test]
    fn dump_renders_leaf_and_internal() {
        let mut page = make_page();
        let mut node = create_u32_leaf(&mut page);
        insert_u32(&mut node, 1, 10);

        let rendered = node.dump().unwrap();
        assert!(rendered.starts_with("leaf"));
        assert!(rendered.contains("1 10"));

        let mut page = make_page();
        let mut node = create_u32_internal(&mut page);
        node.set_left_pointer(5).unwrap();
        node.insert_pointer(0, &9, 4, 6, 2, 1).unwrap();

        let rendered = node.dump().unwrap();
        assert!(rendered.starts_with("internal"));
        assert!(rendered.contains("P(5)"));
        assert!(rendered.contains("M(2, 1)"));
    }
}
