//! # SIEVE Page Cache with Per-Frame Latches
//!
//! This module implements the page cache that owns every page buffer in the
//! process. Eviction uses the SIEVE algorithm with 64-way lock sharding; each
//! frame additionally carries its own `RwLock`, which doubles as the
//! shared/exclusive latch the node layer's session protocol acquires.
//!
//! ## Why SIEVE Instead of LRU?
//!
//! Standard LRU has a critical flaw for index workloads: a sequential scan
//! evicts the entire cache. SIEVE uses a "visited" flag and a scanning hand
//! instead of strict recency ordering:
//!
//! - On access: set the visited flag
//! - On eviction: scan entries with the hand pointer
//!   - visited=true: clear the flag, move on (second chance)
//!   - visited=false: evict
//!
//! Frequently-accessed pages get a second chance while scan pages leave
//! quickly.
//!
//! ## Lock Sharding and Latches
//!
//! The cache map is split into 64 shards, each behind its own `RwLock`, so
//! lookups contend only within a shard. Orthogonally to that, every frame
//! holds its page bytes behind a dedicated `RwLock`:
//!
//! ```text
//! PageCache
//! ├── Shard 0:  RwLock<CacheShard { frames: Vec<Arc<Frame>> }>
//! ├── ...
//! └── Shard 63: RwLock<CacheShard>
//!
//! Frame
//! ├── latch:     RwLock<Box<[u8; PAGE_SIZE]>>   <- node session latch
//! ├── pin_count: AtomicU32                      <- eviction guard
//! ├── visited:   AtomicBool                     <- SIEVE state
//! └── dirty:     AtomicBool                     <- write-back state
//! ```
//!
//! Shard locks are held only for map maintenance, never across a latch
//! acquisition, so latch waits cannot block unrelated lookups.
//!
//! ## Pin/Unpin Protocol
//!
//! `get`/`get_or_insert` return a pinned [`PageRef`]; the pin is dropped with
//! the reference. Pinned frames are never evicted. Latching is explicit:
//! `latch_shared()` for read sessions, `latch_exclusive()` for write and
//! create sessions. Acquiring the exclusive latch marks the frame dirty.
//!
//! ## Write-Back
//!
//! `flush_dirty` visits every dirty frame, stamps the frame-header checksum,
//! and hands the page image to the caller-provided sink (the write-ahead
//! durability layer lives outside this crate). Eviction of a dirty frame is
//! reported through a `tracing` event; callers that care about durability
//! must flush before releasing their pins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::page::{stamp_checksum, PageReader, PageWriter};
use crate::config::{CACHE_SHARD_COUNT as SHARD_COUNT, PAGE_SIZE};

struct Frame {
    page_no: u64,
    latch: RwLock<Box<[u8; PAGE_SIZE]>>,
    pin_count: AtomicU32,
    visited: AtomicBool,
    dirty: AtomicBool,
}

impl Frame {
    fn new(page_no: u64) -> Self {
        Self {
            page_no,
            latch: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            visited: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin called on unpinned page");
    }

    fn mark_visited(&self) {
        self.visited.store(true, Ordering::Release);
    }

    fn clear_visited(&self) -> bool {
        self.visited.swap(false, Ordering::AcqRel)
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

struct CacheShard {
    frames: Vec<Arc<Frame>>,
    index: HashMap<u64, usize>,
    hand: usize,
    capacity: usize,
}

impl CacheShard {
    fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            hand: 0,
            capacity,
        }
    }

    fn get(&self, page_no: u64) -> Option<usize> {
        self.index.get(&page_no).copied()
    }

    fn evict(&mut self) -> Option<usize> {
        if self.frames.is_empty() {
            return None;
        }

        let start = self.hand;
        let mut wrapped_once = false;

        loop {
            let frame = &self.frames[self.hand];

            if frame.is_pinned() {
                self.hand = (self.hand + 1) % self.frames.len();
                if self.hand == start {
                    if wrapped_once {
                        return None;
                    }
                    wrapped_once = true;
                }
                continue;
            }

            if frame.clear_visited() {
                self.hand = (self.hand + 1) % self.frames.len();
                continue;
            }

            return Some(self.hand);
        }
    }

    fn remove(&mut self, idx: usize) -> Arc<Frame> {
        let frame = self.frames.swap_remove(idx);
        self.index.remove(&frame.page_no);

        if idx < self.frames.len() {
            let moved_page = self.frames[idx].page_no;
            self.index.insert(moved_page, idx);
        }

        if self.hand >= self.frames.len() && !self.frames.is_empty() {
            self.hand = 0;
        }

        frame
    }

    fn insert(&mut self, frame: Arc<Frame>) {
        let page_no = frame.page_no;
        let idx = self.frames.len();
        self.frames.push(frame);
        self.index.insert(page_no, idx);
    }

    fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}

pub struct PageCache {
    shards: Vec<RwLock<CacheShard>>,
    capacity_per_shard: usize,
}

impl PageCache {
    pub fn new(total_capacity: usize) -> Result<Self> {
        ensure!(
            total_capacity >= SHARD_COUNT,
            "cache capacity {} must be at least {} (one per shard)",
            total_capacity,
            SHARD_COUNT
        );

        let capacity_per_shard = total_capacity / SHARD_COUNT;
        let remainder = total_capacity % SHARD_COUNT;

        let shards: Vec<_> = (0..SHARD_COUNT)
            .map(|i| {
                let cap = if i < remainder {
                    capacity_per_shard + 1
                } else {
                    capacity_per_shard
                };
                RwLock::new(CacheShard::new(cap))
            })
            .collect();

        Ok(Self {
            shards,
            capacity_per_shard,
        })
    }

    fn shard(&self, page_no: u64) -> &RwLock<CacheShard> {
        let hash = (page_no as usize).wrapping_mul(31);
        &self.shards[hash % SHARD_COUNT]
    }

    pub fn get(&self, page_no: u64) -> Option<PageRef> {
        let shard = self.shard(page_no);
        let guard = shard.read();

        guard.get(page_no).map(|idx| {
            let frame = Arc::clone(&guard.frames[idx]);
            frame.pin();
            frame.mark_visited();
            PageRef { frame }
        })
    }

    pub fn get_or_insert<F>(&self, page_no: u64, init: F) -> Result<PageRef>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        if let Some(page) = self.get(page_no) {
            return Ok(page);
        }

        let shard = self.shard(page_no);
        let mut guard = shard.write();

        if let Some(idx) = guard.get(page_no) {
            let frame = Arc::clone(&guard.frames[idx]);
            frame.pin();
            frame.mark_visited();
            return Ok(PageRef { frame });
        }

        if guard.is_full() {
            match guard.evict() {
                Some(victim) => {
                    let evicted = guard.remove(victim);
                    debug!(
                        page_no = evicted.page_no,
                        dirty = evicted.is_dirty(),
                        "cache.evict"
                    );
                }
                None => {
                    eyre::bail!(
                        "cache shard full and all pages pinned (capacity={})",
                        guard.capacity
                    );
                }
            }
        }

        let frame = Arc::new(Frame::new(page_no));
        init(frame.latch.write().as_mut_slice())?;
        frame.pin();
        frame.mark_visited();

        guard.insert(Arc::clone(&frame));

        Ok(PageRef { frame })
    }

    /// Stamps checksums and hands every dirty page image to `sink`, clearing
    /// the dirty flags. Returns the number of pages flushed.
    pub fn flush_dirty<F>(&self, mut sink: F) -> Result<usize>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        let mut flushed = 0;

        for shard in &self.shards {
            let frames: Vec<Arc<Frame>> = {
                let guard = shard.read();
                guard
                    .frames
                    .iter()
                    .filter(|f| f.is_dirty())
                    .map(Arc::clone)
                    .collect()
            };

            for frame in frames {
                let mut data = frame.latch.write();
                stamp_checksum(data.as_mut_slice())?;
                sink(frame.page_no, data.as_slice())?;
                frame.clear_dirty();
                flushed += 1;
            }
        }

        Ok(flushed)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity_per_shard * SHARD_COUNT
    }

    pub fn evict_all_unpinned(&self) -> usize {
        let mut evicted = 0;

        for shard in &self.shards {
            let mut guard = shard.write();

            let mut to_remove: Vec<usize> = guard
                .frames
                .iter()
                .enumerate()
                .filter(|(_, f)| !f.is_pinned())
                .map(|(i, _)| i)
                .collect();

            to_remove.sort_unstable_by(|a, b| b.cmp(a));

            for idx in to_remove {
                guard.remove(idx);
                evicted += 1;
            }
        }

        evicted
    }
}

/// A pinned reference to a cached page. The pin is released on drop; the
/// page's latch is acquired explicitly per session.
pub struct PageRef {
    frame: Arc<Frame>,
}

impl PageRef {
    pub fn page_no(&self) -> u64 {
        self.frame.page_no
    }

    /// Acquires the shared latch for a read session.
    pub fn latch_shared(&self) -> SharedPage<'_> {
        SharedPage {
            page_no: self.frame.page_no,
            guard: self.frame.latch.read(),
        }
    }

    /// Acquires the exclusive latch for a write or create session and marks
    /// the frame dirty.
    pub fn latch_exclusive(&self) -> ExclusivePage<'_> {
        let guard = self.frame.latch.write();
        self.frame.mark_dirty();
        ExclusivePage {
            page_no: self.frame.page_no,
            guard,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }
}

impl Clone for PageRef {
    fn clone(&self) -> Self {
        self.frame.pin();
        Self {
            frame: Arc::clone(&self.frame),
        }
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}

/// Shared latch guard; yields read-only cursors.
pub struct SharedPage<'a> {
    page_no: u64,
    guard: RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl SharedPage<'_> {
    pub fn reader(&self) -> PageReader<'_> {
        PageReader::new(self.guard.as_slice(), self.page_no)
    }
}

/// Exclusive latch guard; yields mutable cursors.
pub struct ExclusivePage<'a> {
    page_no: u64,
    guard: RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl ExclusivePage<'_> {
    pub fn reader(&self) -> PageReader<'_> {
        PageReader::new(self.guard.as_slice(), self.page_no)
    }

    pub fn writer(&mut self) -> PageWriter<'_> {
        PageWriter::new(self.guard.as_mut_slice(), self.page_no)
    }
}
