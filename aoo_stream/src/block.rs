//! Reassembly of fragmented blocks.

use aoo_proto::MAX_FRAGMENTS;
use std::collections::VecDeque;

/// An encoded block, possibly still missing some fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    sequence: u32,
    sample_rate: f64,
    channel: u32,
    data: Box<[u8]>,
    frame_count: u32,
    /// One bit per received fragment.
    received: u32,
}

impl Block {
    /// Allocates an empty block of `size` bytes, expecting `frame_count` fragments.
    ///
    /// Returns `None` if the block is empty, or if `frame_count` is zero or above
    /// [`MAX_FRAGMENTS`].
    pub fn new(
        sequence: u32,
        sample_rate: f64,
        channel: u32,
        size: usize,
        frame_count: u32,
    ) -> Option<Self> {
        if size == 0 || frame_count == 0 || frame_count > MAX_FRAGMENTS {
            return None;
        }

        Some(Self {
            sequence,
            sample_rate,
            channel,
            data: vec![0; size].into_boxed_slice(),
            frame_count,
            received: 0,
        })
    }

    /// Copies fragment number `which` into place, returns whether it was accepted.
    ///
    /// Fragments are laid out contiguously, all but the last having the same size, so
    /// the last one is placed at the end of the block. Duplicates are harmless.
    pub fn add_frame(&mut self, which: u32, bytes: &[u8]) -> bool {
        if which >= self.frame_count || bytes.len() > self.data.len() {
            return false;
        }

        let offset = if which == self.frame_count - 1 {
            self.data.len() - bytes.len()
        } else {
            which as usize * bytes.len()
        };

        let Some(dest) = self.data.get_mut(offset..offset + bytes.len()) else {
            return false;
        };

        dest.copy_from_slice(bytes);
        self.received |= 1 << which;

        true
    }

    /// Returns `true` once every fragment has been received.
    #[inline(always)]
    pub fn complete(&self) -> bool {
        self.received == u32::MAX >> (32 - self.frame_count)
    }

    #[inline(always)]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[inline(always)]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline(always)]
    pub fn channel(&self) -> u32 {
        self.channel
    }

    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    #[inline(always)]
    pub fn received_frames(&self) -> u32 {
        self.received.count_ones()
    }

    #[inline(always)]
    pub fn has_frame(&self, which: u32) -> bool {
        which < self.frame_count && self.received & (1 << which) != 0
    }
}

/// A bounded collection of blocks, sorted by ascending sequence number, without
/// duplicates.
#[derive(Debug, Clone, Default)]
pub struct BlockQueue {
    blocks: VecDeque<Block>,
    capacity: usize,
}

impl BlockQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Clears the queue and changes its capacity.
    pub fn resize(&mut self, capacity: usize) {
        self.blocks.clear();
        self.blocks.reserve_exact(capacity);
        self.capacity = capacity;
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.capacity
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts `block` at its sorted position.
    ///
    /// If the queue is full, the block with the lowest sequence number is evicted to make
    /// room and returned. If that block would be `block` itself (it is older than every
    /// queued block), or if a block with the same sequence number is already queued,
    /// `block` is handed back instead, leaving the queue untouched.
    pub fn insert(&mut self, block: Block) -> Option<Block> {
        let Err(pos) = self
            .blocks
            .binary_search_by_key(&block.sequence, Block::sequence)
        else {
            return Some(block);
        };

        if !self.is_full() {
            self.blocks.insert(pos, block);
            return None;
        }

        if pos == 0 {
            return Some(block);
        }

        let evicted = self.blocks.pop_front();
        self.blocks.insert(pos - 1, block);
        evicted
    }

    /// Returns the queued block with the given sequence number.
    pub fn find(&mut self, sequence: u32) -> Option<&mut Block> {
        let pos = self
            .blocks
            .binary_search_by_key(&sequence, Block::sequence)
            .ok()?;
        self.blocks.get_mut(pos)
    }

    #[inline(always)]
    pub fn pop_front(&mut self) -> Option<Block> {
        self.blocks.pop_front()
    }

    #[inline(always)]
    pub fn pop_back(&mut self) -> Option<Block> {
        self.blocks.pop_back()
    }

    #[inline(always)]
    pub fn front(&self) -> Option<&Block> {
        self.blocks.front()
    }

    #[inline(always)]
    pub fn back(&self) -> Option<&Block> {
        self.blocks.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Block> + ExactSizeIterator {
        self.blocks.iter()
    }
}

impl core::ops::Index<usize> for BlockQueue {
    type Output = Block;

    fn index(&self, index: usize) -> &Block {
        &self.blocks[index]
    }
}
