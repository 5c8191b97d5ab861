//! Bounded rolling history of recent blocks.

use std::collections::VecDeque;

use crate::types::{BlockNumber, BlockRecord, Page};

/// Most-recent-first block history capped by count, not by age.
///
/// New heads go to the front and the oldest entry is evicted on overflow.
/// Out-of-order delivery is kept in arrival order, never re-sorted.
#[derive(Debug, Clone)]
pub struct BlockWindow {
    blocks: VecDeque<BlockRecord>,
    capacity: usize,
}

impl BlockWindow {
    pub const DEFAULT_CAPACITY: usize = 10;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            blocks: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Insert a block at the front. Returns the evicted tail entry, if any.
    pub fn push(&mut self, block: BlockRecord) -> Option<BlockRecord> {
        self.blocks.push_front(block);
        if self.blocks.len() > self.capacity {
            self.blocks.pop_back()
        } else {
            None
        }
    }

    /// Mark the most recent entry with `number` as finalized.
    ///
    /// Returns false when the block already scrolled out of the window.
    pub fn mark_finalized(&mut self, number: BlockNumber) -> bool {
        match self.blocks.iter_mut().find(|b| b.number == number) {
            Some(block) => {
                block.finalized = true;
                true
            }
            None => false,
        }
    }

    pub fn latest(&self) -> Option<&BlockRecord> {
        self.blocks.front()
    }

    pub fn get(&self, number: BlockNumber) -> Option<&BlockRecord> {
        self.blocks.iter().find(|b| b.number == number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockRecord> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn to_vec(&self) -> Vec<BlockRecord> {
        self.blocks.iter().cloned().collect()
    }

    /// 1-based page of the window, newest first.
    pub fn page(&self, page: usize, limit: usize) -> Page<BlockRecord> {
        Page::slice(&self.to_vec(), page, limit)
    }
}

impl Default for BlockWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
