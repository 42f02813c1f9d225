//! Registry of frames shared between SHARED file mappings.
//!
//! One entry per backing file that currently has at least one resolved
//! SHARED mapping anywhere in the system. Lookups are a linear scan; the
//! table is as short as the number of distinct shared files, and the caller
//! holds it under a single lock across the whole check-then-insert sequence.

use crate::address::PhysPageNum;
use crate::node::Node;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// one shared file with its frame and the number of resolved mappings
struct ShareEntry {
    number: u64,
    // holds the file open so its identity number cannot be recycled
    #[allow(unused)]
    node: Arc<dyn Node>,
    frame: PhysPageNum,
    refs: usize,
}

/// all shared frames, keyed by file identity
pub(crate) struct ShareTable {
    entries: Vec<ShareEntry>,
}

impl ShareTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
    /// Frame already registered for `number`, adding one reference.
    pub fn retain(&mut self, number: u64) -> Option<PhysPageNum> {
        let entry = self.entries.iter_mut().find(|e| e.number == number)?;
        entry.refs += 1;
        Some(entry.frame)
    }
    /// Register `frame` for `number` with a single reference.
    pub fn insert(&mut self, number: u64, node: Arc<dyn Node>, frame: PhysPageNum) {
        debug_assert!(self.entries.iter().all(|e| e.number != number));
        self.entries.push(ShareEntry {
            number,
            node,
            frame,
            refs: 1,
        });
    }
    /// Drop one reference; returns the frame exactly when the last
    /// reference went away and the entry was removed.
    pub fn release(&mut self, number: u64) -> Option<PhysPageNum> {
        let idx = self.entries.iter().position(|e| e.number == number)?;
        let entry = &mut self.entries[idx];
        entry.refs -= 1;
        if entry.refs > 0 {
            return None;
        }
        let frame = entry.frame;
        self.entries.swap_remove(idx);
        Some(frame)
    }
    /// Number of distinct shared files currently resident.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
