/// Arena of memories keyed by id.
///
/// Skip links refer to their targets by [`MemoryId`], so the store is the
/// single owner of every memory and the link graph never forms ownership
/// cycles. Iteration is in id order, which is also creation order.
use super::{Memory, MemoryId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    memories: BTreeMap<MemoryId, Memory>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a list of memories.
    pub fn from_memories(memories: impl IntoIterator<Item = Memory>) -> Self {
        Self {
            memories: memories.into_iter().map(|m| (m.id, m)).collect(),
        }
    }

    /// Insert or replace a memory.
    pub fn insert(&mut self, memory: Memory) {
        self.memories.insert(memory.id, memory);
    }

    pub fn get(&self, id: MemoryId) -> Option<&Memory> {
        self.memories.get(&id)
    }

    pub fn get_mut(&mut self, id: MemoryId) -> Option<&mut Memory> {
        self.memories.get_mut(&id)
    }

    pub fn contains(&self, id: MemoryId) -> bool {
        self.memories.contains_key(&id)
    }

    /// Memories in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Memory> {
        self.memories.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Memory> {
        self.memories.values_mut()
    }

    /// Memories above the amplitude floor.
    pub fn active(&self, floor: f32) -> impl Iterator<Item = &Memory> {
        self.memories.values().filter(move |m| !m.is_faded(floor))
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    /// Total number of outgoing links.
    pub fn link_count(&self) -> usize {
        self.memories.values().map(|m| m.connections.len()).sum()
    }

    /// Hypervector dimensionality, if any memory is stored.
    pub fn dimensions(&self) -> Option<usize> {
        self.memories.values().next().map(|m| m.vector.dimensions())
    }

    /// Largest allocated id.
    pub fn max_id(&self) -> Option<MemoryId> {
        self.memories.keys().next_back().copied()
    }

    /// Mutable access to two distinct memories at once, in argument order.
    pub fn pair_mut(&mut self, a: MemoryId, b: MemoryId) -> Option<(&mut Memory, &mut Memory)> {
        if a == b {
            return None;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let mut range = self.memories.range_mut(lo..=hi);
        let (first_id, first) = range.next()?;
        let (last_id, last) = range.next_back()?;
        if *first_id != lo || *last_id != hi {
            return None;
        }
        if a < b { Some((first, last)) } else { Some((last, first)) }
    }
}
