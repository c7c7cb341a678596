//! Bindless descriptor index allocation.

use std::fmt;
use std::sync::Arc;

use crate::sync::mutex::Mutex;

struct IndexState {
    free: Vec<u32>,
    next: u32,
    capacity: u32,
}

/// Free list of slots in a bindless descriptor table.
///
/// Indices come back through [`BindlessIndex`]'s destructor, so an index held
/// by pending garbage is not reused until that garbage is collected.
#[derive(Clone)]
pub struct BindlessIndexAllocator {
    state: Arc<Mutex<IndexState>>,
}

impl BindlessIndexAllocator {
    /// Allocator over `capacity` table slots.
    pub fn new(capacity: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(IndexState {
                free: Vec::new(),
                next: 0,
                capacity,
            })),
        }
    }

    /// Claim a slot. `None` when the table is full.
    pub fn allocate(&self) -> Option<BindlessIndex> {
        let mut state = self.state.lock();
        let index = match state.free.pop() {
            Some(index) => index,
            None if state.next < state.capacity => {
                state.next += 1;
                state.next - 1
            }
            None => return None,
        };
        Some(BindlessIndex {
            index,
            state: Arc::clone(&self.state),
        })
    }

    /// Slots currently claimed.
    pub fn in_use(&self) -> u32 {
        let state = self.state.lock();
        state.next - state.free.len() as u32
    }

    /// Table size.
    pub fn capacity(&self) -> u32 {
        self.state.lock().capacity
    }
}

impl fmt::Debug for BindlessIndexAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindlessIndexAllocator")
            .field("in_use", &self.in_use())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// A claimed bindless slot. Returned to its allocator on drop.
pub struct BindlessIndex {
    index: u32,
    state: Arc<Mutex<IndexState>>,
}

impl BindlessIndex {
    /// Slot in the descriptor table.
    pub fn get(&self) -> u32 {
        self.index
    }
}

impl Drop for BindlessIndex {
    fn drop(&mut self) {
        self.state.lock().free.push(self.index);
    }
}

impl fmt::Debug for BindlessIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BindlessIndex").field(&self.index).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_unique_until_dropped() {
        let table = BindlessIndexAllocator::new(3);
        let a = table.allocate().unwrap();
        let b = table.allocate().unwrap();
        let c = table.allocate().unwrap();
        assert!(table.allocate().is_none());
        assert_ne!(a.get(), b.get());
        assert_ne!(b.get(), c.get());

        let freed = b.get();
        drop(b);
        assert_eq!(table.in_use(), 2);
        assert_eq!(table.allocate().unwrap().get(), freed);
    }
}
