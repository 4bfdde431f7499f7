//! Indexed Binary Min-Heap
//!
//! A priority queue that, unlike `std::collections::BinaryHeap`, supports
//! removing an arbitrary element in O(log n). The expiration index needs this
//! because a key's TTL can be cancelled or replaced long before it reaches the
//! front of the queue.
//!
//! ## Layout
//!
//! ```text
//!   slots (arena)                      heap (array order)
//!   ┌────┬──────────────────────┐      ┌───┬───┬───┬───┐
//!   │ 0  │ item A, position 2   │◄─────│ 1 │ 3 │ 0 │ 2 │
//!   │ 1  │ item B, position 0   │      └───┴───┴───┴───┘
//!   │ 2  │ item C, position 3   │        0   1   2   3
//!   │ 3  │ item D, position 1   │
//!   └────┴──────────────────────┘
//! ```
//!
//! Items live in a slot arena and are referred to by a stable [`Handle`].
//! The heap itself only stores slot indices. Every swap writes the new heap
//! position back into the slot, so a handle can always be turned into its
//! current position without a search.

/// Types that can be ordered by the queue. Smaller priorities pop first.
///
/// The priority of an item must not change while it is queued.
pub trait Prioritized {
    type Priority: Ord;

    fn priority(&self) -> Self::Priority;
}

/// Stable reference to an item in a [`PriorityQueue`].
///
/// A handle is valid until its item is popped or removed. Slots are recycled
/// afterwards, so a stale handle may point at a newer item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

#[derive(Debug)]
struct Slot<T> {
    item: T,
    /// Index of this slot inside `PriorityQueue::heap`
    position: usize,
}

/// A binary min-heap with O(log n) arbitrary removal.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    heap: Vec<usize>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            heap: Vec::new(),
        }
    }
}

impl<T: Prioritized> PriorityQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued items.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Inserts an item in O(log n) and returns its handle.
    pub fn push(&mut self, item: T) -> Handle {
        let position = self.heap.len();
        let slot = Slot { item, position };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        self.heap.push(index);
        self.sift_up(position);
        Handle(index)
    }

    /// Returns the earliest item without removing it. O(1).
    pub fn peek_min(&self) -> Option<(Handle, &T)> {
        let &index = self.heap.first()?;
        self.slots[index]
            .as_ref()
            .map(|slot| (Handle(index), &slot.item))
    }

    /// Removes and returns the earliest item. O(log n).
    pub fn pop_min(&mut self) -> Option<T> {
        self.remove_at(0)
    }

    /// Removes the item currently at heap position `position`. O(log n).
    ///
    /// Returns `None` if the position is out of range.
    pub fn remove_at(&mut self, position: usize) -> Option<T> {
        let last = self.heap.len().checked_sub(1)?;
        if position > last {
            return None;
        }

        self.swap(position, last);
        let index = self.heap.pop()?;
        let slot = self.slots[index].take()?;
        self.free.push(index);

        // The element moved into the hole can violate the heap in either direction.
        if position < self.heap.len() && !self.sift_down(position) {
            self.sift_up(position);
        }

        Some(slot.item)
    }

    /// Removes the item behind `handle`. O(log n).
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let position = self.position(handle)?;
        self.remove_at(position)
    }

    /// Current heap position of the item behind `handle`.
    pub fn position(&self, handle: Handle) -> Option<usize> {
        self.slots
            .get(handle.0)?
            .as_ref()
            .map(|slot| slot.position)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.0)?
            .as_ref()
            .map(|slot| &slot.item)
    }

    /// Mutable access to a queued item. The item's priority must stay the same.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.0)?
            .as_mut()
            .map(|slot| &mut slot.item)
    }

    /// Iterates over `(heap position, item)` in array order, not priority order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.heap.iter().enumerate().filter_map(|(position, &index)| {
            self.slots[index]
                .as_ref()
                .map(|slot| (position, &slot.item))
        })
    }

    /// Drops every item.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.heap.clear();
    }

    fn less(&self, a: usize, b: usize) -> bool {
        match (&self.slots[self.heap[a]], &self.slots[self.heap[b]]) {
            (Some(a), Some(b)) => a.item.priority() < b.item.priority(),
            _ => false,
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        for position in [a, b] {
            if let Some(slot) = self.slots[self.heap[position]].as_mut() {
                slot.position = position;
            }
        }
    }

    fn sift_up(&mut self, mut position: usize) {
        while position > 0 {
            let parent = (position - 1) / 2;
            if !self.less(position, parent) {
                break;
            }
            self.swap(position, parent);
            position = parent;
        }
    }

    /// Returns `true` if the element moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let len = self.heap.len();
        let mut position = start;

        loop {
            let left = 2 * position + 1;
            if left >= len {
                break;
            }

            let right = left + 1;
            let smallest = if right < len && self.less(right, left) {
                right
            } else {
                left
            };

            if !self.less(smallest, position) {
                break;
            }
            self.swap(position, smallest);
            position = smallest;
        }

        position > start
    }
}
