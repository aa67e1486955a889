//! Entry storage: slot arena and the active-timer list
//!
//! Entries live in a slot arena owned by the queue state; the active list
//! is doubly linked through slot indices, so insert and remove are O(1)
//! regardless of due times. Slots are reused, and a per-slot generation
//! makes stale keys resolve to nothing instead of a recycled neighbour.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::Span;

use crate::event::Event;
use crate::ticks::TICKS_INFINITE;

/// Stable identity of a timer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryKey {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

/// What to release when the entry reaches quiescence.
pub(crate) enum Notify {
    None,
    Event(Arc<Event>),
    Futures(Vec<oneshot::Sender<()>>),
}

/// Callback binding fixed at construction.
pub(crate) struct FireContext {
    pub(crate) callback: Arc<dyn Fn() + Send + Sync + 'static>,
    pub(crate) span: Option<Span>,
}

impl Clone for FireContext {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            span: self.span.clone(),
        }
    }
}

/// A live timer entry. Every field is guarded by the queue mutex.
pub(crate) struct EntryRecord {
    /// Milliseconds from `start_tick` at which the entry is due;
    /// `TICKS_INFINITE` means detached from the active list.
    pub(crate) due_offset: u32,
    /// Repeat interval; `TICKS_INFINITE` means one-shot.
    pub(crate) period: u32,
    /// Tick at which the current interval began.
    pub(crate) start_tick: u32,
    pub(crate) prev: Option<u32>,
    pub(crate) next: Option<u32>,
    pub(crate) canceled: bool,
    /// Callbacks currently executing for this entry.
    pub(crate) in_flight: u32,
    pub(crate) notify: Notify,
    pub(crate) fire: FireContext,
}

struct Slot {
    generation: u32,
    record: Option<EntryRecord>,
}

/// Arena of timer entries plus the head of the active list.
pub(crate) struct EntryArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub(crate) head: Option<u32>,
    linked: usize,
}

impl EntryArena {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            linked: 0,
        }
    }

    /// Allocates a detached entry and returns its key.
    pub(crate) fn insert(&mut self, fire: FireContext) -> EntryKey {
        let record = EntryRecord {
            due_offset: TICKS_INFINITE,
            period: TICKS_INFINITE,
            start_tick: 0,
            prev: None,
            next: None,
            canceled: false,
            in_flight: 0,
            notify: Notify::None,
            fire,
        };
        match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                debug_assert!(entry.record.is_none());
                entry.record = Some(record);
                EntryKey {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    record: Some(record),
                });
                EntryKey {
                    slot,
                    generation: 0,
                }
            }
        }
    }

    /// Resolves a key, returning None for released or recycled slots.
    pub(crate) fn get(&self, key: EntryKey) -> Option<&EntryRecord> {
        let slot = self.slots.get(key.slot as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.record.as_ref()
    }

    pub(crate) fn get_mut(&mut self, key: EntryKey) -> Option<&mut EntryRecord> {
        let slot = self.slots.get_mut(key.slot as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.record.as_mut()
    }

    /// Direct access to a slot known to be live. Resolving a freed slot is
    /// queue corruption.
    pub(crate) fn record(&self, slot: u32) -> &EntryRecord {
        self.slots[slot as usize]
            .record
            .as_ref()
            .expect("timer slot resolved after release")
    }

    pub(crate) fn record_mut(&mut self, slot: u32) -> &mut EntryRecord {
        self.slots[slot as usize]
            .record
            .as_mut()
            .expect("timer slot resolved after release")
    }

    pub(crate) fn generation(&self, slot: u32) -> u32 {
        self.slots[slot as usize].generation
    }

    /// Splices a detached entry onto the head of the active list.
    pub(crate) fn link_head(&mut self, slot: u32) {
        let old_head = self.head;
        {
            let record = self.record_mut(slot);
            debug_assert!(record.prev.is_none() && record.next.is_none());
            record.next = old_head;
        }
        if let Some(head) = old_head {
            self.record_mut(head).prev = Some(slot);
        }
        self.head = Some(slot);
        self.linked += 1;
    }

    /// Unlinks an entry from the active list. Linkage pointers are
    /// cleared; the caller resets the schedule fields.
    pub(crate) fn unlink(&mut self, slot: u32) {
        let (prev, next) = {
            let record = self.record_mut(slot);
            (record.prev.take(), record.next.take())
        };
        match prev {
            Some(prev) => self.record_mut(prev).next = next,
            None => self.head = next,
        }
        if let Some(next) = next {
            self.record_mut(next).prev = prev;
        }
        self.linked -= 1;
    }

    /// Returns the slot to the free list and invalidates outstanding keys.
    pub(crate) fn release(&mut self, slot: u32) {
        let entry = &mut self.slots[slot as usize];
        debug_assert!(entry.record.is_some());
        entry.record = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot);
    }

    /// Number of entries in the active list.
    pub(crate) fn linked_len(&self) -> usize {
        self.linked
    }

    /// Number of allocated entries, linked or detached.
    pub(crate) fn live_len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Walks the list and checks every structural invariant: mutual
    /// prev/next consistency, no cycles, and the membership bijection
    /// (linked ⇔ finite due_offset).
    #[cfg(test)]
    pub(crate) fn check_consistency(&self) {
        let mut seen = 0usize;
        let mut prev: Option<u32> = None;
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let record = self.record(slot);
            assert_eq!(record.prev, prev, "prev link mismatch at slot {slot}");
            assert_ne!(
                record.due_offset, TICKS_INFINITE,
                "linked entry {slot} has no deadline"
            );
            seen += 1;
            assert!(seen <= self.live_len(), "cycle through slot {slot}");
            prev = Some(slot);
            cursor = record.next;
        }
        assert_eq!(seen, self.linked, "linked count out of sync");
        // Every live detached entry must carry the sentinel and no links.
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(record) = &slot.record {
                if record.due_offset == TICKS_INFINITE {
                    assert!(
                        record.prev.is_none() && record.next.is_none(),
                        "detached entry {index} still linked"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_fire() -> FireContext {
        FireContext {
            callback: Arc::new(|| {}),
            span: None,
        }
    }

    fn linked_slots(arena: &EntryArena) -> Vec<u32> {
        let mut slots = Vec::new();
        let mut cursor = arena.head;
        while let Some(slot) = cursor {
            slots.push(slot);
            cursor = arena.record(slot).next;
        }
        slots
    }

    #[test]
    fn test_insert_is_detached() {
        let mut arena = EntryArena::new();
        let key = arena.insert(noop_fire());
        let record = arena.get(key).unwrap();
        assert_eq!(record.due_offset, TICKS_INFINITE);
        assert_eq!(record.period, TICKS_INFINITE);
        assert_eq!(arena.linked_len(), 0);
        arena.check_consistency();
    }

    #[test]
    fn test_link_unlink_middle() {
        let mut arena = EntryArena::new();
        let keys: Vec<_> = (0..3).map(|_| arena.insert(noop_fire())).collect();
        for key in &keys {
            arena.record_mut(key.slot).due_offset = 10;
            arena.link_head(key.slot);
        }
        arena.check_consistency();
        // Insertion is at the head, so the list is reversed.
        assert_eq!(
            linked_slots(&arena),
            vec![keys[2].slot, keys[1].slot, keys[0].slot]
        );

        arena.unlink(keys[1].slot);
        arena.record_mut(keys[1].slot).due_offset = TICKS_INFINITE;
        arena.check_consistency();
        assert_eq!(linked_slots(&arena), vec![keys[2].slot, keys[0].slot]);
    }

    #[test]
    fn test_unlink_head_and_tail() {
        let mut arena = EntryArena::new();
        let keys: Vec<_> = (0..3).map(|_| arena.insert(noop_fire())).collect();
        for key in &keys {
            arena.record_mut(key.slot).due_offset = 10;
            arena.link_head(key.slot);
        }
        arena.unlink(keys[2].slot); // head
        arena.record_mut(keys[2].slot).due_offset = TICKS_INFINITE;
        arena.unlink(keys[0].slot); // tail
        arena.record_mut(keys[0].slot).due_offset = TICKS_INFINITE;
        arena.check_consistency();
        assert_eq!(linked_slots(&arena), vec![keys[1].slot]);
    }

    #[test]
    fn test_release_invalidates_key() {
        let mut arena = EntryArena::new();
        let key = arena.insert(noop_fire());
        arena.release(key.slot);
        assert!(arena.get(key).is_none());

        // The slot is reused with a fresh generation; the old key stays dead.
        let fresh = arena.insert(noop_fire());
        assert_eq!(fresh.slot, key.slot);
        assert_ne!(fresh.generation, key.generation);
        assert!(arena.get(key).is_none());
        assert!(arena.get(fresh).is_some());
    }
}
