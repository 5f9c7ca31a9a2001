use std::fmt;

use crate::gc::{Collector, Marker};
use crate::object::{AnyEdge, Gc, GcEdge, NodePtr, StatusFlags, Trace};

type Finalizer = Box<dyn FnOnce()>;

struct WeakEntry {
    /// uncounted, cleared once the key is found unreachable
    key: Option<NodePtr>,
    value: Option<AnyEdge>,
    finalizer: Option<Finalizer>,
}

impl WeakEntry {
    fn expire(&mut self) -> Expired {
        self.key = None;
        Expired {
            value: self.value.take(),
            finalizer: self.finalizer.take(),
        }
    }
}

/// What is left of an entry whose key died. The value must be dropped and the finalizer queued
/// once no table borrow is held.
pub(crate) struct Expired {
    pub(crate) value: Option<AnyEdge>,
    pub(crate) finalizer: Option<Finalizer>,
}

/// Key/value pairs where the key is held weakly and the value only as long as the key lives.
#[derive(Default)]
pub struct WeakTable {
    slots: Vec<Option<WeakEntry>>,
    free: Vec<usize>,
}

impl WeakTable {
    fn insert(&mut self, entry: WeakEntry) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    fn remove(&mut self, slot: usize) -> Option<WeakEntry> {
        let entry = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        Some(entry)
    }

    fn entry(&self, slot: usize) -> Option<&WeakEntry> {
        self.slots.get(slot)?.as_ref()
    }

    /// Entries that still have a live key.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|entry| entry.key.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the values of entries whose key is marked, repeating until nothing new gets marked,
    /// then expire every entry whose key stayed unmarked.
    pub(crate) fn mark_thru(&mut self, marker: &mut Marker) -> Vec<Expired> {
        let mut resolved = vec![false; self.slots.len()];
        loop {
            let mut progressed = false;
            for (slot, entry) in self.slots.iter().enumerate() {
                let Some(entry) = entry else { continue };
                let Some(key) = entry.key else { continue };
                if resolved[slot] || !marker.is_marked(key) {
                    continue;
                }
                resolved[slot] = true;
                progressed = true;
                if let Some(value) = &entry.value {
                    marker.mark(value.header());
                    marker.drain();
                }
            }
            if !progressed {
                break;
            }
        }
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| match entry {
                Some(entry) if entry.key.is_some() && !resolved[slot] => Some(entry.expire()),
                _ => None,
            })
            .collect()
    }

    /// Expire every entry keyed by `node`, which is being reclaimed.
    pub(crate) fn forget(&mut self, node: NodePtr) -> Vec<Expired> {
        self.slots
            .iter_mut()
            .flatten()
            .filter(|entry| entry.key == Some(node))
            .map(WeakEntry::expire)
            .collect()
    }
}

/// Owner of one weak table entry. Dropping it removes the entry without running the finalizer.
pub struct WeakRef {
    slot: usize,
    collector: &'static Collector,
}

impl WeakRef {
    pub(crate) fn new(
        collector: &'static Collector,
        key: NodePtr,
        value: Option<AnyEdge>,
        finalizer: Option<Finalizer>,
    ) -> Self {
        let header = unsafe { key.as_ref() };
        header.set_status(header.status().with(StatusFlags::WEAK_KEY));
        let slot = collector.roots().weak.borrow_mut().insert(WeakEntry {
            key: Some(key),
            value,
            finalizer,
        });
        Self { slot, collector }
    }

    /// `None` once the key has been found unreachable.
    pub fn key_node(&self) -> Option<NodePtr> {
        self.collector
            .roots()
            .weak
            .borrow()
            .entry(self.slot)
            .and_then(|entry| entry.key)
    }

    pub fn is_expired(&self) -> bool {
        self.key_node().is_none()
    }

    /// A counted edge to the key, if it is still alive and a `T`.
    pub fn key<T: Trace + 'static>(&self) -> Option<GcEdge<T>> {
        let node = self.key_node()?;
        unsafe { Gc::<T>::downcast(node).map(|gc| GcEdge::new(gc)) }
    }

    /// A counted edge to the value, if the entry hasn't expired and the value is a `T`.
    pub fn value<T: Trace + 'static>(&self) -> Option<GcEdge<T>> {
        self.collector
            .roots()
            .weak
            .borrow()
            .entry(self.slot)?
            .value
            .as_ref()?
            .downcast()
    }
}

impl Drop for WeakRef {
    fn drop(&mut self) {
        let removed = self.collector.roots().weak.borrow_mut().remove(self.slot);
        // dropping the value may release the last edge to it
        drop(removed);
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("slot", &self.slot)
            .field("key", &self.key_node())
            .finish()
    }
}
