use std::fmt;

use slab::Slab;

/// Opaque index into a [`Registry`].
///
/// The generation makes a handle go stale the moment its entry is removed, so
/// a slot reused by a later insert can never be reached through an old handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle {
    index: u32,
    generation: u32,
}

impl RawHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: T,
}

/// Arena of values addressed by generational handles.
pub struct Registry<T> {
    slots: Slab<Slot<T>>,
    next_generation: u32,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            slots: Slab::new(),
            // Generation 0 is never handed out.
            next_generation: 1,
        }
    }

    /// Store a value and return its handle
    pub fn insert(&mut self, value: T) -> RawHandle {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        let index = self.slots.insert(Slot { generation, value });
        RawHandle {
            index: index as u32,
            generation,
        }
    }

    pub fn get(&self, handle: RawHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, handle: RawHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .map(|slot| &mut slot.value)
    }

    pub fn contains(&self, handle: RawHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove and return the value, or `None` if the handle is stale
    pub fn remove(&mut self, handle: RawHandle) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        Some(self.slots.remove(handle.index as usize).value)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Handles of every live entry, in slot order
    pub fn handles(&self) -> Vec<RawHandle> {
        self.slots
            .iter()
            .map(|(index, slot)| RawHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RawHandle, &T)> {
        self.slots.iter().map(|(index, slot)| {
            (
                RawHandle {
                    index: index as u32,
                    generation: slot.generation,
                },
                &slot.value,
            )
        })
    }

    /// Remove every entry, returning them with their handles
    pub fn drain(&mut self) -> Vec<(RawHandle, T)> {
        let handles = self.handles();
        handles
            .into_iter()
            .filter_map(|handle| self.remove(handle).map(|value| (handle, value)))
            .collect()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut registry = Registry::new();
        let a = registry.insert("a");
        let b = registry.insert("b");

        assert_ne!(a, b);
        assert_eq!(registry.get(a), Some(&"a"));
        assert_eq!(registry.get(b), Some(&"b"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut registry = Registry::new();
        let old = registry.insert(1);
        assert_eq!(registry.remove(old), Some(1));

        // The slab hands the same index back out
        let new = registry.insert(2);
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);

        assert!(registry.get(old).is_none());
        assert!(registry.remove(old).is_none());
        assert_eq!(registry.get(new), Some(&2));
    }

    #[test]
    fn test_remove_twice_fails() {
        let mut registry = Registry::new();
        let handle = registry.insert("x");
        assert!(registry.remove(handle).is_some());
        assert!(registry.remove(handle).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drain() {
        let mut registry = Registry::new();
        registry.insert(1);
        registry.insert(2);
        registry.insert(3);

        let mut drained: Vec<i32> = registry.drain().into_iter().map(|(_, v)| v).collect();
        drained.sort();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(registry.is_empty());
    }
}
