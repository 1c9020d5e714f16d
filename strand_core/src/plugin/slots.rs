//! Fixed-capacity slot pool with generation-tagged keys
//!
//! The pools in this runtime (plugin slots, deferred timers) are fixed
//! arrays allocated by linear scan. Keys carry the slot's generation
//! counter, so a key that outlives its slot fails lookup instead of
//! reaching a recycled entry: stale handles and double-release are
//! rejected by construction.

/// Key addressing one occupied slot of a [`SlotPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl SlotKey {
    /// Slot index within the pool.
    pub fn index(&self) -> u32 {
        self.index
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Fixed-capacity arena: linear-scan allocation, generation-checked
/// lookup, exact reclamation.
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
}

impl<T> SlotPool<T> {
    /// Pool with room for `capacity` values.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                generation: 0,
                value: None,
            });
        }
        Self { slots }
    }

    /// Total capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    /// Allocate the first free slot for `value`.
    ///
    /// Returns `None` when the pool is exhausted; callers treat this
    /// as a non-fatal "not handled" condition.
    pub fn allocate(&mut self, value: T) -> Option<SlotKey> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.is_none() {
                slot.value = Some(value);
                return Some(SlotKey {
                    index: index as u32,
                    generation: slot.generation,
                });
            }
        }
        None
    }

    /// Release the slot addressed by `key`, returning its value.
    ///
    /// Bumps the generation so the released key (and any copy of it)
    /// stops resolving.
    pub fn release(&mut self, key: SlotKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation || slot.value.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.value.take()
    }

    /// Borrow the value addressed by `key`, if it is still in use.
    pub fn get(&self, key: SlotKey) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Mutably borrow the value addressed by `key`.
    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Iterate over occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SlotKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Iterate mutably over occupied slots.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotKey, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                let generation = slot.generation;
                slot.value.as_mut().map(|value| {
                    (
                        SlotKey {
                            index: index as u32,
                            generation,
                        },
                        value,
                    )
                })
            })
    }

    /// Release every occupied slot, returning the drained values.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::new();
        for slot in &mut self.slots {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                drained.push(value);
            }
        }
        drained
    }
}
