//! Generational arena
//!
//! Regions, species and reactions are owned by the context and addressed by [`Handle`]s.
//! A destroyed entity frees its slot; the slot's generation is bumped so that any handle
//! still pointing at it is detected as stale instead of silently aliasing a newer entity.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::{Result, RxdError};

/// Typed, copyable reference into an [`Arena`]
pub struct Handle<T> {
    index: u32,
    generation: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation, marker: PhantomData }
    }

    /// Slot index (stable for the lifetime of the entity)
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation of the slot when the handle was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// Manual impls: derives would put bounds on `T`.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with generation counters
pub struct Arena<T> {
    kind: &'static str,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    /// Create an empty arena; `kind` names the entity in stale-handle errors
    pub fn new(kind: &'static str) -> Self {
        Self { kind, slots: Vec::new(), free: Vec::new() }
    }

    /// Insert a value and return its handle
    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            Handle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, value: Some(value) });
            Handle::new(index, 0)
        }
    }

    /// Remove the value behind `handle`
    pub fn remove(&mut self, handle: Handle<T>) -> Result<T> {
        let kind = self.kind;
        let slot = self
            .slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
            .ok_or_else(|| stale(kind, handle))?;

        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        slot.value.take().ok_or_else(|| stale(kind, handle))
    }

    /// Borrow the value behind `handle`
    pub fn get(&self, handle: Handle<T>) -> Result<&T> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or_else(|| stale(self.kind, handle))
    }

    /// Mutably borrow the value behind `handle`
    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T> {
        let kind = self.kind;
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or_else(|| stale(kind, handle))
    }

    /// Whether `handle` refers to a live entity
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_ok()
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entities in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::new(index as u32, slot.generation), value))
        })
    }

    /// Live entities in slot order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (Handle::new(index as u32, generation), value))
        })
    }

    /// Handles of all live entities in slot order
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}

fn stale<T>(kind: &'static str, handle: Handle<T>) -> RxdError {
    RxdError::StaleHandle { kind, index: handle.index, generation: handle.generation }
}

// =================================================================================================
// Tests
// =================================================================================================
