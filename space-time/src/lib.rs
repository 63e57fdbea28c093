//! Generic, snapshot-capable storage backing simulated architectural state.
//!
//! [`SpaceTime`] implements [`Allocator`] for both scalar objects and fixed-size arrays of
//! objects, each keyed by a [`SpaceTimeId`]. Every object type gets its own
//! [`generational_arena::Arena`], found through a small type map, so unrelated state (e.g.
//! integer registers vs. CSRs) never shares storage.
//!
//! On top of the [`Allocator`] surface, [`SpaceTime`] offers a cheap history mechanism:
//! [`SpaceTime::make_snapshot`] captures the whole type map, and
//! [`SpaceTime::restore_snapshot`] brings it back. This is what lets simulation front ends
//! implement undo, "what if" stepping, and rollback of speculative loads/stores without baking
//! snapshotting logic into every piece of architectural state individually.

pub mod allocator;
mod errors;
mod ids;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Bound, RangeBounds};

use generational_arena::Arena;

pub use allocator::{Allocator, ArrayAccessor, ArrayAccessorMut};
pub use errors::{InvalidIdError, InvalidSnapshotIdError};
pub use ids::SpaceTimeId;

/// Identifies a single scalar object stored in a [`SpaceTime`].
pub type Id<T> = SpaceTimeId<T, false>;
/// Identifies an array of objects stored in a [`SpaceTime`].
pub type ArrayId<T> = SpaceTimeId<T, true>;

trait AnyArena: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn box_clone(&self) -> Box<dyn AnyArena>;
}

impl<T: Clone + 'static> AnyArena for Arena<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn box_clone(&self) -> Box<dyn AnyArena> {
        Box::new(self.clone())
    }
}

/// A type map from `T` to `Arena<T>`, used as the backing store for either all scalar types or
/// all array types of a [`SpaceTime`].
#[derive(Default)]
struct ArenaMap(HashMap<TypeId, Box<dyn AnyArena>>);

impl ArenaMap {
    fn arena<T: Clone + 'static>(&self) -> Option<&Arena<T>> {
        self.0
            .get(&TypeId::of::<T>())
            .map(|b| b.as_any().downcast_ref::<Arena<T>>().expect("type map invariant"))
    }

    fn arena_mut<T: Clone + 'static>(&mut self) -> &mut Arena<T> {
        self.0
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Arena::<T>::new()))
            .as_any_mut()
            .downcast_mut::<Arena<T>>()
            .expect("type map invariant")
    }
}

impl Clone for ArenaMap {
    fn clone(&self) -> Self {
        ArenaMap(self.0.iter().map(|(id, arena)| (*id, arena.box_clone())).collect())
    }
}

impl fmt::Debug for ArenaMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaMap").field("types", &self.0.len()).finish()
    }
}

/// Identifies a previously captured [`SpaceTime`] snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(usize);

/// The default [`Allocator`] implementation, additionally supporting whole-state snapshots.
///
/// Every distinct `T` used with [`SpaceTime::insert`]/[`SpaceTime::insert_array`] gets its own
/// arena; unrelated objects are never moved or reused for a different type. Ids remain valid
/// (and are never reissued) for as long as their backing arena slot has not been removed, per
/// [`generational_arena`]'s generation counters.
#[derive(Debug, Default)]
pub struct SpaceTime {
    scalars: ArenaMap,
    arrays: ArenaMap,
    snapshots: Vec<Option<(ArenaMap, ArenaMap)>>,
}

impl SpaceTime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the entire current state, returning an id that can later be used to restore it.
    ///
    /// This is a structural clone of the type map (an `Arena` per stored type), which is cheap
    /// relative to the number of snapshots actually taken by a hart (triggers, speculative
    /// queues, and `whatIfStep` all take a handful at a time, not thousands).
    pub fn make_snapshot(&mut self) -> SnapshotId {
        let id = SnapshotId(self.snapshots.len());
        self.snapshots.push(Some((self.scalars.clone(), self.arrays.clone())));
        id
    }

    /// Restores state captured by a previous [`Self::make_snapshot`], without discarding it.
    pub fn restore_snapshot(&mut self, snapshot: SnapshotId) -> Result<(), InvalidSnapshotIdError> {
        let (scalars, arrays) = self
            .snapshots
            .get(snapshot.0)
            .and_then(Option::as_ref)
            .ok_or(InvalidSnapshotIdError)?;
        self.scalars = scalars.clone();
        self.arrays = arrays.clone();
        Ok(())
    }

    /// Discards a previously captured snapshot, freeing the memory it holds onto.
    pub fn drop_snapshot(&mut self, snapshot: SnapshotId) -> Result<(), InvalidSnapshotIdError> {
        let slot = self.snapshots.get_mut(snapshot.0).ok_or(InvalidSnapshotIdError)?;
        if slot.take().is_none() {
            return Err(InvalidSnapshotIdError);
        }
        Ok(())
    }
}

impl Allocator for SpaceTime {
    type Id<T> = Id<T>;
    type ArrayId<T> = ArrayId<T>;

    fn insert<T: Clone>(&mut self, object: T) -> Self::Id<T>
    where
        T: 'static,
    {
        SpaceTimeId::new(self.scalars.arena_mut::<T>().insert(object))
    }

    fn insert_array<T: Copy>(&mut self, object: T, n: usize) -> Self::ArrayId<T>
    where
        T: 'static,
    {
        SpaceTimeId::new(self.arrays.arena_mut::<Vec<T>>().insert(vec![object; n]))
    }

    fn remove<T: Clone + 'static>(&mut self, id: Self::Id<T>) -> Result<(), InvalidIdError> {
        self.scalars
            .arena_mut::<T>()
            .remove(id.index)
            .map(|_| ())
            .ok_or(InvalidIdError)
    }

    fn remove_array<T: Copy + 'static>(&mut self, id: Self::ArrayId<T>) -> Result<(), InvalidIdError> {
        self.arrays
            .arena_mut::<Vec<T>>()
            .remove(id.index)
            .map(|_| ())
            .ok_or(InvalidIdError)
    }

    fn pop<T: Clone + 'static>(&mut self, id: Self::Id<T>) -> Result<T, InvalidIdError> {
        self.scalars.arena_mut::<T>().remove(id.index).ok_or(InvalidIdError)
    }

    fn get<T: Clone + 'static>(&self, id: Self::Id<T>) -> Result<&T, InvalidIdError> {
        self.scalars
            .arena::<T>()
            .and_then(|arena| arena.get(id.index))
            .ok_or(InvalidIdError)
    }

    fn get_array<'a, T: 'a + Copy>(
        &'a self,
        id: Self::ArrayId<T>,
    ) -> Result<impl ArrayAccessor<'a, T>, InvalidIdError>
    where
        T: 'static,
    {
        let vec = self
            .arrays
            .arena::<Vec<T>>()
            .and_then(|arena| arena.get(id.index))
            .ok_or(InvalidIdError)?;
        Ok(SliceAccessor::from_shared(vec))
    }

    fn get_mut<T: Clone + 'static>(&mut self, id: Self::Id<T>) -> Result<&mut T, InvalidIdError> {
        self.scalars.arena_mut::<T>().get_mut(id.index).ok_or(InvalidIdError)
    }

    fn get_array_mut<'a, T: 'a + Copy>(
        &'a mut self,
        id: Self::ArrayId<T>,
    ) -> Result<impl ArrayAccessorMut<'a, T>, InvalidIdError>
    where
        T: 'static,
    {
        let vec = self
            .arrays
            .arena_mut::<Vec<T>>()
            .get_mut(id.index)
            .ok_or(InvalidIdError)?;
        Ok(SliceAccessor::from_unique(vec))
    }
}

/// An [`ArrayAccessor`]/[`ArrayAccessorMut`] over a single arena slot's backing `Vec<T>`.
///
/// The accessor is built once from either a shared or unique borrow of the `Vec`, after which
/// individual elements are reached through a raw pointer. This matches the shape of
/// [`ArrayAccessorMut`]: every per-element method only takes `&self`, because uniqueness of the
/// underlying storage was already established when the accessor was created, not on each call.
pub struct SliceAccessor<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

impl<'a, T> SliceAccessor<'a, T> {
    fn from_shared(vec: &'a Vec<T>) -> Self {
        Self {
            ptr: vec.as_ptr() as *mut T,
            len: vec.len(),
            _marker: PhantomData,
        }
    }

    fn from_unique(vec: &'a mut Vec<T>) -> Self {
        Self {
            ptr: vec.as_mut_ptr(),
            len: vec.len(),
            _marker: PhantomData,
        }
    }

    fn as_slice(&self) -> &'a [T] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    fn as_slice_mut(&self) -> &'a mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    fn resolve_range<R: RangeBounds<usize>>(&self, range: R) -> Option<(usize, usize)> {
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e + 1,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => self.len,
        };
        if start > end || end > self.len {
            return None;
        }
        Some((start, end))
    }
}

impl<'a, T: 'a + Copy> ArrayAccessor<'a, T> for SliceAccessor<'a, T> {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Option<T> {
        self.as_slice().get(index).copied()
    }

    fn get_ref(&self, index: usize) -> Option<&'a T> {
        self.as_slice().get(index)
    }

    fn read(&self, buf: &mut [T], index: usize) -> bool {
        let Some((start, end)) = self.resolve_range(index..index + buf.len()) else {
            return false;
        };
        buf.copy_from_slice(&self.as_slice()[start..end]);
        true
    }

    fn iter_range<R>(&self, index_range: R) -> Option<impl IntoIterator<Item = &'a T> + 'a>
    where
        R: RangeBounds<usize>,
    {
        let (start, end) = self.resolve_range(index_range)?;
        Some(self.as_slice()[start..end].iter())
    }
}

impl<'a, T: 'a + Copy> ArrayAccessorMut<'a, T> for SliceAccessor<'a, T> {
    fn get_mut(&self, index: usize) -> Option<&'a mut T> {
        self.as_slice_mut().get_mut(index)
    }

    fn set(&self, index: usize, value: T) -> bool {
        match self.as_slice_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn write(&self, index: usize, buf: &[T]) -> bool {
        let Some((start, end)) = self.resolve_range(index..index + buf.len()) else {
            return false;
        };
        self.as_slice_mut()[start..end].copy_from_slice(buf);
        true
    }

    fn iter_range_mut<R>(&self, index_range: R) -> Option<impl IntoIterator<Item = &'a mut T> + 'a>
    where
        R: RangeBounds<usize>,
    {
        let (start, end) = self.resolve_range(index_range)?;
        Some(self.as_slice_mut()[start..end].iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_set() {
        let mut st = SpaceTime::new();
        let id = st.insert(42u32);
        assert_eq!(*st.get(id).unwrap(), 42);
        *st.get_mut(id).unwrap() = 7;
        assert_eq!(*st.get(id).unwrap(), 7);
    }

    #[test]
    fn remove_invalidates_id() {
        let mut st = SpaceTime::new();
        let id = st.insert(1u32);
        st.remove(id).unwrap();
        assert!(st.get(id).is_err());
    }

    #[test]
    fn pop_returns_value() {
        let mut st = SpaceTime::new();
        let id = st.insert(String::from("hello"));
        assert_eq!(st.pop(id).unwrap(), "hello");
        assert!(st.get(id).is_err());
    }

    #[test]
    fn array_round_trip() {
        let mut st = SpaceTime::new();
        let id = st.insert_array(0u8, 8);
        {
            let accessor = st.get_array_mut(id).unwrap();
            for i in 0..8 {
                accessor.set(i, i as u8 * 2);
            }
        }
        let accessor = st.get_array(id).unwrap();
        assert_eq!(accessor.len(), 8);
        for i in 0..8 {
            assert_eq!(accessor.get(i), Some(i as u8 * 2));
        }
    }

    #[test]
    fn snapshot_restores_scalars() {
        let mut st = SpaceTime::new();
        let id = st.insert(1u32);
        let snap = st.make_snapshot();
        *st.get_mut(id).unwrap() = 99;
        assert_eq!(*st.get(id).unwrap(), 99);
        st.restore_snapshot(snap).unwrap();
        assert_eq!(*st.get(id).unwrap(), 1);
    }

    #[test]
    fn snapshot_restores_arrays() {
        let mut st = SpaceTime::new();
        let id = st.insert_array(0u32, 4);
        let snap = st.make_snapshot();
        st.get_array_mut(id).unwrap().set(2, 55);
        assert_eq!(st.get_array(id).unwrap().get(2), Some(55));
        st.restore_snapshot(snap).unwrap();
        assert_eq!(st.get_array(id).unwrap().get(2), Some(0));
    }

    #[test]
    fn dropped_snapshot_cannot_be_restored() {
        let mut st = SpaceTime::new();
        let snap = st.make_snapshot();
        st.drop_snapshot(snap).unwrap();
        assert!(st.restore_snapshot(snap).is_err());
    }
}
