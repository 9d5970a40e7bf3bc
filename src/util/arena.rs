use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::num::NonZeroU16;

use super::name_of;

/// First generation of a slot.
const GEN_FIRST: NonZeroU16 = match NonZeroU16::new(1) {
    Some(g) => g,
    None => unreachable!(),
};

/// Typed local index into an [`Arena`]. The index remains invalid after the
/// entry is removed, even if the slot is reused by a new entry.
pub struct Lid<T> {
    idx: u16,
    gen: NonZeroU16,
    _t: PhantomData<fn() -> T>,
}

impl<T> Lid<T> {
    /// Creates a handle from raw parts.
    #[inline(always)]
    const fn new(idx: u16, gen: NonZeroU16) -> Self {
        Self {
            idx,
            gen,
            _t: PhantomData,
        }
    }

    /// Returns the slot index. Slot indices are reused, so this is only
    /// meaningful for display and for mapping onto fixed resources.
    #[inline(always)]
    #[must_use]
    pub const fn index(self) -> u16 {
        self.idx
    }
}

impl<T> Clone for Lid<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Lid<T> {}

impl<T> PartialEq for Lid<T> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx && self.gen == other.gen
    }
}

impl<T> Eq for Lid<T> {}

impl<T> Hash for Lid<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.idx.hash(state);
        self.gen.hash(state);
    }
}

impl<T> Debug for Lid<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lid<{}>({}#{})", name_of!(T), self.idx, self.gen)
    }
}

impl<T> Display for Lid<T> {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Arena slot.
#[derive(Debug)]
struct Slot<T> {
    gen: NonZeroU16,
    val: Option<T>,
}

/// Fixed-capacity pool of entries addressed by generation-checked [`Lid`]s.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
    cap: u16,
}

impl<T> Arena<T> {
    /// Creates an empty arena that can hold at most `cap` entries.
    #[inline]
    #[must_use]
    pub const fn new(cap: u16) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            cap,
        }
    }

    /// Returns the maximum number of entries.
    #[inline(always)]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.cap as _
    }

    /// Returns the number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns whether the arena is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a new entry, returning its handle or [`None`] if the arena is
    /// full.
    pub fn insert(&mut self, v: T) -> Option<Lid<T>> {
        if let Some(i) = self.free.pop() {
            let s = &mut self.slots[usize::from(i)];
            debug_assert!(s.val.is_none());
            s.val = Some(v);
            return Some(Lid::new(i, s.gen));
        }
        if self.slots.len() >= usize::from(self.cap) {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let i = self.slots.len() as u16;
        self.slots.push(Slot {
            gen: GEN_FIRST,
            val: Some(v),
        });
        Some(Lid::new(i, GEN_FIRST))
    }

    /// Removes and returns the entry for `lid`. The handle and any copies of it
    /// become invalid.
    pub fn remove(&mut self, lid: Lid<T>) -> Option<T> {
        let s = self.slots.get_mut(usize::from(lid.idx))?;
        if s.gen != lid.gen || s.val.is_none() {
            return None;
        }
        s.gen = NonZeroU16::new(s.gen.get().wrapping_add(1)).unwrap_or(GEN_FIRST);
        self.free.push(lid.idx);
        s.val.take()
    }

    /// Returns whether `lid` refers to an existing entry.
    #[inline]
    #[must_use]
    pub fn contains(&self, lid: Lid<T>) -> bool {
        self.get(lid).is_some()
    }

    /// Returns a reference to the entry for `lid`.
    #[inline]
    #[must_use]
    pub fn get(&self, lid: Lid<T>) -> Option<&T> {
        (self.slots.get(usize::from(lid.idx)))
            .filter(|s| s.gen == lid.gen)
            .and_then(|s| s.val.as_ref())
    }

    /// Returns a mutable reference to the entry for `lid`.
    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, lid: Lid<T>) -> Option<&mut T> {
        (self.slots.get_mut(usize::from(lid.idx)))
            .filter(|s| s.gen == lid.gen)
            .and_then(|s| s.val.as_mut())
    }

    /// Returns an iterator over all entries and their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Lid<T>, &T)> {
        (self.slots.iter().enumerate()).filter_map(|(i, s)| {
            #[allow(clippy::cast_possible_truncation)]
            s.val.as_ref().map(|v| (Lid::new(i as u16, s.gen), v))
        })
    }

    /// Returns a mutable iterator over all entries and their handles.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Lid<T>, &mut T)> {
        (self.slots.iter_mut().enumerate()).filter_map(|(i, s)| {
            let gen = s.gen;
            #[allow(clippy::cast_possible_truncation)]
            s.val.as_mut().map(|v| (Lid::new(i as u16, gen), v))
        })
    }

    /// Returns the handle of the first entry matching predicate `f`.
    #[inline]
    pub fn find(&self, mut f: impl FnMut(&T) -> bool) -> Option<Lid<T>> {
        self.iter().find_map(|(lid, v)| f(v).then_some(lid))
    }

    /// Returns the handles of all entries matching predicate `f`.
    #[inline]
    pub fn filter(&self, mut f: impl FnMut(&T) -> bool) -> Vec<Lid<T>> {
        self.iter().filter_map(|(lid, v)| f(v).then_some(lid)).collect()
    }
}

impl<T> Default for Arena<T> {
    #[inline]
    fn default() -> Self {
        Self::new(u16::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse() {
        let mut a = Arena::new(2);
        let x = a.insert('x').unwrap();
        let y = a.insert('y').unwrap();
        assert!(a.insert('z').is_none());
        assert_eq!(a.len(), 2);

        assert_eq!(a.remove(x), Some('x'));
        assert_eq!(a.remove(x), None);
        let z = a.insert('z').unwrap();
        assert_eq!(z.index(), x.index());
        assert_ne!(z, x);
        assert_eq!(a.get(x), None);
        assert_eq!(a.get(z), Some(&'z'));
        assert_eq!(a.get(y), Some(&'y'));
    }

    #[test]
    fn iter() {
        let mut a = Arena::new(4);
        let lids: Vec<_> = (0..4).map(|i| a.insert(i).unwrap()).collect();
        a.remove(lids[1]);
        let v: Vec<_> = a.iter().map(|(_, &v)| v).collect();
        assert_eq!(v, [0, 2, 3]);
        for (_, v) in a.iter_mut() {
            *v *= 10;
        }
        assert_eq!(a.find(|&v| v == 20), Some(lids[2]));
        assert_eq!(a.filter(|&v| v > 0), [lids[2], lids[3]]);
    }

    #[test]
    fn debug_name() {
        struct Item;
        let mut a = Arena::new(1);
        let lid = a.insert(Item).unwrap();
        let s = format!("{lid:?}");
        assert_eq!(s, format!("Lid<Item>({}#1)", lid.index()));
    }
}
