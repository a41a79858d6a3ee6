use std::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::{Index, IndexMut},
};

/// Stable reference to a record living inside of an [`ObjectPool`].
///
/// A key is a dense slot index plus the generation of that slot. Every backing
/// array of the pool owns a range of indices that is never handed out again, so
/// keys can't alias after an array is dropped, and the generation catches keys to
/// slots that were freed and reused.
pub struct Key<T> {
    index: usize,
    generation: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    /// Dense slot index of the record.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Reinterprets the key as a key to another record type.
    #[inline]
    pub(crate) fn cast<U>(self) -> Key<U> {
        Key {
            index: self.index,
            generation: self.generation,
            marker: PhantomData,
        }
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Key<T> {}

impl<T> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}v{})", self.index, self.generation)
    }
}

enum Entry<T> {
    Occupied(T),
    /// Link to the next vacant slot of the same array.
    Vacant { next_free: Option<u32> },
}

struct Slot<T> {
    generation: u32,
    entry: Entry<T>,
}

/// One flat backing array of the pool.
///
/// Vacant slots form a singly linked list threaded through the slots themselves.
///
/// ```text
///  base                                                   base + capacity
///   +----------+----------+----------+----------+----------+
///   | Occupied |  Vacant  | Occupied |  Vacant  |  Vacant  |
///   +----------+----|-----+----------+--^--|----+--^-------+
///                   |                   |  |       |
///   free_head ------+-------------------+  +-------+
/// ```
struct BackingArray<T> {
    /// First dense index owned by this array.
    base: usize,
    slots: Box<[Slot<T>]>,
    free_head: Option<u32>,
    live: usize,
}

impl<T> BackingArray<T> {
    fn new(base: usize, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|slot| Slot {
                generation: 0,
                entry: Entry::Vacant {
                    next_free: (slot + 1 < capacity).then(|| (slot + 1) as u32),
                },
            })
            .collect();

        Self {
            base,
            slots,
            free_head: Some(0),
            live: 0,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn contains(&self, index: usize) -> bool {
        index >= self.base && index < self.base + self.capacity()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// Arena handing out fixed-size records with stable keys.
///
/// The pool is a growing list of flat backing arrays. New arrays are 1.5 times
/// bigger than the previous one. An array whose records are all freed is dropped
/// straight away, unless it's the only empty array, in which case it's kept
/// around so the next allocations don't have to grow the pool again.
pub struct ObjectPool<T> {
    /// Backing arrays in creation order, so `base` is increasing.
    arrays: Vec<BackingArray<T>>,
    initial_capacity: usize,
    /// Capacity of the most recently created array.
    last_capacity: usize,
    next_base: usize,
    len: usize,
}

impl<T> ObjectPool<T> {
    /// Creates an empty pool. No memory is reserved until the first allocation.
    pub fn new(initial_capacity: usize) -> Self {
        assert!(initial_capacity > 0, "object pool needs a non-zero initial capacity");

        Self {
            arrays: Vec::new(),
            initial_capacity,
            last_capacity: 0,
            next_base: 0,
            len: 0,
        }
    }

    /// Number of live records.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total number of slots over every backing array.
    pub fn capacity(&self) -> usize {
        self.arrays.iter().map(BackingArray::capacity).sum()
    }

    /// Number of backing arrays currently held.
    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }

    /// Moves `value` into the pool and returns the key to reach it.
    pub fn allocate(&mut self, value: T) -> Key<T> {
        // Most recently created arrays are the most likely ones to have room.
        let position = match self.arrays.iter().rposition(|array| array.free_head.is_some()) {
            Some(position) => position,
            None => self.grow(),
        };

        let array = &mut self.arrays[position];
        let Some(slot_index) = array.free_head else {
            unreachable!("selected backing array has no vacant slot");
        };
        let slot = &mut array.slots[slot_index as usize];

        array.free_head = match slot.entry {
            Entry::Vacant { next_free } => next_free,
            Entry::Occupied(_) => unreachable!("free list points at an occupied slot"),
        };
        slot.entry = Entry::Occupied(value);
        array.live += 1;
        self.len += 1;

        Key {
            index: array.base + slot_index as usize,
            generation: slot.generation,
            marker: PhantomData,
        }
    }

    /// Removes the record behind `key` from the pool and gives it back.
    ///
    /// Freeing a key this pool doesn't own is a contract violation and panics.
    pub fn free(&mut self, key: Key<T>) -> T {
        let position = self.locate(key);
        let array = &mut self.arrays[position];
        let slot_index = key.index - array.base;
        let slot = &mut array.slots[slot_index];

        let vacant = Entry::Vacant { next_free: array.free_head };
        let Entry::Occupied(value) = mem::replace(&mut slot.entry, vacant) else {
            unreachable!("located slot is vacant");
        };

        slot.generation = slot.generation.wrapping_add(1);
        array.free_head = Some(slot_index as u32);
        array.live -= 1;
        self.len -= 1;

        if array.is_empty() {
            // Keep a single empty array as a reuse buffer, drop any other one.
            let another_empty = self
                .arrays
                .iter()
                .enumerate()
                .any(|(i, other)| i != position && other.is_empty());

            if another_empty {
                self.arrays.remove(position);
            }
        }

        value
    }

    /// Returns a reference to the record behind `key`, or `None` if the key is stale
    /// or belongs to another pool.
    pub fn get(&self, key: Key<T>) -> Option<&T> {
        let position = self.find_array(key.index)?;
        let array = &self.arrays[position];
        let slot = &array.slots[key.index - array.base];

        match &slot.entry {
            Entry::Occupied(value) if slot.generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Mutable version of [`ObjectPool::get`].
    pub fn get_mut(&mut self, key: Key<T>) -> Option<&mut T> {
        let position = self.find_array(key.index)?;
        let array = &mut self.arrays[position];
        let slot = &mut array.slots[key.index - array.base];

        match &mut slot.entry {
            Entry::Occupied(value) if slot.generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Tells whether `key` points to a live record of this pool.
    pub fn contains(&self, key: Key<T>) -> bool {
        self.get(key).is_some()
    }

    /// Drops every live record and releases all the backing arrays.
    ///
    /// Keys handed out before the clear stay invalid forever.
    pub fn clear(&mut self) {
        self.arrays.clear();
        self.last_capacity = 0;
        self.len = 0;
    }

    /// Releases all the backing arrays without running the destructors of the live
    /// records.
    pub fn clear_without_drop(&mut self) {
        for array in self.arrays.drain(..) {
            for slot in array.slots {
                if let Entry::Occupied(value) = slot.entry {
                    mem::forget(value);
                }
            }
        }
        self.last_capacity = 0;
        self.len = 0;
    }

    /// Adds a new backing array and returns its position.
    #[cold]
    fn grow(&mut self) -> usize {
        let capacity = if self.last_capacity == 0 {
            self.initial_capacity
        } else {
            (self.last_capacity + self.last_capacity / 2).max(self.last_capacity + 1)
        };

        assert!(capacity <= u32::MAX as usize, "object pool backing array too large");

        self.arrays.push(BackingArray::new(self.next_base, capacity));
        self.next_base += capacity;
        self.last_capacity = capacity;

        self.arrays.len() - 1
    }

    /// Range test over the arrays, which are sorted by `base`.
    fn find_array(&self, index: usize) -> Option<usize> {
        let position = self.arrays.partition_point(|array| array.base + array.capacity() <= index);

        (position < self.arrays.len() && self.arrays[position].contains(index)).then_some(position)
    }

    fn locate(&self, key: Key<T>) -> usize {
        match self.find_array(key.index) {
            Some(position) => {
                let array = &self.arrays[position];
                let slot = &array.slots[key.index - array.base];

                match slot.entry {
                    Entry::Occupied(_) if slot.generation == key.generation => position,
                    _ => panic!("{key:?} refers to a record that was already freed"),
                }
            }
            None => panic!("{key:?} is not owned by this object pool"),
        }
    }
}

impl<T> Index<Key<T>> for ObjectPool<T> {
    type Output = T;

    #[inline]
    fn index(&self, key: Key<T>) -> &Self::Output {
        match self.get(key) {
            Some(value) => value,
            None => panic!("{key:?} is not a live record of this object pool"),
        }
    }
}

impl<T> IndexMut<Key<T>> for ObjectPool<T> {
    #[inline]
    fn index_mut(&mut self, key: Key<T>) -> &mut Self::Output {
        match self.get_mut(key) {
            Some(value) => value,
            None => panic!("{key:?} is not a live record of this object pool"),
        }
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("len", &self.len)
            .field("arrays", &self.arrays.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc};

    #[test]
    fn new_pool_is_empty() {
        let pool: ObjectPool<u8> = ObjectPool::new(4);

        assert!(pool.is_empty());
        assert_eq!(0, pool.capacity());
        assert_eq!(0, pool.array_count());
    }

    #[test]
    fn grows_by_one_and_a_half() {
        let mut pool = ObjectPool::new(16);

        let keys: Vec<_> = (0..16 + 24 + 1).map(|i| pool.allocate(i)).collect();

        assert_eq!(3, pool.array_count());
        assert_eq!(16 + 24 + 36, pool.capacity());

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(i, pool[*key]);
        }
    }

    #[test]
    fn tiny_capacity_still_grows() {
        let mut pool = ObjectPool::new(1);

        for i in 0..4 {
            pool.allocate(i);
        }

        // 1, 2, 3
        assert_eq!(3, pool.array_count());
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let mut pool = ObjectPool::new(4);

        let first = pool.allocate("a");
        assert_eq!("a", pool.free(first));

        let second = pool.allocate("b");

        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(pool.get(first).is_none());
        assert_eq!(Some(&"b"), pool.get(second));
    }

    #[test]
    fn keys_stay_stable_while_growing() {
        let mut pool = ObjectPool::new(2);
        let first = pool.allocate(10u64);

        for i in 0..100 {
            pool.allocate(i);
        }

        pool[first] += 1;
        assert_eq!(11, pool[first]);
    }

    #[test]
    fn keeps_a_single_empty_array() {
        let mut pool = ObjectPool::new(2);

        // Fill arrays of 2 and 3 slots.
        let keys: Vec<_> = (0..5).map(|i| pool.allocate(i)).collect();
        assert_eq!(2, pool.array_count());

        // Emptying the first array keeps it around.
        pool.free(keys[0]);
        pool.free(keys[1]);
        assert_eq!(2, pool.array_count());

        // Emptying the second one too drops it, a spare already exists.
        for key in &keys[2..] {
            pool.free(*key);
        }
        assert_eq!(1, pool.array_count());
        assert!(pool.is_empty());
    }

    #[test]
    fn allocation_prefers_most_recent_array() {
        let mut pool = ObjectPool::new(2);
        let keys: Vec<_> = (0..5).map(|i| pool.allocate(i)).collect();

        // One hole in each array.
        pool.free(keys[0]);
        pool.free(keys[4]);

        let key = pool.allocate(42);
        assert_eq!(keys[4].index(), key.index());
    }

    #[test]
    fn free_runs_destructor() {
        struct Counted(Rc<Cell<u32>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut pool = ObjectPool::new(4);

        let key = pool.allocate(Counted(drops.clone()));
        pool.allocate(Counted(drops.clone()));
        pool.allocate(Counted(drops.clone()));

        drop(pool.free(key));
        assert_eq!(1, drops.get());

        pool.clear();
        assert_eq!(3, drops.get());
    }

    #[test]
    fn clear_without_drop_skips_destructors() {
        struct Loud(Rc<Cell<u32>>);

        impl Drop for Loud {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut pool = ObjectPool::new(4);
        let key = pool.allocate(Loud(drops.clone()));

        pool.clear_without_drop();

        assert_eq!(0, drops.get());
        assert!(pool.is_empty());
        assert!(!pool.contains(key));
    }

    #[test]
    fn keys_do_not_alias_after_clear() {
        let mut pool = ObjectPool::new(4);
        let old = pool.allocate(1);
        pool.clear();
        let new = pool.allocate(2);

        assert_ne!(old.index(), new.index());
        assert!(pool.get(old).is_none());
    }

    #[test]
    fn growth_restarts_after_clear() {
        let mut pool = ObjectPool::new(4);
        for i in 0..10 {
            pool.allocate(i);
        }
        assert_eq!(4 + 6, pool.capacity());

        pool.clear();
        pool.allocate(0);
        assert_eq!(4, pool.capacity());

        pool.clear_without_drop();
        pool.allocate(0);
        assert_eq!(4, pool.capacity());
    }

    #[test]
    #[should_panic(expected = "already freed")]
    fn double_free_panics() {
        let mut pool = ObjectPool::new(4);
        let key = pool.allocate(1);
        pool.allocate(2);
        pool.free(key);
        pool.free(key);
    }

    #[test]
    #[should_panic(expected = "not owned")]
    fn foreign_key_panics() {
        let mut small = ObjectPool::new(1);
        let mut big = ObjectPool::new(64);

        let key = (0..10).map(|i| big.allocate(i)).last().unwrap();
        small.allocate(0);
        small.free(key);
    }
}
