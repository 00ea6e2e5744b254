//! A generational arena that remembers insertion order.
//!
//! Elements live in a single vector of slots. A [`Key`] names a slot together with the generation
//! of the element it was handed out for, so that a key outliving its element is detected on use
//! instead of silently aliasing whatever was stored in the slot afterwards.
//!
//! Occupied slots are additionally threaded on a doubly linked list through their indices. This
//! gives constant time insertion and removal while iteration still visits elements in the order
//! they were inserted.
//!
//! [`Key`]: struct.Key.html

/// An index into a slotmap.
///
/// The key remains valid until the entry is removed. Accessing the slotmap with the key after the
/// entry was removed will fail, even if the slot was since reused for another element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    idx: u32,
    generation: Generation,
}

/// The generation counter of a slot.
///
/// Odd values mark an occupied slot, even values a vacant one. Incremented on every insertion and
/// removal so a stale key can never match again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Generation(u32);

/// A link in the order list. `NIL` ends the list.
type Link = u32;

const NIL: Link = u32::MAX;

struct Slot<T> {
    generation: Generation,
    /// Element storage, `None` when vacant.
    value: Option<T>,
    /// Previous occupied slot, or the next free slot while vacant.
    prev: Link,
    /// Next occupied slot.
    next: Link,
}

/// Provides a slotmap with a fixed upper bound on the number of elements.
///
/// ```
/// use usernet::managed::SlotMap;
///
/// let mut map = SlotMap::with_limit(4);
/// let key = map.insert(42).unwrap();
/// assert_eq!(map.get(key).cloned(), Some(42));
/// assert_eq!(map.remove(key), Some(42));
/// assert!(map.get(key).is_none());
/// ```
pub struct SlotMap<T> {
    slots: Vec<Slot<T>>,
    free_top: Link,
    head: Link,
    tail: Link,
    len: usize,
    limit: usize,
}

/// Iterator over the keys and elements of a slotmap, in insertion order.
pub struct Iter<'a, T> {
    map: &'a SlotMap<T>,
    cursor: Link,
}

impl Key {
    /// A compact representation, suitable as a readiness token.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation.0) << 32) | u64::from(self.idx)
    }

    /// Restore a key from its compact representation.
    ///
    /// Any bit pattern is accepted, lookups with a key that was never handed out simply fail.
    pub fn from_bits(bits: u64) -> Self {
        Key {
            idx: bits as u32,
            generation: Generation((bits >> 32) as u32),
        }
    }
}

impl Generation {
    fn is_occupied(self) -> bool {
        self.0 & 1 == 1
    }

    fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

impl<T> SlotMap<T> {
    /// Create an empty map that holds at most `limit` elements.
    pub fn with_limit(limit: usize) -> Self {
        SlotMap {
            slots: Vec::new(),
            free_top: NIL,
            head: NIL,
            tail: NIL,
            len: 0,
            limit: limit.min(NIL as usize),
        }
    }

    /// The number of live elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if there are no live elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The maximum number of live elements.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Check if the key refers to a live element.
    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Retrieve a value by key.
    pub fn get(&self, key: Key) -> Option<&T> {
        let slot = self.slots.get(key.idx as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Retrieve a mutable value by key.
    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.idx as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Insert a value at the end of the insertion order.
    ///
    /// Fails if the map is at its limit, handing the value back.
    pub fn insert(&mut self, value: T) -> Result<Key, T> {
        if self.len >= self.limit {
            return Err(value);
        }

        let idx = match self.free_top {
            NIL => {
                self.slots.push(Slot {
                    generation: Generation::default(),
                    value: None,
                    prev: NIL,
                    next: NIL,
                });
                (self.slots.len() - 1) as Link
            },
            free => {
                self.free_top = self.slots[free as usize].prev;
                free
            },
        };

        let tail = self.tail;
        let slot = &mut self.slots[idx as usize];
        debug_assert!(!slot.generation.is_occupied());
        slot.generation.advance();
        slot.value = Some(value);
        slot.prev = tail;
        slot.next = NIL;
        let key = Key { idx, generation: slot.generation };

        match tail {
            NIL => self.head = idx,
            tail => self.slots[tail as usize].next = idx,
        }
        self.tail = idx;
        self.len += 1;
        Ok(key)
    }

    /// Remove an element.
    ///
    /// Returns `None` if the key did not refer to a live element, in particular when the element
    /// was already removed.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        if !self.contains(key) {
            return None;
        }

        let (prev, next) = {
            let slot = &self.slots[key.idx as usize];
            (slot.prev, slot.next)
        };

        match prev {
            NIL => self.head = next,
            prev => self.slots[prev as usize].next = next,
        }
        match next {
            NIL => self.tail = prev,
            next => self.slots[next as usize].prev = prev,
        }

        let slot = &mut self.slots[key.idx as usize];
        slot.generation.advance();
        slot.prev = self.free_top;
        slot.next = NIL;
        self.free_top = key.idx;
        self.len -= 1;
        slot.value.take()
    }

    /// Iterate over all live elements in insertion order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { map: self, cursor: self.head }
    }

    /// Collect the keys of all live elements in insertion order.
    ///
    /// Useful to visit elements while mutating the map.
    pub fn keys(&self) -> Vec<Key> {
        self.iter().map(|(key, _)| key).collect()
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Key, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor;
        let slot = self.map.slots.get(idx as usize)?;
        self.cursor = slot.next;
        let key = Key { idx, generation: slot.generation };
        slot.value.as_ref().map(|value| (key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple() {
        let mut map = SlotMap::with_limit(4);
        let a = map.insert(0usize).unwrap();
        let b = map.insert(1).unwrap();
        assert_eq!(map.get(a), Some(&0));
        assert_eq!(map.get(b), Some(&1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn stale_key() {
        let mut map = SlotMap::with_limit(1);
        let a = map.insert("first").unwrap();
        assert_eq!(map.remove(a), Some("first"));
        assert_eq!(map.remove(a), None);

        // The slot is reused but the old key stays dead.
        let b = map.insert("second").unwrap();
        assert_ne!(a, b);
        assert!(map.get(a).is_none());
        assert_eq!(map.get(b), Some(&"second"));
    }

    #[test]
    fn limit() {
        let mut map = SlotMap::with_limit(2);
        map.insert(0u8).unwrap();
        let b = map.insert(1).unwrap();
        assert_eq!(map.insert(2), Err(2));
        map.remove(b);
        assert!(map.insert(2).is_ok());
    }

    #[test]
    fn insertion_order() {
        let mut map = SlotMap::with_limit(8);
        let keys: Vec<_> = (0..5).map(|i| map.insert(i).unwrap()).collect();
        map.remove(keys[0]);
        map.remove(keys[2]);
        map.remove(keys[4]);
        map.insert(5).unwrap();

        let values: Vec<_> = map.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, [1, 3, 5]);
    }

    #[test]
    fn bits_roundtrip() {
        let mut map = SlotMap::with_limit(2);
        let a = map.insert(()).unwrap();
        assert_eq!(Key::from_bits(a.to_bits()), a);
        assert!(map.get(Key::from_bits(u64::MAX)).is_none());
    }
}
