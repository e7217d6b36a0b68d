/*! A sorted map with live cursor stability

# About
`TreeMap` is the public container built on top of the crate's [AVL tree](crate::hierarchies::avl_tree):
a sorted map from keys to values with _O(log(n))_ search, insert, and delete, ordered by the key
alone. It inherits the backing tree's defining property: a [`MapCursor`] taken from the map stays
valid across arbitrary later insertions and erasures on that map, including erasure of the very
entry it refers to.

# Example
```rust
    use acid_map::associative::avl_tree_map::TreeMap;

    let text = "and the final paragraph clearly came from the heart,
    or whatever cool yet sensitive organ Sadie kept in place of one.";

    let mut counts = TreeMap::<char, usize>::new();
    for ch in text.chars() {
        *counts.entry_or_default(ch) += 1;
    }

    println!("TreeMap character occurrence");
    let mut it = counts.iter();
    while let Some(e) = it.next() {
        println!("{:?}: {}", e.key(), e.value());
    }

    println!("\nTreeMap vowel occurrence");
    for vowel in ['a', 'e', 'i', 'o', 'u', 'y'] {
        eprintln!("{vowel}: {}", counts.get(&vowel).as_deref().copied().unwrap_or(0));
    }
```
*/

use crate::hierarchies::avl_tree::{AVLTree, Comparator, Cursor, NaturalOrder};

use std::borrow::Borrow;
use std::cell::{Ref, RefMut};
use std::cmp::Ordering;

/// The (key, value) pair observed by callers. The key is immutable once inserted; the value is
/// mutable through the handles the map hands back ([`MapCursor::value_mut`], [`TreeMap::get_mut`],
/// [`TreeMap::entry_or_default`]). Ordering, equality, and borrowing are all defined over the key
/// alone, so the backing tree never needs to know anything about `V`.
#[derive(Debug)]
pub struct Entry<K, V> {
    key: K,
    value: V,
}
impl<K, V> Entry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }
}
impl<K: PartialEq, V> PartialEq for Entry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl<K: Eq, V> Eq for Entry<K, V> {}
impl<K: PartialOrd, V> PartialOrd for Entry<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.key.partial_cmp(&other.key)
    }
}
impl<K: Ord, V> Ord for Entry<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}
impl<K, V> Borrow<K> for Entry<K, V> {
    fn borrow(&self) -> &K {
        &self.key
    }
}

/// The map's only error: a missing key on `at`/`at_mut`. Allocation failure isn't modeled as a
/// recoverable error (see `DESIGN.md`): `Vec`'s own OOM behavior is the honest Rust rendition of
/// that clause, same as the backing tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    NotFound,
}
impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::NotFound => write!(f, "key not found"),
        }
    }
}
impl std::error::Error for MapError {}

/// A sorted map, ordered by `C` (an [`Ord`]-driven [`NaturalOrder`] by default).
///
/// See the [module-level documentation](crate::associative::avl_tree_map) for more information.
#[derive(Debug)]
pub struct TreeMap<K, V, C = NaturalOrder> {
    tree: AVLTree<Entry<K, V>, C>,
}
impl<K, V> Default for TreeMap<K, V, NaturalOrder>
where
    K: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}
impl<K, V> TreeMap<K, V, NaturalOrder>
where
    K: Ord,
{
    /// Creates a new, empty map ordered by `K`'s own `Ord` impl.
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}
impl<K, V, C> TreeMap<K, V, C> {
    /// Creates a new, empty map ordered by the given comparator. Most of the map's methods need
    /// `C: Comparator<K>` (lookup by key); `insert`/`emplace` additionally need
    /// `C: Comparator<Entry<K, V>>` (they compare a freshly built entry against existing ones), a
    /// bound [`NaturalOrder`] satisfies for free but a hand-written comparator has to provide
    /// explicitly — see `DESIGN.md` for why the two bounds can't be derived from one another here.
    pub fn with_comparator(comparator: C) -> Self {
        TreeMap {
            tree: AVLTree::with_comparator(comparator),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Erases every live entry. Any [`MapCursor`] held across the call keeps safe (if stale)
    /// tombstone access to the value it referenced.
    pub fn clear(&mut self) {
        self.tree.clear()
    }
}
impl<K, V, C> TreeMap<K, V, C>
where
    C: Comparator<K>,
{
    /// `true` if the map has a live entry for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.tree.contains(key)
    }

    /// Always 0 or 1: whether an entry for `key` is currently live.
    pub fn count(&self, key: &K) -> usize {
        self.contains(key) as usize
    }

    /// The value associated with `key`, if any.
    pub fn get(&self, key: &K) -> Option<Ref<'_, V>> {
        self.tree.get(key).map(|r| Ref::map(r, |e| &e.value))
    }

    /// The value associated with `key`, mutably, if any.
    pub fn get_mut(&mut self, key: &K) -> Option<RefMut<'_, V>> {
        self.tree.get_mut(key).map(|r| RefMut::map(r, |e| &mut e.value))
    }

    /// As [`TreeMap::get`], but signals the missing-key case as [`MapError::NotFound`] rather
    /// than `None`.
    pub fn at(&self, key: &K) -> Result<Ref<'_, V>, MapError> {
        self.get(key).ok_or(MapError::NotFound)
    }

    /// As [`TreeMap::get_mut`], but signals the missing-key case as [`MapError::NotFound`].
    pub fn at_mut(&mut self, key: &K) -> Result<RefMut<'_, V>, MapError> {
        self.get_mut(key).ok_or(MapError::NotFound)
    }

    /// A cursor at the live entry for `key`, if any.
    pub fn find(&self, key: &K) -> Option<MapCursor<K, V>> {
        self.tree.find(key).map(MapCursor::new)
    }

    /// Erases the live entry for `key`. Returns `true` if something was removed.
    pub fn erase(&mut self, key: &K) -> bool {
        self.tree.remove(key)
    }

    /// The *try-emplace* insertion mode: checks for a live entry at `key` first, and only
    /// constructs a value (via `make`) when `key` is actually absent. The efficient path when `V`
    /// is expensive to build and repeated keys are common.
    pub fn try_emplace(&mut self, key: K, make: impl FnOnce() -> V) -> (bool, MapCursor<K, V>)
    where
        K: Clone,
    {
        let probe = key.clone();
        let (inserted, cursor) = self.tree.try_emplace(&probe, move || Entry { key, value: make() });
        (inserted, MapCursor::new(cursor))
    }

    /// Indexed access: returns a mutable reference to the value for `key`, inserting
    /// `V::default()` first if the key is absent. The Rust rendition of the core spec's
    /// `operator[]`-equivalent (Rust has no overloadable indexing operator that returns a
    /// mutable, default-inserting reference the way C++ does; `entry`-style access, as
    /// `std::collections::BTreeMap` itself uses, is the idiomatic substitute).
    pub fn entry_or_default(&mut self, key: K) -> RefMut<'_, V>
    where
        K: Clone,
        V: Default,
    {
        let (_, _) = self.try_emplace(key.clone(), V::default);
        self.get_mut(&key).expect("try_emplace just ensured the key is present")
    }
}
impl<K, V, C> TreeMap<K, V, C>
where
    C: Comparator<Entry<K, V>>,
{
    /// Inserts the given `(key, value)` entry. If a live entry for `key` already exists, nothing
    /// is inserted; the existing entry is left untouched and `(false, ..)` is reported, with a
    /// cursor at that existing entry — this never overwrites (see `DESIGN.md`'s note on the
    /// spec's two historical "emplace returns the wrong node" bugs, which this rewrite does not
    /// repeat).
    pub fn insert(&mut self, key: K, value: V) -> (bool, MapCursor<K, V>) {
        let (inserted, cursor) = self.tree.insert(Entry { key, value });
        (inserted, MapCursor::new(cursor))
    }

    /// The *emplace* insertion mode: `make` is called eagerly, before any duplicate check,
    /// because the key may not be separable from the value until both are constructed (mirroring
    /// C++'s `std::map::emplace`, where the key can come from arbitrary piecewise-constructor
    /// arguments). If the built entry collides with a live one, it's discarded and a cursor at
    /// the existing entry is returned.
    pub fn emplace(&mut self, make: impl FnOnce() -> (K, V)) -> (bool, MapCursor<K, V>) {
        let (inserted, cursor) = self.tree.emplace(|| {
            let (key, value) = make();
            Entry { key, value }
        });
        (inserted, MapCursor::new(cursor))
    }
}
impl<K, V, C> TreeMap<K, V, C> {
    /// Erases the entry a cursor currently references, returning a cursor at the in-order
    /// successor (captured before detachment), or `end` if none remains.
    pub fn erase_cursor(&mut self, cursor: MapCursor<K, V>) -> MapCursor<K, V> {
        MapCursor::new(self.tree.erase_cursor(cursor.inner))
    }

    /// A cursor at the minimum live entry, or `end` if the map is empty.
    pub fn begin(&self) -> MapCursor<K, V> {
        MapCursor::new(self.tree.begin())
    }

    /// The past-the-end cursor.
    pub fn end(&self) -> MapCursor<K, V> {
        MapCursor::new(self.tree.end())
    }

    /// A forward-only traversal over the map's current live entries, in key order. See
    /// [`crate::hierarchies::avl_tree::Iter`] for why this isn't a [`std::iter::Iterator`]: loop
    /// with `while let Some(entry) = it.next() { .. }`.
    pub fn iter(&self) -> Iter<K, V> {
        Iter {
            inner: self.tree.iter(),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for TreeMap<K, V, NaturalOrder>
where
    K: Ord,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = TreeMap::new();
        map.extend(iter);
        map
    }
}
impl<K, V, C> Extend<(K, V)> for TreeMap<K, V, C>
where
    C: Comparator<K>,
    K: Clone,
{
    /// Inserts every pair, first-key-wins on collision (matching [`TreeMap::insert`]'s
    /// non-overwriting contract — this does not behave like `HashMap::extend`'s last-wins).
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.try_emplace(k, move || v);
        }
    }
}

/// A stable handle to a logical position in a [`TreeMap`]. Thin wrapper over
/// [`crate::hierarchies::avl_tree::Cursor`]; see that type for the stability contract.
#[derive(Debug)]
pub struct MapCursor<K, V> {
    inner: Cursor<Entry<K, V>>,
}
impl<K, V> MapCursor<K, V> {
    fn new(inner: Cursor<Entry<K, V>>) -> Self {
        MapCursor { inner }
    }

    /// `true` if this cursor is the past-the-end position.
    pub fn is_end(&self) -> bool {
        self.inner.is_end()
    }

    /// The key at this position. `None` only for `end`.
    pub fn key(&self) -> Option<Ref<'_, K>> {
        self.inner.get().map(|r| Ref::map(r, |e| &e.key))
    }

    /// The value at this position. `None` only for `end`.
    pub fn value(&self) -> Option<Ref<'_, V>> {
        self.inner.get().map(|r| Ref::map(r, |e| &e.value))
    }

    /// The value at this position, mutably. `None` for `end` or a tombstoned position.
    pub fn value_mut(&mut self) -> Option<RefMut<'_, V>> {
        self.inner.get_mut().map(|r| RefMut::map(r, |e| &mut e.value))
    }

    /// Advances to the in-order successor, recursing through any tombstones.
    pub fn advance(&mut self) {
        self.inner.advance();
    }

    /// Retreats to the in-order predecessor, recursing through any tombstones.
    pub fn retreat(&mut self) {
        self.inner.retreat();
    }
}
impl<K, V> PartialEq for MapCursor<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}
impl<K, V> Eq for MapCursor<K, V> {}
impl<K, V> Clone for MapCursor<K, V> {
    fn clone(&self) -> Self {
        MapCursor {
            inner: self.inner.clone(),
        }
    }
}

/// See [`TreeMap::iter`].
#[derive(Debug)]
pub struct Iter<K, V> {
    inner: crate::hierarchies::avl_tree::Iter<Entry<K, V>>,
}
impl<K, V> Iter<K, V> {
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Ref<'_, Entry<K, V>>> {
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchies::avl_tree::verify;

    #[test]
    fn insert_get_and_size() {
        let mut map = TreeMap::<&str, u8>::new();
        assert_eq!(map.len(), 0);

        map.insert("Peter", 40);
        assert_eq!(map.len(), 1);
        map.insert("Brain", 39);
        map.insert("Remus", 22);
        map.insert("Bobson", 36);
        map.insert("Dingus", 18);
        map.insert("Dangus", 27);
        assert_eq!(map.len(), 6);

        assert!(map.contains(&"Dingus"));
        assert_eq!(*map.get(&"Peter").unwrap(), 40);

        // insert never overwrites: a duplicate key reports "not inserted" and leaves the
        // existing value untouched.
        let (inserted, existing) = map.insert("Peter", 41);
        assert!(!inserted);
        assert_eq!(*existing.value().unwrap(), 40);
        assert_eq!(*map.get(&"Peter").unwrap(), 40);
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn erase_by_key_and_miss() {
        let mut map = TreeMap::<&str, u8>::new();
        map.insert("Dangus", 27);
        map.insert("Dingus", 18);
        assert!(map.contains(&"Dangus"));
        assert!(map.erase(&"Dangus"));
        assert!(!map.contains(&"Dangus"));
        assert_eq!(map.len(), 1);
        assert!(!map.erase(&"Dangus"));
    }

    #[test]
    fn entry_or_default_inserts_then_accumulates() {
        let mut map = TreeMap::<char, usize>::new();
        for ch in "acbjfedacb".chars() {
            *map.entry_or_default(ch) += 1;
        }
        assert_eq!(*map.get(&'a').unwrap(), 2);
        assert_eq!(*map.get(&'b').unwrap(), 2);
        assert_eq!(*map.get(&'j').unwrap(), 1);
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn at_reports_not_found() {
        let map = TreeMap::<i32, &str>::new();
        match map.at(&1) {
            Err(MapError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn iter_yields_sorted_order() {
        let mut map = TreeMap::<usize, char>::new();
        for (index, ch) in "acbjfed".chars().enumerate() {
            map.insert(index, ch);
        }
        let mut it = map.iter();
        let mut sorted_keys = Vec::new();
        while let Some(e) = it.next() {
            sorted_keys.push(*e.key());
        }
        assert_eq!(sorted_keys, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn from_iterator_and_extend() {
        let mut map: TreeMap<i32, &str> = [(3, "c"), (1, "a"), (2, "b")].into_iter().collect();
        assert_eq!(map.len(), 3);
        map.extend([(4, "d"), (1, "overwrite-attempt")]);
        assert_eq!(map.len(), 4);
        // first-key-wins, matching `insert`'s non-overwriting contract.
        assert_eq!(*map.get(&1).unwrap(), "a");
    }

    // The six concrete scenarios from the core spec, exercised through the public map API.
    mod iterator_stability {
        use super::*;

        #[test]
        fn scenario_1_balanced_insert_and_sorted_traversal() {
            let mut map = TreeMap::<i32, ()>::new();
            for k in [5, 3, 8, 1, 4, 7, 9] {
                map.insert(k, ());
            }
            let mut it = map.iter();
            let mut keys = Vec::new();
            while let Some(e) = it.next() {
                keys.push(*e.key());
            }
            assert_eq!(keys, [1, 3, 4, 5, 7, 8, 9]);
        }

        #[test]
        fn scenario_2_descending_insert_stays_balanced() {
            let mut map = TreeMap::<i32, ()>::new();
            for k in (1..=10).rev() {
                map.insert(k, ());
            }
            let mut it = map.iter();
            let mut keys = Vec::new();
            while let Some(e) = it.next() {
                keys.push(*e.key());
            }
            assert_eq!(keys, (1..=10).collect::<Vec<_>>());
        }

        #[test]
        fn scenarios_3_and_4_rotation_shapes() {
            let mut left_rotated = TreeMap::<i32, ()>::new();
            for k in [1, 2, 3] {
                left_rotated.insert(k, ());
            }
            assert_eq!(*left_rotated.find(&2).unwrap().key().unwrap(), 2);

            let mut left_right_rotated = TreeMap::<i32, ()>::new();
            for k in [3, 1, 2] {
                left_right_rotated.insert(k, ());
            }
            let mut it = left_right_rotated.iter();
            let mut keys = Vec::new();
            while let Some(e) = it.next() {
                keys.push(*e.key());
            }
            assert_eq!(keys, [1, 2, 3]);
        }

        #[test]
        fn scenario_5_cursor_survives_its_own_erasure_and_advances() {
            let mut map = TreeMap::<i32, &str>::new();
            for k in 1..=7 {
                map.insert(k, "v");
            }
            let mut cursor = map.find(&4).unwrap();
            assert!(map.erase(&4));
            // still readable as a tombstone
            assert_eq!(*cursor.key().unwrap(), 4);
            cursor.advance();
            assert_eq!(*cursor.key().unwrap(), 5);
        }

        #[test]
        fn scenario_6_bulk_insert_erase_even_keys() {
            use rand::seq::SliceRandom;
            let mut keys: Vec<i32> = (1..=100).collect();
            keys.shuffle(&mut rand::rng());

            let mut map = TreeMap::<i32, ()>::new();
            for k in &keys {
                map.insert(*k, ());
            }
            assert_eq!(map.len(), 100);

            for k in (2..=100).step_by(2) {
                assert!(map.erase(&k));
            }
            assert_eq!(map.len(), 50);

            let mut it = map.iter();
            let mut sorted = Vec::new();
            while let Some(e) = it.next() {
                sorted.push(*e.key());
            }
            assert_eq!(sorted, (1..=99).step_by(2).collect::<Vec<_>>());

            let report = verify::check(&map.tree);
            assert!(report.ok(), "{:?}", report.violations);
        }
    }

    #[test]
    fn erase_cursor_returns_successor() {
        let mut map = TreeMap::<i32, &str>::new();
        for k in 1..=7 {
            map.insert(k, "v");
        }
        let cursor = map.find(&4).unwrap();
        let next = map.erase_cursor(cursor);
        assert_eq!(*next.key().unwrap(), 5);
    }

    #[test]
    fn clear_keeps_outstanding_cursor_readable() {
        let mut map = TreeMap::<i32, &str>::new();
        for k in 1..=5 {
            map.insert(k, "v");
        }
        let cursor = map.find(&3).unwrap();
        map.clear();
        assert_eq!(map.len(), 0);
        assert!(map.begin() == map.end());
        assert_eq!(*cursor.key().unwrap(), 3);
    }

    #[test]
    fn verifier_passes_after_mixed_insert_and_erase() {
        let mut map = TreeMap::<i32, &str>::new();
        for k in [31, 13, 23, 39, 41, 43, 8, 17, 19] {
            map.insert(k, "v");
        }
        map.erase(&31);
        map.erase(&8);
        map.insert(100, "v");

        let report = verify::check(&map.tree);
        assert!(report.ok(), "{:?}", report.violations);
    }
}
