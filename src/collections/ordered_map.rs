//! Arena-backed red-black tree keyed by `u64`.
//!
//! Nodes live in a slot vector and refer to each other by index, so parent
//! back-links never dangle and freed slots are recycled through a free list.
//! Every algorithm here (fixups, traversal, copy, validation) is iterative:
//! stack usage stays constant no matter how tall the tree gets, which matters
//! on a small kernel stack.
//!
//! Structural corruption discovered mid-algorithm (a link to a vacant slot, a
//! rotation without the child it pivots on, a parent that does not own its
//! child) is unrecoverable and panics with the operation named.

use core::cmp::Ordering;
use core::mem;

use alloc::vec::Vec;

use super::dynarray::DynArray;
use crate::errors::{MapError, MapResult};

type Link = Option<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

struct Node<V> {
    key: u64,
    value: V,
    color: Color,
    parent: Link,
    left: Link,
    right: Link,
}

enum Slot<V> {
    Occupied(Node<V>),
    Vacant(Link),
}

/// Which red-black or bookkeeping rule a [`OrderedMap::validate`] run found broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    RedRoot,
    /// A red node with a red child; carries the parent's key
    RedRed(u64),
    /// Two nil leaves are reached through different numbers of black nodes
    BlackHeight,
    /// In-order traversal is not strictly ascending at this key
    OutOfOrder(u64),
    /// A child does not point back at its parent; carries the child's key
    ParentLink(u64),
    /// Reachable node count differs from the recorded length
    Length,
    /// Cached leftmost entry is not the minimum
    Leftmost,
}

#[cold]
#[track_caller]
fn corrupted(operation: &'static str, detail: &'static str) -> ! {
    log::error!("ordered map corrupted during {}: {}", operation, detail);
    panic!("ordered map corrupted during {}: {}", operation, detail)
}

/// Ordered map from `u64` keys to owned values.
pub struct OrderedMap<V> {
    slots: Vec<Slot<V>>,
    free: Link,
    root: Link,
    leftmost: Link,
    len: usize,
    /// Bumped by every structural change; stale cursors compare against it.
    generation: u64,
}

/// Resumable in-order position inside an [`OrderedMap`].
///
/// Holds the current node plus an explicit stack of ancestors still to be
/// visited. A cursor does not borrow the map, so it can be kept across calls
/// and handed to [`OrderedMap::erase_at`]; any structural change to the map
/// invalidates it and it then reports no entries.
#[derive(Debug, Clone)]
pub struct Cursor {
    generation: u64,
    current: Link,
    stack: DynArray<usize>,
}

/// Pre-allocated arena storage for an [`OrderedMap`].
pub struct Reservation<V> {
    slots: Vec<Slot<V>>,
}

impl<V> Reservation<V> {
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

impl<V> OrderedMap<V> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: None,
            root: None,
            leftmost: None,
            len: 0,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pre-allocate room for `additional` more entries so that the next
    /// inserts cannot fail (useful before taking a spinlock).
    pub fn reserve(&mut self, additional: usize) -> MapResult<()> {
        self.slots
            .try_reserve(additional)
            .map_err(|_| MapError::OutOfMemory)
    }

    /// Number of entries the arena holds without reallocating.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Whether the next insert is guaranteed not to allocate.
    pub fn has_spare_slot(&self) -> bool {
        self.free.is_some() || self.slots.len() < self.slots.capacity()
    }

    /// Allocate empty arena storage for `capacity` entries.
    ///
    /// Pairs with [`install`](Self::install): allocate without holding the
    /// lock that guards the map, then install under it.
    pub fn reservation(capacity: usize) -> MapResult<Reservation<V>> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| MapError::OutOfMemory)?;
        Ok(Reservation { slots })
    }

    /// Move every slot into the larger `reservation` storage without
    /// allocating, and hand back the storage that is no longer used so it
    /// can be freed outside the lock.
    ///
    /// If the reservation is not larger than the current arena it is handed
    /// back untouched.
    pub fn install(&mut self, mut reservation: Reservation<V>) -> Reservation<V> {
        if reservation.slots.capacity() <= self.slots.capacity() {
            return reservation;
        }
        reservation.slots.extend(self.slots.drain(..));
        mem::swap(&mut self.slots, &mut reservation.slots);
        reservation
    }

    /// Lock `map` with room for at least one more entry.
    ///
    /// A full arena is grown with the lock released: a reservation at least
    /// `min_capacity` large (and double the current arena) is allocated
    /// unlocked, then installed under the lock. The returned guard always
    /// has a spare slot, so one insert through it does not allocate.
    pub fn lock_spare(map: &spin::Mutex<Self>, min_capacity: usize) -> MapResult<spin::MutexGuard<'_, Self>> {
        loop {
            let wanted = {
                let guard = map.lock();
                if guard.has_spare_slot() {
                    return Ok(guard);
                }
                guard.capacity().saturating_mul(2).max(min_capacity).max(1)
            };
            let reservation = Self::reservation(wanted)?;
            let retired = map.lock().install(reservation);
            drop(retired);
        }
    }

    fn node(&self, id: usize) -> &Node<V> {
        match self.slots.get(id) {
            Some(Slot::Occupied(node)) => node,
            _ => corrupted("lookup", "link to vacant slot"),
        }
    }

    fn node_mut(&mut self, id: usize) -> &mut Node<V> {
        match self.slots.get_mut(id) {
            Some(Slot::Occupied(node)) => node,
            _ => corrupted("lookup", "link to vacant slot"),
        }
    }

    fn set_color(&mut self, id: usize, color: Color) {
        self.node_mut(id).color = color;
    }

    fn reserve_node(&mut self) -> MapResult<()> {
        if self.free.is_some() {
            Ok(())
        } else {
            self.reserve(1)
        }
    }

    fn alloc_node(&mut self, node: Node<V>) -> usize {
        match self.free {
            Some(id) => {
                self.free = match self.slots[id] {
                    Slot::Vacant(next) => next,
                    Slot::Occupied(_) => corrupted("alloc", "free list names an occupied slot"),
                };
                self.slots[id] = Slot::Occupied(node);
                id
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                self.slots.len() - 1
            }
        }
    }

    fn free_node(&mut self, id: usize) -> Node<V> {
        let slot = mem::replace(&mut self.slots[id], Slot::Vacant(self.free));
        self.free = Some(id);
        match slot {
            Slot::Occupied(node) => node,
            Slot::Vacant(_) => corrupted("free", "slot already vacant"),
        }
    }

    fn find(&self, key: u64) -> Link {
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = self.node(id);
            cur = match key.cmp(&node.key) {
                Ordering::Equal => return Some(id),
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
            };
        }
        None
    }

    fn subtree_min(&self, mut id: usize) -> usize {
        while let Some(left) = self.node(id).left {
            id = left;
        }
        id
    }

    fn replace_child(&mut self, parent: Link, old: usize, new: Link) {
        match parent {
            None => self.root = new,
            Some(p) => {
                let node = self.node_mut(p);
                if node.left == Some(old) {
                    node.left = new;
                } else if node.right == Some(old) {
                    node.right = new;
                } else {
                    corrupted("relink", "parent does not own child");
                }
            }
        }
    }

    fn rotate_left(&mut self, x: usize) {
        let y = match self.node(x).right {
            Some(y) => y,
            None => corrupted("rotate_left", "missing right child"),
        };
        let inner = self.node(y).left;
        self.node_mut(x).right = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(x);
        }
        let parent = self.node(x).parent;
        self.node_mut(y).parent = parent;
        self.replace_child(parent, x, Some(y));
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    fn rotate_right(&mut self, x: usize) {
        let y = match self.node(x).left {
            Some(y) => y,
            None => corrupted("rotate_right", "missing left child"),
        };
        let inner = self.node(y).right;
        self.node_mut(x).left = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(x);
        }
        let parent = self.node(x).parent;
        self.node_mut(y).parent = parent;
        self.replace_child(parent, x, Some(y));
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    /// Rotate `x` so that its child on the `toward` side moves down.
    fn rotate_toward(&mut self, x: usize, left: bool) {
        if left {
            self.rotate_left(x);
        } else {
            self.rotate_right(x);
        }
    }

    /// Insert a new entry. Fails with `DuplicateKey` (map unchanged) if the
    /// key is present.
    pub fn insert(&mut self, key: u64, value: V) -> MapResult<()> {
        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = self.node(id);
            parent = Some(id);
            cur = match key.cmp(&node.key) {
                Ordering::Equal => return Err(MapError::DuplicateKey(key)),
                Ordering::Less => {
                    go_left = true;
                    node.left
                }
                Ordering::Greater => {
                    go_left = false;
                    node.right
                }
            };
        }

        self.reserve_node()?;
        let id = self.alloc_node(Node {
            key,
            value,
            color: Color::Red,
            parent,
            left: None,
            right: None,
        });
        match parent {
            None => self.root = Some(id),
            Some(p) if go_left => self.node_mut(p).left = Some(id),
            Some(p) => self.node_mut(p).right = Some(id),
        }

        self.len += 1;
        self.generation = self.generation.wrapping_add(1);
        if self.leftmost.map_or(true, |lm| key < self.node(lm).key) {
            self.leftmost = Some(id);
        }
        self.insert_fixup(id);
        Ok(())
    }

    fn insert_fixup(&mut self, mut n: usize) {
        loop {
            let Some(p) = self.node(n).parent else { break };
            if self.node(p).color == Color::Black {
                break;
            }
            let Some(g) = self.node(p).parent else { break };

            let parent_is_left = self.node(g).left == Some(p);
            let uncle = if parent_is_left {
                self.node(g).right
            } else {
                self.node(g).left
            };

            if let Some(u) = uncle.filter(|&u| self.node(u).color == Color::Red) {
                self.set_color(p, Color::Black);
                self.set_color(u, Color::Black);
                self.set_color(g, Color::Red);
                n = g;
                continue;
            }

            // Inner grandchild: rotate it to the outside first.
            let mut top = p;
            let inner = if parent_is_left {
                self.node(p).right == Some(n)
            } else {
                self.node(p).left == Some(n)
            };
            if inner {
                self.rotate_toward(p, parent_is_left);
                top = n;
            }
            self.rotate_toward(g, !parent_is_left);
            self.set_color(top, Color::Black);
            self.set_color(g, Color::Red);
            break;
        }

        if let Some(root) = self.root {
            self.set_color(root, Color::Black);
        }
    }

    /// Insert, or replace the payload of an existing key in place.
    ///
    /// Returns the displaced value; the tree shape is untouched on replace.
    pub fn insert_or_update(&mut self, key: u64, value: V) -> MapResult<Option<V>> {
        match self.find(key) {
            Some(id) => Ok(Some(mem::replace(&mut self.node_mut(id).value, value))),
            None => self.insert(key, value).map(|()| None),
        }
    }

    /// Replace the payload of an existing key; `NotFound` otherwise.
    pub fn update(&mut self, key: u64, value: V) -> MapResult<V> {
        match self.find(key) {
            Some(id) => Ok(mem::replace(&mut self.node_mut(id).value, value)),
            None => Err(MapError::NotFound(key)),
        }
    }

    /// Exact lookup without any traversal state.
    pub fn search_fast(&self, key: u64) -> Option<&V> {
        self.find(key).map(|id| &self.node(id).value)
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        let id = self.find(key)?;
        Some(&mut self.node_mut(id).value)
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.find(key).is_some()
    }

    /// Exact lookup returning a cursor positioned on the key, from which
    /// forward iteration can continue.
    pub fn search(&self, key: u64) -> Option<Cursor> {
        let mut stack = DynArray::new();
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = self.node(id);
            match key.cmp(&node.key) {
                Ordering::Equal => {
                    return Some(Cursor {
                        generation: self.generation,
                        current: Some(id),
                        stack,
                    })
                }
                Ordering::Less => {
                    stack.push(id);
                    cur = node.left;
                }
                Ordering::Greater => cur = node.right,
            }
        }
        None
    }

    /// Minimum entry in O(1).
    pub fn leftmost(&self) -> Option<(u64, &V)> {
        self.leftmost.map(|id| {
            let node = self.node(id);
            (node.key, &node.value)
        })
    }

    /// Remove and return the minimum entry.
    pub fn pop_leftmost(&mut self) -> Option<(u64, V)> {
        let id = self.leftmost?;
        Some(self.remove_node(id))
    }

    /// Remove `key`, returning its value.
    pub fn erase(&mut self, key: u64) -> Option<V> {
        let id = self.find(key)?;
        Some(self.remove_node(id).1)
    }

    /// Remove the entry a cursor is positioned on.
    ///
    /// Returns `None` for an exhausted or stale cursor.
    pub fn erase_at(&mut self, cursor: Cursor) -> Option<(u64, V)> {
        if cursor.generation != self.generation {
            return None;
        }
        let id = cursor.current?;
        Some(self.remove_node(id))
    }

    fn swap_payload(&mut self, a: usize, b: usize) {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.slots.split_at_mut(hi);
        match (&mut head[lo], &mut tail[0]) {
            (Slot::Occupied(x), Slot::Occupied(y)) => {
                mem::swap(&mut x.key, &mut y.key);
                mem::swap(&mut x.value, &mut y.value);
            }
            _ => corrupted("erase", "successor swap hit a vacant slot"),
        }
    }

    fn remove_node(&mut self, mut id: usize) -> (u64, V) {
        if let (Some(_), Some(right)) = (self.node(id).left, self.node(id).right) {
            let successor = self.subtree_min(right);
            self.swap_payload(id, successor);
            id = successor;
        }

        let node = self.node(id);
        let child = node.left.or(node.right);
        let parent = node.parent;
        let color = node.color;

        match child {
            Some(c) => {
                if color == Color::Red || self.node(c).color == Color::Black {
                    corrupted("erase", "single child breaks coloring");
                }
                self.node_mut(c).parent = parent;
                self.replace_child(parent, id, Some(c));
                self.set_color(c, Color::Black);
            }
            None if color == Color::Red => self.replace_child(parent, id, None),
            None => {
                if parent.is_some() {
                    self.erase_fixup(id);
                }
                // Rotations during the fixup may have moved the parent.
                let parent = self.node(id).parent;
                self.replace_child(parent, id, None);
            }
        }

        self.len -= 1;
        self.generation = self.generation.wrapping_add(1);
        let removed = self.free_node(id);
        if self.leftmost == Some(id) {
            self.leftmost = self.root.map(|root| self.subtree_min(root));
        }
        (removed.key, removed.value)
    }

    /// Resolve the double-black deficiency left by removing black leaf `n`
    /// (still linked while this runs).
    fn erase_fixup(&mut self, mut n: usize) {
        loop {
            let Some(p) = self.node(n).parent else { return };
            let is_left = self.node(p).left == Some(n);
            let sibling_of = |map: &Self, p: usize| -> usize {
                let s = if is_left { map.node(p).right } else { map.node(p).left };
                match s {
                    Some(s) => s,
                    None => corrupted("erase", "black node without sibling"),
                }
            };
            let mut s = sibling_of(&*self, p);

            // Red sibling: rotate it above the parent, retry with a black one.
            if self.node(s).color == Color::Red {
                self.rotate_toward(p, is_left);
                self.set_color(p, Color::Red);
                self.set_color(s, Color::Black);
                s = sibling_of(&*self, p);
            }

            let (close, distant) = if is_left {
                (self.node(s).left, self.node(s).right)
            } else {
                (self.node(s).right, self.node(s).left)
            };

            if let Some(d) = distant.filter(|&d| self.node(d).color == Color::Red) {
                self.rotate_toward(p, is_left);
                let parent_color = self.node(p).color;
                self.set_color(s, parent_color);
                self.set_color(p, Color::Black);
                self.set_color(d, Color::Black);
                return;
            }

            if let Some(c) = close.filter(|&c| self.node(c).color == Color::Red) {
                self.rotate_toward(s, !is_left);
                self.rotate_toward(p, is_left);
                let parent_color = self.node(p).color;
                self.set_color(c, parent_color);
                self.set_color(p, Color::Black);
                self.set_color(s, Color::Black);
                return;
            }

            self.set_color(s, Color::Red);
            if self.node(p).color == Color::Red {
                self.set_color(p, Color::Black);
                return;
            }
            n = p;
        }
    }

    /// Cursor on the minimum entry (exhausted if the map is empty).
    pub fn begin(&self) -> Cursor {
        let mut cursor = Cursor {
            generation: self.generation,
            current: None,
            stack: DynArray::new(),
        };
        cursor.push_left_spine(self, self.root);
        cursor.current = cursor.stack.pop();
        cursor
    }

    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            map: self,
            cursor: self.begin(),
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free = None;
        self.root = None;
        self.leftmost = None;
        self.len = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Check every red-black and bookkeeping invariant.
    ///
    /// Returns the black height of the tree (nil leaves counted as zero).
    pub fn validate(&self) -> Result<usize, InvariantViolation> {
        let Some(root) = self.root else {
            return if self.len == 0 && self.leftmost.is_none() {
                Ok(0)
            } else {
                Err(InvariantViolation::Length)
            };
        };
        if self.node(root).color == Color::Red {
            return Err(InvariantViolation::RedRoot);
        }
        if self.node(root).parent.is_some() {
            return Err(InvariantViolation::ParentLink(self.node(root).key));
        }

        let mut black_height = None;
        let mut count = 0;
        let mut stack: DynArray<(usize, usize)> = DynArray::new();
        stack.push((root, 0));
        while let Some((id, above)) = stack.pop() {
            count += 1;
            let node = self.node(id);
            let here = above + usize::from(node.color == Color::Black);
            for child in [node.left, node.right] {
                match child {
                    Some(c) => {
                        let child_node = self.node(c);
                        if child_node.parent != Some(id) {
                            return Err(InvariantViolation::ParentLink(child_node.key));
                        }
                        if node.color == Color::Red && child_node.color == Color::Red {
                            return Err(InvariantViolation::RedRed(node.key));
                        }
                        stack.push((c, here));
                    }
                    None => match black_height {
                        None => black_height = Some(here),
                        Some(h) if h != here => return Err(InvariantViolation::BlackHeight),
                        Some(_) => {}
                    },
                }
            }
        }
        if count != self.len {
            return Err(InvariantViolation::Length);
        }

        let mut previous: Option<u64> = None;
        for (key, _) in self.iter() {
            if previous.map_or(false, |p| p >= key) {
                return Err(InvariantViolation::OutOfOrder(key));
            }
            previous = Some(key);
        }
        if self.leftmost != Some(self.subtree_min(root)) {
            return Err(InvariantViolation::Leftmost);
        }
        Ok(black_height.unwrap_or(0))
    }
}

impl<V: Clone> OrderedMap<V> {
    /// Copy the whole tree into a fresh, compacted arena.
    ///
    /// Walks pre-order with an explicit stack; never recurses.
    pub fn try_clone(&self) -> MapResult<Self> {
        let mut copy = Self::new();
        copy.reserve(self.len)?;
        let Some(root) = self.root else { return Ok(copy) };

        // (source node, parent in the copy, is left child)
        let mut stack: DynArray<(usize, Link, bool)> = DynArray::new();
        stack.try_push((root, None, false))?;
        while let Some((src, parent, is_left)) = stack.pop() {
            let node = self.node(src);
            let dst = copy.slots.len();
            copy.slots.push(Slot::Occupied(Node {
                key: node.key,
                value: node.value.clone(),
                color: node.color,
                parent,
                left: None,
                right: None,
            }));
            match parent {
                None => copy.root = Some(dst),
                Some(p) if is_left => copy.node_mut(p).left = Some(dst),
                Some(p) => copy.node_mut(p).right = Some(dst),
            }
            if self.leftmost == Some(src) {
                copy.leftmost = Some(dst);
            }
            if let Some(right) = node.right {
                stack.try_push((right, Some(dst), false))?;
            }
            if let Some(left) = node.left {
                stack.try_push((left, Some(dst), true))?;
            }
        }
        copy.len = self.len;
        Ok(copy)
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: core::fmt::Debug> core::fmt::Debug for OrderedMap<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl Cursor {
    fn push_left_spine<V>(&mut self, map: &OrderedMap<V>, mut link: Link) {
        while let Some(id) = link {
            self.stack.push(id);
            link = map.node(id).left;
        }
    }

    fn live<V>(&self, map: &OrderedMap<V>) -> Option<usize> {
        if self.generation == map.generation {
            self.current
        } else {
            None
        }
    }

    /// Whether the cursor has run past the last entry (or went stale).
    pub fn is_end<V>(&self, map: &OrderedMap<V>) -> bool {
        self.live(map).is_none()
    }

    pub fn key<V>(&self, map: &OrderedMap<V>) -> Option<u64> {
        self.live(map).map(|id| map.node(id).key)
    }

    pub fn value<'m, V>(&self, map: &'m OrderedMap<V>) -> Option<&'m V> {
        self.live(map).map(|id| &map.node(id).value)
    }

    /// Step to the next key in ascending order. Returns `false` once exhausted.
    pub fn advance<V>(&mut self, map: &OrderedMap<V>) -> bool {
        let Some(id) = self.live(map) else {
            self.current = None;
            self.stack.clear();
            return false;
        };
        let right = map.node(id).right;
        self.push_left_spine(map, right);
        self.current = self.stack.pop();
        self.current.is_some()
    }
}

/// Borrowing in-order iterator over an [`OrderedMap`].
pub struct Iter<'a, V> {
    map: &'a OrderedMap<V>,
    cursor: Cursor,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let map = self.map;
        let id = self.cursor.live(map)?;
        let node = map.node(id);
        self.cursor.advance(map);
        Some((node.key, &node.value))
    }
}

impl<'a, V> IntoIterator for &'a OrderedMap<V> {
    type Item = (u64, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec;
    use core::cell::Cell;

    fn keys<V>(map: &OrderedMap<V>) -> Vec<u64> {
        map.iter().map(|(k, _)| k).collect()
    }

    fn sample() -> OrderedMap<u64> {
        let mut map = OrderedMap::new();
        for key in [50, 20, 70, 10, 30, 60, 80] {
            map.insert(key, key * 10).unwrap();
            map.validate().unwrap();
        }
        map
    }

    #[test]
    fn test_concrete_scenario() {
        let mut map = sample();
        assert_eq!(map.leftmost(), Some((10, &100)));
        assert_eq!(keys(&map), vec![10, 20, 30, 50, 60, 70, 80]);

        assert_eq!(map.erase(50), Some(500));
        assert_eq!(keys(&map), vec![10, 20, 30, 60, 70, 80]);
        map.validate().unwrap();
        assert_eq!(map.search_fast(60), Some(&600));
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn test_empty_map_reports_not_found() {
        let mut map: OrderedMap<u8> = OrderedMap::new();
        assert!(map.search(1).is_none());
        assert!(map.search_fast(1).is_none());
        assert!(map.leftmost().is_none());
        assert!(map.erase(1).is_none());
        assert!(map.pop_leftmost().is_none());
        assert!(map.begin().is_end(&map));
        assert_eq!(map.update(1, 0), Err(MapError::NotFound(1)));
        assert_eq!(map.validate(), Ok(0));
    }

    #[test]
    fn test_duplicate_insert_leaves_map_unchanged() {
        let mut map = sample();
        assert_eq!(map.insert(30, 1), Err(MapError::DuplicateKey(30)));
        assert_eq!(map.search_fast(30), Some(&300));
        assert_eq!(map.len(), 7);
        map.validate().unwrap();
    }

    #[test]
    fn test_insert_or_update_replaces_payload() {
        let mut map = sample();
        assert_eq!(map.insert_or_update(30, 1), Ok(Some(300)));
        assert_eq!(map.insert_or_update(35, 2), Ok(None));
        assert_eq!(map.search_fast(30), Some(&1));
        assert_eq!(keys(&map), vec![10, 20, 30, 35, 50, 60, 70, 80]);
        assert_eq!(map.update(35, 3), Ok(2));
        map.validate().unwrap();
    }

    #[test]
    fn test_replaced_and_erased_payloads_are_dropped() {
        struct Tracked(Rc<Cell<u32>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut map = OrderedMap::new();
        map.insert(1, Tracked(drops.clone())).unwrap();
        map.insert(2, Tracked(drops.clone())).unwrap();
        drop(map.insert_or_update(1, Tracked(drops.clone())).unwrap());
        assert_eq!(drops.get(), 1);
        drop(map.erase(2));
        assert_eq!(drops.get(), 2);
        map.clear();
        assert_eq!(drops.get(), 3);
        assert!(map.is_empty());
    }

    #[test]
    fn test_search_cursor_resumes_iteration() {
        let map = sample();
        let mut cursor = map.search(30).unwrap();
        let mut seen = vec![cursor.key(&map).unwrap()];
        while cursor.advance(&map) {
            seen.push(cursor.key(&map).unwrap());
        }
        assert_eq!(seen, vec![30, 50, 60, 70, 80]);
        assert!(!cursor.advance(&map));
    }

    #[test]
    fn test_stale_cursor_is_inert() {
        let mut map = sample();
        let cursor = map.search(20).unwrap();
        map.insert(25, 0).unwrap();
        assert!(cursor.is_end(&map));
        assert!(map.erase_at(cursor).is_none());
        assert_eq!(map.len(), 8);

        let cursor = map.search(20).unwrap();
        assert_eq!(map.erase_at(cursor), Some((20, 200)));
        assert!(!map.contains_key(20));
        map.validate().unwrap();
    }

    #[test]
    fn test_erase_every_shape() {
        // Ascending inserts build long red chains on the right; erasing in
        // several orders exercises every deletion case.
        for order in 0..3u64 {
            let mut map = OrderedMap::new();
            for key in 0..64u64 {
                map.insert(key, key).unwrap();
            }
            let victims: Vec<u64> = match order {
                0 => (0..64).collect(),
                1 => (0..64).rev().collect(),
                _ => (0..64).map(|k| (k * 37) % 64).collect(),
            };
            for (removed, key) in victims.into_iter().enumerate() {
                assert_eq!(map.erase(key), Some(key));
                assert!(map.search(key).is_none());
                assert_eq!(map.len(), 63 - removed);
                map.validate().unwrap();
            }
            assert!(map.leftmost().is_none());
        }
    }

    #[test]
    fn test_pop_leftmost_drains_in_order() {
        let mut map = sample();
        let mut drained = Vec::new();
        while let Some((key, _)) = map.pop_leftmost() {
            drained.push(key);
            map.validate().unwrap();
        }
        assert_eq!(drained, vec![10, 20, 30, 50, 60, 70, 80]);
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut map = OrderedMap::new();
        for key in 0..16 {
            map.insert(key, ()).unwrap();
        }
        let arena = map.slots.len();
        for key in 0..8 {
            map.erase(key);
        }
        for key in 100..108 {
            map.insert(key, ()).unwrap();
        }
        assert_eq!(map.slots.len(), arena);
        map.validate().unwrap();
    }

    #[test]
    fn test_try_clone_is_compact_and_equal() {
        let mut map = OrderedMap::new();
        for key in 0..32u64 {
            map.insert(key * 3, key).unwrap();
        }
        for key in 0..10u64 {
            map.erase(key * 6);
        }

        let copy = map.try_clone().unwrap();
        copy.validate().unwrap();
        assert_eq!(copy.slots.len(), copy.len());
        assert_eq!(copy.leftmost(), map.leftmost());
        assert!(copy.iter().eq(map.iter()));
    }

    #[test]
    fn test_black_height_stays_logarithmic() {
        let mut map = OrderedMap::new();
        for key in 0..1024u64 {
            map.insert(key, ()).unwrap();
        }
        let black_height = map.validate().unwrap();
        assert!(black_height <= 11, "black height {}", black_height);
    }

    #[test]
    fn test_reservation_grows_without_moving_entries() {
        let mut map = OrderedMap::new();
        for key in [8u64, 3, 11, 1] {
            map.insert(key, key * 10).unwrap();
        }
        let before = map.capacity();
        let retired = map.install(OrderedMap::reservation(before * 2 + 1).unwrap());
        assert_eq!(retired.capacity(), before);
        assert!(map.capacity() > before);
        assert!(map.has_spare_slot());
        map.validate().unwrap();
        assert_eq!(map.search_fast(11), Some(&110));

        let small = OrderedMap::reservation(1).unwrap();
        let returned = map.install(small);
        assert_eq!(returned.capacity(), 1);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_lock_spare_grows_outside_the_lock() {
        let map = spin::Mutex::new(OrderedMap::new());
        for key in 0..40u64 {
            let mut guard = OrderedMap::lock_spare(&map, 8).unwrap();
            assert!(guard.has_spare_slot());
            let capacity = guard.capacity();
            guard.insert(key, key).unwrap();
            // The insert itself never reallocated the arena.
            assert_eq!(guard.capacity(), capacity);
        }
        let map = map.into_inner();
        assert_eq!(map.len(), 40);
        assert!(map.capacity() >= 40);
        map.validate().unwrap();
    }
}
