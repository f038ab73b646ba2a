//! Growable contiguous buffer.
//!
//! `DynArray` doubles its capacity when full and exposes fallible growth so
//! callers off the boot path can turn allocation failure into an error. The
//! ordered map uses it as the explicit traversal stack that replaces
//! recursion.

use core::ops::{Index, IndexMut, Range};

use alloc::vec::Vec;

use crate::errors::{MapError, MapResult};

const MIN_CAPACITY: usize = 4;

/// A growable array with geometric growth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynArray<T> {
    buf: Vec<T>,
}

impl<T> DynArray<T> {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create an array able to hold `capacity` elements without growing.
    pub fn try_with_capacity(capacity: usize) -> MapResult<Self> {
        let mut array = Self::new();
        array.reserve(capacity)?;
        Ok(array)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Make room for `additional` more elements, doubling at least.
    pub fn reserve(&mut self, additional: usize) -> MapResult<()> {
        let needed = self.buf.len().checked_add(additional).ok_or(MapError::OutOfMemory)?;
        if needed <= self.buf.capacity() {
            return Ok(());
        }
        let target = needed
            .max(self.buf.capacity().saturating_mul(2))
            .max(MIN_CAPACITY);
        self.buf
            .try_reserve_exact(target - self.buf.len())
            .map_err(|_| MapError::OutOfMemory)
    }

    pub fn try_push(&mut self, value: T) -> MapResult<()> {
        self.reserve(1)?;
        self.buf.push(value);
        Ok(())
    }

    /// Push, treating allocation failure as fatal like any other `alloc` use.
    pub fn push(&mut self, value: T) {
        if self.reserve(1).is_err() {
            alloc::alloc::handle_alloc_error(core::alloc::Layout::new::<T>());
        }
        self.buf.push(value);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.buf.pop()
    }

    pub fn back(&self) -> Option<&T> {
        self.buf.last()
    }

    pub fn front(&self) -> Option<&T> {
        self.buf.first()
    }

    pub fn try_push_front(&mut self, value: T) -> MapResult<()> {
        self.try_insert(0, value).map(|_| ())
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.remove(0))
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.buf.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.buf.get_mut(index)
    }

    /// Insert at `index`, shifting later elements right.
    ///
    /// `index == len` appends. Out-of-range indices are rejected with the
    /// value dropped and the array unchanged.
    pub fn try_insert(&mut self, index: usize, value: T) -> MapResult<bool> {
        if index > self.buf.len() {
            return Ok(false);
        }
        self.reserve(1)?;
        self.buf.insert(index, value);
        Ok(true)
    }

    /// Remove at `index`, shifting later elements left.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index < self.buf.len() {
            Some(self.buf.remove(index))
        } else {
            None
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.buf
    }

    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.buf.iter()
    }

    /// Remove a contiguous range and hand the elements back in order.
    ///
    /// Returns `None` if the range is out of bounds or reversed.
    pub fn remove_range(&mut self, range: Range<usize>) -> Option<Vec<T>> {
        if range.start > range.end || range.end > self.buf.len() {
            return None;
        }
        Some(self.buf.drain(range).collect())
    }
}

impl<T: Clone> DynArray<T> {
    pub fn try_extend_from_slice(&mut self, values: &[T]) -> MapResult<()> {
        self.reserve(values.len())?;
        self.buf.extend_from_slice(values);
        Ok(())
    }

    /// Insert all of `values` at `index`, shifting later elements right.
    pub fn try_insert_slice(&mut self, index: usize, values: &[T]) -> MapResult<bool> {
        if index > self.buf.len() {
            return Ok(false);
        }
        self.reserve(values.len())?;
        self.buf.splice(index..index, values.iter().cloned());
        Ok(true)
    }
}

impl<T> Default for DynArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for DynArray<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.buf[index]
    }
}

impl<T> IndexMut<usize> for DynArray<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.buf[index]
    }
}
