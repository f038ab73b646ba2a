//! Kernel containers.
//!
//! Both containers avoid recursion entirely and report allocation failure as
//! [`MapError::OutOfMemory`](crate::errors::MapError::OutOfMemory) instead of
//! aborting, so callers outside the boot path can recover.

pub mod dynarray;
pub mod ordered_map;

pub use dynarray::DynArray;
pub use ordered_map::{Cursor, InvariantViolation, Iter, OrderedMap, Reservation};
