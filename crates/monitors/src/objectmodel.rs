//! The part of the object model this crate reads and writes: one lock word per object.
//!
//! Everything else about objects (identity, allocation, type information) stays with the
//! embedding runtime and is reached through [`Runtime`](crate::Runtime).

pub mod header;

pub use header::{HashState, HeapObjectHeader, LockShape, LockState, LockWord, ThinLockId};
