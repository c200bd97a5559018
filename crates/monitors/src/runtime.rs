use std::{fmt, hash::Hash};

use crate::{
    objectmodel::header::{HeapObjectHeader, ThinLockId},
    ThreadOf,
};

pub mod options;
pub mod threads;

/// Binding between the monitor subsystem and the runtime that embeds it.
///
/// The runtime owns objects, threads and method metadata; this trait is the whole
/// surface the monitors need from it.
pub trait Runtime: 'static + Sized + Send + Sync {
    type Thread: threads::Thread<Self>;
    /// A reference to a heap object. Identity is compared with `Eq`.
    type ObjectRef: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// A method handle used to record where a lock was acquired.
    type Method: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// Lock word of `obj`.
    ///
    /// The runtime must keep `obj` alive for as long as a monitor operation on it is in
    /// progress.
    fn header<'a>(obj: Self::ObjectRef) -> &'a HeapObjectHeader<Self>;

    /// Address used to identify `obj` in thread dumps.
    fn object_address(obj: Self::ObjectRef) -> usize;

    /// Human readable type of `obj`, e.g. `java.lang.Object`.
    fn pretty_type_of(obj: Self::ObjectRef) -> String;

    /// Name of the thread with thin lock id `id`, if it is still alive.
    fn thread_name(id: ThinLockId) -> Option<String> {
        let _ = id;
        None
    }

    /// Method and bytecode pc of the innermost managed frame of `thread`.
    ///
    /// Called while a monitor's internal lock is held; must not touch monitors.
    fn current_frame(thread: &ThreadOf<Self>) -> Option<(Self::Method, u32)> {
        let _ = thread;
        None
    }

    /// Innermost managed frame of the live thread with thin lock id `id`.
    ///
    /// Used when a thin lock is inflated by a thread other than its owner, to record
    /// where the owner holds the lock. The owner keeps running, so the answer is a
    /// best-effort snapshot.
    fn current_frame_of(id: ThinLockId) -> Option<(Self::Method, u32)> {
        let _ = id;
        None
    }

    /// Translate `method` and `dex_pc` into the declaring source file and line.
    fn translate_location(method: Self::Method, dex_pc: u32) -> Option<SourceLocation> {
        let _ = (method, dex_pc);
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
