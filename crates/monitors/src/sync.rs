//! Object monitors.
//!
//! Every object can be locked, waited on and notified. An object starts with a thin
//! lock: its lock word records the owner's id and recursion depth and is updated with
//! a single CAS. Contention, `wait` or an identity hash request while locked inflate
//! the word into a pointer to a fat [`Monitor`], which is registered in the
//! [`MonitorList`] so the collector can sweep it. Fat locks never deflate.

use std::sync::Arc;

use crate::{
    error::MonitorError,
    objectmodel::header::{HashState, HeapObjectHeader, LockState, LockWord, ThinLockId, THIN_LOCK_MAX_DEPTH},
    runtime::{
        options::{MonitorOptions, MonitorsBuilder},
        threads::Thread,
    },
    Runtime, ThreadOf,
};

pub mod contention;
pub mod describe;
pub mod monitor;
pub mod monitor_list;

use monitor::Monitor;
use monitor_list::MonitorList;

/// Entry points for locking objects of runtime `R`.
///
/// Configuration is fixed at construction; several instances with different settings
/// can coexist (each must be used for a disjoint set of objects).
pub struct Monitors<R: Runtime> {
    options: MonitorOptions,
    monitor_list: MonitorList<R>,
}

impl<R: Runtime> Monitors<R> {
    pub fn new(options: MonitorOptions) -> Self {
        Self {
            options,
            monitor_list: MonitorList::new(),
        }
    }

    /// Monitors that report contention lasting at least `lock_profiling_threshold_ms`
    /// (0 disables reporting), except on threads for which `is_sensitive_thread`
    /// returns `true`.
    pub fn init(
        lock_profiling_threshold_ms: u32,
        is_sensitive_thread: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        MonitorsBuilder::new()
            .lock_profiling_threshold(lock_profiling_threshold_ms)
            .sensitive_thread_hook(is_sensitive_thread)
            .build()
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    pub fn monitor_list(&self) -> &MonitorList<R> {
        &self.monitor_list
    }

    /// Is the calling thread one whose lock waits are not reported?
    pub fn is_sensitive_thread(&self) -> bool {
        self.options
            .is_sensitive_thread
            .as_ref()
            .is_some_and(|hook| hook())
    }

    /// Owner recorded in the lock word of `header`, for a fat word the monitor's owner.
    ///
    /// This read is racy: the word may be inflated or change hands concurrently, so the
    /// answer is only good for heuristics and diagnostics.
    pub fn get_thin_lock_id(header: &HeapObjectHeader<R>) -> ThinLockId {
        let word = header.lock_word();
        match header.monitor(word) {
            Some(monitor) => monitor.owner(),
            None => word.thin_owner(),
        }
    }

    /// The fat monitor of `obj`, if its lock has been inflated.
    pub fn monitor_of<'a>(obj: R::ObjectRef) -> Option<&'a Monitor<R>> {
        let header: &'a HeapObjectHeader<R> = R::header(obj);
        header.monitor(header.lock_word())
    }

    /// Thread currently owning `obj`, [`ThinLockId::NONE`] if unlocked.
    pub fn lock_owner(obj: R::ObjectRef) -> ThinLockId {
        let header = R::header(obj);
        let word = header.lock_word();
        match header.monitor(word) {
            Some(monitor) if monitor.lock_count() == 0 => ThinLockId::NONE,
            Some(monitor) => monitor.owner(),
            None => word.thin_owner(),
        }
    }

    pub fn holds_lock(thread: &ThreadOf<R>, obj: R::ObjectRef) -> bool {
        Self::lock_owner(obj) == thread.thin_lock_id()
    }

    /// Inflate the thin lock described by `word`. Exactly one inflation of an object
    /// succeeds; a caller that loses the race must re-read the lock word.
    ///
    /// Any thread may inflate, `thread` is `None` for the collector. A contender inflates
    /// on behalf of the thin owner, carrying the owner, its depth and its current frame
    /// into the new monitor.
    fn inflate(&self, thread: Option<&ThreadOf<R>>, obj: R::ObjectRef, word: LockWord) -> bool {
        let LockState::Thin { owner, depth } = word.state() else {
            return false;
        };

        let locking_site = match thread {
            Some(thread) if thread.thin_lock_id() == owner => R::current_frame(thread),
            _ => R::current_frame_of(owner),
        };

        let header = R::header(obj);
        let monitor = Arc::new(Monitor::new(obj, owner, depth, locking_site));

        match header.install_monitor(word, monitor.clone()) {
            Ok(()) => {
                self.monitor_list.add(&monitor);
                log::debug!(
                    target: "monitors::inflate",
                    "inflated monitor of {:?} ({}) owned by thread {} at depth {}",
                    obj,
                    R::pretty_type_of(obj),
                    owner,
                    depth
                );
                true
            }
            Err(_) => false,
        }
    }

    /// Lock `obj`, blocking while another thread owns it.
    pub fn monitor_enter(&self, thread: &ThreadOf<R>, obj: R::ObjectRef) {
        let header = R::header(obj);
        let me = thread.thin_lock_id();
        debug_assert!(!me.is_none(), "thread '{}' has no thin lock id", thread.name());

        loop {
            let word = header.lock_word();
            match word.state() {
                LockState::Unlocked => {
                    let thin = LockWord::thin(me, 1, word.hash_state());
                    if header.compare_exchange_lock_word(word, thin).is_ok() {
                        return;
                    }
                }
                LockState::Thin { owner, depth } if owner == me => {
                    if depth < THIN_LOCK_MAX_DEPTH {
                        let thin = LockWord::thin(me, depth + 1, word.hash_state());
                        if header.compare_exchange_lock_word(word, thin).is_ok() {
                            return;
                        }
                    } else {
                        self.inflate(Some(thread), obj, word);
                    }
                }
                LockState::Thin { .. } => {
                    self.inflate(Some(thread), obj, word);
                }
                LockState::Fat { .. } => {
                    let Some(monitor) = header.monitor(word) else {
                        unreachable!()
                    };
                    if let Some(contention) = monitor.lock(thread) {
                        self.profile_contention(thread, obj, contention);
                    }
                    return;
                }
            }
        }
    }

    /// Unlock `obj` once. Fails with [`MonitorError::IllegalMonitorState`] if `thread`
    /// does not own it.
    pub fn monitor_exit(&self, thread: &ThreadOf<R>, obj: R::ObjectRef) -> Result<(), MonitorError> {
        let header = R::header(obj);
        let me = thread.thin_lock_id();

        loop {
            let word = header.lock_word();
            match word.state() {
                LockState::Unlocked => {
                    return Err(Self::failed_unlock(obj, thread, ThinLockId::NONE, None));
                }
                LockState::Thin { owner, depth } if owner == me => {
                    let new = if depth == 1 {
                        LockWord::UNLOCKED.with_hash_state(word.hash_state())
                    } else {
                        LockWord::thin(me, depth - 1, word.hash_state())
                    };
                    if header.compare_exchange_lock_word(word, new).is_ok() {
                        return Ok(());
                    }
                }
                LockState::Thin { owner, .. } => {
                    return Err(Self::failed_unlock(obj, thread, owner, None));
                }
                LockState::Fat { .. } => {
                    let Some(monitor) = header.monitor(word) else {
                        unreachable!()
                    };
                    return monitor
                        .unlock(thread)
                        .map_err(|found| Self::failed_unlock(obj, thread, found, Some(monitor)));
                }
            }
        }
    }

    /// Report an unlock by a thread that does not own `obj`.
    ///
    /// `found` is the owner seen when the unlock was attempted; the owner is read again
    /// here so races with other threads show up in the message.
    fn failed_unlock(
        obj: R::ObjectRef,
        expected: &ThreadOf<R>,
        found: ThinLockId,
        monitor: Option<&Monitor<R>>,
    ) -> MonitorError {
        let current = match monitor {
            Some(monitor) => monitor.owner(),
            None => Self::get_thin_lock_id(R::header(obj)),
        };

        let name = |id: ThinLockId| R::thread_name(id).unwrap_or_else(|| format!("thread {id}"));
        let type_name = R::pretty_type_of(obj);
        let expected = expected.name();

        let message = match (current.is_none(), found.is_none()) {
            (true, true) => format!(
                "unlock of unowned monitor on object of type '{type_name}' on thread '{expected}'"
            ),
            (true, false) => format!(
                "unlock of monitor owned by '{}' on object of type '{type_name}' \
                 (where now the monitor appears unowned) on thread '{expected}'",
                name(found)
            ),
            (false, true) => format!(
                "unlock of monitor owned by '{}' on object of type '{type_name}' \
                 (originally believed to be unowned) on thread '{expected}'",
                name(current)
            ),
            (false, false) if found != current => format!(
                "unlock of monitor originally owned by '{}' (now owned by '{}') \
                 on object of type '{type_name}' on thread '{expected}'",
                name(found),
                name(current)
            ),
            (false, false) => format!(
                "unlock of monitor owned by '{}' on object of type '{type_name}' on thread '{expected}'",
                name(current)
            ),
        };

        log::warn!(target: "monitors", "{message}");
        MonitorError::IllegalMonitorState(message)
    }

    /// Wake the thread that has waited longest on `obj`.
    pub fn notify(&self, thread: &ThreadOf<R>, obj: R::ObjectRef) -> Result<(), MonitorError> {
        let header = R::header(obj);
        let word = header.lock_word();
        match header.monitor(word) {
            Some(monitor) => monitor.notify(thread),
            // A thin lock has no waiters.
            None if word.thin_owner() == thread.thin_lock_id() => Ok(()),
            None => Err(Monitor::<R>::not_locked_before("notify")),
        }
    }

    /// Wake every thread waiting on `obj`.
    pub fn notify_all(&self, thread: &ThreadOf<R>, obj: R::ObjectRef) -> Result<(), MonitorError> {
        let header = R::header(obj);
        let word = header.lock_word();
        match header.monitor(word) {
            Some(monitor) => monitor.notify_all(thread),
            None if word.thin_owner() == thread.thin_lock_id() => Ok(()),
            None => Err(Monitor::<R>::not_locked_before("notify")),
        }
    }

    /// Release `obj` and wait until notified, interrupted or until `ms` milliseconds plus
    /// `ns` nanoseconds pass (both zero: no timeout). The lock is re-acquired with its
    /// previous recursion depth before returning, whatever woke the thread.
    ///
    /// On interrupt, `interrupt_should_throw` selects between returning
    /// [`MonitorError::Interrupted`] (the interrupt flag is cleared) and returning
    /// normally with the flag left pending.
    pub fn wait(
        &self,
        thread: &ThreadOf<R>,
        obj: R::ObjectRef,
        ms: i64,
        ns: i32,
        interrupt_should_throw: bool,
    ) -> Result<(), MonitorError> {
        let header = R::header(obj);
        let me = thread.thin_lock_id();

        loop {
            let word = header.lock_word();
            match word.state() {
                LockState::Thin { owner, .. } if owner == me => {
                    self.inflate(Some(thread), obj, word);
                }
                LockState::Unlocked | LockState::Thin { .. } => {
                    return Err(Monitor::<R>::not_locked_before("wait"));
                }
                LockState::Fat { .. } => {
                    let Some(monitor) = header.monitor(word) else {
                        unreachable!()
                    };
                    return monitor.wait(thread, ms, ns, interrupt_should_throw);
                }
            }
        }
    }

    /// Record that the identity hash of `obj` has been handed out. A thin-locked `obj`
    /// is inflated first, whoever owns it.
    pub fn identity_hash_observed(&self, thread: &ThreadOf<R>, obj: R::ObjectRef) {
        let header = R::header(obj);

        loop {
            let word = header.lock_word();
            if word.hash_state() != HashState::Unhashed {
                return;
            }

            if let LockState::Thin { .. } = word.state() {
                self.inflate(Some(thread), obj, word);
                continue;
            }

            let hashed = word.with_hash_state(HashState::Hashed);
            if header.compare_exchange_lock_word(word, hashed).is_ok() {
                return;
            }
        }
    }

    /// Called by the collector after moving `obj`: a hashed object becomes
    /// hashed-and-moved so its original hash can still be found. A thin-locked hashed
    /// object is inflated first.
    pub fn object_moved(&self, obj: R::ObjectRef) {
        let header = R::header(obj);

        loop {
            let word = header.lock_word();
            if word.hash_state() != HashState::Hashed {
                return;
            }

            if let LockState::Thin { .. } = word.state() {
                self.inflate(None, obj, word);
                continue;
            }

            let moved = word.with_hash_state(HashState::HashedAndMoved);
            if header.compare_exchange_lock_word(word, moved).is_ok() {
                return;
            }
        }
    }
}

impl<R: Runtime> Default for Monitors<R> {
    fn default() -> Self {
        Self::new(MonitorOptions::default())
    }
}
