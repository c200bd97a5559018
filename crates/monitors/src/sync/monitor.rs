use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    error::MonitorError,
    objectmodel::header::ThinLockId,
    runtime::threads::{parked_scope, Thread, ThreadState, WaitSlot},
    Runtime, ThreadOf,
};

struct MonitorState<R: Runtime> {
    /// Owner's recursive lock depth. Zero when unlocked.
    lock_count: usize,
    /// Threads currently waiting on this monitor, oldest first.
    wait_set: VecDeque<Arc<WaitSlot<R>>>,
    /// Where the owner acquired the lock. `None` when unlocked or when the owner had no
    /// managed frame.
    locking_method: Option<R::Method>,
    locking_dex_pc: u32,
}

/// A fat lock: the inflated form of an object's lock word.
///
/// Ownership is logical. `monitor_lock` is only held while the state is inspected or
/// updated; threads that have to wait for the owner sleep on `cvar`.
#[repr(align(8))]
pub struct Monitor<R: Runtime> {
    obj: R::ObjectRef,
    /// Thin lock id of the owner. Written with `monitor_lock` held, read without it
    /// only by racy diagnostics.
    owner: AtomicU16,
    monitor_lock: Mutex<MonitorState<R>>,
    cvar: Condvar,
}

/// How long `Monitor::lock` blocked and whose acquisition it waited behind.
pub(crate) struct Contention<R: Runtime> {
    pub(crate) waited: Duration,
    pub(crate) owner_site: Option<(R::Method, u32)>,
}

impl<R: Runtime> Monitor<R> {
    /// A monitor for `obj` that is already held `lock_count` times by `owner`, which took
    /// it at `locking_site`. Used when a thin lock is inflated.
    pub(crate) fn new(
        obj: R::ObjectRef,
        owner: ThinLockId,
        lock_count: usize,
        locking_site: Option<(R::Method, u32)>,
    ) -> Self {
        debug_assert_eq!(owner.is_none(), lock_count == 0);
        let locking_site = locking_site.filter(|_| lock_count != 0);
        Self {
            obj,
            owner: AtomicU16::new(owner.as_u16()),
            monitor_lock: Mutex::new(MonitorState {
                lock_count,
                wait_set: VecDeque::new(),
                locking_method: locking_site.map(|(method, _)| method),
                locking_dex_pc: locking_site.map_or(0, |(_, dex_pc)| dex_pc),
            }),
            cvar: Condvar::new(),
        }
    }

    pub fn object(&self) -> R::ObjectRef {
        self.obj
    }

    /// Current owner. Racy: the answer may be stale by the time it is used.
    pub fn owner(&self) -> ThinLockId {
        ThinLockId::new(self.owner.load(Ordering::Relaxed)).unwrap_or(ThinLockId::NONE)
    }

    pub fn lock_count(&self) -> usize {
        self.monitor_lock.lock().lock_count
    }

    pub fn wait_set_len(&self) -> usize {
        self.monitor_lock.lock().wait_set.len()
    }

    /// Method and pc where the current owner acquired the lock.
    pub fn locking_site(&self) -> Option<(R::Method, u32)> {
        let state = self.monitor_lock.lock();
        state.locking_method.map(|method| (method, state.locking_dex_pc))
    }

    fn is_owned_by(&self, state: &MonitorState<R>, thread: ThinLockId) -> bool {
        state.lock_count != 0 && self.owner() == thread
    }

    /// Block until `thread` owns the monitor. Returns contention details if it had to
    /// wait for another owner.
    pub(crate) fn lock(&self, thread: &ThreadOf<R>) -> Option<Contention<R>> {
        let me = thread.thin_lock_id();
        let state = self.monitor_lock.lock();

        if self.is_owned_by(&state, me) {
            let mut state = state;
            state.lock_count += 1;
            return None;
        }

        let owner_site = state.locking_method.map(|method| (method, state.locking_dex_pc));
        let (mut state, waited) = self.acquire(thread, state);

        state.lock_count = 1;
        self.owner.store(me.as_u16(), Ordering::Relaxed);
        let site = R::current_frame(thread);
        state.locking_method = site.map(|(method, _)| method);
        state.locking_dex_pc = site.map_or(0, |(_, dex_pc)| dex_pc);

        waited.map(|waited| Contention { waited, owner_site })
    }

    /// Wait until nobody owns the monitor. The caller takes ownership before releasing
    /// the returned guard.
    fn acquire<'a>(
        &'a self,
        thread: &ThreadOf<R>,
        mut state: MutexGuard<'a, MonitorState<R>>,
    ) -> (MutexGuard<'a, MonitorState<R>>, Option<Duration>) {
        if state.lock_count == 0 {
            return (state, None);
        }

        let tls = thread.tls();
        let previous = tls.state();
        tls.set_monitor_enter_object(Some(self.obj));
        tls.set_state(ThreadState::Blocked);
        let start = Instant::now();

        thread.enter_parked();
        loop {
            while state.lock_count != 0 {
                self.cvar.wait(&mut state);
            }

            if thread.attempt_leave_parked_no_block() {
                break;
            }

            MutexGuard::unlocked(&mut state, || {
                thread.leave_parked();
                thread.enter_parked();
            });
        }

        tls.set_state(previous);
        tls.set_monitor_enter_object(None);
        (state, Some(start.elapsed()))
    }

    /// Release one level of recursion. On failure returns the owner found in the
    /// monitor.
    pub(crate) fn unlock(&self, thread: &ThreadOf<R>) -> Result<(), ThinLockId> {
        let me = thread.thin_lock_id();
        let mut state = self.monitor_lock.lock();

        if !self.is_owned_by(&state, me) {
            return Err(self.owner());
        }

        state.lock_count -= 1;
        if state.lock_count == 0 {
            self.owner.store(ThinLockId::NONE.as_u16(), Ordering::Relaxed);
            state.locking_method = None;
            state.locking_dex_pc = 0;
            drop(state);
            self.cvar.notify_one();
        }

        Ok(())
    }

    pub(crate) fn not_locked_before(operation: &str) -> MonitorError {
        MonitorError::IllegalMonitorState(format!(
            "object not locked by thread before {operation}()"
        ))
    }

    /// Wake the thread that has waited longest, skipping entries that already stopped
    /// waiting.
    pub(crate) fn notify(&self, thread: &ThreadOf<R>) -> Result<(), MonitorError> {
        let mut state = self.monitor_lock.lock();
        if !self.is_owned_by(&state, thread.thin_lock_id()) {
            return Err(Self::not_locked_before("notify"));
        }

        while let Some(waiter) = state.wait_set.pop_front() {
            if waiter.notify() {
                break;
            }
        }

        Ok(())
    }

    pub(crate) fn notify_all(&self, thread: &ThreadOf<R>) -> Result<(), MonitorError> {
        let mut state = self.monitor_lock.lock();
        if !self.is_owned_by(&state, thread.thin_lock_id()) {
            return Err(Self::not_locked_before("notify"));
        }

        for waiter in state.wait_set.drain(..) {
            waiter.notify();
        }

        Ok(())
    }

    /// Release the monitor completely, wait for a notification, a timeout or an
    /// interrupt, then take the monitor back with the same recursion depth.
    ///
    /// A timeout of zero `ms` and zero `ns` waits forever.
    pub(crate) fn wait(
        &self,
        thread: &ThreadOf<R>,
        ms: i64,
        ns: i32,
        interrupt_should_throw: bool,
    ) -> Result<(), MonitorError> {
        let me = thread.thin_lock_id();
        let mut state = self.monitor_lock.lock();

        if !self.is_owned_by(&state, me) {
            return Err(Self::not_locked_before("wait"));
        }

        if ms < 0 || !(0..=999_999).contains(&ns) {
            return Err(MonitorError::IllegalArgument(format!(
                "timeout arguments out of range: ms={ms} ns={ns}"
            )));
        }

        // A deadline too far away to represent is the same as no deadline.
        let deadline = if ms != 0 || ns != 0 {
            Instant::now().checked_add(
                Duration::from_millis(ms as u64) + Duration::from_nanos(ns as u64),
            )
        } else {
            None
        };

        let tls = thread.tls();
        let previous = tls.state();
        tls.set_state(if ms != 0 || ns != 0 {
            ThreadState::TimedWaiting
        } else {
            ThreadState::Waiting
        });

        let saved_count = std::mem::replace(&mut state.lock_count, 0);
        let saved_method = state.locking_method.take();
        let saved_dex_pc = std::mem::replace(&mut state.locking_dex_pc, 0);
        self.owner.store(ThinLockId::NONE.as_u16(), Ordering::Relaxed);

        let slot = tls.wait_slot().clone();
        state.wait_set.push_back(slot.clone());

        // Publish the wait before the monitor is released so a notifier that gets in
        // right after cannot miss us.
        let mut status = slot.status.lock();
        status.waiting_on = Some(self.obj);
        status.notified = false;
        drop(state);
        self.cvar.notify_one();

        let cond = &slot.cond;
        let was_interrupted = parked_scope::<R, _, _>(thread, move || {
            while !status.notified && !status.interrupted {
                match deadline {
                    Some(deadline) => {
                        if cond.wait_until(&mut status, deadline).timed_out() {
                            break;
                        }
                    }
                    None => cond.wait(&mut status),
                }
            }

            let was_interrupted = status.interrupted;
            if was_interrupted && interrupt_should_throw {
                status.interrupted = false;
            }
            status.waiting_on = None;
            status.notified = false;
            was_interrupted
        });
        tls.set_state(previous);

        let state = self.monitor_lock.lock();
        let (mut state, _) = self.acquire(thread, state);

        state.lock_count = saved_count;
        self.owner.store(me.as_u16(), Ordering::Relaxed);
        state.locking_method = saved_method;
        state.locking_dex_pc = saved_dex_pc;
        state.wait_set.retain(|waiter| !Arc::ptr_eq(waiter, &slot));
        drop(state);

        if was_interrupted && interrupt_should_throw {
            Err(MonitorError::Interrupted)
        } else {
            Ok(())
        }
    }
}
