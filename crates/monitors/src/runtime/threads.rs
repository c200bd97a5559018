use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use parking_lot::{Condvar, Mutex};

use crate::{objectmodel::header::ThinLockId, Runtime, ThreadOf};

pub trait Thread<R: Runtime>: Send + Sync + 'static {
    /// Non-zero id written into thin lock words owned by this thread.
    fn thin_lock_id(&self) -> ThinLockId;

    fn name(&self) -> String;

    fn tls(&self) -> &TLSData<R>;

    /// Indicate that the thread is about to block and does not need to synchronize
    /// with the GC until [`leave_parked`](Thread::leave_parked) is called.
    fn enter_parked(&self) {}

    /// Leave the parked state, blocking if the runtime requested it (e.g. for a GC).
    fn leave_parked(&self) {}

    /// Try to leave the parked state without blocking. Returns `false` when
    /// [`leave_parked`](Thread::leave_parked) has to be called instead. Monitors call this
    /// while holding their internal lock so they never stall a safepoint with it held.
    fn attempt_leave_parked_no_block(&self) -> bool {
        true
    }
}

/// Run `f` with `thread` parked.
pub fn parked_scope<R: Runtime, F, T>(thread: &ThreadOf<R>, f: F) -> T
where
    F: FnOnce() -> T,
{
    thread.enter_parked();
    let result = f();
    thread.leave_parked();
    result
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ThreadState {
    /// Running or runnable.
    Runnable = 0,
    /// Blocked trying to enter a monitor owned by another thread.
    Blocked = 1,
    /// Inside an untimed monitor wait.
    Waiting = 2,
    /// Inside a monitor wait with a timeout.
    TimedWaiting = 3,
}

impl From<u8> for ThreadState {
    fn from(value: u8) -> ThreadState {
        match value {
            0 => ThreadState::Runnable,
            1 => ThreadState::Blocked,
            2 => ThreadState::Waiting,
            3 => ThreadState::TimedWaiting,
            _ => unreachable!(),
        }
    }
}

impl ThreadState {
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting | Self::TimedWaiting)
    }
}

impl Default for ThreadState {
    fn default() -> ThreadState {
        ThreadState::Runnable
    }
}

/// Per-thread state the monitor subsystem needs. The runtime embeds one in each of its
/// threads and returns it from [`Thread::tls`].
pub struct TLSData<R: Runtime> {
    pub state: AtomicU8,
    /// Object this thread is blocked on in `monitor_enter`, for thread dumps.
    monitor_enter_object: Mutex<Option<R::ObjectRef>>,
    wait: Arc<WaitSlot<R>>,
}

impl<R: Runtime> TLSData<R> {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ThreadState::Runnable as _),
            monitor_enter_object: Mutex::new(None),
            wait: Arc::new(WaitSlot::new()),
        }
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as _, Ordering::Release);
    }

    pub fn monitor_enter_object(&self) -> Option<R::ObjectRef> {
        *self.monitor_enter_object.lock()
    }

    pub(crate) fn set_monitor_enter_object(&self, obj: Option<R::ObjectRef>) {
        *self.monitor_enter_object.lock() = obj;
    }

    /// Object whose monitor this thread is currently waiting on.
    pub fn wait_monitor_object(&self) -> Option<R::ObjectRef> {
        self.wait.status.lock().waiting_on
    }

    /// Request an interrupt. A thread waiting on a monitor is woken up.
    pub fn interrupt(&self) {
        let mut status = self.wait.status.lock();
        status.interrupted = true;
        if status.waiting_on.is_some() {
            self.wait.cond.notify_one();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.wait.status.lock().interrupted
    }

    /// Test and clear the interrupt flag.
    pub fn interrupted(&self) -> bool {
        std::mem::replace(&mut self.wait.status.lock().interrupted, false)
    }

    pub(crate) fn wait_slot(&self) -> &Arc<WaitSlot<R>> {
        &self.wait
    }
}

impl<R: Runtime> Default for TLSData<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a waiting thread sleeps on. Entries of a monitor's wait set point here.
///
/// Lock order: a monitor's internal lock is taken before a wait slot's.
pub(crate) struct WaitSlot<R: Runtime> {
    pub(crate) status: Mutex<WaitStatus<R>>,
    pub(crate) cond: Condvar,
}

pub(crate) struct WaitStatus<R: Runtime> {
    /// Set while the thread waits; a notifier or interrupter must signal `cond`.
    pub(crate) waiting_on: Option<R::ObjectRef>,
    pub(crate) notified: bool,
    pub(crate) interrupted: bool,
}

impl<R: Runtime> WaitSlot<R> {
    fn new() -> Self {
        Self {
            status: Mutex::new(WaitStatus {
                waiting_on: None,
                notified: false,
                interrupted: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Wake the thread if it is still waiting. Returns `false` if it already stopped
    /// waiting (timeout or interrupt) or was notified before.
    pub(crate) fn notify(&self) -> bool {
        let mut status = self.status.lock();
        if status.waiting_on.is_none() || status.notified {
            return false;
        }

        status.notified = true;
        self.cond.notify_one();
        true
    }
}
