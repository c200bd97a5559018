//! Thread dump support: what a thread is blocked on and which monitors a frame holds.

use std::fmt::{self, Write};

use crate::{
    runtime::threads::{Thread, ThreadState},
    Runtime, ThreadOf,
};

use super::Monitors;

/// One frame of a stack walk, as seen by [`Monitors::describe_locks`].
pub trait StackVisitor<R: Runtime> {
    /// `None` for runtime frames without a managed method.
    fn method(&self) -> Option<R::Method>;
    fn is_native(&self) -> bool;
    fn is_synchronized(&self) -> bool;
    /// Receiver of the frame, used for synchronized native methods.
    fn this_object(&self) -> Option<R::ObjectRef>;
    /// Objects whose monitors were entered by this frame and are still held.
    fn locked_objects(&self) -> Vec<R::ObjectRef>;
}

fn describe_object<R: Runtime>(sink: &mut dyn Write, obj: Option<R::ObjectRef>) -> fmt::Result {
    match obj {
        Some(obj) => write!(
            sink,
            "<{:#010x}> (a {})",
            R::object_address(obj),
            R::pretty_type_of(obj)
        ),
        None => write!(sink, "<0x00000000> (a null)"),
    }
}

fn dump_locked_object<R: Runtime>(sink: &mut dyn Write, obj: R::ObjectRef) -> fmt::Result {
    write!(sink, "  - locked ")?;
    describe_object::<R>(sink, Some(obj))?;
    writeln!(sink)
}

impl<R: Runtime> Monitors<R> {
    /// Describe what `thread` is waiting for, if anything. Never changes lock state.
    pub fn describe_wait(sink: &mut dyn Write, thread: &ThreadOf<R>) -> fmt::Result {
        let tls = thread.tls();
        let mut lock_owner = None;

        let object = match tls.state() {
            ThreadState::Waiting | ThreadState::TimedWaiting => {
                write!(sink, "  - waiting on ")?;
                tls.wait_monitor_object()
            }
            ThreadState::Blocked => {
                write!(sink, "  - waiting to lock ")?;
                let object = tls.monitor_enter_object();
                if let Some(object) = object {
                    let owner = Self::get_thin_lock_id(R::header(object));
                    if !owner.is_none() {
                        lock_owner = Some(owner);
                    }
                }
                object
            }
            ThreadState::Runnable => return Ok(()),
        };

        describe_object::<R>(sink, object)?;
        if let Some(owner) = lock_owner {
            write!(sink, " held by thread {owner}")?;
        }
        writeln!(sink)
    }

    /// Describe the monitors held by the frame `visitor` is positioned on.
    pub fn describe_locks(sink: &mut dyn Write, visitor: &dyn StackVisitor<R>) -> fmt::Result {
        if visitor.method().is_none() {
            return Ok(());
        }

        if visitor.is_native() {
            if visitor.is_synchronized() {
                if let Some(this) = visitor.this_object() {
                    dump_locked_object::<R>(sink, this)?;
                }
            }
            return Ok(());
        }

        for obj in visitor.locked_objects() {
            dump_locked_object::<R>(sink, obj)?;
        }

        Ok(())
    }
}
