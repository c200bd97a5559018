use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::Runtime;

use super::monitor::Monitor;

/// Every monitor created by inflation, kept so the collector can find the ones whose
/// object died.
///
/// Entries are weak: monitors are owned by the header of the object they inflate.
/// `monitor_list_lock` guards membership only and is never held while a monitor's own
/// lock is taken.
pub struct MonitorList<R: Runtime> {
    monitor_list_lock: Mutex<Vec<Weak<Monitor<R>>>>,
}

impl<R: Runtime> MonitorList<R> {
    pub const fn new() -> Self {
        Self {
            monitor_list_lock: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, monitor: &Arc<Monitor<R>>) {
        self.monitor_list_lock.lock().push(Arc::downgrade(monitor));
    }

    pub fn len(&self) -> usize {
        self.monitor_list_lock.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every registered monitor that is still alive.
    pub fn for_each(&self, mut f: impl FnMut(&Monitor<R>)) {
        let list = self.monitor_list_lock.lock();
        for monitor in list.iter().filter_map(Weak::upgrade) {
            f(&monitor);
        }
    }

    /// Unregister monitors whose object `is_marked` reports as unreachable. Returns the
    /// number of monitors removed.
    ///
    /// Runs inside a collector pause with the heap bitmap lock held: it only calls
    /// `is_marked` and never takes a monitor's lock. Storage of the dropped monitors is
    /// released when the collector frees their objects.
    pub fn sweep_monitor_list<A: ?Sized>(
        &self,
        is_marked: impl Fn(R::ObjectRef, &A) -> bool,
        arg: &A,
    ) -> usize {
        let mut list = self.monitor_list_lock.lock();
        let before = list.len();

        list.retain(|monitor| match monitor.upgrade() {
            Some(monitor) => is_marked(monitor.object(), arg),
            None => false,
        });

        let removed = before - list.len();
        log::debug!(
            target: "monitors::sweep",
            "swept monitor list: {} removed, {} live",
            removed,
            list.len()
        );
        removed
    }
}

impl<R: Runtime> Default for MonitorList<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;
    use crate::{
        mock::{MockObject, MockObjectRef, MockVM},
        objectmodel::header::ThinLockId,
    };

    fn monitor_for(obj: MockObjectRef) -> Arc<Monitor<MockVM>> {
        Arc::new(Monitor::new(obj, ThinLockId::NONE, 0, None))
    }

    #[test]
    fn sweep_drops_unmarked_monitors() {
        let list = MonitorList::<MockVM>::new();
        let live = MockObject::allocate("java.lang.Object");
        let dead = MockObject::allocate("java.lang.String");
        let live_monitor = monitor_for(live);
        let dead_monitor = monitor_for(dead);
        list.add(&live_monitor);
        list.add(&dead_monitor);
        assert_eq!(list.len(), 2);

        let marked: HashSet<MockObjectRef> = [live].into_iter().collect();
        let removed = list.sweep_monitor_list(|obj, marked| marked.contains(&obj), &marked);
        assert_eq!(removed, 1);

        let mut seen = Vec::new();
        list.for_each(|monitor| seen.push(monitor.object()));
        assert_eq!(seen, vec![live]);

        assert_eq!(list.sweep_monitor_list(|_, _: &()| true, &()), 0);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn sweep_forgets_monitors_that_were_already_freed() {
        let list = MonitorList::<MockVM>::new();
        let monitor = monitor_for(MockObject::allocate("java.lang.Object"));
        list.add(&monitor);
        drop(monitor);

        assert_eq!(list.sweep_monitor_list(|_, _: &()| true, &()), 1);
        assert!(list.is_empty());
    }
}
