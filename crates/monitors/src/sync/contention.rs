//! Lock contention profiling.
//!
//! A `monitor_enter` that had to block for at least the configured threshold is
//! reported with the site where the previous owner took the lock. Reports are sampled
//! to bound logging volume under heavy contention.

use rand::Rng;

use crate::{runtime::threads::Thread, Runtime, ThreadOf};

use super::{monitor::Contention, Monitors};

/// One reported contention event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentionEvent {
    pub thread_name: String,
    pub wait_ms: u64,
    pub sample_percent: u32,
    pub object_type: String,
    /// Source file of the previous owner's acquisition site, if it could be resolved.
    pub owner_file: Option<String>,
    pub owner_line: Option<u32>,
}

/// Whether one qualifying event is reported when sampling at `percent`.
fn should_sample(percent: u32) -> bool {
    match percent {
        0 => false,
        100.. => true,
        percent => rand::rng().random_range(0..100) < percent,
    }
}

impl<R: Runtime> Monitors<R> {
    /// Decide whether a blocking acquisition of `obj` gets reported.
    pub(crate) fn profile_contention(
        &self,
        thread: &ThreadOf<R>,
        obj: R::ObjectRef,
        contention: Contention<R>,
    ) {
        let threshold = self.options().lock_profiling_threshold_ms;
        if threshold == 0 {
            return;
        }

        let wait_ms = contention.waited.as_millis() as u64;
        if wait_ms < threshold as u64 {
            return;
        }

        let sample_percent = self.options().contention_sample_percent.min(100);
        if !should_sample(sample_percent) || self.is_sensitive_thread() {
            return;
        }

        self.log_contention_event(thread, obj, wait_ms, sample_percent, contention.owner_site);
    }

    pub(crate) fn log_contention_event(
        &self,
        thread: &ThreadOf<R>,
        obj: R::ObjectRef,
        wait_ms: u64,
        sample_percent: u32,
        owner_site: Option<(R::Method, u32)>,
    ) {
        let location = owner_site.and_then(|(method, dex_pc)| R::translate_location(method, dex_pc));

        let event = ContentionEvent {
            thread_name: thread.name(),
            wait_ms,
            sample_percent,
            object_type: R::pretty_type_of(obj),
            owner_file: location.as_ref().map(|location| location.file.clone()),
            owner_line: location.as_ref().map(|location| location.line),
        };

        match &location {
            Some(location) => log::info!(
                target: "monitors::contention",
                "thread '{}' waited {}ms for a monitor on {} held since {} (sampled at {}%)",
                event.thread_name,
                wait_ms,
                event.object_type,
                location,
                sample_percent
            ),
            None => log::info!(
                target: "monitors::contention",
                "thread '{}' waited {}ms for a monitor on {} (sampled at {}%)",
                event.thread_name,
                wait_ms,
                event.object_type,
                sample_percent
            ),
        }

        if let Some(sink) = &self.options().contention_sink {
            sink(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_bounds() {
        assert!((0..1000).all(|_| should_sample(100)));
        assert!((0..1000).all(|_| should_sample(250)));
        assert!((0..1000).all(|_| !should_sample(0)));

        let hits = (0..10_000).filter(|_| should_sample(50)).count();
        assert!((3_000..7_000).contains(&hits), "{hits} hits out of 10000");
    }
}
