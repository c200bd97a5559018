use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{define_flag, sync::contention::ContentionEvent, sync::Monitors, Runtime};

pub struct MonitorFlags;

define_flag!(MonitorFlags =>
    u32,
    lock_profiling_threshold,
    0,
    "Report monitor acquisitions that block for at least this many milliseconds. 0 disables reporting. (default: 0)"
);

define_flag!(MonitorFlags =>
    u32,
    contention_sample_percent,
    100,
    "Percentage of contention events above the threshold that are reported. (default: 100)"
);

/// Returns `true` when the calling thread must not get contention reports, e.g. because
/// it runs with latency constraints.
pub type SensitiveThreadHook = Arc<dyn Fn() -> bool + Send + Sync>;

/// Receives every reported contention event, after it has been logged.
pub type ContentionSink = Arc<dyn Fn(&ContentionEvent) + Send + Sync>;

#[derive(Clone)]
pub struct MonitorOptions {
    /// Minimum blocking time in milliseconds for a contention report. 0 disables reports.
    pub lock_profiling_threshold_ms: u32,
    /// Percentage (0..=100) of qualifying contention events that are reported.
    pub contention_sample_percent: u32,
    pub is_sensitive_thread: Option<SensitiveThreadHook>,
    pub contention_sink: Option<ContentionSink>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            lock_profiling_threshold_ms: 0,
            contention_sample_percent: 100,
            is_sensitive_thread: None,
            contention_sink: None,
        }
    }
}

impl fmt::Debug for MonitorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorOptions")
            .field("lock_profiling_threshold_ms", &self.lock_profiling_threshold_ms)
            .field("contention_sample_percent", &self.contention_sample_percent)
            .field("is_sensitive_thread", &self.is_sensitive_thread.is_some())
            .field("contention_sink", &self.contention_sink.is_some())
            .finish()
    }
}

pub struct MonitorsBuilder<R: Runtime> {
    pub options: MonitorOptions,
    marker: PhantomData<R>,
}

impl<R: Runtime> MonitorsBuilder<R> {
    pub fn new() -> Self {
        Self {
            options: MonitorOptions::default(),
            marker: PhantomData,
        }
    }

    /// Take the threshold and sample rate from [`MonitorFlags`].
    pub fn from_options(self) -> Self {
        self.lock_profiling_threshold(monitorflags_lock_profiling_threshold())
            .contention_sample_percent(monitorflags_contention_sample_percent())
    }

    pub fn lock_profiling_threshold(mut self, threshold_ms: u32) -> Self {
        self.options.lock_profiling_threshold_ms = threshold_ms;
        self
    }

    /// Values above 100 are clamped.
    pub fn contention_sample_percent(mut self, percent: u32) -> Self {
        if percent > 100 {
            log::warn!(
                target: "monitors",
                "contention sample percent {} is out of range, using 100",
                percent
            );
        }
        self.options.contention_sample_percent = percent.min(100);
        self
    }

    pub fn sensitive_thread_hook(mut self, hook: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.options.is_sensitive_thread = Some(Arc::new(hook));
        self
    }

    pub fn contention_sink(
        mut self,
        sink: impl Fn(&ContentionEvent) + Send + Sync + 'static,
    ) -> Self {
        self.options.contention_sink = Some(Arc::new(sink));
        self
    }

    pub fn build(self) -> Monitors<R> {
        Monitors::new(self.options)
    }
}

impl<R: Runtime> Default for MonitorsBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}
