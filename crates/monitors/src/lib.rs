//! Per-object monitors for managed runtimes.
//!
//! Objects carry a lock word in their [`HeapObjectHeader`](objectmodel::HeapObjectHeader).
//! Uncontended locking stays in the word; contended objects get a fat
//! [`Monitor`](sync::monitor::Monitor) supporting `wait`/`notify`. The embedding runtime
//! plugs in through the [`Runtime`] trait.

pub mod error;
pub mod mock;
pub mod objectmodel;
pub mod runtime;
pub mod sync;
pub mod utils;

pub type ThreadOf<R> = <R as Runtime>::Thread;

pub use error::MonitorError;
pub use runtime::{options::MonitorsBuilder, Runtime};
pub use sync::Monitors;
