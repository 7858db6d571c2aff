//! File-system watching for collection roots: debounced change events with
//! write-settle detection, plus a self-rearming scan loop that drives the
//! embed pass without overlapping itself.

mod engine;
mod types;
mod worker;

pub use engine::{start_watch, WatchHandle, WatchRoot};
pub use types::{WatchConfig, WatchError, WatchSink, WatchState, WatchStatus};
