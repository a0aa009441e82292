//! Progress reporting for dataset loads.
//!
//! The loader reports decoded rows through [`ProgressCallback`] so that the
//! rendering backend (an `indicatif` bar in the CLI, nothing at all in the
//! server) is chosen by the caller.

use std::sync::Arc;

/// Receives progress updates while a dataset is fetched and decoded.
///
/// Implementations must be `Send + Sync` so a single callback can be shared
/// across the concurrently loading datasets.
pub trait ProgressCallback: Send + Sync {
    /// Advance progress by `delta` decoded rows.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// A [`ProgressCallback`] that ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
