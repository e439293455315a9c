//! Progress-callback trait for per-stage, per-item pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::pipeline::Pipeline::with_progress`] to receive events as each
//! stage walks the item list. The driver binary forwards them to a terminal
//! progress bar; a service embedding the library could forward them to a
//! channel or a status table instead.
//!
//! # Example
//!
//! ```rust
//! use ead_pdf_harvest::{PipelineProgressCallback, Stage};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct SkipCounter(AtomicUsize);
//!
//! impl PipelineProgressCallback for SkipCounter {
//!     fn on_item_skipped(&self, _stage: Stage, _src_url: &str, _reason: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::pipeline::Stage;
use std::sync::Arc;

/// Called by the pipeline as it processes each stage.
///
/// Stages run strictly one item at a time, so calls never overlap, but the
/// trait is `Send + Sync` so a callback can be shared with other tasks. All
/// methods have no-op defaults; override only what you need.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called before the first item of a stage.
    ///
    /// # Arguments
    /// * `stage`       — the stage about to run
    /// * `total_items` — items in the checkpoint, eligible or not
    fn on_stage_start(&self, stage: Stage, total_items: usize) {
        let _ = (stage, total_items);
    }

    /// Called when the stage finished its work on an item.
    fn on_item_done(&self, stage: Stage, src_url: &str) {
        let _ = (stage, src_url);
    }

    /// Called when an item was passed over: prerequisite missing, output
    /// already present, or the stage failed for it.
    ///
    /// # Arguments
    /// * `reason` — human-readable description, also written to the log
    fn on_item_skipped(&self, stage: Stage, src_url: &str, reason: &str) {
        let _ = (stage, src_url, reason);
    }

    /// Called after the stage checkpoint has been written.
    fn on_stage_complete(&self, stage: Stage, processed: usize, skipped: usize, failed: usize) {
        let _ = (stage, processed, skipped, failed);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::pipeline::Pipeline`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        started_total: AtomicUsize,
        done: AtomicUsize,
        skipped: AtomicUsize,
        completed_failed: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage_start(&self, _stage: Stage, total_items: usize) {
            self.started_total.store(total_items, Ordering::SeqCst);
        }

        fn on_item_done(&self, _stage: Stage, _src_url: &str) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_skipped(&self, _stage: Stage, _src_url: &str, _reason: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _stage: Stage, _processed: usize, _skipped: usize, failed: usize) {
            self.completed_failed.store(failed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Extract, 5);
        cb.on_item_done(Stage::Extract, "http://x/a.pdf");
        cb.on_item_skipped(Stage::Extract, "http://x/b.pdf", "not fetched");
        cb.on_stage_complete(Stage::Extract, 1, 1, 0);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_stage_start(Stage::Compress, 3);
        tracker.on_item_done(Stage::Compress, "http://x/a.pdf");
        tracker.on_item_done(Stage::Compress, "http://x/b.pdf");
        tracker.on_item_skipped(Stage::Compress, "http://x/c.pdf", "tiffs_dir is unset");
        tracker.on_stage_complete(Stage::Compress, 2, 1, 0);

        assert_eq!(tracker.started_total.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.done.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completed_failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(Stage::Harvest, 10);
        cb.on_item_done(Stage::Harvest, "http://x/a.pdf");
    }
}
