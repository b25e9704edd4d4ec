//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the batch moves through its files. The CLI drives an `indicatif`
//! bar from these; the web server logs them.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2md::{BatchProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, total: usize, name: &str, markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} ({} bytes)", index + 1, total, name, markdown_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch driver as it processes each file.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is the 0-based position of the file in the
/// final result list; `total` is the current number of work items and grows
/// when an archive is expanded.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first file is touched.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called just before a file is handed to its backend.
    fn on_file_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a file converted successfully.
    ///
    /// # Arguments
    /// * `markdown_len`: byte length of the produced Markdown
    fn on_file_complete(&self, index: usize, total: usize, name: &str, markdown_len: usize) {
        let _ = (index, total, name, markdown_len);
    }

    /// Called when a file failed. The batch continues.
    fn on_file_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called when an archive member was skipped without conversion.
    fn on_file_skipped(&self, index: usize, total: usize, name: &str, reason: &str) {
        let _ = (index, total, name, reason);
    }

    /// Called after an archive has been expanded into `members` work items.
    fn on_archive_expanded(&self, archive: &str, members: usize) {
        let _ = (archive, members);
    }

    /// Called once after every file has been attempted.
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
