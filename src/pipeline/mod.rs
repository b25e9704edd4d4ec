//! Pipeline stages for document-to-Markdown conversion.
//!
//! Each submodule implements exactly one transformation step and is testable
//! on its own; only [`caption`] touches the network.
//!
//! ## Data Flow
//!
//! ```text
//! intake ──▶ archive ──▶ extract ──▶ encode ──▶ caption ──▶ postprocess
//! (temp dir)  (zip)      (backends)  (base64)   (vision)    (cleanup)
//! ```
//!
//! 1. [`intake`]: write uploads into a per-batch temporary directory,
//!    enforcing the size cap before anything is written
//! 2. [`archive`]: expand ZIP members into independent inputs, with path
//!    sanitisation and member limits
//! 3. [`extract`]: format backends; CPU-bound, run in `spawn_blocking`
//! 4. [`encode`]: base64-wrap embedded images, re-encoding formats the
//!    vision API rejects
//! 5. [`caption`]: describe images through a pluggable [`caption::ImageCaptioner`]
//! 6. [`postprocess`]: deterministic cleanup of documents and captions

pub mod archive;
pub mod caption;
pub mod encode;
pub mod extract;
pub mod intake;
pub mod postprocess;
