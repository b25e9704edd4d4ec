//! # edgequake-doc2md
//!
//! Upload documents, convert them to Markdown, and caption their images with a
//! Vision Language Model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads
//!  │
//!  ├─ 1. Intake    size check, write to a per-batch temp directory
//!  ├─ 2. Expand    ZIP members become batch inputs (recursive, bounded)
//!  ├─ 3. Extract   per-format backend → Markdown + images (spawn_blocking)
//!  ├─ 4. Caption   images → vision model (optional, never fatal)
//!  ├─ 5. Polish    post-processing rules (line endings, whitespace, headings)
//!  └─ 6. Report    per-file results + combined document
//! ```
//!
//! ## Supported formats
//!
//! PDF (pdfium text layer, scanned pages transcribed), DOCX, PPTX,
//! XLSX/XLS/XLSM/XLSB/ODS, CSV, JSON, XML, HTML, plain text / Markdown,
//! PNG/JPEG/GIF/WEBP/BMP/TIFF images and ZIP archives of any of these.
//! Legacy `.doc` / `.ppt` are recognised and rejected with a hint.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2md::{convert_batch, ConversionConfig, UploadedFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Captioning is picked up from OPENAI_API_KEY when it is set.
//!     let config = ConversionConfig::default();
//!     let files = vec![UploadedFile::new("notes.csv", b"a,b\n1,2\n".to_vec())];
//!     let report = convert_batch(files, &config).await?;
//!     for r in &report.results {
//!         println!("{} → {:?}", r.source_name, r.status);
//!     }
//!     print!("{}", report.combined_markdown(&config.file_separator));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `doc2md` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `server` | on      | The axum web UI and JSON API ([`server`]) |
//!
//! Disable both when using only the library:
//! ```toml
//! edgequake-doc2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, FileSeparator, ServerConfig};
pub use convert::{
    convert, convert_batch, convert_paths, convert_sync, convert_to_file, resolve_captioner,
    write_atomic,
};
pub use error::{CaptionError, Doc2MdError, FileIssue, IssueKind};
pub use format::FileKind;
pub use output::{
    BatchReport, BatchStats, ConversionResult, DocumentOutput, FileStatus, UploadedFile,
};
pub use pipeline::caption::{CaptionPurpose, CaptionRequest, ImageCaptioner};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
