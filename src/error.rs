//! Error types for the edgequake-doc2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Doc2MdError`]: **fatal for one file**. The file cannot be converted at
//!   all (too large, unknown format, corrupt container, pdfium missing).
//!   Returned as `Err(Doc2MdError)` from the single-file `convert*` functions
//!   and recorded as the issue of a failed [`crate::output::ConversionResult`]
//!   by the batch functions. A batch itself never fails because of one file.
//!
//! * [`CaptionError`]: **non-fatal**. The vision API rejected or could not
//!   describe one image. The text of the document is still returned; the
//!   caption is replaced by a placeholder and the error is kept as a warning.
//!
//! [`FileIssue`] is the serialisable, user-facing form of either error, tagged
//! with an [`IssueKind`] so the UI can group messages by cause.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors for a single file (or for the configuration as a whole).
#[derive(Debug, Error)]
pub enum Doc2MdError {
    // ── Intake errors ─────────────────────────────────────────────────────
    /// The upload is larger than the configured per-file limit.
    #[error("'{name}' is {size} bytes, which exceeds the {limit}-byte upload limit")]
    UploadTooLarge { name: String, size: u64, limit: u64 },

    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── Format errors ─────────────────────────────────────────────────────
    /// No backend handles this kind of file.
    #[error("Unsupported format for '{name}': {detail}")]
    UnsupportedFormat { name: String, detail: String },

    /// The file claims a supported format but could not be parsed.
    #[error("'{name}' could not be converted: {detail}")]
    CorruptFile { name: String, detail: String },

    /// The file is password-protected.
    #[error("'{name}' is encrypted; remove the password and upload it again")]
    EncryptedFile { name: String },

    /// The container archive itself could not be read.
    #[error("Archive '{name}' is corrupt: {detail}")]
    CorruptArchive { name: String, detail: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDF conversion needs the pdfium shared library. You can:\n\
  • Install it system-wide (libpdfium.so / libpdfium.dylib / pdfium.dll).\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium (file or directory).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Captioning setup errors ───────────────────────────────────────────
    /// A provider was requested by name but could not be created.
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Temp-directory or file-system failure during intake.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Doc2MdError {
    /// The user-facing category this error is reported under.
    pub fn issue_kind(&self) -> IssueKind {
        match self {
            Doc2MdError::UploadTooLarge { .. } => IssueKind::UploadTooLarge,
            Doc2MdError::UnsupportedFormat { .. } => IssueKind::UnsupportedFormat,
            _ => IssueKind::ConversionFailure,
        }
    }

    /// Convert into the serialisable form stored on results.
    pub fn to_issue(&self) -> FileIssue {
        FileIssue::new(self.issue_kind(), self.to_string())
    }
}

/// A non-fatal error for a single image caption.
///
/// Never aborts the conversion of the document that contains the image.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum CaptionError {
    /// The API rejected the key (HTTP 401/403).
    #[error("authentication failed ({detail}); check the API key")]
    Auth { detail: String },

    /// HTTP 429.
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The call did not complete within the configured timeout.
    #[error("vision API call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The API answered with a non-success status.
    #[error("vision API returned HTTP {status}: {detail}")]
    Api { status: u16, detail: String },

    /// Transport-level failure (DNS, TLS, connection reset …).
    #[error("vision API request failed: {0}")]
    Http(String),

    /// The response could not be interpreted or held no text.
    #[error("vision API returned an unusable response: {0}")]
    InvalidResponse(String),

    /// The image could not be decoded into a format the API accepts.
    #[error("image format not supported for captioning: {0}")]
    UnsupportedImage(String),

    /// The image is larger than the API upload limit.
    #[error("image is {size} bytes, above the {limit}-byte captioning limit")]
    ImageTooLarge { size: usize, limit: usize },
}

/// User-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Rejected at intake; fatal for that file only.
    UploadTooLarge,
    /// No backend for the file's format.
    UnsupportedFormat,
    /// The backend failed on this file.
    ConversionFailure,
    /// An image could not be captioned; output degraded, not lost.
    CaptioningFailure,
    /// An archive member was skipped.
    ArchiveMemberFailure,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::UploadTooLarge => "upload too large",
            IssueKind::UnsupportedFormat => "unsupported format",
            IssueKind::ConversionFailure => "conversion failure",
            IssueKind::CaptioningFailure => "captioning failure",
            IssueKind::ArchiveMemberFailure => "archive member skipped",
        };
        f.write_str(s)
    }
}

/// A categorised, human-readable problem attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIssue {
    pub kind: IssueKind,
    pub message: String,
}

impl FileIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A captioning failure for the image called `label`.
    pub fn caption(label: &str, err: &CaptionError) -> Self {
        Self::new(IssueKind::CaptioningFailure, format!("{label}: {err}"))
    }
}

impl fmt::Display for FileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_too_large_display() {
        let e = Doc2MdError::UploadTooLarge {
            name: "big.pdf".into(),
            size: 300,
            limit: 200,
        };
        let msg = e.to_string();
        assert!(msg.contains("big.pdf"), "got: {msg}");
        assert!(msg.contains("200-byte"), "got: {msg}");
        assert_eq!(e.issue_kind(), IssueKind::UploadTooLarge);
    }

    #[test]
    fn corrupt_file_is_conversion_failure() {
        let e = Doc2MdError::CorruptFile {
            name: "x.docx".into(),
            detail: "missing word/document.xml".into(),
        };
        let issue = e.to_issue();
        assert_eq!(issue.kind, IssueKind::ConversionFailure);
        assert!(issue.message.contains("word/document.xml"));
    }

    #[test]
    fn unsupported_format_kind() {
        let e = Doc2MdError::UnsupportedFormat {
            name: "a.exe".into(),
            detail: "unknown extension".into(),
        };
        assert_eq!(e.issue_kind(), IssueKind::UnsupportedFormat);
    }

    #[test]
    fn caption_auth_display() {
        let e = CaptionError::Auth {
            detail: "HTTP 401".into(),
        };
        assert!(e.to_string().contains("API key"));
        let issue = FileIssue::caption("image1.png", &e);
        assert_eq!(issue.kind, IssueKind::CaptioningFailure);
        assert!(issue.message.starts_with("image1.png: "));
    }

    #[test]
    fn issue_kind_serialises_snake_case() {
        let json = serde_json::to_string(&IssueKind::ArchiveMemberFailure).unwrap();
        assert_eq!(json, "\"archive_member_failure\"");
    }
}
