//! Output types: per-file results, batch statistics and the combined document.

use crate::config::FileSeparator;
use crate::error::{FileIssue, IssueKind};
use crate::format::FileKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One uploaded file as received from the browser or read from disk.
#[derive(Clone)]
pub struct UploadedFile {
    /// Name as supplied by the client; may contain path components.
    pub name: String,
    pub bytes: Vec<u8>,
    /// Browser-declared MIME type.
    pub content_type: Option<String>,
    /// Declared size. Differs from `bytes.len()` when the upload was cut off
    /// at the size limit.
    pub size: u64,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            name: name.into(),
            bytes,
            content_type: None,
            size,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// An upload whose body was not kept because it passed the size limit.
    pub fn truncated(name: impl Into<String>, content_type: Option<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            bytes: Vec::new(),
            content_type,
            size,
        }
    }
}

impl std::fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Markdown for one document, as produced by [`crate::convert::convert`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutput {
    pub markdown: String,
    /// Captioning failures; the document converted regardless.
    pub warnings: Vec<FileIssue>,
    pub images_captioned: usize,
}

/// Lifecycle of one file in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Queued,
    Converting,
    Succeeded,
    Failed,
    /// An archive member that was not converted.
    Skipped,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Succeeded | FileStatus::Failed | FileStatus::Skipped)
    }
}

/// The outcome for one file (or archive member) of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    /// 0-based position in batch order.
    pub index: usize,
    /// Upload name, or `archive.zip/member/path` for archive members.
    pub source_name: String,
    /// Unique name for the individual download.
    pub download_name: String,
    pub kind: FileKind,
    pub icon: String,
    pub status: FileStatus,
    /// Produced Markdown; empty unless `status` is `Succeeded`.
    pub markdown: String,
    /// Why the file failed or was skipped.
    pub issue: Option<FileIssue>,
    /// Non-fatal problems (caption failures).
    pub warnings: Vec<FileIssue>,
    /// Source name of the archive this file came from.
    pub archive: Option<String>,
    pub images_captioned: usize,
    pub duration_ms: u64,
}

impl ConversionResult {
    /// A result in `Queued` state.
    pub fn queued(source_name: impl Into<String>, kind: FileKind, archive: Option<String>) -> Self {
        Self {
            index: 0,
            source_name: source_name.into(),
            download_name: String::new(),
            kind,
            icon: kind.icon().to_string(),
            status: FileStatus::Queued,
            markdown: String::new(),
            issue: None,
            warnings: Vec::new(),
            archive,
            images_captioned: 0,
            duration_ms: 0,
        }
    }

    pub fn succeed(&mut self, markdown: String, warnings: Vec<FileIssue>, images_captioned: usize) {
        self.status = FileStatus::Succeeded;
        self.markdown = markdown;
        self.warnings = warnings;
        self.images_captioned = images_captioned;
    }

    pub fn fail(&mut self, issue: FileIssue) {
        self.status = FileStatus::Failed;
        self.markdown.clear();
        self.issue = Some(issue);
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = FileStatus::Skipped;
        self.issue = Some(FileIssue::new(IssueKind::ArchiveMemberFailure, reason));
    }

    pub fn is_success(&self) -> bool {
        self.status == FileStatus::Succeeded
    }
}

/// Aggregate statistics for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub images_captioned: usize,
    pub caption_failures: usize,
    pub duration_ms: u64,
}

impl BatchStats {
    pub fn from_results(results: &[ConversionResult], duration_ms: u64) -> Self {
        let count = |s: FileStatus| results.iter().filter(|r| r.status == s).count();
        Self {
            total: results.len(),
            succeeded: count(FileStatus::Succeeded),
            failed: count(FileStatus::Failed),
            skipped: count(FileStatus::Skipped),
            images_captioned: results.iter().map(|r| r.images_captioned).sum(),
            caption_failures: results
                .iter()
                .flat_map(|r| &r.warnings)
                .filter(|w| w.kind == IssueKind::CaptioningFailure)
                .count(),
            duration_ms,
        }
    }
}

/// Everything produced by one conversion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Results in batch order; archive members follow their archive's slot.
    pub results: Vec<ConversionResult>,
    pub stats: BatchStats,
    pub created_at: DateTime<Utc>,
}

impl BatchReport {
    /// Finalise results: assign indices and unique download names, compute stats.
    pub fn new(mut results: Vec<ConversionResult>, duration_ms: u64) -> Self {
        let mut namer = DownloadNamer::default();
        for (i, r) in results.iter_mut().enumerate() {
            r.index = i;
            r.download_name = namer.name_for(&r.source_name);
        }
        let stats = BatchStats::from_results(&results, duration_ms);
        Self {
            results,
            stats,
            created_at: Utc::now(),
        }
    }

    pub fn successes(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn get(&self, index: usize) -> Option<&ConversionResult> {
        self.results.get(index)
    }

    /// All successful outputs in batch order, joined with `separator`.
    ///
    /// With [`FileSeparator::None`] this is the exact concatenation of the
    /// individual downloads.
    pub fn combined_markdown(&self, separator: &FileSeparator) -> String {
        let mut out = String::new();
        for (position, r) in self.successes().enumerate() {
            out.push_str(&separator.render(position, &r.source_name));
            out.push_str(&r.markdown);
        }
        out
    }

    /// `combined_markdown_YYYYmmdd_HHMMSS.md`, stamped with the batch time.
    pub fn combined_file_name(&self) -> String {
        format!(
            "combined_markdown_{}.md",
            self.created_at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Hands out unique `.md` download names.
///
/// `a.pdf` → `a.pdf.md`; a second `a.pdf` → `a.pdf-2.md`. Path separators in
/// archive member names are flattened to `_`.
#[derive(Debug, Default)]
pub struct DownloadNamer {
    seen: HashMap<String, usize>,
}

impl DownloadNamer {
    pub fn name_for(&mut self, source_name: &str) -> String {
        let base: String = source_name
            .chars()
            .map(|c| match c {
                '/' | '\\' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        let base = if base.is_empty() { "file".to_string() } else { base };

        let mut n = *self.seen.get(&base).unwrap_or(&0);
        loop {
            n += 1;
            let candidate = if n == 1 {
                format!("{base}.md")
            } else {
                format!("{base}-{n}.md")
            };
            // A literal upload named `a.pdf-2` must not collide with the
            // second `a.pdf`.
            if !self.seen.contains_key(&candidate) {
                self.seen.insert(base.clone(), n);
                self.seen.insert(candidate.clone(), 0);
                return candidate;
            }
        }
    }
}
