//! Format backends: one file in, an ordered list of [`Block`]s out.
//!
//! Backends are synchronous and CPU-bound; the dispatcher runs them on
//! `spawn_blocking`. They never call the vision model themselves. Images are
//! returned as [`Block::Image`] and captioned afterwards, so every backend is
//! testable without a network.

mod docx;
mod ooxml;
mod pdf;
mod picture;
mod pptx;
mod sheet;
mod text;

use crate::error::Doc2MdError;
use crate::format::FileKind;
use crate::pipeline::postprocess::escape_table_cell;
use std::path::Path;

pub use pdf::bind_pdfium;

/// One unit of backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Finished Markdown.
    Markdown(String),
    /// An image that still needs a caption.
    Image(EmbeddedImage),
}

/// Where an image sits in the document, which decides how it is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    /// Embedded in a document: rendered as `![caption](label)`.
    Inline,
    /// The uploaded file is the image: rendered as a description section.
    Standalone,
    /// A PDF page with no text layer (1-based page number): transcribed.
    ScannedPage(usize),
}

/// Image bytes pulled out of a document.
#[derive(Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    /// File name used as the Markdown link target (`image1.png`).
    pub label: String,
    /// Alt text supplied by the author, if any.
    pub alt: Option<String>,
    pub bytes: Vec<u8>,
    pub role: ImageRole,
}

impl std::fmt::Debug for EmbeddedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedImage")
            .field("label", &self.label)
            .field("alt", &self.alt)
            .field("bytes", &self.bytes.len())
            .field("role", &self.role)
            .finish()
    }
}

/// Backend knobs that come from the conversion config.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Rasterise PDF pages without text so they can be transcribed.
    pub rasterise_scanned_pages: bool,
    /// Longest edge of a rasterised page, in pixels.
    pub max_rendered_pixels: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            rasterise_scanned_pages: false,
            max_rendered_pixels: 2000,
        }
    }
}

/// Run the backend for `kind` on the file at `path`.
///
/// `name` is the user-facing file name, used in error messages.
pub fn extract(
    kind: FileKind,
    path: &Path,
    name: &str,
    opts: &ExtractOptions,
) -> Result<Vec<Block>, Doc2MdError> {
    match kind {
        FileKind::Text => text::plain(path, name),
        FileKind::Csv => text::csv(path, name),
        FileKind::Json => text::json(path, name),
        FileKind::Xml => text::xml(path, name),
        FileKind::Html => text::html(path, name),
        FileKind::Docx => docx::extract(path, name),
        FileKind::Pptx => pptx::extract(path, name),
        FileKind::Spreadsheet => sheet::extract(path, name),
        FileKind::Pdf => pdf::extract(path, name, opts),
        FileKind::Image => picture::extract(path, name),
        // Archives are expanded by the batch driver, never converted directly.
        FileKind::Zip | FileKind::Doc | FileKind::Ppt | FileKind::Unknown => {
            Err(Doc2MdError::UnsupportedFormat {
                name: name.to_string(),
                detail: kind
                    .unsupported_reason()
                    .unwrap_or("archives are expanded, not converted")
                    .to_string(),
            })
        }
    }
}

/// Render rows as a GFM table; the first row is the header.
///
/// Short rows are padded so every row has the same number of cells.
pub(crate) fn markdown_table(rows: &[Vec<String>]) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let render_row = |row: &[String]| {
        let mut line = String::from("|");
        for i in 0..width {
            let cell = row.get(i).map(|c| escape_table_cell(c)).unwrap_or_default();
            line.push(' ');
            line.push_str(&cell);
            line.push_str(" |");
        }
        line.push('\n');
        line
    };

    let mut out = render_row(&rows[0]);
    out.push('|');
    for _ in 0..width {
        out.push_str(" --- |");
    }
    out.push('\n');
    for row in &rows[1..] {
        out.push_str(&render_row(row));
    }
    out
}

/// Read a file as text, replacing invalid UTF-8.
pub(crate) fn read_text(path: &Path) -> Result<String, Doc2MdError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

pub(crate) fn corrupt(name: &str, detail: impl std::fmt::Display) -> Doc2MdError {
    Doc2MdError::CorruptFile {
        name: name.to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_pads_short_rows() {
        let rows = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["1".to_string()],
        ];
        assert_eq!(markdown_table(&rows), "| a | b |\n| --- | --- |\n| 1 |  |\n");
    }

    #[test]
    fn empty_table_is_empty() {
        assert_eq!(markdown_table(&[]), "");
    }

    #[test]
    fn legacy_doc_is_unsupported() {
        let err = extract(
            FileKind::Doc,
            Path::new("/nonexistent.doc"),
            "old.doc",
            &ExtractOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Doc2MdError::UnsupportedFormat { .. }));
        assert!(err.to_string().contains(".docx"));
    }
}
