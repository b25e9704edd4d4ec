//! File-kind detection.
//!
//! Uploads arrive with a name and, sometimes, a browser-declared MIME type.
//! The extension decides first because browsers routinely send
//! `application/octet-stream` for Office files; the MIME type is only
//! consulted when the name has no usable extension.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every file kind the pipeline knows about, supported or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Pdf,
    Docx,
    /// Legacy binary Word document; recognised so the error can say what to do.
    Doc,
    Pptx,
    /// Legacy binary PowerPoint deck.
    Ppt,
    /// Any workbook calamine can open (xlsx, xlsm, xlsb, xls, ods).
    Spreadsheet,
    Csv,
    Json,
    Xml,
    Html,
    /// Plain text and Markdown, passed through.
    Text,
    Image,
    Zip,
    Unknown,
}

impl FileKind {
    /// Classify a file from its name, falling back to the declared MIME type.
    pub fn detect(name: &str, content_type: Option<&str>) -> Self {
        let by_ext = Self::from_extension(name);
        if by_ext != FileKind::Unknown {
            return by_ext;
        }
        content_type.map(Self::from_mime).unwrap_or(FileKind::Unknown)
    }

    /// Classify from the file extension alone (case-insensitive).
    pub fn from_extension(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("pdf") => FileKind::Pdf,
            Some("docx") => FileKind::Docx,
            Some("doc") => FileKind::Doc,
            Some("pptx") => FileKind::Pptx,
            Some("ppt") => FileKind::Ppt,
            Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => FileKind::Spreadsheet,
            Some("csv") => FileKind::Csv,
            Some("json") => FileKind::Json,
            Some("xml") => FileKind::Xml,
            Some("html" | "htm" | "xhtml") => FileKind::Html,
            Some("txt" | "text" | "md" | "markdown" | "log") => FileKind::Text,
            Some("png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "tif" | "tiff") => {
                FileKind::Image
            }
            Some("zip") => FileKind::Zip,
            _ => FileKind::Unknown,
        }
    }

    /// Classify from a MIME type such as `text/csv; charset=utf-8`.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/pdf" => FileKind::Pdf,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                FileKind::Docx
            }
            "application/msword" => FileKind::Doc,
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                FileKind::Pptx
            }
            "application/vnd.ms-powerpoint" => FileKind::Ppt,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel"
            | "application/vnd.oasis.opendocument.spreadsheet" => FileKind::Spreadsheet,
            "text/csv" => FileKind::Csv,
            "application/json" => FileKind::Json,
            "application/xml" | "text/xml" => FileKind::Xml,
            "text/html" | "application/xhtml+xml" => FileKind::Html,
            "text/plain" | "text/markdown" => FileKind::Text,
            "application/zip" | "application/x-zip-compressed" => FileKind::Zip,
            m if m.starts_with("image/") => FileKind::Image,
            _ => FileKind::Unknown,
        }
    }

    pub fn is_archive(self) -> bool {
        self == FileKind::Zip
    }

    /// Why this kind cannot be converted; `None` for supported kinds.
    pub fn unsupported_reason(self) -> Option<&'static str> {
        match self {
            FileKind::Doc => Some("legacy .doc files are not supported; save the file as .docx"),
            FileKind::Ppt => Some("legacy .ppt files are not supported; save the file as .pptx"),
            FileKind::Unknown => Some("unrecognised file type"),
            _ => None,
        }
    }

    /// Icon shown next to the file in the UI.
    pub fn icon(self) -> &'static str {
        match self {
            FileKind::Image => "🖼️",
            FileKind::Pdf => "📄",
            FileKind::Doc | FileKind::Docx => "📝",
            FileKind::Spreadsheet | FileKind::Csv => "📊",
            FileKind::Ppt | FileKind::Pptx => "📽️",
            FileKind::Text => "📋",
            FileKind::Html => "🌐",
            FileKind::Zip => "🗜️",
            FileKind::Json | FileKind::Xml | FileKind::Unknown => "📎",
        }
    }
}
