//! PDF backend: page text via pdfium, scanned pages rasterised for transcription.
//!
//! pdfium is not safe to drive from async code; this module is only ever
//! called from `spawn_blocking`. A page counts as scanned when it has no text
//! layer but does carry image objects. Blank pages are dropped.

use super::{corrupt, Block, EmbeddedImage, ExtractOptions, ImageRole};
use crate::error::Doc2MdError;
use crate::pipeline::encode::encode_png;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bind to the pdfium shared library.
///
/// `PDFIUM_LIB_PATH` may name the library file or the directory holding it.
/// Without it, the system library is tried, then the working directory.
pub fn bind_pdfium() -> Result<Pdfium, Doc2MdError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(raw) => {
            let path = PathBuf::from(raw);
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(&lib).map_err(|e| {
                Doc2MdError::PdfiumBindingFailed(format!("{}: {}", lib.display(), e))
            })?
        }
        None => Pdfium::bind_to_system_library()
            .or_else(|_| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            })
            .map_err(|e| Doc2MdError::PdfiumBindingFailed(e.to_string()))?,
    };
    Ok(Pdfium::new(bindings))
}

pub(super) fn extract(path: &Path, name: &str, opts: &ExtractOptions) -> Result<Vec<Block>, Doc2MdError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.contains("Password") || detail.contains("password") {
            Doc2MdError::EncryptedFile {
                name: name.to_string(),
            }
        } else {
            corrupt(name, detail)
        }
    })?;

    let pages = document.pages();
    info!("{}: {} pages", name, pages.len());

    let render_config = PdfRenderConfig::new()
        .set_target_width(opts.max_rendered_pixels as i32)
        .set_maximum_height(opts.max_rendered_pixels as i32);

    let mut blocks = Vec::new();
    let mut text = String::new();

    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        let page_text = match page.text() {
            Ok(t) => t.all(),
            Err(e) => {
                warn!("{}: page {} has no readable text layer: {:?}", name, page_num, e);
                String::new()
            }
        };

        if !page_text.trim().is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(page_text.trim());
            continue;
        }

        let has_images = page
            .objects()
            .iter()
            .any(|o| o.object_type() == PdfPageObjectType::Image);
        if !has_images {
            debug!("{}: page {} is blank", name, page_num);
            continue;
        }

        if !text.is_empty() {
            text.push_str("\n\n");
            blocks.push(Block::Markdown(std::mem::take(&mut text)));
        }

        if !opts.rasterise_scanned_pages {
            blocks.push(Block::Markdown(format!(
                "<!-- page {page_num}: scanned page, no text layer -->\n\n"
            )));
            continue;
        }

        let rendered = page
            .render_with_config(&render_config)
            .map_err(|e| format!("{:?}", e))
            .and_then(|bitmap| encode_png(&bitmap.as_image()).map_err(|e| e.to_string()));
        match rendered {
            Ok(bytes) => {
                debug!("{}: page {} rasterised ({} bytes)", name, page_num, bytes.len());
                blocks.push(Block::Image(EmbeddedImage {
                    label: format!("page-{page_num}.png"),
                    alt: None,
                    bytes,
                    role: ImageRole::ScannedPage(page_num),
                }));
            }
            Err(e) => {
                warn!("{}: page {} could not be rendered: {}", name, page_num, e);
                blocks.push(Block::Markdown(format!(
                    "<!-- page {page_num}: scanned page could not be rendered -->\n\n"
                )));
            }
        }
    }

    if !text.is_empty() {
        text.push('\n');
        blocks.push(Block::Markdown(text));
    }
    Ok(blocks)
}
