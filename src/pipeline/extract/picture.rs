//! Standalone image files: dimensions plus a description to be filled in.

use super::{corrupt, Block, EmbeddedImage, ImageRole};
use crate::error::Doc2MdError;
use std::path::Path;

pub(super) fn extract(path: &Path, name: &str) -> Result<Vec<Block>, Doc2MdError> {
    let (width, height) = image::image_dimensions(path).map_err(|e| corrupt(name, e))?;
    let bytes = std::fs::read(path)?;
    Ok(vec![
        Block::Markdown(format!("ImageSize: {width}x{height}\n")),
        Block::Image(EmbeddedImage {
            label: name.to_string(),
            alt: None,
            bytes,
            role: ImageRole::Standalone,
        }),
    ])
}
