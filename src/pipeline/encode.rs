//! Image encoding: raw image bytes → base64 payload for the vision API.
//!
//! Vision APIs accept PNG, JPEG, GIF and WEBP as base64 data-URIs. Images
//! pulled out of documents come in whatever format the author pasted, so
//! BMP and TIFF are decoded and re-encoded as PNG. Vector formats (EMF, WMF)
//! cannot be decoded by the `image` crate and are reported instead of sent.

use crate::error::CaptionError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Largest image accepted by the vision API (20 MB, after re-encoding).
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// A base64 image ready to be attached to a vision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub base64: String,
    pub mime_type: &'static str,
}

impl EncodedImage {
    /// `data:` URI form used by the OpenAI chat API.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// Encode image bytes for the vision API, converting formats it rejects.
pub fn encode_image(bytes: &[u8]) -> Result<EncodedImage, CaptionError> {
    let format = image::guess_format(bytes)
        .map_err(|e| CaptionError::UnsupportedImage(format!("unrecognised image data: {e}")))?;

    let (payload, mime_type) = match format {
        ImageFormat::Png => (bytes.to_vec(), "image/png"),
        ImageFormat::Jpeg => (bytes.to_vec(), "image/jpeg"),
        ImageFormat::Gif => (bytes.to_vec(), "image/gif"),
        ImageFormat::WebP => (bytes.to_vec(), "image/webp"),
        ImageFormat::Bmp | ImageFormat::Tiff => {
            let img = image::load_from_memory_with_format(bytes, format)
                .map_err(|e| CaptionError::UnsupportedImage(format!("{format:?}: {e}")))?;
            debug!("Re-encoding {:?} image as PNG", format);
            (encode_png(&img)?, "image/png")
        }
        other => {
            return Err(CaptionError::UnsupportedImage(format!("{other:?}")));
        }
    };

    if payload.len() > MAX_IMAGE_BYTES {
        return Err(CaptionError::ImageTooLarge {
            size: payload.len(),
            limit: MAX_IMAGE_BYTES,
        });
    }

    let base64 = STANDARD.encode(&payload);
    debug!("Encoded image → {} bytes base64", base64.len());
    Ok(EncodedImage { base64, mime_type })
}

/// Encode a rasterised image (a scanned PDF page) as PNG bytes.
///
/// PNG is lossless, which keeps text crisp for transcription.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, CaptionError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| CaptionError::UnsupportedImage(format!("PNG encoding failed: {e}")))?;
    Ok(buf)
}
