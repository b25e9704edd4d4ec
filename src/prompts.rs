//! Prompts sent to the vision model.
//!
//! Every prompt lives here so the wording can change in one place and unit
//! tests can inspect it without a model. Callers can override the caption
//! prompt via [`crate::config::ConversionConfig::caption_prompt`]; the
//! constants are used only when no override is provided.

use crate::pipeline::caption::CaptionPurpose;

/// System message for every vision request.
pub const SYSTEM_PROMPT: &str = "You describe images that appear inside documents. \
Your answer is inserted verbatim into a Markdown file, so reply with the \
description only: no preamble, no closing remarks, no code fences.";

/// Default prompt for captioning an image embedded in a document, or an
/// uploaded image file.
pub const DEFAULT_CAPTION_PROMPT: &str = "Write a detailed caption for this image.";

/// Prompt for transcribing a PDF page that has no text layer.
pub const TRANSCRIBE_PAGE_PROMPT: &str = r#"This image is a scanned document page. Transcribe it to clean, well-structured Markdown.

1. Preserve ALL text completely, in the order a human would read it.
2. Use # / ## / ### for headings, - and 1. for lists, **bold** and *italic* for emphasis.
3. Convert tables to GFM pipe tables.
4. Ignore page numbers and repeated headers or footers.
5. For figures, write one italic sentence describing them.
6. Output ONLY the Markdown, without ```markdown fences or commentary."#;

/// The user prompt for a request of the given purpose.
pub fn prompt_for(purpose: CaptionPurpose, caption_override: Option<&str>) -> &str {
    match purpose {
        CaptionPurpose::Caption => caption_override.unwrap_or(DEFAULT_CAPTION_PROMPT),
        CaptionPurpose::TranscribePage => TRANSCRIBE_PAGE_PROMPT,
    }
}
