//! Post-processing: deterministic cleanup of converted Markdown and captions.
//!
//! Backends stitch Markdown together from very different sources (XML runs,
//! spreadsheet cells, pdfium text, model output), and each leaves its own
//! artefacts: Windows line endings, zero-width characters from Word, trailing
//! spaces from PDF text runs, long runs of empty paragraphs. The rules here
//! remove those without touching content. Each rule is a pure `&str → String`
//! function and is tested on its own.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so every later rule can split on `\n`.
//! Heading spacing runs after blank-line collapsing so the blank line it
//! inserts is never collapsed away, and the final-newline pass runs last.
//!
//! Model output (captions and scanned-page transcriptions) gets two extra
//! rules first: outer ```` ```markdown ```` fences are stripped and image
//! links the model invented are reduced to their alt text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all document rules to backend output.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens …)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 1
/// 5. Ensure heading lines have a blank line before them (outside code fences)
/// 6. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    ensure_final_newline(&s)
}

/// Clean a scanned-page transcription returned by the vision model.
///
/// The result is spliced into the surrounding document, so it has no final
/// newline of its own; the document pass adds one at the end.
pub fn clean_transcription(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_hallucinated_images(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

/// Clean a caption for use as Markdown alt text.
///
/// Captions are flattened to a single line (alt text cannot span lines) and
/// square brackets are escaped so the caption cannot close the `![…]` early.
pub fn clean_caption(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = remove_invisible_chars(&s);
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    escape_alt_text(&flat)
}

/// Clean a caption used as a standalone description section.
///
/// Unlike [`clean_caption`], paragraphs are kept.
pub fn clean_description(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

/// Escape a value for a GFM table cell: pipes escaped, line breaks flattened.
pub fn escape_table_cell(value: &str) -> String {
    let flat = value
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .replace('|', "\\|");
    flat.trim().to_string()
}

/// Escape brackets in Markdown alt text.
pub fn escape_alt_text(value: &str) -> String {
    value.replace('[', "\\[").replace(']', "\\]")
}

// ── Rule: Strip outer markdown fences ────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 5: Normalise heading spacing ────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6} \S").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    // Length of the open fence; it closes on a run at least as long.
    let mut fence: Option<usize> = None;
    for (i, line) in input.lines().enumerate() {
        let trimmed = line.trim();
        let ticks = trimmed.chars().take_while(|&c| c == '`').count();
        if ticks >= 3 {
            match fence {
                None => fence = Some(ticks),
                Some(open) if ticks >= open && ticks == trimmed.len() => fence = None,
                Some(_) => {}
            }
        }
        if fence.is_none() && i > 0 && RE_HEADING.is_match(line) {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 6: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Model output: remove hallucinated image links ────────────────────────────
//
// A transcribed page sometimes contains `![figure](image.png)` for a figure
// the model could only describe. There is no such file, so the link becomes
// the italic alt text. Absolute HTTP(S) links are kept.

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    if !u.starts_with("http://") && !u.starts_with("https://") {
        return true;
    }
    let fake_domains = [
        "example.com",
        "placeholder.com",
        "via.placeholder.com",
        "dummyimage.com",
        "placehold.it",
    ];
    fake_domains.iter().any(|d| u.contains(d))
}

fn remove_hallucinated_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if is_placeholder_url(&caps[2]) {
                if alt.is_empty() {
                    String::new()
                } else {
                    format!("*{}*", alt)
                }
            } else {
                caps[0].to_string()
            }
        })
        .to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_markdown_fences("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_markdown_fences("```\nA cat.\n```"), "A cat.");
        assert_eq!(strip_markdown_fences("# Hello\nWorld"), "# Hello\nWorld");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(trim_trailing_whitespace("  hello   \nworld  "), "  hello\nworld");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn test_heading_spacing() {
        let result = normalise_heading_spacing("some text\n# Heading\nmore text");
        assert!(result.contains("text\n\n# Heading\n"));
    }

    #[test]
    fn test_heading_spacing_ignores_code_fences() {
        let input = "```bash\necho hi\n# a comment\n```";
        assert_eq!(normalise_heading_spacing(input), format!("{input}\n"));
    }

    #[test]
    fn test_heading_spacing_respects_fence_length() {
        let input = "````xml\n```\n# inside\n```\n# still inside\n````\ntext\n# After";
        assert_eq!(
            normalise_heading_spacing(input),
            "````xml\n```\n# inside\n```\n# still inside\n````\ntext\n\n# After\n"
        );
    }

    #[test]
    fn test_hashtag_is_not_heading() {
        let input = "text\n#hashtag";
        assert_eq!(normalise_heading_spacing(input), "text\n#hashtag\n");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_remove_hallucinated_image() {
        let result = remove_hallucinated_images("Text\n![Chart Title](chart.png)\nMore");
        assert!(!result.contains("!["));
        assert!(result.contains("*Chart Title*"));
        let kept = remove_hallucinated_images("![Figure](https://arxiv.org/fig1.png)");
        assert!(kept.contains("![Figure]"));
    }

    #[test]
    fn test_clean_markdown_full_pipeline() {
        let input = "\u{FEFF}# Title\r\n\r\nSome text   \n\n\n\n\n\n## Section\nbody";
        let result = clean_markdown(input);
        assert_eq!(result, "# Title\n\nSome text\n\n## Section\nbody\n");
    }

    #[test]
    fn test_clean_markdown_is_idempotent() {
        let input = "a\r\n# b\n\n\n\nc  \n";
        let once = clean_markdown(input);
        assert_eq!(clean_markdown(&once), once);
    }

    #[test]
    fn test_clean_caption_flattens_and_escapes() {
        let caption = clean_caption("```\nA bar chart\n\nshowing [Q1] sales.\n```");
        assert_eq!(caption, "A bar chart showing \\[Q1\\] sales.");
    }

    #[test]
    fn test_clean_description_keeps_paragraphs() {
        let d = clean_description("First.\r\n\r\n\r\n\r\nSecond.  ");
        assert_eq!(d, "First.\n\nSecond.");
    }

    #[test]
    fn test_clean_transcription() {
        let t = clean_transcription("```markdown\n# Page\n\n![fig](fig.png)\n```");
        assert_eq!(t, "# Page\n\n*fig*");
    }

    #[test]
    fn test_escape_table_cell() {
        assert_eq!(escape_table_cell(" a|b\nc "), "a\\|b c");
    }
}
