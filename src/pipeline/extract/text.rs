//! Text-based formats: plain text, CSV, JSON, XML and HTML.

use super::{corrupt, markdown_table, read_text, Block};
use crate::error::Doc2MdError;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::path::Path;
use tracing::debug;

/// Plain text and Markdown pass through unchanged.
pub(super) fn plain(path: &Path, _name: &str) -> Result<Vec<Block>, Doc2MdError> {
    Ok(vec![Block::Markdown(read_text(path)?)])
}

/// CSV becomes one GFM table, first record as header.
pub(super) fn csv(path: &Path, name: &str) -> Result<Vec<Block>, Doc2MdError> {
    let text = read_text(path)?;
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| corrupt(name, e))?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }
    debug!("{}: {} CSV rows", name, rows.len());
    Ok(vec![Block::Markdown(markdown_table(&rows))])
}

/// JSON is validated and pretty-printed inside a fenced block.
pub(super) fn json(path: &Path, name: &str) -> Result<Vec<Block>, Doc2MdError> {
    let text = read_text(path)?;
    let value: serde_json::Value =
        serde_json::from_str(text.trim_start_matches('\u{FEFF}')).map_err(|e| corrupt(name, e))?;
    let pretty = serde_json::to_string_pretty(&value).map_err(|e| corrupt(name, e))?;
    Ok(vec![Block::Markdown(fenced("json", &pretty))])
}

/// XML is checked for well-formedness and reproduced inside a fenced block.
pub(super) fn xml(path: &Path, name: &str) -> Result<Vec<Block>, Doc2MdError> {
    let text = read_text(path)?;
    check_well_formed(&text).map_err(|e| corrupt(name, e))?;
    Ok(vec![Block::Markdown(fenced("xml", text.trim()))])
}

/// Fence `body`, with the fence one backtick longer than any run inside it.
fn fenced(lang: &str, body: &str) -> String {
    let longest = body.split(|c| c != '`').map(str::len).max().unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    format!("{fence}{lang}\n{body}\n{fence}\n")
}

fn check_well_formed(text: &str) -> Result<(), String> {
    let mut reader = Reader::from_str(text);
    reader.check_end_names(true);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                depth += 1;
                seen_root = true;
            }
            Ok(Event::Empty(_)) => seen_root = true,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed XML at byte {}: {e}", reader.buffer_position())),
            _ => {}
        }
        buf.clear();
    }
    if !seen_root {
        return Err("no root element".into());
    }
    if depth != 0 {
        return Err("unclosed element at end of document".into());
    }
    Ok(())
}

static RE_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static RE_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static RE_NOSCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript\s*>").unwrap());
static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

/// HTML: scripts, styles and comments removed, then converted by html2md.
pub(super) fn html(path: &Path, _name: &str) -> Result<Vec<Block>, Doc2MdError> {
    let text = read_text(path)?;
    let cleaned = strip_non_content(&text);
    Ok(vec![Block::Markdown(html2md::parse_html(&cleaned))])
}

fn strip_non_content(html: &str) -> String {
    let s = RE_SCRIPT.replace_all(html, "");
    let s = RE_STYLE.replace_all(&s, "");
    let s = RE_NOSCRIPT.replace_all(&s, "");
    RE_COMMENT.replace_all(&s, "").into_owned()
}
