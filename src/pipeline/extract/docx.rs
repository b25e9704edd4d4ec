//! DOCX backend: headings, paragraphs, lists, tables and embedded images.
//!
//! `word/document.xml` is walked once with a quick-xml event reader. Heading
//! levels come from `word/styles.xml` (style names `heading N` / `Title`),
//! list markers from `word/numbering.xml`. Text formatting is limited to bold
//! and italic; consecutive runs with the same formatting are merged so Word's
//! spell-check run splits don't litter the output with `****`.

use super::ooxml::{self, attr, resolve_images, Piece};
use super::{corrupt, markdown_table, Block, ImageRole};
use crate::error::Doc2MdError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

pub(super) fn extract(path: &Path, name: &str) -> Result<Vec<Block>, Doc2MdError> {
    let mut pkg = ooxml::open(path, name)?;
    let document = ooxml::read_part(&mut pkg, "word/document.xml")?
        .ok_or_else(|| corrupt(name, "missing word/document.xml"))?;
    let rels = ooxml::relationships(&mut pkg, "word/_rels/document.xml.rels", "word")?;
    let headings = ooxml::read_part(&mut pkg, "word/styles.xml")?
        .map(|xml| parse_heading_styles(&xml))
        .unwrap_or_default();
    let numbering = ooxml::read_part(&mut pkg, "word/numbering.xml")?
        .map(|xml| Numbering::parse(&xml))
        .unwrap_or_default();

    let pieces = walk(&document, &headings, &numbering).map_err(|e| corrupt(name, e))?;
    debug!("{}: {} pieces from document.xml", name, pieces.len());
    Ok(resolve_images(pieces, &rels, &mut pkg, ImageRole::Inline))
}

// ── Styles and numbering ─────────────────────────────────────────────────

/// Map paragraph style ids to heading levels.
fn parse_heading_styles(xml: &str) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"style" => {
                current = attr(&e, b"styleId");
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"name" => {
                if let (Some(id), Some(name)) = (current.as_ref(), attr(&e, b"val")) {
                    if let Some(level) = heading_level_from_name(&name) {
                        map.insert(id.clone(), level);
                    }
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"style" => current = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    map
}

fn heading_level_from_name(name: &str) -> Option<usize> {
    let lower = name.to_ascii_lowercase();
    if lower == "title" {
        return Some(1);
    }
    let level = lower
        .strip_prefix("heading")?
        .trim()
        .parse::<usize>()
        .ok()?;
    (1..=6).contains(&level).then_some(level)
}

fn heading_level(style_id: &str, styles: &HashMap<String, usize>) -> Option<usize> {
    styles
        .get(style_id)
        .copied()
        .or_else(|| heading_level_from_name(style_id))
}

/// Which list levels are numbered rather than bulleted.
#[derive(Debug, Default)]
struct Numbering {
    /// (abstractNumId, ilvl) → ordered
    levels: HashMap<(String, usize), bool>,
    /// numId → abstractNumId
    nums: HashMap<String, String>,
}

impl Numbering {
    fn parse(xml: &str) -> Self {
        let mut n = Numbering::default();
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let mut abstract_id: Option<String> = None;
        let mut level: Option<usize> = None;
        let mut num_id: Option<String> = None;
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"abstractNum" => abstract_id = attr(&e, b"abstractNumId"),
                    b"lvl" => level = attr(&e, b"ilvl").and_then(|v| v.parse().ok()),
                    b"numFmt" => {
                        if let (Some(a), Some(l), Some(fmt)) = (&abstract_id, level, attr(&e, b"val")) {
                            n.levels.insert((a.clone(), l), fmt != "bullet" && fmt != "none");
                        }
                    }
                    b"num" => num_id = attr(&e, b"numId"),
                    b"abstractNumId" => {
                        if let (Some(id), Some(a)) = (&num_id, attr(&e, b"val")) {
                            n.nums.insert(id.clone(), a);
                        }
                    }
                    _ => {}
                },
                Ok(Event::Eof) | Err(_) => break,
                _ => {}
            }
            buf.clear();
        }
        n
    }

    fn is_ordered(&self, num_id: &str, level: usize) -> bool {
        self.nums
            .get(num_id)
            .and_then(|a| self.levels.get(&(a.clone(), level)))
            .copied()
            .unwrap_or(false)
    }
}

// ── Body walker ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Paragraph {
    text: String,
    heading: Option<usize>,
    num_id: Option<String>,
    level: usize,
    /// Formatting and text of runs not yet written to `text`.
    pending: Option<(bool, bool, String)>,
    images: Vec<Piece>,
}

impl Paragraph {
    fn push_run(&mut self, bold: bool, italic: bool, text: &str) {
        match &mut self.pending {
            Some((b, i, buf)) if *b == bold && *i == italic => buf.push_str(text),
            _ => {
                self.flush_pending();
                self.pending = Some((bold, italic, text.to_string()));
            }
        }
    }

    fn flush_pending(&mut self) {
        if let Some((bold, italic, text)) = self.pending.take() {
            self.text.push_str(&emphasise(&text, bold, italic));
        }
    }
}

/// Wrap the non-whitespace core of `text` in emphasis markers.
fn emphasise(text: &str, bold: bool, italic: bool) -> String {
    let core = text.trim();
    if core.is_empty() || (!bold && !italic) {
        return text.to_string();
    }
    let marker = match (bold, italic) {
        (true, true) => "***",
        (true, false) => "**",
        _ => "*",
    };
    let lead = &text[..text.len() - text.trim_start().len()];
    let trail = &text[text.trim_end().len()..];
    format!("{lead}{marker}{core}{marker}{trail}")
}

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Vec<String>>,
    cell: Option<String>,
    span: usize,
    images: Vec<Piece>,
}

#[derive(Debug, Default)]
struct Run {
    bold: bool,
    italic: bool,
    text: String,
}

struct Walker<'a> {
    headings: &'a HashMap<String, usize>,
    numbering: &'a Numbering,
    pieces: Vec<Piece>,
    md: String,
    para: Option<Paragraph>,
    run: Option<Run>,
    in_text: bool,
    drawing: Option<(Option<String>, Option<String>)>,
    tables: Vec<Table>,
    in_list: bool,
}

fn walk(
    xml: &str,
    headings: &HashMap<String, usize>,
    numbering: &Numbering,
) -> Result<Vec<Piece>, String> {
    let mut w = Walker {
        headings,
        numbering,
        pieces: Vec::new(),
        md: String::new(),
        para: None,
        run: None,
        in_text: false,
        drawing: None,
        tables: Vec::new(),
        in_list: false,
    };

    let mut reader = Reader::from_str(xml);
    // w:t with xml:space="preserve" carries meaningful spaces.
    reader.trim_text(false);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => w.start(&e),
            Ok(Event::Empty(e)) => {
                w.start(&e);
                w.end(e.local_name().as_ref());
            }
            Ok(Event::End(e)) => w.end(e.local_name().as_ref()),
            Ok(Event::Text(t)) if w.in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                if let Some(run) = w.run.as_mut() {
                    run.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed document.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }

    w.close_list();
    w.flush_markdown();
    Ok(w.pieces)
}

impl Walker<'_> {
    fn start(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"p" => self.para = Some(Paragraph::default()),
            b"pStyle" => {
                let level = attr(e, b"val").and_then(|v| heading_level(&v, self.headings));
                if let Some(p) = self.para.as_mut() {
                    p.heading = level;
                }
            }
            b"ilvl" if self.run.is_none() => {
                if let Some(p) = self.para.as_mut() {
                    p.level = attr(e, b"val").and_then(|v| v.parse().ok()).unwrap_or(0);
                }
            }
            b"numId" if self.run.is_none() => {
                if let Some(p) = self.para.as_mut() {
                    p.num_id = attr(e, b"val").filter(|v| v != "0");
                }
            }
            b"r" => self.run = Some(Run::default()),
            b"b" => {
                if let Some(r) = self.run.as_mut() {
                    r.bold = !val_off(e);
                }
            }
            b"i" => {
                if let Some(r) = self.run.as_mut() {
                    r.italic = !val_off(e);
                }
            }
            b"t" => self.in_text = true,
            b"tab" => {
                if let Some(r) = self.run.as_mut() {
                    r.text.push(' ');
                }
            }
            b"br" | b"cr" => {
                if let Some(r) = self.run.as_mut() {
                    r.text.push(' ');
                }
            }
            b"drawing" | b"pict" => self.drawing = Some((None, None)),
            b"docPr" => {
                if let Some((alt, _)) = self.drawing.as_mut() {
                    *alt = attr(e, b"descr")
                        .filter(|s| !s.trim().is_empty())
                        .or_else(|| attr(e, b"title").filter(|s| !s.trim().is_empty()));
                }
            }
            b"blip" => {
                if let Some((_, rel)) = self.drawing.as_mut() {
                    *rel = attr(e, b"embed");
                }
            }
            b"imagedata" => {
                if let Some((alt, rel)) = self.drawing.as_mut() {
                    *rel = attr(e, b"id");
                    if alt.is_none() {
                        *alt = attr(e, b"title").filter(|s| !s.trim().is_empty());
                    }
                }
            }
            b"tbl" => self.tables.push(Table::default()),
            b"tr" => {
                if let Some(t) = self.tables.last_mut() {
                    t.rows.push(Vec::new());
                }
            }
            b"tc" => {
                if let Some(t) = self.tables.last_mut() {
                    t.cell = Some(String::new());
                    t.span = 1;
                }
            }
            b"gridSpan" => {
                if let Some(t) = self.tables.last_mut() {
                    t.span = attr(e, b"val").and_then(|v| v.parse().ok()).unwrap_or(1).max(1);
                }
            }
            _ => {}
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"t" => self.in_text = false,
            b"r" => {
                if let (Some(run), Some(p)) = (self.run.take(), self.para.as_mut()) {
                    if !run.text.is_empty() {
                        p.push_run(run.bold, run.italic, &run.text);
                    }
                }
            }
            b"drawing" | b"pict" => {
                if let Some((alt, Some(rel_id))) = self.drawing.take() {
                    let piece = Piece::Image { rel_id, alt };
                    match self.para.as_mut() {
                        Some(p) => p.images.push(piece),
                        None => self.pieces.push(piece),
                    }
                }
            }
            b"p" => self.finish_paragraph(),
            b"tc" => {
                if let Some(t) = self.tables.last_mut() {
                    let cell = t.cell.take().unwrap_or_default();
                    let span = t.span;
                    if let Some(row) = t.rows.last_mut() {
                        row.push(cell);
                        row.extend(std::iter::repeat(String::new()).take(span.saturating_sub(1)));
                    }
                }
            }
            b"tbl" => self.finish_table(),
            _ => {}
        }
    }

    fn finish_paragraph(&mut self) {
        let Some(mut p) = self.para.take() else {
            return;
        };
        p.flush_pending();
        let text = p.text.trim();

        if let Some(t) = self.tables.last_mut() {
            if let Some(cell) = t.cell.as_mut() {
                if !text.is_empty() {
                    if !cell.is_empty() {
                        cell.push(' ');
                    }
                    cell.push_str(text);
                }
            }
            t.images.append(&mut p.images);
            return;
        }

        if !text.is_empty() {
            if let Some(level) = p.heading {
                self.close_list();
                self.md.push_str(&format!("{} {}\n\n", "#".repeat(level), text));
            } else if let Some(num_id) = p.num_id.as_deref() {
                let ordered = self.numbering.is_ordered(num_id, p.level);
                let marker = if ordered { "1." } else { "-" };
                self.md
                    .push_str(&format!("{}{} {}\n", "  ".repeat(p.level), marker, text));
                self.in_list = true;
            } else {
                self.close_list();
                self.md.push_str(text);
                self.md.push_str("\n\n");
            }
        }

        if !p.images.is_empty() {
            self.close_list();
            self.flush_markdown();
            self.pieces.append(&mut p.images);
        }
    }

    fn finish_table(&mut self) {
        let Some(mut table) = self.tables.pop() else {
            return;
        };
        table.rows.retain(|r| !r.is_empty());

        if let Some(parent) = self.tables.last_mut() {
            // Nested table: flatten its cells into the enclosing cell.
            let flat = table
                .rows
                .iter()
                .map(|r| r.join(" "))
                .collect::<Vec<_>>()
                .join(" ");
            if let Some(cell) = parent.cell.as_mut() {
                if !cell.is_empty() {
                    cell.push(' ');
                }
                cell.push_str(flat.trim());
            }
            parent.images.append(&mut table.images);
            return;
        }

        self.close_list();
        let rendered = markdown_table(&table.rows);
        if !rendered.is_empty() {
            self.md.push_str(&rendered);
            self.md.push('\n');
        }
        if !table.images.is_empty() {
            self.flush_markdown();
            self.pieces.append(&mut table.images);
        }
    }

    fn close_list(&mut self) {
        if self.in_list {
            self.md.push('\n');
            self.in_list = false;
        }
    }

    fn flush_markdown(&mut self) {
        if !self.md.is_empty() {
            self.pieces.push(Piece::Markdown(std::mem::take(&mut self.md)));
        }
    }
}

/// `<w:b w:val="0"/>` and `<w:b w:val="false"/>` switch formatting off.
fn val_off(e: &BytesStart<'_>) -> bool {
    matches!(attr(e, b"val").as_deref(), Some("0" | "false" | "none"))
}
