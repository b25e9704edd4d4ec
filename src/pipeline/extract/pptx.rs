//! PPTX backend: one section per slide with titles, text, tables and pictures.
//!
//! Slide order follows `p:sldIdLst` in `ppt/presentation.xml`; when that
//! cannot be resolved, slide parts are sorted by number. Each slide opens
//! with an HTML comment carrying its number so the Markdown stays
//! navigable without inventing headings.

use super::ooxml::{self, attr, resolve_images, Package, Piece};
use super::{corrupt, markdown_table, Block, ImageRole};
use crate::error::Doc2MdError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use tracing::debug;

pub(super) fn extract(path: &Path, name: &str) -> Result<Vec<Block>, Doc2MdError> {
    let mut pkg = ooxml::open(path, name)?;
    let slides = slide_parts(&mut pkg)?;
    if slides.is_empty() && ooxml::read_part(&mut pkg, "ppt/presentation.xml")?.is_none() {
        return Err(corrupt(name, "missing ppt/presentation.xml"));
    }
    debug!("{}: {} slides", name, slides.len());

    let mut blocks = Vec::new();
    for (idx, part) in slides.iter().enumerate() {
        let Some(xml) = ooxml::read_part(&mut pkg, part)? else {
            continue;
        };
        let (dir, file) = part.rsplit_once('/').unwrap_or(("ppt/slides", part.as_str()));
        let rels = ooxml::relationships(&mut pkg, &format!("{dir}/_rels/{file}.rels"), dir)?;

        let mut pieces = vec![Piece::Markdown(format!("<!-- Slide number: {} -->\n", idx + 1))];
        pieces.extend(walk_slide(&xml).map_err(|e| corrupt(name, format!("{part}: {e}")))?);
        blocks.extend(resolve_images(pieces, &rels, &mut pkg, ImageRole::Inline));
    }
    Ok(blocks)
}

/// Slide part names in presentation order.
fn slide_parts(pkg: &mut Package) -> Result<Vec<String>, Doc2MdError> {
    let rels = ooxml::relationships(pkg, "ppt/_rels/presentation.xml.rels", "ppt")?;
    let mut ordered = Vec::new();
    if let Some(xml) = ooxml::read_part(pkg, "ppt/presentation.xml")? {
        let mut reader = Reader::from_str(&xml);
        reader.trim_text(true);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.local_name().as_ref() == b"sldId" => {
                    if let Some(part) = rel_id(&e).and_then(|id| rels.get(&id).cloned()) {
                        ordered.push(part);
                    }
                }
                Ok(Event::Eof) | Err(_) => break,
                _ => {}
            }
            buf.clear();
        }
    }
    if !ordered.is_empty() {
        return Ok(ordered);
    }

    let mut numbered: Vec<(u32, String)> = pkg
        .file_names()
        .filter_map(|n| {
            let num = n
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse()
                .ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, n)| n).collect())
}

/// `sldId` carries both a numeric `id` and the relationship `r:id`; only the
/// latter is namespaced.
fn rel_id(e: &BytesStart<'_>) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        let key = a.key;
        (key.local_name().as_ref() == b"id" && key.prefix().is_some())
            .then(|| String::from_utf8_lossy(&a.value).into_owned())
    })
}

#[derive(Debug, Default)]
struct Shape {
    is_title: bool,
    paragraphs: Vec<String>,
}

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Vec<String>>,
    cell: Option<String>,
}

#[derive(Debug, Default)]
struct Picture {
    alt: Option<String>,
    rel_id: Option<String>,
}

#[derive(Debug, Default)]
struct SlideWalker {
    pieces: Vec<Piece>,
    shape: Option<Shape>,
    table: Option<Table>,
    picture: Option<Picture>,
    para: Option<String>,
    in_text: bool,
}

fn walk_slide(xml: &str) -> Result<Vec<Piece>, String> {
    let mut w = SlideWalker::default();
    let mut reader = Reader::from_str(xml);
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
                if let Some(p) = w.para.as_mut() {
                    p.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed slide XML: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(w.pieces)
}

impl SlideWalker {
    fn start(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"sp" => self.shape = Some(Shape::default()),
            b"ph" => {
                if let Some(shape) = self.shape.as_mut() {
                    shape.is_title = matches!(attr(e, b"type").as_deref(), Some("title" | "ctrTitle"));
                }
            }
            b"tbl" => self.table = Some(Table::default()),
            b"tr" => {
                if let Some(t) = self.table.as_mut() {
                    t.rows.push(Vec::new());
                }
            }
            b"tc" => {
                if let Some(t) = self.table.as_mut() {
                    t.cell = Some(String::new());
                }
            }
            b"pic" => self.picture = Some(Picture::default()),
            b"cNvPr" => {
                if let Some(pic) = self.picture.as_mut() {
                    pic.alt = attr(e, b"descr").filter(|s| !s.trim().is_empty());
                }
            }
            b"blip" => {
                if let Some(pic) = self.picture.as_mut() {
                    pic.rel_id = attr(e, b"embed");
                }
            }
            b"p" => self.para = Some(String::new()),
            b"t" => self.in_text = true,
            b"br" => {
                if let Some(p) = self.para.as_mut() {
                    p.push(' ');
                }
            }
            _ => {}
        }
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"t" => self.in_text = false,
            b"p" => self.finish_paragraph(),
            b"tc" => {
                if let Some(t) = self.table.as_mut() {
                    let cell = t.cell.take().unwrap_or_default();
                    if let Some(row) = t.rows.last_mut() {
                        row.push(cell);
                    }
                }
            }
            b"tbl" => {
                if let Some(mut t) = self.table.take() {
                    t.rows.retain(|r| !r.is_empty());
                    let rendered = markdown_table(&t.rows);
                    if !rendered.is_empty() {
                        self.pieces.push(Piece::Markdown(format!("{rendered}\n")));
                    }
                }
            }
            b"sp" => {
                if let Some(shape) = self.shape.take() {
                    self.finish_shape(shape);
                }
            }
            b"pic" => {
                if let Some(Picture { alt, rel_id: Some(rel_id) }) = self.picture.take() {
                    self.pieces.push(Piece::Image { rel_id, alt });
                }
            }
            _ => {}
        }
    }

    fn finish_paragraph(&mut self) {
        let Some(text) = self.para.take() else {
            return;
        };
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Some(cell) = self.table.as_mut().and_then(|t| t.cell.as_mut()) {
            if !cell.is_empty() {
                cell.push(' ');
            }
            cell.push_str(text);
        } else if let Some(shape) = self.shape.as_mut() {
            shape.paragraphs.push(text.to_string());
        }
    }

    fn finish_shape(&mut self, shape: Shape) {
        if shape.paragraphs.is_empty() {
            return;
        }
        let md = if shape.is_title {
            format!("# {}\n\n", shape.paragraphs.join(" "))
        } else {
            format!("{}\n\n", shape.paragraphs.join("\n"))
        };
        self.pieces.push(Piece::Markdown(md));
    }
}
