//! Shared helpers for Office Open XML packages (DOCX, PPTX).

use super::{corrupt, Block, EmbeddedImage, ImageRole};
use crate::error::Doc2MdError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

pub(super) type Package = ZipArchive<BufReader<File>>;

/// Open an OOXML package, mapping failures to user-facing errors.
pub(super) fn open(path: &Path, name: &str) -> Result<Package, Doc2MdError> {
    let file = File::open(path)?;
    match ZipArchive::new(BufReader::new(file)) {
        Ok(archive) => Ok(archive),
        // Password-protected Office files are OLE containers, not ZIPs.
        Err(ZipError::InvalidArchive(_)) if is_ole_container(path) => {
            Err(Doc2MdError::EncryptedFile {
                name: name.to_string(),
            })
        }
        Err(e) => Err(corrupt(name, format!("not a valid Office package: {e}"))),
    }
}

pub(super) fn is_ole_container(path: &Path) -> bool {
    const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
    let mut magic = [0u8; 8];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| magic == OLE_MAGIC)
        .unwrap_or(false)
}

/// Walker output before image bytes are loaded from the package.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Piece {
    Markdown(String),
    Image { rel_id: String, alt: Option<String> },
}

/// Turn walker pieces into blocks, loading image parts through `rels`.
///
/// Images whose relationship or part is missing are dropped.
pub(super) fn resolve_images(
    pieces: Vec<Piece>,
    rels: &HashMap<String, String>,
    pkg: &mut Package,
    role: ImageRole,
) -> Vec<Block> {
    pieces
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Markdown(md) => Some(Block::Markdown(md)),
            Piece::Image { rel_id, alt } => {
                let part = rels.get(&rel_id)?;
                let bytes = read_part_bytes(pkg, part)?;
                Some(Block::Image(EmbeddedImage {
                    label: part_file_name(part),
                    alt,
                    bytes,
                    role,
                }))
            }
        })
        .collect()
}

/// Read a package part as UTF-8 text; `None` if the part is missing.
pub(super) fn read_part(pkg: &mut Package, part: &str) -> Result<Option<String>, Doc2MdError> {
    let mut entry = match pkg.by_name(part) {
        Ok(e) => e,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(Doc2MdError::Internal(format!("{part}: {e}"))),
    };
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(Some(content))
}

/// Read a package part as bytes; `None` if the part is missing or unreadable.
pub(super) fn read_part_bytes(pkg: &mut Package, part: &str) -> Option<Vec<u8>> {
    let mut entry = pkg.by_name(part).ok()?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).ok()?;
    Some(bytes)
}

/// Parse a `.rels` part into `Id → absolute part name`.
///
/// `base_dir` is the folder of the part the relationships belong to
/// (`word`, `ppt/slides`); relative targets are resolved against it.
/// External targets (hyperlinks) are skipped.
pub(super) fn relationships(
    pkg: &mut Package,
    rels_part: &str,
    base_dir: &str,
) -> Result<HashMap<String, String>, Doc2MdError> {
    let Some(xml) = read_part(pkg, rels_part)? else {
        return Ok(HashMap::new());
    };

    let mut map = HashMap::new();
    let mut reader = Reader::from_str(&xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.local_name().as_ref() == b"Relationship" => {
                let external = attr(&e, b"TargetMode").as_deref() == Some("External");
                if let (false, Some(id), Some(target)) =
                    (external, attr(&e, b"Id"), attr(&e, b"Target"))
                {
                    map.insert(id, resolve_target(base_dir, &target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Doc2MdError::Internal(format!("{rels_part}: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(map)
}

/// Resolve a relationship target against the owning part's folder.
pub(super) fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        return abs.to_string();
    }
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Attribute value by local name (namespace prefix ignored), unescaped.
pub(super) fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == key {
            Some(
                a.unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned()),
            )
        } else {
            None
        }
    })
}

/// The file name of a part (`word/media/image1.png` → `image1.png`).
pub(super) fn part_file_name(part: &str) -> String {
    part.rsplit('/').next().unwrap_or(part).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_targets() {
        assert_eq!(resolve_target("word", "media/image1.png"), "word/media/image1.png");
        assert_eq!(resolve_target("ppt/slides", "../media/image2.jpeg"), "ppt/media/image2.jpeg");
        assert_eq!(resolve_target("ppt/slides", "/ppt/media/x.png"), "ppt/media/x.png");
    }

    #[test]
    fn part_file_name_takes_last_segment() {
        assert_eq!(part_file_name("word/media/image1.png"), "image1.png");
        assert_eq!(part_file_name("x.png"), "x.png");
    }
}
