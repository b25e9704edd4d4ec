//! Archive expansion: ZIP members become independent batch inputs.
//!
//! Members are written below a scratch directory owned by the batch's
//! [`UploadIntake`](crate::pipeline::intake::UploadIntake), so they disappear
//! with it. Nothing here is fatal to the batch: a member that cannot be used
//! is returned as [`MemberOutcome::Skipped`] with a reason, and only an
//! archive that cannot be opened at all is an error.
//!
//! Recursion into nested archives is driven by the caller, which knows the
//! current depth.

use crate::error::Doc2MdError;
use crate::format::FileKind;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

/// Limits applied while expanding one archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    /// Largest uncompressed member, in bytes.
    pub max_member_size: u64,
    /// Members read before the rest are skipped.
    pub max_members: usize,
}

/// What happened to one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberOutcome {
    /// Written to this path, ready for the dispatcher.
    Extracted(PathBuf),
    /// Not extracted; the string says why.
    Skipped(String),
}

/// One file inside an archive.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    /// Sanitised path inside the archive, `/`-separated.
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub outcome: MemberOutcome,
}

/// Sanitise a member path against traversal.
///
/// Only normal components are kept: `..`, `.`, roots and drive prefixes are
/// dropped. Returns `None` if nothing is left.
pub fn sanitize_path(path: &str) -> Option<PathBuf> {
    let normalised = path.replace('\\', "/");
    let mut sanitized = PathBuf::new();
    for component in Path::new(&normalised).components() {
        if let Component::Normal(part) = component {
            sanitized.push(part);
        }
    }
    if sanitized.as_os_str().is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

/// macOS Finder metadata, never user content.
fn is_resource_fork(raw_name: &str) -> bool {
    raw_name.starts_with("__MACOSX/") || raw_name.contains("/__MACOSX/")
}

/// Expand the ZIP at `archive_path` into `dest`.
///
/// Directory entries and `__MACOSX/` entries are ignored. Every other entry
/// produces one [`ArchiveMember`], in archive order. Unsupported member
/// types are skipped without being written.
///
/// # Errors
/// [`Doc2MdError::CorruptArchive`] when the central directory cannot be read.
pub fn expand_zip(
    archive_path: &Path,
    archive_name: &str,
    dest: &Path,
    limits: ArchiveLimits,
) -> Result<Vec<ArchiveMember>, Doc2MdError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(archive_name, e))?;

    let mut members = Vec::new();
    let mut seen = 0usize;

    for i in 0..archive.len() {
        let (raw_name, is_dir, encrypted, size) = match archive.by_index_raw(i) {
            Ok(entry) => (
                entry.name().to_string(),
                entry.is_dir(),
                entry.encrypted(),
                entry.size(),
            ),
            Err(e) => {
                warn!("{}: entry {} unreadable: {}", archive_name, i, e);
                members.push(ArchiveMember {
                    name: format!("entry-{i}"),
                    kind: FileKind::Unknown,
                    size: 0,
                    outcome: MemberOutcome::Skipped(format!("unreadable entry: {e}")),
                });
                continue;
            }
        };

        if is_dir || is_resource_fork(&raw_name) {
            continue;
        }

        let Some(rel_path) = sanitize_path(&raw_name) else {
            warn!("{}: skipping entry with no usable path: {:?}", archive_name, raw_name);
            members.push(ArchiveMember {
                name: raw_name,
                kind: FileKind::Unknown,
                size,
                outcome: MemberOutcome::Skipped("entry has no usable path".into()),
            });
            continue;
        };
        let name = rel_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let kind = FileKind::detect(&name, None);

        seen += 1;
        let skip = |reason: String| ArchiveMember {
            name: name.clone(),
            kind,
            size,
            outcome: MemberOutcome::Skipped(reason),
        };

        if seen > limits.max_members {
            members.push(skip(format!(
                "archive has more than {} members",
                limits.max_members
            )));
            continue;
        }
        if encrypted {
            members.push(skip("member is encrypted".into()));
            continue;
        }
        if let Some(reason) = kind.unsupported_reason() {
            members.push(skip(reason.to_string()));
            continue;
        }
        if size > limits.max_member_size {
            members.push(skip(format!(
                "member is {} bytes, above the {}-byte limit",
                size, limits.max_member_size
            )));
            continue;
        }

        let target = dest.join(format!("{i:04}")).join(&rel_path);
        match extract_member(&mut archive, i, &target, limits.max_member_size) {
            Ok(()) => {
                debug!("{}: extracted {} ({} bytes)", archive_name, name, size);
                members.push(ArchiveMember {
                    name: name.clone(),
                    kind,
                    size,
                    outcome: MemberOutcome::Extracted(target),
                });
            }
            Err(reason) => {
                warn!("{}: {}: {}", archive_name, name, reason);
                members.push(skip(reason));
            }
        }
    }

    Ok(members)
}

fn extract_member(
    archive: &mut ZipArchive<BufReader<File>>,
    index: usize,
    target: &Path,
    limit: u64,
) -> Result<(), String> {
    let entry = archive
        .by_index(index)
        .map_err(|e| format!("cannot read member: {e}"))?;

    // The header size can lie; never decompress past the limit.
    let mut contents = Vec::new();
    entry
        .take(limit + 1)
        .read_to_end(&mut contents)
        .map_err(|e| format!("cannot decompress member: {e}"))?;
    if contents.len() as u64 > limit {
        return Err(format!("member decompresses past the {limit}-byte limit"));
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create directory: {e}"))?;
    }
    std::fs::write(target, &contents).map_err(|e| format!("cannot write member: {e}"))
}

fn corrupt(name: &str, e: ZipError) -> Doc2MdError {
    Doc2MdError::CorruptArchive {
        name: name.to_string(),
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zw = ZipWriter::new(&mut buf);
            for (name, data) in entries {
                if name.ends_with('/') {
                    zw.add_directory(*name, SimpleFileOptions::default()).unwrap();
                } else {
                    zw.start_file(*name, SimpleFileOptions::default()).unwrap();
                    zw.write_all(data).unwrap();
                }
            }
            zw.finish().unwrap();
        }
        buf.into_inner()
    }

    fn limits() -> ArchiveLimits {
        ArchiveLimits {
            max_member_size: 1024,
            max_members: 100,
        }
    }

    #[test]
    fn sanitize_removes_traversal() {
        assert_eq!(sanitize_path("../../etc/passwd"), Some(PathBuf::from("etc/passwd")));
        assert_eq!(sanitize_path("/abs/a.txt"), Some(PathBuf::from("abs/a.txt")));
        assert_eq!(sanitize_path("..\\..\\b.txt"), Some(PathBuf::from("b.txt")));
        assert_eq!(sanitize_path(".."), None);
    }

    #[test]
    fn expands_supported_and_skips_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("bundle.zip");
        std::fs::write(
            &zip_path,
            build_zip(&[
                ("docs/", b""),
                ("docs/a.txt", b"hello"),
                ("b.csv", b"x,y\n1,2\n"),
                ("tool.exe", b"MZ"),
                ("__MACOSX/docs/._a.txt", b"junk"),
            ]),
        )
        .unwrap();

        let out = dir.path().join("out");
        let members = expand_zip(&zip_path, "bundle.zip", &out, limits()).unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].name, "docs/a.txt");
        match &members[0].outcome {
            MemberOutcome::Extracted(p) => {
                assert!(p.starts_with(&out));
                assert_eq!(std::fs::read(p).unwrap(), b"hello");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(members[1].outcome, MemberOutcome::Extracted(_)));
        assert!(matches!(members[2].outcome, MemberOutcome::Skipped(_)));
    }

    #[test]
    fn traversal_member_stays_inside_dest() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("evil.zip");
        std::fs::write(&zip_path, build_zip(&[("../../escape.txt", b"x")])).unwrap();
        let out = dir.path().join("out");
        let members = expand_zip(&zip_path, "evil.zip", &out, limits()).unwrap();
        match &members[0].outcome {
            MemberOutcome::Extracted(p) => assert!(p.starts_with(&out)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(members[0].name, "escape.txt");
    }

    #[test]
    fn oversize_and_excess_members_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("big.zip");
        let big = vec![b'a'; 2048];
        std::fs::write(
            &zip_path,
            build_zip(&[("big.txt", &big), ("a.txt", b"1"), ("b.txt", b"2")]),
        )
        .unwrap();
        let members = expand_zip(
            &zip_path,
            "big.zip",
            &dir.path().join("out"),
            ArchiveLimits {
                max_member_size: 1024,
                max_members: 2,
            },
        )
        .unwrap();
        assert!(matches!(&members[0].outcome, MemberOutcome::Skipped(r) if r.contains("limit")));
        assert!(matches!(members[1].outcome, MemberOutcome::Extracted(_)));
        assert!(matches!(&members[2].outcome, MemberOutcome::Skipped(r) if r.contains("more than 2")));
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("broken.zip");
        std::fs::write(&zip_path, b"PK\x03\x04 this is not really a zip").unwrap();
        let err = expand_zip(&zip_path, "broken.zip", dir.path(), limits()).unwrap_err();
        assert!(matches!(err, Doc2MdError::CorruptArchive { .. }));
    }
}
