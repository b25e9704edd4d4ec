//! Upload intake: size checks and a scoped working directory.
//!
//! pdfium and calamine want file-system paths, so every upload is written to
//! a `TempDir` owned by [`UploadIntake`]. The directory (uploads and any
//! extracted archive members) is removed when the intake is dropped, whether
//! the batch finished, failed, or panicked.
//!
//! Local files given on the command line are registered in place: they are
//! checked, never copied, and never deleted.

use crate::error::Doc2MdError;
use crate::output::UploadedFile;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// A file ready for the dispatcher.
#[derive(Debug, Clone)]
pub struct IntakeFile {
    /// Name shown to the user.
    pub source_name: String,
    /// Where the bytes live on disk.
    pub path: PathBuf,
}

/// Owns the batch's temporary directory.
#[derive(Debug)]
pub struct UploadIntake {
    dir: TempDir,
    max_file_size: u64,
    counter: usize,
}

impl UploadIntake {
    /// Create a fresh `doc2md-*` directory under the system temp dir.
    pub fn new(max_file_size: u64) -> Result<Self, Doc2MdError> {
        let dir = tempfile::Builder::new().prefix("doc2md-").tempdir()?;
        debug!("Intake directory: {}", dir.path().display());
        Ok(Self {
            dir,
            max_file_size,
            counter: 0,
        })
    }

    /// Root of the working directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reject `size` if it passes the per-file limit.
    pub fn check_size(&self, name: &str, size: u64) -> Result<(), Doc2MdError> {
        if size > self.max_file_size {
            return Err(Doc2MdError::UploadTooLarge {
                name: name.to_string(),
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Persist an upload. Oversized uploads are rejected before anything is written.
    pub async fn accept(&mut self, file: &UploadedFile) -> Result<IntakeFile, Doc2MdError> {
        let size = file.size.max(file.bytes.len() as u64);
        self.check_size(&file.name, size)?;

        let path = self.next_path(&file.name);
        tokio::fs::write(&path, &file.bytes).await?;
        debug!("Stored '{}' ({} bytes) at {}", file.name, size, path.display());

        Ok(IntakeFile {
            source_name: file.name.clone(),
            path,
        })
    }

    /// Register a file that already exists on disk.
    pub fn register_local(&self, path: &Path) -> Result<IntakeFile, Doc2MdError> {
        let meta = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return Err(Doc2MdError::FileNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(Doc2MdError::PermissionDenied {
                    path: path.to_path_buf(),
                })
            }
            Err(_) => {
                return Err(Doc2MdError::FileNotFound {
                    path: path.to_path_buf(),
                })
            }
        };

        if let Err(e) = std::fs::File::open(path) {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                return Err(Doc2MdError::PermissionDenied {
                    path: path.to_path_buf(),
                });
            }
            return Err(Doc2MdError::Io(e));
        }

        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.check_size(&source_name, meta.len())?;

        Ok(IntakeFile {
            source_name,
            path: path.to_path_buf(),
        })
    }

    /// A new, empty directory for extracting an archive.
    pub fn scratch_dir(&mut self, label: &str) -> Result<PathBuf, Doc2MdError> {
        let mut path = self.next_path(label);
        path.set_extension("d");
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn next_path(&mut self, name: &str) -> PathBuf {
        self.counter += 1;
        self.dir
            .path()
            .join(format!("{:03}-{}", self.counter, sanitize_file_name(name)))
    }
}

/// Reduce a client-supplied name to one safe path component.
///
/// Directory parts and `..` are dropped; an empty result becomes `upload`.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = last
        .replace("..", "")
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
