//! Conversion entry points: one document, or a whole batch of uploads.
//!
//! A batch is processed strictly in order, one file at a time. Archives are
//! expanded in place: their members are queued directly after the archive,
//! ahead of the next upload, so the result list reads in upload order.
//!
//! Nothing inside a batch is fatal to the batch. Intake rejections, backend
//! failures and skipped archive members all become [`ConversionResult`]s; a
//! caption that cannot be produced only adds a warning to its document.
//! [`convert_batch`] returns `Err` only when the batch cannot start at all
//! (no temporary directory, or an explicitly named provider that cannot be
//! created).

use crate::config::ConversionConfig;
use crate::error::{Doc2MdError, FileIssue};
use crate::format::FileKind;
use crate::output::{BatchReport, ConversionResult, DocumentOutput, FileStatus, UploadedFile};
use crate::pipeline::archive::{self, ArchiveLimits, MemberOutcome};
use crate::pipeline::caption::{
    describe_bytes, CaptionPurpose, CaptionSettings, ImageCaptioner, LlmCaptioner, OpenAiCaptioner,
};
use crate::pipeline::extract::{self, Block, EmbeddedImage, ExtractOptions, ImageRole};
use crate::pipeline::intake::UploadIntake;
use crate::pipeline::postprocess;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert one local document to Markdown.
///
/// Archives are not accepted here; use [`convert_paths`] for those.
///
/// # Errors
/// - [`Doc2MdError::FileNotFound`] / [`Doc2MdError::PermissionDenied`]
/// - [`Doc2MdError::UploadTooLarge`] when the file passes `max_file_size`
/// - [`Doc2MdError::UnsupportedFormat`], [`Doc2MdError::CorruptFile`],
///   [`Doc2MdError::EncryptedFile`] from the backend
///
/// Captioning problems are never errors; they are listed in
/// [`DocumentOutput::warnings`].
pub async fn convert(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<DocumentOutput, Doc2MdError> {
    let path = path.as_ref();
    let intake = UploadIntake::new(config.max_file_size)?;
    let file = intake.register_local(path)?;
    let kind = FileKind::detect(&file.source_name, None);
    let captioner = resolve_captioner(config)?;
    info!("Converting {} as {:?}", file.source_name, kind);
    convert_file(&file.path, kind, &file.source_name, config, captioner.as_deref()).await
}

/// Convert a document and write the Markdown to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<DocumentOutput, Doc2MdError> {
    let output = convert(path, config).await?;
    write_atomic(output_path.as_ref(), &output.markdown).await?;
    Ok(output)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<DocumentOutput, Doc2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Doc2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(path, config))
}

/// Write `contents` to `path` through a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), Doc2MdError> {
    let write_err = |e| Doc2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}

/// Convert a batch of uploaded files.
///
/// Each upload is size-checked and written to a temporary directory that is
/// removed before this function returns. Results keep upload order, with
/// archive members in their archive's place.
pub async fn convert_batch(
    files: Vec<UploadedFile>,
    config: &ConversionConfig,
) -> Result<BatchReport, Doc2MdError> {
    run_batch(files.into_iter().map(Pending::Upload).collect(), config).await
}

/// Convert files already on disk (the CLI path). Files are read in place.
pub async fn convert_paths(
    paths: &[PathBuf],
    config: &ConversionConfig,
) -> Result<BatchReport, Doc2MdError> {
    run_batch(paths.iter().cloned().map(Pending::Local).collect(), config).await
}

// ── Captioner resolution ─────────────────────────────────────────────────

/// Pick the captioner for a batch, from most-specific to least-specific.
///
/// 1. **Pre-built captioner** (`config.captioner`), used as-is.
/// 2. **Session API key** (`config.api_key`): the direct OpenAI-compatible
///    client against `config.api_base_url`.
/// 3. **Named provider** (`config.provider_name`) through
///    [`ProviderFactory::create_llm_provider`]; failure is an error because
///    the caller asked for it explicitly.
/// 4. **Environment** (only with `caption_from_env`): `EDGEQUAKE_LLM_PROVIDER`
///    + `EDGEQUAKE_MODEL` when both are set, otherwise `OPENAI_API_KEY`.
///    A provider that cannot be built here is logged and skipped.
///
/// `Ok(None)` means no key is available; images then keep their alt text.
pub fn resolve_captioner(
    config: &ConversionConfig,
) -> Result<Option<Arc<dyn ImageCaptioner>>, Doc2MdError> {
    if let Some(ref captioner) = config.captioner {
        return Ok(Some(Arc::clone(captioner)));
    }

    let settings = CaptionSettings::from_config(config);

    if let Some(ref key) = config.api_key {
        let captioner = OpenAiCaptioner::new(key.clone(), &config.api_base_url, settings)
            .map_err(|e| Doc2MdError::InvalidConfig(format!("vision HTTP client: {e}")))?;
        return Ok(Some(Arc::new(captioner)));
    }

    if let Some(ref name) = config.provider_name {
        let provider = create_vision_provider(name, config.model_or_default())?;
        return Ok(Some(Arc::new(LlmCaptioner::new(provider, name, settings))));
    }

    if !config.caption_from_env {
        return Ok(None);
    }

    let from_env = if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        (!prov.is_empty() && !model.is_empty()).then_some((prov, model))
    } else {
        None
    };
    let from_env = from_env.or_else(|| {
        std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|_| ("openai".to_string(), config.model_or_default().to_string()))
    });

    let Some((prov, model)) = from_env else {
        debug!("No vision API key configured; captioning disabled");
        return Ok(None);
    };
    match create_vision_provider(&prov, &model) {
        Ok(provider) => {
            let settings = CaptionSettings { model, ..settings };
            Ok(Some(Arc::new(LlmCaptioner::new(provider, &prov, settings))))
        }
        Err(e) => {
            warn!("Captioning disabled: {}", e);
            Ok(None)
        }
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Doc2MdError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Doc2MdError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

// ── Batch driver ─────────────────────────────────────────────────────────

/// One unit of work waiting in the batch queue.
enum Pending {
    Upload(UploadedFile),
    Local(PathBuf),
    /// An extracted archive member, or a nested archive.
    Member {
        source_name: String,
        path: PathBuf,
        kind: FileKind,
        archive: String,
        depth: usize,
    },
    /// An archive member that was not extracted.
    Skipped {
        source_name: String,
        kind: FileKind,
        archive: String,
        reason: String,
    },
}

/// A file on disk, ready for its backend.
struct Ready {
    source_name: String,
    path: PathBuf,
    kind: FileKind,
    archive: Option<String>,
    depth: usize,
}

async fn run_batch(
    inputs: Vec<Pending>,
    config: &ConversionConfig,
) -> Result<BatchReport, Doc2MdError> {
    let batch_start = Instant::now();
    let captioner = resolve_captioner(config)?;
    let mut intake = UploadIntake::new(config.max_file_size)?;
    let mut queue: VecDeque<Pending> = inputs.into();
    let mut results: Vec<ConversionResult> = Vec::with_capacity(queue.len());
    let cb = config.progress_callback.as_ref();

    info!(
        "Batch of {} files (captioning: {})",
        queue.len(),
        captioner.as_ref().map(|c| c.name()).unwrap_or("off")
    );
    if let Some(cb) = cb {
        cb.on_batch_start(queue.len());
    }

    while let Some(pending) = queue.pop_front() {
        let index = results.len();
        let total = index + queue.len() + 1;

        // ── Intake ───────────────────────────────────────────────────────
        let ready = match pending {
            Pending::Upload(file) => {
                let kind = FileKind::detect(&file.name, file.content_type.as_deref());
                match admit_upload(&mut intake, &file, kind).await {
                    Ok(path) => Ready {
                        source_name: file.name,
                        path,
                        kind,
                        archive: None,
                        depth: 1,
                    },
                    Err(e) => {
                        results.push(failed(&file.name, kind, None, &e, index, total, config));
                        continue;
                    }
                }
            }
            Pending::Local(path) => {
                let name = path.display().to_string();
                let kind = FileKind::detect(&name, None);
                let admitted = intake.register_local(&path).and_then(|f| {
                    reject_unsupported(&name, kind)?;
                    Ok(f.path)
                });
                match admitted {
                    Ok(path) => Ready {
                        source_name: name,
                        path,
                        kind,
                        archive: None,
                        depth: 1,
                    },
                    Err(e) => {
                        results.push(failed(&name, kind, None, &e, index, total, config));
                        continue;
                    }
                }
            }
            Pending::Member {
                source_name,
                path,
                kind,
                archive,
                depth,
            } => Ready {
                source_name,
                path,
                kind,
                archive: Some(archive),
                depth,
            },
            Pending::Skipped {
                source_name,
                kind,
                archive,
                reason,
            } => {
                warn!("Skipping {}: {}", source_name, reason);
                if let Some(cb) = cb {
                    cb.on_file_skipped(index, total, &source_name, &reason);
                }
                let mut result = ConversionResult::queued(source_name, kind, Some(archive));
                result.skip(reason);
                results.push(result);
                continue;
            }
        };

        // ── Archives ─────────────────────────────────────────────────────
        if ready.kind.is_archive() {
            if ready.depth > config.max_archive_depth {
                let reason = format!(
                    "nested archive deeper than {} levels",
                    config.max_archive_depth
                );
                queue.push_front(Pending::Skipped {
                    source_name: ready.source_name,
                    kind: ready.kind,
                    archive: ready.archive.unwrap_or_default(),
                    reason,
                });
                continue;
            }
            match expand_archive(&mut intake, &ready, config).await {
                Ok(members) => {
                    info!("{}: {} members", ready.source_name, members.len());
                    if let Some(cb) = cb {
                        cb.on_archive_expanded(&ready.source_name, members.len());
                    }
                    for member in members.into_iter().rev() {
                        queue.push_front(member);
                    }
                }
                Err(e) => {
                    results.push(failed(
                        &ready.source_name,
                        ready.kind,
                        ready.archive,
                        &e,
                        index,
                        total,
                        config,
                    ));
                }
            }
            continue;
        }

        // ── Conversion ───────────────────────────────────────────────────
        if let Some(cb) = cb {
            cb.on_file_start(index, total, &ready.source_name);
        }
        let mut result = ConversionResult::queued(&ready.source_name, ready.kind, ready.archive);
        result.status = FileStatus::Converting;
        let file_start = Instant::now();

        match convert_file(&ready.path, ready.kind, &ready.source_name, config, captioner.as_deref()).await {
            Ok(doc) => {
                info!(
                    "{}: {} bytes of Markdown, {} images captioned, {} warnings",
                    ready.source_name,
                    doc.markdown.len(),
                    doc.images_captioned,
                    doc.warnings.len()
                );
                if let Some(cb) = cb {
                    cb.on_file_complete(index, total, &ready.source_name, doc.markdown.len());
                }
                result.succeed(doc.markdown, doc.warnings, doc.images_captioned);
            }
            Err(e) => {
                warn!("{}: {}", ready.source_name, e);
                if let Some(cb) = cb {
                    cb.on_file_error(index, total, &ready.source_name, &e.to_string());
                }
                result.fail(e.to_issue());
            }
        }
        result.duration_ms = file_start.elapsed().as_millis() as u64;
        results.push(result);
    }

    let report = BatchReport::new(results, batch_start.elapsed().as_millis() as u64);
    info!(
        "Batch complete: {}/{} succeeded, {} failed, {} skipped in {}ms",
        report.stats.succeeded,
        report.stats.total,
        report.stats.failed,
        report.stats.skipped,
        report.stats.duration_ms
    );
    if let Some(cb) = cb {
        cb.on_batch_complete(report.stats.total, report.stats.succeeded);
    }

    // `intake` drops here, removing every upload and extracted member.
    Ok(report)
}

/// Size check, format check, then write to the intake directory.
async fn admit_upload(
    intake: &mut UploadIntake,
    file: &UploadedFile,
    kind: FileKind,
) -> Result<PathBuf, Doc2MdError> {
    intake.check_size(&file.name, file.size.max(file.bytes.len() as u64))?;
    reject_unsupported(&file.name, kind)?;
    Ok(intake.accept(file).await?.path)
}

fn reject_unsupported(name: &str, kind: FileKind) -> Result<(), Doc2MdError> {
    match kind.unsupported_reason() {
        Some(reason) => Err(Doc2MdError::UnsupportedFormat {
            name: name.to_string(),
            detail: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn failed(
    name: &str,
    kind: FileKind,
    archive: Option<String>,
    err: &Doc2MdError,
    index: usize,
    total: usize,
    config: &ConversionConfig,
) -> ConversionResult {
    warn!("{}: {}", name, err);
    if let Some(ref cb) = config.progress_callback {
        cb.on_file_error(index, total, name, &err.to_string());
    }
    let mut result = ConversionResult::queued(name, kind, archive);
    result.fail(err.to_issue());
    result
}

/// Expand a ZIP into queue entries for its members.
async fn expand_archive(
    intake: &mut UploadIntake,
    archive: &Ready,
    config: &ConversionConfig,
) -> Result<Vec<Pending>, Doc2MdError> {
    let dest = intake.scratch_dir(&archive.source_name)?;
    let limits = ArchiveLimits {
        max_member_size: config.max_file_size,
        max_members: config.max_archive_members,
    };
    let path = archive.path.clone();
    let name = archive.source_name.clone();
    let members = tokio::task::spawn_blocking(move || archive::expand_zip(&path, &name, &dest, limits))
        .await
        .map_err(|e| Doc2MdError::Internal(format!("Archive task panicked: {}", e)))??;

    Ok(members
        .into_iter()
        .map(|m| {
            let source_name = format!("{}/{}", archive.source_name, m.name);
            match m.outcome {
                MemberOutcome::Extracted(path) => Pending::Member {
                    source_name,
                    path,
                    kind: m.kind,
                    archive: archive.source_name.clone(),
                    depth: archive.depth + 1,
                },
                MemberOutcome::Skipped(reason) => Pending::Skipped {
                    source_name,
                    kind: m.kind,
                    archive: archive.source_name.clone(),
                    reason,
                },
            }
        })
        .collect())
}

// ── Single-file dispatch ─────────────────────────────────────────────────

/// Run the backend for one file, caption its images, and clean the result.
async fn convert_file(
    path: &Path,
    kind: FileKind,
    name: &str,
    config: &ConversionConfig,
    captioner: Option<&dyn ImageCaptioner>,
) -> Result<DocumentOutput, Doc2MdError> {
    let opts = ExtractOptions {
        rasterise_scanned_pages: captioner.is_some() && config.transcribe_scanned_pages,
        max_rendered_pixels: config.max_rendered_pixels,
    };
    let owned_path = path.to_path_buf();
    let owned_name = name.to_string();
    let blocks = tokio::task::spawn_blocking(move || {
        extract::extract(kind, &owned_path, &owned_name, &opts)
    })
    .await
    .map_err(|e| Doc2MdError::Internal(format!("Extraction task panicked: {}", e)))??;

    let images = blocks.iter().filter(|b| matches!(b, Block::Image(_))).count();
    debug!("{}: {} blocks, {} images", name, blocks.len(), images);

    Ok(render_blocks(blocks, name, captioner).await)
}

/// Join blocks into one cleaned document, captioning images on the way.
async fn render_blocks(
    blocks: Vec<Block>,
    name: &str,
    captioner: Option<&dyn ImageCaptioner>,
) -> DocumentOutput {
    let mut raw = String::new();
    let mut warnings = Vec::new();
    let mut images_captioned = 0;

    for block in blocks {
        match block {
            Block::Markdown(md) => raw.push_str(&md),
            Block::Image(image) => {
                let purpose = match image.role {
                    ImageRole::ScannedPage(_) => CaptionPurpose::TranscribePage,
                    _ => CaptionPurpose::Caption,
                };
                let label = format!("{}: {}", name, image.label);
                let described = match captioner {
                    Some(c) => Some(describe_bytes(c, purpose, &image.bytes, &label).await),
                    None => None,
                };
                if let Some(Err(ref e)) = described {
                    warn!("{}: caption failed: {}", label, e);
                    warnings.push(FileIssue::caption(&image.label, e));
                }
                let text = described.and_then(Result::ok);
                if text.is_some() {
                    images_captioned += 1;
                }
                raw.push_str(&render_image(&image, text.as_deref()));
            }
        }
    }

    DocumentOutput {
        markdown: postprocess::clean_markdown(&raw),
        warnings,
        images_captioned,
    }
}

/// Markdown for one image, with or without the model's text.
fn render_image(image: &EmbeddedImage, text: Option<&str>) -> String {
    match image.role {
        ImageRole::Inline => {
            let caption = text
                .map(postprocess::clean_caption)
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| {
                    postprocess::escape_alt_text(image.alt.as_deref().unwrap_or(&image.label))
                });
            format!("![{}]({})\n\n", caption, link_target(&image.label))
        }
        ImageRole::Standalone => match text.map(postprocess::clean_description) {
            Some(desc) if !desc.is_empty() => format!("\n# Description:\n{desc}\n"),
            _ => "\n*No description available for this image.*\n".to_string(),
        },
        ImageRole::ScannedPage(page) => match text.map(postprocess::clean_transcription) {
            Some(md) if !md.is_empty() => format!("{md}\n\n"),
            _ => format!("<!-- page {page}: scanned page, not transcribed -->\n\n"),
        },
    }
}

/// Angle-bracket link destinations when the name has spaces or parentheses.
fn link_target(label: &str) -> String {
    if label.contains([' ', '(', ')', '<', '>']) {
        format!("<{}>", label.replace(['<', '>'], "_"))
    } else {
        label.to_string()
    }
}
