//! Batch conversion through the public API, without network or pdfium.
//!
//! Run with:
//!   cargo test --test batch

mod common;

use common::{docx, offline_config, png, pptx, upload, xlsx, ZipBuilder};
use edgequake_doc2md::{
    convert, convert_batch, convert_paths, convert_sync, convert_to_file, BatchProgressCallback,
    ConversionConfig,
    FileSeparator, FileStatus, IssueKind, UploadedFile,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn statuses(report: &edgequake_doc2md::BatchReport) -> Vec<(String, FileStatus)> {
    report
        .results
        .iter()
        .map(|r| (r.source_name.clone(), r.status))
        .collect()
}

// ── Mixed uploads ────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_upload_gets_a_result_in_upload_order() {
    let config = ConversionConfig::builder()
        .caption_from_env(false)
        .max_file_size(64)
        .build()
        .unwrap();
    let files = vec![
        upload("notes.txt", b"hello\n"),
        upload("legacy.doc", b"\xD0\xCF\x11\xE0"),
        upload("big.txt", [b'x'; 100]),
        upload("data.csv", b"a,b\n1,2\n"),
    ];

    let report = convert_batch(files, &config).await.unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            ("notes.txt".to_string(), FileStatus::Succeeded),
            ("legacy.doc".to_string(), FileStatus::Failed),
            ("big.txt".to_string(), FileStatus::Failed),
            ("data.csv".to_string(), FileStatus::Succeeded),
        ]
    );
    assert_eq!(report.results[0].markdown, "hello\n");
    assert_eq!(report.results[3].markdown, "| a | b |\n| --- | --- |\n| 1 | 2 |\n");

    let legacy = report.results[1].issue.as_ref().unwrap();
    assert_eq!(legacy.kind, IssueKind::UnsupportedFormat);
    assert!(legacy.message.contains(".docx"));
    let big = report.results[2].issue.as_ref().unwrap();
    assert_eq!(big.kind, IssueKind::UploadTooLarge);
    assert!(report.results[2].markdown.is_empty());

    assert_eq!(report.stats.total, 4);
    assert_eq!(report.stats.succeeded, 2);
    assert_eq!(report.stats.failed, 2);
    for (i, r) in report.results.iter().enumerate() {
        assert_eq!(r.index, i);
    }
}

#[tokio::test]
async fn truncated_upload_reports_its_declared_size() {
    let config = ConversionConfig::builder()
        .caption_from_env(false)
        .max_file_size(10)
        .build()
        .unwrap();
    let files = vec![UploadedFile::truncated("huge.pdf", None, 5_000)];

    let report = convert_batch(files, &config).await.unwrap();

    let issue = report.results[0].issue.as_ref().unwrap();
    assert_eq!(issue.kind, IssueKind::UploadTooLarge);
    assert!(issue.message.contains("5000"), "{}", issue.message);
}

#[tokio::test]
async fn corrupt_documents_fail_alone() {
    let files = vec![
        upload("broken.docx", b"not a zip at all"),
        upload("broken.json", b"{\"a\": "),
        upload("ok.md", b"# Title\n\nBody\n"),
    ];

    let report = convert_batch(files, &offline_config()).await.unwrap();

    assert_eq!(report.results[0].status, FileStatus::Failed);
    assert_eq!(
        report.results[0].issue.as_ref().unwrap().kind,
        IssueKind::ConversionFailure
    );
    assert_eq!(report.results[1].status, FileStatus::Failed);
    assert_eq!(report.results[2].status, FileStatus::Succeeded);
    assert_eq!(report.results[2].markdown, "# Title\n\nBody\n");
}

#[tokio::test]
async fn empty_batch_is_an_empty_report() {
    let report = convert_batch(Vec::new(), &offline_config()).await.unwrap();
    assert!(report.results.is_empty());
    assert_eq!(report.stats.total, 0);
    assert_eq!(report.combined_markdown(&FileSeparator::Heading), "");
}

#[tokio::test]
async fn mime_type_decides_when_the_name_has_no_extension() {
    let files = vec![upload("export", b"x,y\n3,4\n").with_content_type("text/csv")];
    let report = convert_batch(files, &offline_config()).await.unwrap();
    assert_eq!(report.results[0].status, FileStatus::Succeeded);
    assert!(report.results[0].markdown.starts_with("| x | y |"));
}

// ── Office formats ───────────────────────────────────────────────────────────

#[tokio::test]
async fn docx_without_captioner_keeps_author_alt_text() {
    let report = convert_batch(vec![upload("report.docx", docx())], &offline_config())
        .await
        .unwrap();

    let r = &report.results[0];
    assert_eq!(r.status, FileStatus::Succeeded, "{:?}", r.issue);
    assert!(r.markdown.starts_with("# Intro\n\nSee figure\n"), "{}", r.markdown);
    assert!(r.markdown.contains("![A chart](image1.png)"), "{}", r.markdown);
    assert!(r.markdown.ends_with('\n') && !r.markdown.ends_with("\n\n"));
    assert_eq!(r.images_captioned, 0);
    assert!(r.warnings.is_empty());
}

#[tokio::test]
async fn pptx_slides_are_numbered() {
    let report = convert_batch(vec![upload("deck.pptx", pptx())], &offline_config())
        .await
        .unwrap();

    let md = &report.results[0].markdown;
    assert!(md.starts_with("<!-- Slide number: 1 -->"), "{md}");
    assert!(md.contains("# Quarterly"));
    assert!(md.contains("Revenue up"));
}

#[tokio::test]
async fn xlsx_sheets_become_sections_with_tables() {
    let report = convert_batch(vec![upload("stock.xlsx", xlsx())], &offline_config())
        .await
        .unwrap();

    let r = &report.results[0];
    assert_eq!(r.status, FileStatus::Succeeded, "{:?}", r.issue);
    assert_eq!(
        r.markdown,
        "## Sheet1\n\n| item | qty |\n| --- | --- |\n| widget | three |\n"
    );
}

#[tokio::test]
async fn xml_upload_is_fenced() {
    let xml = "<?xml version=\"1.0\"?>\n<order id=\"7\"><line sku=\"A1\"/></order>\n";
    let report = convert_batch(vec![upload("order.xml", xml)], &offline_config())
        .await
        .unwrap();

    let r = &report.results[0];
    assert_eq!(r.status, FileStatus::Succeeded, "{:?}", r.issue);
    assert_eq!(
        r.markdown,
        "```xml\n<?xml version=\"1.0\"?>\n<order id=\"7\"><line sku=\"A1\"/></order>\n```\n"
    );
}

#[tokio::test]
async fn standalone_image_without_captioner_gets_placeholder() {
    let report = convert_batch(vec![upload("photo.png", png())], &offline_config())
        .await
        .unwrap();

    let md = &report.results[0].markdown;
    assert!(md.starts_with("ImageSize: 2x2\n"), "{md}");
    assert!(md.contains("*No description available for this image.*"));
}

// ── Archives ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn archive_members_follow_their_archive() {
    let inner = ZipBuilder::new()
        .file("deep.txt", b"deep\n")
        .finish();
    let bundle = ZipBuilder::new()
        .file("docs/readme.txt", b"read me\n")
        .file("__MACOSX/docs/._readme.txt", b"junk")
        .file("old.doc", b"legacy")
        .file("inner.zip", inner)
        .file("data.csv", b"k,v\n")
        .finish();
    let files = vec![
        upload("first.txt", b"first\n"),
        upload("bundle.zip", &bundle),
        upload("last.txt", b"last\n"),
    ];

    let report = convert_batch(files, &offline_config()).await.unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            ("first.txt".to_string(), FileStatus::Succeeded),
            ("bundle.zip/docs/readme.txt".to_string(), FileStatus::Succeeded),
            ("bundle.zip/old.doc".to_string(), FileStatus::Skipped),
            ("bundle.zip/inner.zip/deep.txt".to_string(), FileStatus::Succeeded),
            ("bundle.zip/data.csv".to_string(), FileStatus::Succeeded),
            ("last.txt".to_string(), FileStatus::Succeeded),
        ]
    );
    assert_eq!(report.results[1].archive.as_deref(), Some("bundle.zip"));
    assert_eq!(report.results[3].archive.as_deref(), Some("bundle.zip/inner.zip"));
    assert_eq!(report.results[3].markdown, "deep\n");
    assert_eq!(
        report.results[2].issue.as_ref().unwrap().kind,
        IssueKind::ArchiveMemberFailure
    );
    assert_eq!(report.results[1].download_name, "bundle.zip_docs_readme.txt.md");
}

#[tokio::test]
async fn nesting_beyond_the_depth_limit_is_skipped() {
    let inner = ZipBuilder::new()
        .file("deep.txt", b"deep\n")
        .finish();
    let bundle = ZipBuilder::new()
        .file("top.txt", b"top\n")
        .file("inner.zip", inner)
        .finish();
    let config = ConversionConfig::builder()
        .caption_from_env(false)
        .max_archive_depth(1)
        .build()
        .unwrap();

    let report = convert_batch(vec![upload("bundle.zip", &bundle)], &config)
        .await
        .unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            ("bundle.zip/top.txt".to_string(), FileStatus::Succeeded),
            ("bundle.zip/inner.zip".to_string(), FileStatus::Skipped),
        ]
    );
}

#[tokio::test]
async fn corrupt_archive_is_one_failed_result() {
    let files = vec![upload("bad.zip", b"PK\x03\x04 truncated"), upload("a.txt", b"a\n")];
    let report = convert_batch(files, &offline_config()).await.unwrap();

    assert_eq!(
        statuses(&report),
        vec![
            ("bad.zip".to_string(), FileStatus::Failed),
            ("a.txt".to_string(), FileStatus::Succeeded),
        ]
    );
}

#[tokio::test]
async fn traversal_paths_stay_inside_the_batch() {
    let bundle = ZipBuilder::new()
        .file("../../escape.txt", b"caught\n")
        .finish();
    let report = convert_batch(vec![upload("evil.zip", &bundle)], &offline_config())
        .await
        .unwrap();

    assert_eq!(report.results[0].source_name, "evil.zip/escape.txt");
    assert_eq!(report.results[0].markdown, "caught\n");
}

// ── Determinism ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn same_input_converts_to_identical_markdown() {
    let bundle = ZipBuilder::new()
        .file("deck.pptx", pptx())
        .file("notes/a.md", b"# A\n\ntext\n")
        .file("table.csv", b"k,v\n1,2\n")
        .finish();
    let files = || {
        vec![
            upload("report.docx", docx()),
            upload("bundle.zip", &bundle),
            upload("stock.xlsx", xlsx()),
        ]
    };

    let first = convert_batch(files(), &offline_config()).await.unwrap();
    let second = convert_batch(files(), &offline_config()).await.unwrap();

    assert_eq!(first.stats.succeeded, 5);
    let markdown = |r: &edgequake_doc2md::BatchReport| {
        r.results
            .iter()
            .map(|x| (x.download_name.clone(), x.markdown.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(markdown(&first), markdown(&second));
    assert_eq!(
        first.combined_markdown(&FileSeparator::Heading),
        second.combined_markdown(&FileSeparator::Heading)
    );
}

// ── Combined document ────────────────────────────────────────────────────────

#[tokio::test]
async fn combined_document_is_successes_in_order() {
    let files = vec![
        upload("a.txt", b"alpha\n"),
        upload("skip.doc", b"x"),
        upload("b.txt", b"beta\n"),
    ];
    let report = convert_batch(files, &offline_config()).await.unwrap();

    assert_eq!(report.combined_markdown(&FileSeparator::None), "alpha\nbeta\n");
    assert_eq!(
        report.combined_markdown(&FileSeparator::Heading),
        "## a.txt\n\nalpha\n\n## b.txt\n\nbeta\n"
    );
    assert_eq!(
        report.combined_markdown(&FileSeparator::HorizontalRule),
        "alpha\n\n---\n\nbeta\n"
    );
    assert!(report.combined_file_name().starts_with("combined_markdown_"));
}

#[tokio::test]
async fn duplicate_names_get_distinct_downloads() {
    let files = vec![upload("a.txt", b"one\n"), upload("a.txt", b"two\n")];
    let report = convert_batch(files, &offline_config()).await.unwrap();

    assert_eq!(report.results[0].download_name, "a.txt.md");
    assert_eq!(report.results[1].download_name, "a.txt-2.md");
    assert_eq!(report.results[1].markdown, "two\n");
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    errored: AtomicUsize,
    skipped: AtomicUsize,
    archives: AtomicUsize,
    finished_with: AtomicUsize,
    skip_positions: Mutex<Vec<(usize, usize)>>,
}

impl BatchProgressCallback for Counting {
    fn on_file_start(&self, _index: usize, _total: usize, _name: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_complete(&self, _index: usize, _total: usize, _name: &str, _len: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_error(&self, _index: usize, _total: usize, _name: &str, _error: &str) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_skipped(&self, index: usize, total: usize, _name: &str, _reason: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.skip_positions.lock().unwrap().push((index, total));
    }
    fn on_archive_expanded(&self, _archive: &str, _members: usize) {
        self.archives.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _total: usize, succeeded: usize) {
        self.finished_with.store(succeeded, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_events_cover_every_result() {
    let counting = Arc::new(Counting::default());
    let config = ConversionConfig::builder()
        .caption_from_env(false)
        .progress_callback(Arc::clone(&counting) as Arc<dyn BatchProgressCallback>)
        .build()
        .unwrap();
    let bundle = ZipBuilder::new()
        .file("in.txt", b"in\n")
        .file("old.ppt", b"x")
        .finish();
    let files = vec![
        upload("a.txt", b"a\n"),
        upload("b.doc", b"b"),
        upload("c.zip", &bundle),
    ];

    let report = convert_batch(files, &config).await.unwrap();

    assert_eq!(report.stats.total, 4);
    assert_eq!(counting.started.load(Ordering::SeqCst), 2);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 2);
    assert_eq!(counting.errored.load(Ordering::SeqCst), 1);
    assert_eq!(counting.skipped.load(Ordering::SeqCst), 1);
    assert_eq!(counting.archives.load(Ordering::SeqCst), 1);
    assert_eq!(counting.finished_with.load(Ordering::SeqCst), 2);
    // The skipped member is the last of four results.
    assert_eq!(*counting.skip_positions.lock().unwrap(), vec![(3, 4)]);
}

// ── Local files ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn local_paths_convert_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.html");
    std::fs::write(&a, "<html><script>x()</script><h1>Hi</h1><p>there</p></html>").unwrap();
    let missing = dir.path().join("missing.txt");

    let report = convert_paths(&[a.clone(), missing], &offline_config())
        .await
        .unwrap();

    assert_eq!(report.results[0].status, FileStatus::Succeeded);
    assert!(report.results[0].markdown.contains("Hi"));
    assert!(!report.results[0].markdown.contains("x()"));
    assert_eq!(report.results[1].status, FileStatus::Failed);
    assert!(a.exists());

    let single = convert(&a, &offline_config()).await.unwrap();
    assert_eq!(single.markdown, report.results[0].markdown);
}

#[tokio::test]
async fn convert_to_file_writes_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data.csv");
    std::fs::write(&src, "a,b\n1,2\n").unwrap();
    let out = dir.path().join("out/data.md");

    let doc = convert_to_file(&src, &out, &offline_config()).await.unwrap();

    assert_eq!(std::fs::read_to_string(&out).unwrap(), doc.markdown);
    assert!(doc.markdown.starts_with("| a | b |"));
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("out"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("data.md")]);
}

#[test]
fn convert_sync_matches_async() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("notes.txt");
    std::fs::write(&src, "hello\n").unwrap();

    let doc = convert_sync(&src, &offline_config()).unwrap();
    assert_eq!(doc.markdown, "hello\n");

    let missing = convert_sync(dir.path().join("nope.txt"), &offline_config());
    assert!(matches!(
        missing,
        Err(edgequake_doc2md::Doc2MdError::FileNotFound { .. })
    ));
}

