//! One full pass over a mounted Kindle: cover thumbnails, page maps, the
//! generated-thumbnail fix and cache persistence.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::apnx;
use crate::config::{self, AppConfig};
use crate::cover::{get_cover_image, CoverOptions, PERSONAL_DOCUMENT};
use crate::detect::is_mobi;
use crate::error::{ContainerError, ScanError, ThumbError};
use crate::pages::{estimate_record, CacheSession, PageCache};
use crate::patch;
use crate::progress::{emit_progress, ProgressHandler, Stage};
use crate::readers::MobiContainer;
use crate::scan::{documents_dir, scan_books, BookFile, BookKind, ScanOptions};
use crate::thumbnail::{self, OverwritePolicy};

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub overwrite_pdoc: bool,
    pub overwrite_amzn: bool,
    pub overwrite_apnx: bool,
    pub skip_apnx: bool,
    pub include_azw: bool,
    pub max_age_days: Option<u32>,
    pub fix_thumb: bool,
    pub patch_azw3: bool,
    /// Overrides `[pages] cache_file`.
    pub cache_file: Option<PathBuf>,
}

impl BatchOptions {
    fn overwrite_policy(&self) -> OverwritePolicy {
        OverwritePolicy {
            personal_documents: self.overwrite_pdoc,
            amazon_books: self.overwrite_amzn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum FileStatus {
    Created,
    /// Thumbnail already present and overwriting was not requested.
    Exists,
    Unsupported,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: PathBuf,
    pub asin: Option<String>,
    pub document_type: Option<String>,
    pub patched: bool,
    pub status: FileStatus,
}

impl FileOutcome {
    fn new(book: &BookFile) -> Self {
        Self {
            file: book.path.clone(),
            asin: None,
            document_type: None,
            patched: false,
            status: FileStatus::Unsupported,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub thumbnails_created: usize,
    pub thumbnails_skipped: usize,
    pub thumbnails_failed: usize,
    pub cache_rows_added: usize,
    pub apnx_written: usize,
    pub apnx_failed: usize,
    pub generated_fixed: usize,
    pub partials_removed: usize,
    pub files: Vec<FileOutcome>,
}

impl BatchReport {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome.status {
            FileStatus::Created => self.thumbnails_created += 1,
            FileStatus::Exists | FileStatus::Unsupported => self.thumbnails_skipped += 1,
            FileStatus::Failed(_) => self.thumbnails_failed += 1,
        }
        self.files.push(outcome);
    }
}

/// Process every book under `<kindle_root>/documents`.
///
/// Per-file problems are recorded in the report and never abort the run.
/// Errors returned here are fatal: not a Kindle, or the page cache could not
/// be loaded or saved. A missing `documents` directory means no books.
pub fn run(
    kindle_root: &Path,
    opts: &BatchOptions,
    cfg: &AppConfig,
    progress: Option<&dyn ProgressHandler>,
) -> Result<BatchReport, ThumbError> {
    let thumbs = thumbnail::thumbnails_dir(kindle_root);
    if !thumbs.is_dir() {
        return Err(ScanError::NotAKindle(kindle_root.display().to_string()).into());
    }
    let documents = documents_dir(kindle_root);
    let cache_file = opts
        .cache_file
        .clone()
        .unwrap_or_else(|| config::cache_path(&cfg.pages));
    let mut session = CacheSession::begin(&cache_file)?;
    let mut report = BatchReport::default();

    tracing::info!("Extracting covers under {}", documents.display());
    if !documents.is_dir() {
        tracing::warn!("No documents directory at {}, nothing to scan", documents.display());
    }
    let books = scan_documents(
        &documents,
        &ScanOptions::covers(opts.include_azw, opts.max_age_days),
    )?;
    let total = books.len() as u64;
    for (i, book) in books.iter().enumerate() {
        emit_progress(progress, Stage::Covers, i as u64 + 1, Some(total), Some(&book.path));
        let mut outcome = FileOutcome::new(book);
        let status = match book.kind {
            BookKind::Kfx => {
                tracing::warn!("{}: KFX metadata is not supported, skipping", book.file_name());
                FileStatus::Unsupported
            }
            BookKind::Mobi => {
                let cache = session.cache_mut();
                match cover_for_mobi(book, kindle_root, opts, cfg, cache, &mut outcome, &mut report) {
                    Ok(status) => status,
                    Err(e) => FileStatus::Failed(e.to_string()),
                }
            }
        };
        outcome.status = status;
        log_outcome(&outcome);
        report.record(outcome);
    }

    if !opts.skip_apnx {
        tracing::info!("Generating page maps");
        write_page_maps(&documents, opts, cfg, session.cache(), progress, &mut report)?;
    }

    if opts.overwrite_pdoc {
        emit_progress(progress, Stage::GeneratedThumbnails, 1, None, None);
        report.generated_fixed =
            thumbnail::fix_generated_thumbnails(&thumbs, opts.fix_thumb, &cfg.thumbnail)?;
    }

    session.commit()?;
    report.partials_removed = thumbnail::remove_partial_files(&thumbs)?;
    tracing::info!(
        created = report.thumbnails_created,
        skipped = report.thumbnails_skipped,
        failed = report.thumbnails_failed,
        apnx = report.apnx_written,
        "Done"
    );
    Ok(report)
}

/// A device without `documents/` simply has no books.
fn scan_documents(documents: &Path, opts: &ScanOptions) -> Result<Vec<BookFile>, ThumbError> {
    if !documents.is_dir() {
        return Ok(Vec::new());
    }
    Ok(scan_books(documents, opts)?)
}

fn log_outcome(outcome: &FileOutcome) {
    let name = outcome.file.display();
    match &outcome.status {
        FileStatus::Created => tracing::info!("{}: thumbnail created", name),
        FileStatus::Exists => tracing::info!("{}: thumbnail exists, skipping", name),
        FileStatus::Unsupported => {}
        FileStatus::Failed(reason) => tracing::warn!("{}: {}", name, reason),
    }
}

fn cover_for_mobi(
    book: &BookFile,
    kindle_root: &Path,
    opts: &BatchOptions,
    cfg: &AppConfig,
    cache: &mut PageCache,
    outcome: &mut FileOutcome,
    report: &mut BatchReport,
) -> Result<FileStatus, ThumbError> {
    let data = std::fs::read(&book.path)?;
    if !is_mobi(&data) {
        return Err(ContainerError::NotMobi.into());
    }
    let container = MobiContainer::from_bytes(data)?;

    let record = estimate_record(&container, &book.file_name(), cfg.pages.chars_per_page);
    if cache.insert_if_missing(record)? {
        report.cache_rows_added += 1;
    }

    outcome.asin = container.asin();
    outcome.document_type = container.document_type();

    if opts.patch_azw3
        && outcome.asin.is_some()
        && outcome.document_type.as_deref() == Some(PERSONAL_DOCUMENT)
        && book.extension() == "azw3"
    {
        outcome.patched = patch::patch_file(&book.path)?;
        outcome.document_type = Some("EBOK".to_string());
        tracing::info!("{}: document type patched to EBOK", book.file_name());
    }

    let Some(asin) = outcome.asin.as_deref() else {
        return Ok(FileStatus::Failed("no ASIN".to_string()));
    };
    let Some(doctype) = outcome.document_type.as_deref() else {
        return Ok(FileStatus::Failed("no document type".to_string()));
    };

    let path = thumbnail::thumbnail_path(kindle_root, asin, doctype);
    if !opts.overwrite_policy().should_write(path.is_file(), doctype) {
        return Ok(FileStatus::Exists);
    }

    let cover_opts = CoverOptions::for_document(&cfg.thumbnail, opts.fix_thumb, Some(doctype));
    let cover = get_cover_image(&container, &cover_opts)?;
    thumbnail::save_thumbnail(&path, &cover, cfg.thumbnail.jpeg_quality)?;
    Ok(FileStatus::Created)
}

fn write_page_maps(
    documents: &Path,
    opts: &BatchOptions,
    cfg: &AppConfig,
    cache: &PageCache,
    progress: Option<&dyn ProgressHandler>,
    report: &mut BatchReport,
) -> Result<(), ThumbError> {
    let books = scan_documents(
        documents,
        &ScanOptions::page_maps(opts.max_age_days, cfg.scan.skip_dictionaries),
    )?;
    let total = books.len() as u64;
    for (i, book) in books.iter().enumerate() {
        emit_progress(progress, Stage::PageMaps, i as u64 + 1, Some(total), Some(&book.path));
        if apnx::apnx_path(&book.path).is_file() && !opts.overwrite_apnx {
            continue;
        }
        match page_map_for(book, cache, cfg) {
            Ok(path) => {
                tracing::info!("{}: page map written", path.display());
                report.apnx_written += 1;
            }
            Err(e) => {
                tracing::warn!("{}: no page map: {}", book.file_name(), e);
                report.apnx_failed += 1;
            }
        }
    }
    Ok(())
}

fn page_map_for(book: &BookFile, cache: &PageCache, cfg: &AppConfig) -> Result<PathBuf, ThumbError> {
    let data = std::fs::read(&book.path)?;
    if !is_mobi(&data) {
        return Err(ContainerError::NotMobi.into());
    }
    let container = MobiContainer::from_bytes(data)?;
    let pages = cache.lookup(container.asin().as_deref(), &book.file_name());
    match pages {
        Some(n) => tracing::debug!("{}: {} pages from cache", book.file_name(), n),
        None => tracing::debug!("{}: not cached, using fast algorithm", book.file_name()),
    }
    Ok(apnx::write_apnx(
        &book.path,
        &container,
        pages,
        cfg.pages.chars_per_page,
    )?)
}

/// Extract the cover of a single MOBI file straight to `out`.
pub fn write_cover(book: &Path, out: &Path, fix_thumb: bool, cfg: &AppConfig) -> Result<(), ThumbError> {
    let container = MobiContainer::open(book)?;
    let doctype = container.document_type();
    let opts = CoverOptions::for_document(&cfg.thumbnail, fix_thumb, doctype.as_deref());
    let cover = get_cover_image(&container, &opts)?;
    thumbnail::save_thumbnail(out, &cover, cfg.thumbnail.jpeg_quality)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use crate::readers::fixture::MobiFixture;
    use crate::readers::mobi::exth;
    use image::{DynamicImage, GenericImageView};
    use pretty_assertions::assert_eq;

    struct Kindle {
        dir: tempfile::TempDir,
    }

    impl Kindle {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("system/thumbnails")).unwrap();
            std::fs::create_dir_all(dir.path().join("documents")).unwrap();
            Self { dir }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn add_book(&self, name: &str, data: Vec<u8>) -> PathBuf {
            let path = self.root().join("documents").join(name);
            std::fs::write(&path, data).unwrap();
            path
        }

        fn thumb(&self, asin: &str, doctype: &str) -> PathBuf {
            thumbnail::thumbnail_path(self.root(), asin, doctype)
        }

        fn options(&self) -> BatchOptions {
            BatchOptions {
                cache_file: Some(self.root().join("cache").join("ect.csv")),
                ..BatchOptions::default()
            }
        }
    }

    fn jpeg_cover(width: u32, height: u32) -> Vec<u8> {
        let img = image::GrayImage::from_pixel(width, height, image::Luma([90]));
        let mut buf = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .unwrap();
        buf.into_inner()
    }

    fn book(asin: &str, doctype: &str) -> Vec<u8> {
        MobiFixture::new()
            .resource(b"FONTxxxx".to_vec())
            .resource(jpeg_cover(600, 900))
            .exth_text(exth::ASIN, asin)
            .exth_text(exth::DOCUMENT_TYPE, doctype)
            .exth_number(exth::COVER_OFFSET, 1)
            .build()
    }

    #[test]
    fn test_rejects_non_kindle() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), &BatchOptions::default(), &AppConfig::default(), None).unwrap_err();
        assert!(matches!(err, ThumbError::Scan(ScanError::NotAKindle(_))));
    }

    #[test]
    fn test_creates_thumbnail_and_page_map() {
        let kindle = Kindle::new();
        let path = kindle.add_book("Novel.azw3", book("B00NOVEL", "EBOK"));
        let opts = kindle.options();

        let report = run(kindle.root(), &opts, &AppConfig::default(), None).unwrap();
        assert_eq!(report.thumbnails_created, 1);
        assert_eq!(report.cache_rows_added, 1);
        assert_eq!(report.apnx_written, 1);

        let thumb = image::open(kindle.thumb("B00NOVEL", "EBOK")).unwrap();
        assert!(thumb.width() <= 305 && thumb.height() <= 470);
        assert!(apnx::apnx_path(&path).is_file());

        let cache = PageCache::open(opts.cache_file.as_deref().unwrap()).unwrap();
        assert!(cache.contains("B00NOVEL", "Novel.azw3"));
    }

    #[test]
    fn test_existing_thumbnail_respects_overwrite_flags() {
        let kindle = Kindle::new();
        kindle.add_book("Doc.mobi", book("B00DOC", "PDOC"));
        let thumb = kindle.thumb("B00DOC", "PDOC");
        std::fs::write(&thumb, b"old").unwrap();

        let mut opts = kindle.options();
        opts.skip_apnx = true;
        let report = run(kindle.root(), &opts, &AppConfig::default(), None).unwrap();
        assert_eq!(report.files[0].status, FileStatus::Exists);
        assert_eq!(std::fs::read(&thumb).unwrap(), b"old");

        opts.overwrite_pdoc = true;
        opts.fix_thumb = true;
        let report = run(kindle.root(), &opts, &AppConfig::default(), None).unwrap();
        assert_eq!(report.files[0].status, FileStatus::Created);
        let (_, height) = image::open(&thumb).unwrap().dimensions();
        // Fix mode box is 415 tall, plus 55 rows of PDOC padding.
        assert_eq!(height, 415 + 55);
    }

    #[test]
    fn test_per_file_failures_do_not_abort() {
        let kindle = Kindle::new();
        kindle.add_book("broken.mobi", b"not a mobi at all".to_vec());
        kindle.add_book(
            "noasin.mobi",
            MobiFixture::new().exth_text(exth::DOCUMENT_TYPE, "EBOK").build(),
        );
        kindle.add_book("store.kfx", b"kfx".to_vec());
        kindle.add_book("good.mobi", book("B00GOOD", "EBOK"));

        let report = run(kindle.root(), &kindle.options(), &AppConfig::default(), None).unwrap();
        assert_eq!(report.thumbnails_created, 1);
        assert_eq!(report.thumbnails_failed, 2);
        assert_eq!(report.thumbnails_skipped, 1);
        let statuses: Vec<_> = report.files.iter().map(|f| f.status.clone()).collect();
        assert_eq!(statuses[1], FileStatus::Created);
        assert_eq!(statuses[2], FileStatus::Failed("no ASIN".to_string()));
        assert_eq!(statuses[3], FileStatus::Unsupported);
        assert_eq!(report.apnx_failed, 1);
    }

    #[test]
    fn test_patch_azw3_switches_document_type() {
        let kindle = Kindle::new();
        let path = kindle.add_book("Personal.azw3", book("B00PERS", "PDOC"));
        let mut opts = kindle.options();
        opts.patch_azw3 = true;
        opts.skip_apnx = true;

        let report = run(kindle.root(), &opts, &AppConfig::default(), None).unwrap();
        assert!(report.files[0].patched);
        assert!(kindle.thumb("B00PERS", "EBOK").is_file());
        assert_eq!(
            MobiContainer::open(&path).unwrap().document_type().as_deref(),
            Some("EBOK")
        );
    }

    #[test]
    fn test_existing_page_map_kept_unless_overwrite() {
        let kindle = Kindle::new();
        let path = kindle.add_book("Kept.mobi", book("B00KEPT", "EBOK"));
        let apnx_file = apnx::apnx_path(&path);
        std::fs::create_dir_all(apnx_file.parent().unwrap()).unwrap();
        std::fs::write(&apnx_file, b"old").unwrap();

        let mut opts = kindle.options();
        let report = run(kindle.root(), &opts, &AppConfig::default(), None).unwrap();
        assert_eq!(report.apnx_written, 0);

        opts.overwrite_apnx = true;
        let report = run(kindle.root(), &opts, &AppConfig::default(), None).unwrap();
        assert_eq!(report.apnx_written, 1);
        assert_ne!(std::fs::read(&apnx_file).unwrap(), b"old");
    }

    #[test]
    fn test_removes_partial_files() {
        let kindle = Kindle::new();
        std::fs::write(kindle.root().join("system/thumbnails/x.jpg.partial"), b"").unwrap();
        let report = run(kindle.root(), &kindle.options(), &AppConfig::default(), None).unwrap();
        assert_eq!(report.partials_removed, 1);
    }

    #[test]
    fn test_missing_documents_dir_is_an_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = dir.path().join("system/thumbnails");
        std::fs::create_dir_all(&thumbs).unwrap();
        std::fs::write(thumbs.join("x.partial"), b"").unwrap();
        let cache = dir.path().join("ect.csv");
        let opts = BatchOptions {
            cache_file: Some(cache.clone()),
            ..BatchOptions::default()
        };

        let report = run(dir.path(), &opts, &AppConfig::default(), Some(&NoopProgress)).unwrap();
        assert!(report.files.is_empty());
        assert_eq!(report.apnx_written, 0);
        assert_eq!(report.partials_removed, 1);
        assert!(!thumbs.join("x.partial").exists());
        assert!(cache.is_file());
    }

    #[test]
    fn test_write_cover_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("b.mobi");
        std::fs::write(&src, book("B00ONE", "EBOK")).unwrap();
        let out = dir.path().join("cover.jpg");
        write_cover(&src, &out, false, &AppConfig::default()).unwrap();
        assert_eq!(image::open(&out).unwrap().width(), 305);
    }
}
