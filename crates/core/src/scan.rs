//! Walk the device's `documents` tree and pick out e-book files.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::ScanError;

/// Extensions scanned for covers. `.azw` is opt-in.
const COVER_EXTENSIONS: &[&str] = &["azw3", "mobi", "kfx", "azw8"];
/// Extensions that get APNX page maps.
const PAGE_MAP_EXTENSIONS: &[&str] = &["azw3", "mobi", "azw"];
const DICTIONARIES_DIR: &str = "dictionaries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BookKind {
    /// MOBI, AZW, AZW3: PalmDB containers.
    Mobi,
    /// KFX, AZW8: Ion-based containers.
    Kfx,
}

impl BookKind {
    fn from_extension(ext: &str) -> Self {
        match ext {
            "kfx" | "azw8" => BookKind::Kfx,
            _ => BookKind::Mobi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookFile {
    pub path: PathBuf,
    pub kind: BookKind,
}

impl BookFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Lower-cased extension.
    pub fn extension(&self) -> String {
        lower_extension(&self.path).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub extensions: Vec<&'static str>,
    /// Only files created within this many calendar days.
    pub max_age_days: Option<u32>,
    pub skip_dictionaries: bool,
}

impl ScanOptions {
    pub fn covers(include_azw: bool, max_age_days: Option<u32>) -> Self {
        let mut extensions = COVER_EXTENSIONS.to_vec();
        if include_azw {
            extensions.push("azw");
        }
        Self {
            extensions,
            max_age_days,
            skip_dictionaries: false,
        }
    }

    pub fn page_maps(max_age_days: Option<u32>, skip_dictionaries: bool) -> Self {
        Self {
            extensions: PAGE_MAP_EXTENSIONS.to_vec(),
            max_age_days,
            skip_dictionaries,
        }
    }

    fn accepts(&self, path: &Path) -> Option<BookKind> {
        let ext = lower_extension(path)?;
        self.extensions
            .iter()
            .any(|e| *e == ext)
            .then(|| BookKind::from_extension(&ext))
    }
}

fn lower_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// `<kindle>/documents`
pub fn documents_dir(kindle_root: &Path) -> PathBuf {
    kindle_root.join("documents")
}

/// All matching books under `documents`, sorted by path. Unreadable entries
/// are logged and skipped.
pub fn scan_books(documents: &Path, opts: &ScanOptions) -> Result<Vec<BookFile>, ScanError> {
    if !documents.is_dir() {
        return Err(ScanError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", documents.display()),
        )));
    }
    let today = Local::now().date_naive();

    let walker = WalkDir::new(documents)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(opts.skip_dictionaries && is_dictionaries_dir(documents, e.path())));

    let mut books = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = opts.accepts(entry.path()) else {
            continue;
        };
        if let Some(days) = opts.max_age_days {
            let created = entry
                .metadata()
                .ok()
                .and_then(|m| m.created().or_else(|_| m.modified()).ok());
            match created {
                Some(t) if is_recent(t, days, today) => {}
                Some(_) => continue,
                None => {
                    tracing::debug!("No timestamp for {}, skipping", entry.path().display());
                    continue;
                }
            }
        }
        books.push(BookFile {
            path: entry.into_path(),
            kind,
        });
    }
    Ok(books)
}

fn is_dictionaries_dir(documents: &Path, path: &Path) -> bool {
    path.strip_prefix(documents)
        .map(|rel| rel.starts_with(DICTIONARIES_DIR))
        .unwrap_or(false)
}

/// True if `stamp` falls on a calendar day no more than `max_days` before `today`.
pub fn is_recent(stamp: SystemTime, max_days: u32, today: NaiveDate) -> bool {
    let day = DateTime::<Local>::from(stamp).date_naive();
    (today - day).num_days() <= i64::from(max_days)
}
