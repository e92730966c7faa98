//! Page-count cache: a `;`-separated, fully quoted CSV with one row per book.
//!
//! During a run the cache is worked on in a temp directory and copied back
//! atomically when the run finishes.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tempfile::{NamedTempFile, TempDir};
use unicode_normalization::UnicodeNormalization;

use crate::error::CacheError;
use crate::readers::{ContainerReader, MobiContainer};

/// ASIN column value for books without one.
pub const NO_ASIN: &str = "* NONE *";

const HEADER: [&str; 7] = ["asin", "lang", "author", "title", "pages", "is_real", "file_path"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub asin: String,
    pub lang: String,
    pub author: String,
    pub title: String,
    pub pages: u32,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_real: bool,
    pub file_path: String,
}

impl PageRecord {
    fn has_asin(&self) -> bool {
        !self.asin.is_empty() && self.asin != NO_ASIN
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let s = String::deserialize(d)?;
    Ok(matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn normalize_name(name: &str) -> String {
    name.nfc().collect()
}

/// Build a cache row for a MOBI file from its header, estimating the page
/// count from the uncompressed text length.
pub fn estimate_record(container: &MobiContainer, file_name: &str, chars_per_page: u32) -> PageRecord {
    let chars_per_page = chars_per_page.max(1);
    let pages = container.text_length().div_ceil(chars_per_page).max(1);
    PageRecord {
        asin: container.asin().unwrap_or_else(|| NO_ASIN.to_string()),
        lang: container.first_metadata("Language").unwrap_or_default(),
        author: container.get_metadata("Author").unwrap_or_default().join(", "),
        title: container.title(),
        pages,
        is_real: false,
        file_path: normalize_name(file_name),
    }
}

#[derive(Debug)]
pub struct PageCache {
    path: PathBuf,
    records: Vec<PageRecord>,
}

impl PageCache {
    /// Load the cache, creating it with only a header row if it does not exist.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if !path.is_file() {
            let mut writer = csv_writer(std::fs::File::create(path)?);
            writer.write_record(HEADER)?;
            writer.flush()?;
            return Ok(Self {
                path: path.to_path_buf(),
                records: Vec::new(),
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .from_path(path)?;
        let mut records = Vec::new();
        for (line, row) in reader.deserialize::<PageRecord>().enumerate() {
            match row {
                Ok(mut r) => {
                    r.file_path = normalize_name(&r.file_path);
                    records.push(r);
                }
                Err(e) => tracing::warn!("Skipping page cache row {}: {}", line + 2, e),
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[PageRecord] {
        &self.records
    }

    /// True if a row exists for this ASIN or this file name.
    pub fn contains(&self, asin: &str, file_name: &str) -> bool {
        let file_name = normalize_name(file_name);
        self.records.iter().any(|r| {
            (r.has_asin() && asin != NO_ASIN && r.asin == asin) || r.file_path == file_name
        })
    }

    /// Cached page count: by ASIN, or by file name for rows without an ASIN.
    pub fn lookup(&self, asin: Option<&str>, file_name: &str) -> Option<u32> {
        let file_name = normalize_name(file_name);
        self.records
            .iter()
            .find(|r| match asin {
                Some(a) if r.has_asin() => r.asin == a,
                _ => !r.has_asin() && r.file_path == file_name,
            })
            .map(|r| r.pages)
    }

    /// Append one row to the file and the in-memory list.
    pub fn append(&mut self, mut record: PageRecord) -> Result<(), CacheError> {
        record.file_path = normalize_name(&record.file_path);
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv_writer(file);
        writer.serialize(&record)?;
        writer.flush()?;
        self.records.push(record);
        Ok(())
    }

    /// Append unless the ASIN or file name is already cached. Returns whether a row was added.
    pub fn insert_if_missing(&mut self, record: PageRecord) -> Result<bool, CacheError> {
        if self.contains(&record.asin, &record.file_path) {
            return Ok(false);
        }
        tracing::info!("Updating page cache with {}", record.file_path);
        self.append(record)?;
        Ok(true)
    }
}

fn csv_writer<W: Write>(w: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b';')
        .quote_style(csv::QuoteStyle::Always)
        .has_headers(false)
        .from_writer(w)
}

/// A temp-dir working copy of the persistent cache for the duration of a run.
/// Dropping it without `commit` discards all changes.
pub struct CacheSession {
    cache: PageCache,
    persistent: PathBuf,
    _workdir: TempDir,
}

impl CacheSession {
    pub fn begin(persistent: &Path) -> Result<Self, CacheError> {
        let workdir = tempfile::Builder::new().prefix("kindle-thumbs-").tempdir()?;
        let working = workdir.path().join("ect.csv");
        if persistent.is_file() {
            std::fs::copy(persistent, &working)?;
        }
        Ok(Self {
            cache: PageCache::open(&working)?,
            persistent: persistent.to_path_buf(),
            _workdir: workdir,
        })
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PageCache {
        &mut self.cache
    }

    /// Atomically replace the persistent cache with the working copy.
    pub fn commit(self) -> Result<(), CacheError> {
        let parent = match self.persistent.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(&std::fs::read(self.cache.path())?)?;
        tmp.persist(&self.persistent)?;
        Ok(())
    }
}
