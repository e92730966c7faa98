//! APNX page maps: the sidecar file the Kindle reads to show "page X of Y"
//! for books that carry no real page numbers.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::PageMapError;
use crate::readers::MobiContainer;

const APNX_VERSION: u32 = 65537;
const PAGE_HEADER_VERSION: u16 = 1;
const PAGE_ENTRY_BITS: u16 = 32;

#[derive(Serialize)]
struct ContentHeader<'a> {
    #[serde(rename = "contentGuid")]
    content_guid: &'a str,
    asin: &'a str,
    #[serde(rename = "cdeType")]
    cde_type: &'a str,
    format: &'a str,
    #[serde(rename = "fileRevisionId")]
    file_revision_id: &'a str,
    acr: &'a str,
}

#[derive(Serialize)]
struct PageHeader<'a> {
    asin: &'a str,
    #[serde(rename = "pageMap")]
    page_map: &'a str,
}

/// Identity fields written into the APNX headers.
#[derive(Debug, Clone)]
pub struct ApnxMeta {
    pub guid: String,
    pub asin: String,
    pub cde_type: String,
    pub format: &'static str,
}

impl ApnxMeta {
    pub fn from_container(container: &MobiContainer) -> Self {
        let guid = uuid::Uuid::new_v4().simple().to_string();
        Self {
            guid: guid[..8].to_string(),
            asin: container.asin().unwrap_or_default(),
            cde_type: container.document_type().unwrap_or_else(|| "EBOK".to_string()),
            format: if container.is_kf8() { "MOBI_8" } else { "MOBI_7" },
        }
    }
}

/// Text offsets where each page starts.
///
/// With a known page count the pages are spread evenly over the text;
/// otherwise a page starts every `chars_per_page` characters.
pub fn page_positions(text_length: u32, page_count: Option<u32>, chars_per_page: u32) -> Vec<u32> {
    match page_count.filter(|&n| n > 0) {
        Some(n) => (0..u64::from(n))
            .map(|k| (k * u64::from(text_length) / u64::from(n)) as u32)
            .collect(),
        None => (0..text_length).step_by(chars_per_page.max(1) as usize).collect(),
    }
}

/// Serialise an APNX file. All integers are big-endian.
pub fn encode(meta: &ApnxMeta, positions: &[u32]) -> Result<Vec<u8>, PageMapError> {
    if positions.is_empty() {
        return Err(PageMapError::EmptyText);
    }
    let page_count =
        u16::try_from(positions.len()).map_err(|_| PageMapError::TooManyPages(positions.len()))?;

    let content = serde_json::to_string(&ContentHeader {
        content_guid: &meta.guid,
        asin: &meta.asin,
        cde_type: &meta.cde_type,
        format: meta.format,
        file_revision_id: "1",
        acr: "",
    })
    .map_err(|e| PageMapError::Io(e.into()))?;
    let page = serde_json::to_string(&PageHeader {
        asin: &meta.asin,
        page_map: "(1,a,1)",
    })
    .map_err(|e| PageMapError::Io(e.into()))?;

    let mut out = Vec::with_capacity(32 + content.len() + page.len() + positions.len() * 4);
    out.extend_from_slice(&APNX_VERSION.to_be_bytes());
    out.extend_from_slice(&(12 + content.len() as u32).to_be_bytes());
    out.extend_from_slice(&(content.len() as u32).to_be_bytes());
    out.extend_from_slice(content.as_bytes());
    out.extend_from_slice(&PAGE_HEADER_VERSION.to_be_bytes());
    out.extend_from_slice(&(page.len() as u16).to_be_bytes());
    out.extend_from_slice(&page_count.to_be_bytes());
    out.extend_from_slice(&PAGE_ENTRY_BITS.to_be_bytes());
    out.extend_from_slice(page.as_bytes());
    for pos in positions {
        out.extend_from_slice(&pos.to_be_bytes());
    }
    Ok(out)
}

/// Build the APNX bytes for a MOBI container.
pub fn build(
    container: &MobiContainer,
    page_count: Option<u32>,
    chars_per_page: u32,
) -> Result<Vec<u8>, PageMapError> {
    let positions = page_positions(container.text_length(), page_count, chars_per_page);
    encode(&ApnxMeta::from_container(container), &positions)
}

/// `<dir>/<stem>.sdr/<stem>.apnx` for a book at `<dir>/<stem>.<ext>`.
pub fn apnx_path(book: &Path) -> PathBuf {
    let stem = book.file_stem().unwrap_or_default().to_string_lossy();
    let parent = book.parent().unwrap_or(Path::new(""));
    parent
        .join(format!("{stem}.sdr"))
        .join(format!("{stem}.apnx"))
}

/// Build and write the page map next to the book, creating the `.sdr` directory.
pub fn write_apnx(
    book: &Path,
    container: &MobiContainer,
    page_count: Option<u32>,
    chars_per_page: u32,
) -> Result<PathBuf, PageMapError> {
    let data = build(container, page_count, chars_per_page)?;
    let path = apnx_path(book);
    if let Some(sdr) = path.parent() {
        std::fs::create_dir_all(sdr)?;
    }
    std::fs::write(&path, data)?;
    Ok(path)
}
