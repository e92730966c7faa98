//! Locate the cover image among a container's resource sections and turn it
//! into a home-screen thumbnail.
//!
//! The cover offset stored in metadata is compared against the position of
//! each resource within the scanned range, *not* against a count of image
//! resources: every section, image or not, consumes one slot. Marker and
//! unrecognised sections are never returned as the cover, so an offset that
//! lands on one of them yields `CoverError::NotFound`.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

use crate::config::ThumbnailConfig;
use crate::detect::{classify_resource, ImageKind, ResourceKind};
use crate::error::CoverError;
use crate::readers::ContainerReader;
use crate::thumbnail::pad_bottom;

/// Document type whose thumbnails get extra bottom margin in fix mode.
pub const PERSONAL_DOCUMENT: &str = "PDOC";

/// Bounding box and padding applied to a decoded cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub bottom_padding: u32,
}

impl Default for CoverOptions {
    fn default() -> Self {
        Self::for_document(&ThumbnailConfig::default(), false, None)
    }
}

impl CoverOptions {
    /// Fix mode uses the smaller box; personal documents in fix mode are padded.
    pub fn for_document(cfg: &ThumbnailConfig, fix_thumb: bool, document_type: Option<&str>) -> Self {
        let (max_width, max_height) = if fix_thumb {
            (cfg.fixed_width, cfg.fixed_height)
        } else {
            (cfg.width, cfg.height)
        };
        let bottom_padding = if fix_thumb && document_type == Some(PERSONAL_DOCUMENT) {
            cfg.pdoc_padding
        } else {
            0
        };
        Self {
            max_width,
            max_height,
            bottom_padding,
        }
    }
}

/// The section picked as the cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverResource<'a> {
    pub index: usize,
    pub kind: ImageKind,
    pub data: &'a [u8],
}

/// The `CoverOffset` metadata value, if present and numeric.
pub fn cover_offset<R: ContainerReader + ?Sized>(reader: &R) -> Option<usize> {
    reader
        .first_metadata("CoverOffset")
        .and_then(|v| v.trim().parse::<usize>().ok())
}

/// Scan sections `first_index..last_index` in order and return the one whose
/// slot equals `cover_offset`, provided it is an image.
pub fn locate_cover<R: ContainerReader + ?Sized>(
    reader: &R,
    first_index: usize,
    last_index: usize,
    cover_offset: usize,
) -> Result<CoverResource<'_>, CoverError> {
    for (slot, index) in (first_index..last_index).enumerate() {
        let data = reader.load_section(index)?;
        let kind = classify_resource(data);
        tracing::trace!(index, slot, ?kind, "classified resource");

        if slot != cover_offset {
            continue;
        }

        return match kind {
            ResourceKind::ImageCandidate(kind) => Ok(CoverResource { index, kind, data }),
            ResourceKind::NonImageMarker | ResourceKind::Unknown => {
                tracing::debug!(index, ?kind, "cover offset points at a non-image section");
                Err(CoverError::NotFound)
            }
        };
    }

    Err(CoverError::NotFound)
}

/// Find, decode and post-process the cover of a container.
pub fn get_cover_image<R: ContainerReader + ?Sized>(
    reader: &R,
    opts: &CoverOptions,
) -> Result<GrayImage, CoverError> {
    let offset = cover_offset(reader).ok_or(CoverError::NotFound)?;
    let cover = locate_cover(
        reader,
        reader.first_resource_index(),
        reader.section_count(),
        offset,
    )?;
    tracing::debug!(index = cover.index, kind = %cover.kind, "cover located");
    process_image(cover.data, opts)
}

/// Decode raw image bytes, shrink to fit, convert to grayscale and pad.
pub fn process_image(data: &[u8], opts: &CoverOptions) -> Result<GrayImage, CoverError> {
    let cover = image::load_from_memory(data)?;
    let gray = shrink_to_fit(cover, opts.max_width, opts.max_height).to_luma8();
    if opts.bottom_padding == 0 {
        return Ok(gray);
    }
    Ok(pad_bottom(&gray, opts.bottom_padding))
}

/// Resize preserving aspect ratio. Images already inside the box are untouched.
fn shrink_to_fit(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if img.width() <= max_width && img.height() <= max_height {
        return img;
    }
    img.resize(max_width, max_height, FilterType::Lanczos3)
}
