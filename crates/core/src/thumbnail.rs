//! Thumbnail files under `system/thumbnails`: naming, overwrite policy, JPEG
//! output, and the padding fix for thumbnails the device generated itself.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::imageops;
use image::{ExtendedColorType, GrayImage, ImageEncoder, Luma};
use serde::Serialize;

use crate::config::ThumbnailConfig;
use crate::error::ThumbnailError;

const DEFAULT_DPI: (u16, u16) = (96, 96);
const FIXED_DPI: (u16, u16) = (72, 72);
const WHITE: Luma<u8> = Luma([255]);

/// `<kindle>/system/thumbnails`
pub fn thumbnails_dir(kindle_root: &Path) -> PathBuf {
    kindle_root.join("system").join("thumbnails")
}

/// `thumbnail_<ASIN>_<DOCTYPE>_portrait.jpg` inside the thumbnails directory.
pub fn thumbnail_path(kindle_root: &Path, asin: &str, document_type: &str) -> PathBuf {
    thumbnails_dir(kindle_root).join(format!("thumbnail_{asin}_{document_type}_portrait.jpg"))
}

/// Which existing thumbnails may be replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwritePolicy {
    pub personal_documents: bool,
    pub amazon_books: bool,
}

impl OverwritePolicy {
    pub fn should_write(&self, exists: bool, document_type: &str) -> bool {
        if !exists {
            return true;
        }
        match document_type {
            "PDOC" => self.personal_documents,
            "EBOK" | "EBSP" => self.amazon_books,
            _ => false,
        }
    }
}

/// New white canvas `padding` rows taller, with `img` at the top.
pub fn pad_bottom(img: &GrayImage, padding: u32) -> GrayImage {
    let mut canvas = GrayImage::from_pixel(img.width(), img.height() + padding, WHITE);
    imageops::replace(&mut canvas, img, 0, 0);
    canvas
}

/// Remove `padding` rows from the bottom.
pub fn crop_bottom(img: &GrayImage, padding: u32) -> Result<GrayImage, ThumbnailError> {
    if img.height() <= padding {
        return Err(ThumbnailError::TooShort {
            height: img.height(),
            padding,
        });
    }
    Ok(imageops::crop_imm(img, 0, 0, img.width(), img.height() - padding).to_image())
}

/// Encode a grayscale image as JPEG, optionally stamping a DPI density.
pub fn encode_jpeg(img: &GrayImage, quality: u8, dpi: Option<u16>) -> Result<Vec<u8>, ThumbnailError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    if let Some(dpi) = dpi {
        encoder.set_pixel_density(PixelDensity::dpi(dpi));
    }
    encoder.write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::L8)?;
    Ok(buf)
}

pub fn save_thumbnail(path: &Path, img: &GrayImage, quality: u8) -> Result<(), ThumbnailError> {
    let data = encode_jpeg(img, quality, None)?;
    std::fs::write(path, data)?;
    Ok(())
}

/// DPI from a JFIF APP0 segment directly after SOI. `None` when the file has
/// no JFIF header or stores only an aspect ratio.
pub fn jfif_dpi(data: &[u8]) -> Option<(u16, u16)> {
    if data.len() < 18 || data[0..4] != [0xFF, 0xD8, 0xFF, 0xE0] || &data[6..11] != b"JFIF\0" {
        return None;
    }
    let x = u16::from_be_bytes([data[14], data[15]]);
    let y = u16::from_be_bytes([data[16], data[17]]);
    match data[13] {
        1 => Some((x, y)),
        2 => Some((dpcm_to_dpi(x), dpcm_to_dpi(y))),
        _ => None,
    }
}

fn dpcm_to_dpi(v: u16) -> u16 {
    (f64::from(v) * 2.54).round() as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixOutcome {
    Padded,
    Unpadded,
    Untouched,
}

/// Device-generated thumbnails are stamped 96 dpi. In fix mode they get
/// extra bottom margin and are re-stamped 72 dpi; turning fix mode off
/// reverses that.
pub fn fix_generated_thumbnail(
    path: &Path,
    fix_thumb: bool,
    cfg: &ThumbnailConfig,
) -> Result<FixOutcome, ThumbnailError> {
    let data = std::fs::read(path)?;
    let dpi = jfif_dpi(&data).unwrap_or(DEFAULT_DPI);

    let (out, stamp, outcome) = match (dpi, fix_thumb) {
        (DEFAULT_DPI, true) => {
            let img = image::load_from_memory(&data)?.to_luma8();
            (pad_bottom(&img, cfg.generated_padding), FIXED_DPI.0, FixOutcome::Padded)
        }
        (FIXED_DPI, false) => {
            let img = image::load_from_memory(&data)?.to_luma8();
            (crop_bottom(&img, cfg.generated_padding)?, DEFAULT_DPI.0, FixOutcome::Unpadded)
        }
        _ => {
            tracing::debug!(?dpi, "{} is OK, skipping", path.display());
            return Ok(FixOutcome::Untouched);
        }
    };

    std::fs::write(path, encode_jpeg(&out, cfg.jpeg_quality, Some(stamp))?)?;
    Ok(outcome)
}

/// Generated thumbnails are `thumbnail*.jpg` files other than our `*portrait.jpg`.
pub fn is_generated_thumbnail(name: &str) -> bool {
    name.starts_with("thumbnail") && name.ends_with(".jpg") && !name.ends_with("portrait.jpg")
}

/// Run `fix_generated_thumbnail` over a thumbnails directory. Per-file
/// failures are logged and skipped. Returns how many files changed.
pub fn fix_generated_thumbnails(
    dir: &Path,
    fix_thumb: bool,
    cfg: &ThumbnailConfig,
) -> Result<usize, ThumbnailError> {
    let mut changed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_generated_thumbnail(name) {
            continue;
        }
        match fix_generated_thumbnail(&entry.path(), fix_thumb, cfg) {
            Ok(FixOutcome::Untouched) => {}
            Ok(outcome) => {
                tracing::info!(?outcome, "Fixed generated thumbnail {}", name);
                changed += 1;
            }
            Err(e) => tracing::warn!("Skipping generated thumbnail {}: {}", name, e),
        }
    }
    Ok(changed)
}

/// Delete leftover `*.partial` downloads. Returns how many were removed.
pub fn remove_partial_files(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let is_partial = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.to_lowercase().ends_with(".partial"));
        if is_partial && entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
