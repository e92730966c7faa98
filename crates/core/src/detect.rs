//! Resource classification via magic bytes, marker tags, and a JPEG trailer scan.

use image::ImageFormat;

/// Four-byte tags the container uses for auxiliary (non-image) records:
/// indices, fonts, resource-compression metadata and the like.
pub const MARKER_TAGS: &[&[u8; 4]] = &[
    b"FLIS", b"FCIS", b"FDST", b"DATP", b"SRCS", b"CMET", b"FONT", b"RESC",
];

/// End-of-records sentinel written as the last section of a MOBI file.
pub const EOF_SENTINEL: &[u8] = &[0xE9, 0x8E, 0x0D, 0x0A];

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Image formats we care to tell apart when picking a cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Other(&'static str),
}

impl ImageKind {
    fn from_format(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Jpeg => ImageKind::Jpeg,
            ImageFormat::Png => ImageKind::Png,
            ImageFormat::Gif => ImageKind::Gif,
            other => ImageKind::Other(other.extensions_str().first().copied().unwrap_or("bin")),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::Other(ext) => ext,
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension().to_uppercase())
    }
}

/// What a single resource record holds, judged from its bytes alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    NonImageMarker,
    ImageCandidate(ImageKind),
    Unknown,
}

impl ResourceKind {
    pub fn is_image(&self) -> bool {
        matches!(self, ResourceKind::ImageCandidate(_))
    }
}

/// Classify one resource record.
pub fn classify_resource(data: &[u8]) -> ResourceKind {
    if is_marker_record(data) {
        return ResourceKind::NonImageMarker;
    }

    match sniff_image(data) {
        Some(kind) => ResourceKind::ImageCandidate(kind),
        None => ResourceKind::Unknown,
    }
}

/// Marker tag prefix or the exact end-of-records sentinel.
pub fn is_marker_record(data: &[u8]) -> bool {
    if data.len() >= 4 && MARKER_TAGS.iter().any(|tag| data[..4] == tag[..]) {
        return true;
    }
    data == EOF_SENTINEL
}

/// Detect an image by magic number, falling back to a JPEG end-marker scan
/// for payloads whose header the generic sniff does not recognise.
pub fn sniff_image(data: &[u8]) -> Option<ImageKind> {
    if let Ok(format) = image::guess_format(data) {
        return Some(ImageKind::from_format(format));
    }

    if has_jpeg_trailer(data) {
        return Some(ImageKind::Jpeg);
    }

    None
}

/// `FF D8` start, then `FF D9` right before any trailing zero padding.
fn has_jpeg_trailer(data: &[u8]) -> bool {
    if !data.starts_with(&JPEG_SOI) {
        return false;
    }
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    data[..end].ends_with(&JPEG_EOI)
}

/// PalmDB type/creator at offset 60 must read `BOOKMOBI`.
pub fn is_mobi(header: &[u8]) -> bool {
    header.len() >= 68 && &header[60..68] == b"BOOKMOBI"
}
