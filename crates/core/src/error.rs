/// Top-level error type. All public API functions return this.
#[derive(Debug, thiserror::Error)]
pub enum ThumbError {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Cover error: {0}")]
    Cover(#[from] CoverError),

    #[error("Thumbnail error: {0}")]
    Thumbnail(#[from] ThumbnailError),

    #[error("Page map error: {0}")]
    PageMap(#[from] PageMapError),

    #[error("Page cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Not a MOBI container (missing BOOKMOBI signature)")]
    NotMobi,

    #[error("Malformed container: {0}")]
    Malformed(String),

    #[error("Section {index} out of range (container has {count} sections)")]
    SectionOutOfRange { index: usize, count: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-file cover failures. Neither is fatal to a batch run.
#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("Cover image not found")]
    NotFound,

    #[error("Unrecognized image format: {0}")]
    Decode(#[from] image::ImageError),

    #[error(transparent)]
    Container(#[from] ContainerError),
}

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Thumbnail {height}px tall is too short to remove {padding}px of padding")]
    TooShort { height: u32, padding: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PageMapError {
    #[error("Book has no text to paginate")]
    EmptyText,

    #[error("Page map has {0} pages, exceeding the APNX limit of 65535")]
    TooManyPages(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to persist page cache: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error(transparent)]
    Container(#[from] ContainerError),
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Kindle device not found at {0} (missing system/thumbnails)")]
    NotAKindle(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
