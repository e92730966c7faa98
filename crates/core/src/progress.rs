//! Progress callbacks for batch runs.

use std::path::Path;

/// Which pass of a batch run an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Covers,
    PageMaps,
    GeneratedThumbnails,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Covers => "covers",
            Stage::PageMaps => "page maps",
            Stage::GeneratedThumbnails => "generated thumbnails",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 1-based position within the stage.
    pub current: u64,
    pub total: Option<u64>,
    pub file: Option<String>,
}

/// Receives one event per candidate file. The CLI renders these with a
/// spinner; library callers can ignore them.
pub trait ProgressHandler: Send {
    fn on_progress(&self, event: ProgressEvent);
}

pub struct NoopProgress;

impl ProgressHandler for NoopProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

pub fn emit_progress(
    handler: Option<&dyn ProgressHandler>,
    stage: Stage,
    current: u64,
    total: Option<u64>,
    file: Option<&Path>,
) {
    if let Some(h) = handler {
        h.on_progress(ProgressEvent {
            stage,
            current,
            total,
            file: file
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
        });
    }
}
