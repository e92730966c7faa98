//! Container readers. Each format implements `ContainerReader` so the cover
//! locator can read sections and metadata without knowing the layout.

pub mod mobi;

#[cfg(test)]
pub(crate) mod fixture;

use crate::error::ContainerError;

pub use mobi::MobiContainer;

/// Read-only view of a container's resource sections and metadata.
pub trait ContainerReader {
    /// Total number of sections in the container.
    fn section_count(&self) -> usize;

    /// Index of the first resource (image) section.
    fn first_resource_index(&self) -> usize;

    /// Raw bytes of section `index`.
    fn load_section(&self, index: usize) -> Result<&[u8], ContainerError>;

    /// All values stored under a metadata key, or `None` if the key is absent.
    fn get_metadata(&self, key: &str) -> Option<Vec<String>>;

    /// First value stored under a metadata key.
    fn first_metadata(&self, key: &str) -> Option<String> {
        self.get_metadata(key).and_then(|v| v.into_iter().next())
    }
}
