//! Rewrite the document type of a personal document (`PDOC`) to `EBOK` so the
//! device files it under Books. Both the MOBI header and, in combined files,
//! the KF8 header are patched in place.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::detect::is_mobi;
use crate::error::{ContainerError, PatchError};
use crate::readers::mobi::{be_u32, exth, exth_entries, section_ranges};

const FROM: &[u8; 4] = b"PDOC";
const TO: &[u8; 4] = b"EBOK";

/// Patch every `PDOC` document-type record. Returns whether anything changed.
pub fn patch_pdoc_to_ebok(data: &mut [u8]) -> Result<bool, PatchError> {
    if !is_mobi(data) {
        return Err(ContainerError::NotMobi.into());
    }
    let sections = section_ranges(data)?;
    let record0 = sections[0].clone();

    let mut headers = vec![record0.clone()];
    let kf8 = exth_entries(&data[record0.clone()])?
        .into_iter()
        .find(|e| e.kind == exth::KF8_BOUNDARY)
        .and_then(|e| be_u32(&data[record0.clone()], e.payload.start))
        .and_then(|i| sections.get(i as usize).cloned());
    headers.extend(kf8);

    let mut changed = false;
    for header in headers {
        let entries = exth_entries(&data[header.clone()])?;
        for entry in entries.iter().filter(|e| e.kind == exth::DOCUMENT_TYPE) {
            let at = header.start + entry.payload.start..header.start + entry.payload.end;
            if &data[at.clone()] == FROM.as_slice() {
                data[at].copy_from_slice(TO);
                changed = true;
            }
        }
    }
    Ok(changed)
}

/// Patch a file on disk, replacing it atomically when something changed.
pub fn patch_file(path: &Path) -> Result<bool, PatchError> {
    let mut data = std::fs::read(path).map_err(ContainerError::Io)?;
    if !patch_pdoc_to_ebok(&mut data)? {
        return Ok(false);
    }
    write_atomic(path, &data).map_err(ContainerError::Io)?;
    Ok(true)
}

pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::fixture::MobiFixture;
    use crate::readers::{ContainerReader, MobiContainer};

    #[test]
    fn test_patches_both_headers() {
        let mut data = MobiFixture::new()
            .exth_text(exth::ASIN, "B00PDOC")
            .exth_text(exth::DOCUMENT_TYPE, "PDOC")
            .dual_kf8()
            .build();
        assert!(patch_pdoc_to_ebok(&mut data).unwrap());

        let mobi = MobiContainer::from_bytes(data).unwrap();
        assert_eq!(mobi.document_type().as_deref(), Some("EBOK"));
        let kf8 = mobi.load_section(mobi.kf8_record0().unwrap()).unwrap();
        assert!(kf8.windows(4).any(|w| w == b"EBOK"));
        assert!(!kf8.windows(4).any(|w| w == b"PDOC"));
    }

    #[test]
    fn test_leaves_other_types_alone() {
        let original = MobiFixture::new()
            .exth_text(exth::DOCUMENT_TYPE, "EBSP")
            .build();
        let mut data = original.clone();
        assert!(!patch_pdoc_to_ebok(&mut data).unwrap());
        assert_eq!(data, original);
    }

    #[test]
    fn test_rejects_non_mobi() {
        let mut data = vec![0u8; 128];
        assert!(matches!(
            patch_pdoc_to_ebok(&mut data),
            Err(PatchError::Container(ContainerError::NotMobi))
        ));
    }

    #[test]
    fn test_patch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.azw3");
        std::fs::write(
            &path,
            MobiFixture::new().exth_text(exth::DOCUMENT_TYPE, "PDOC").build(),
        )
        .unwrap();

        assert!(patch_file(&path).unwrap());
        assert!(!patch_file(&path).unwrap());
        let mobi = MobiContainer::open(&path).unwrap();
        assert_eq!(mobi.document_type().as_deref(), Some("EBOK"));
    }
}
