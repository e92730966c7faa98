//! Minimal MOBI/AZW/AZW3 reader: PalmDB section table, MOBI header fields and
//! EXTH metadata. Text records are never decompressed.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

use crate::detect::is_mobi;
use crate::error::ContainerError;
use crate::readers::ContainerReader;

const PDB_HEADER_LEN: usize = 78;
const SECTION_ENTRY_LEN: usize = 8;

const MOBI_MAGIC_AT: usize = 16;
const MOBI_HEADER_LEN_AT: usize = 20;
const MOBI_ENCODING_AT: usize = 28;
const MOBI_VERSION_AT: usize = 36;
const FULL_NAME_OFFSET_AT: usize = 84;
const FULL_NAME_LEN_AT: usize = 88;
const FIRST_RESOURCE_AT: usize = 108;
const EXTH_FLAGS_AT: usize = 128;
const EXTH_PRESENT: u32 = 0x40;

const UTF8_ENCODING: u32 = 65001;
const NO_VALUE: u32 = 0xFFFF_FFFF;

/// EXTH record types exposed as metadata.
pub mod exth {
    pub const AUTHOR: u32 = 100;
    pub const PUBLISHER: u32 = 101;
    pub const ISBN: u32 = 104;
    pub const ASIN: u32 = 113;
    pub const KF8_BOUNDARY: u32 = 121;
    pub const COVER_OFFSET: u32 = 201;
    pub const THUMB_OFFSET: u32 = 202;
    pub const DOCUMENT_TYPE: u32 = 501;
    pub const UPDATED_TITLE: u32 = 503;
    pub const ASIN_504: u32 = 504;
    pub const LANGUAGE: u32 = 524;
}

#[derive(Clone, Copy)]
enum ExthValue {
    Text,
    Number,
}

/// (EXTH type, metadata key, value encoding)
const EXTH_KEYS: &[(u32, &str, ExthValue)] = &[
    (exth::AUTHOR, "Author", ExthValue::Text),
    (exth::PUBLISHER, "Publisher", ExthValue::Text),
    (exth::ISBN, "ISBN", ExthValue::Text),
    (exth::ASIN, "ASIN", ExthValue::Text),
    (exth::KF8_BOUNDARY, "KF8_Boundary", ExthValue::Number),
    (exth::COVER_OFFSET, "CoverOffset", ExthValue::Number),
    (exth::THUMB_OFFSET, "ThumbOffset", ExthValue::Number),
    (exth::DOCUMENT_TYPE, "Document Type", ExthValue::Text),
    (exth::UPDATED_TITLE, "Updated_Title", ExthValue::Text),
    (exth::ASIN_504, "ASIN504", ExthValue::Text),
    (exth::LANGUAGE, "Language", ExthValue::Text),
];

/// Location of one EXTH record inside a header section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExthEntry {
    pub kind: u32,
    /// Payload range, relative to the start of the section.
    pub payload: Range<usize>,
}

/// A MOBI-family container held in memory.
#[derive(Debug)]
pub struct MobiContainer {
    data: Vec<u8>,
    sections: Vec<Range<usize>>,
    text_length: u32,
    version: u32,
    first_resource: usize,
    full_name: String,
    metadata: HashMap<&'static str, Vec<String>>,
}

impl MobiContainer {
    pub fn open(path: &Path) -> Result<Self, ContainerError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ContainerError> {
        if !is_mobi(&data) {
            return Err(ContainerError::NotMobi);
        }
        let sections = section_ranges(&data)?;
        let record0 = &data[sections[0].clone()];

        if record0.get(MOBI_MAGIC_AT..MOBI_MAGIC_AT + 4) != Some(b"MOBI".as_slice()) {
            return Err(ContainerError::Malformed("record 0 has no MOBI header".into()));
        }
        let text_length = be_u32(record0, 4).unwrap_or(0);
        let encoding = be_u32(record0, MOBI_ENCODING_AT).unwrap_or(1252);
        let version = be_u32(record0, MOBI_VERSION_AT).unwrap_or(0);
        let first_resource = be_u32(record0, FIRST_RESOURCE_AT)
            .filter(|&v| v != NO_VALUE)
            .map(|v| v as usize)
            .unwrap_or(sections.len());

        let full_name = match (be_u32(record0, FULL_NAME_OFFSET_AT), be_u32(record0, FULL_NAME_LEN_AT)) {
            (Some(off), Some(len)) => record0
                .get(off as usize..(off as usize).saturating_add(len as usize))
                .map(|b| decode_text(b, encoding))
                .unwrap_or_default(),
            _ => String::new(),
        };

        let mut metadata: HashMap<&'static str, Vec<String>> = HashMap::new();
        for entry in exth_entries(record0)? {
            let Some(&(_, key, value)) = EXTH_KEYS.iter().find(|(k, _, _)| *k == entry.kind) else {
                continue;
            };
            let payload = &record0[entry.payload.clone()];
            let rendered = match value {
                ExthValue::Text => decode_text(payload, encoding),
                ExthValue::Number => match be_u32(payload, 0) {
                    Some(n) => n.to_string(),
                    None => continue,
                },
            };
            metadata.entry(key).or_default().push(rendered);
        }

        Ok(Self {
            data,
            sections,
            text_length,
            version,
            first_resource,
            full_name,
            metadata,
        })
    }

    /// Uncompressed text length from the PalmDOC header.
    pub fn text_length(&self) -> u32 {
        self.text_length
    }

    /// Updated title if present, else the header's full name.
    pub fn title(&self) -> String {
        self.first_metadata("Updated_Title")
            .unwrap_or_else(|| self.full_name.clone())
    }

    pub fn asin(&self) -> Option<String> {
        self.first_metadata("ASIN")
    }

    pub fn document_type(&self) -> Option<String> {
        self.first_metadata("Document Type")
    }

    /// Section index of the KF8 header record in a combined MOBI/KF8 file.
    pub fn kf8_record0(&self) -> Option<usize> {
        self.first_metadata("KF8_Boundary")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&i| i > 0 && i < self.sections.len())
    }

    /// True for KF8-only files and combined files with a KF8 part.
    pub fn is_kf8(&self) -> bool {
        self.version >= 8 || self.kf8_record0().is_some()
    }
}

impl ContainerReader for MobiContainer {
    fn section_count(&self) -> usize {
        self.sections.len()
    }

    fn first_resource_index(&self) -> usize {
        self.first_resource
    }

    fn load_section(&self, index: usize) -> Result<&[u8], ContainerError> {
        let range = self.sections.get(index).ok_or(ContainerError::SectionOutOfRange {
            index,
            count: self.sections.len(),
        })?;
        Ok(&self.data[range.clone()])
    }

    fn get_metadata(&self, key: &str) -> Option<Vec<String>> {
        self.metadata.get(key).cloned()
    }
}

/// Byte ranges of every PalmDB section, in on-disk order.
pub fn section_ranges(data: &[u8]) -> Result<Vec<Range<usize>>, ContainerError> {
    let count = be_u16(data, 76)
        .ok_or_else(|| ContainerError::Malformed("truncated PalmDB header".into()))? as usize;
    if count == 0 {
        return Err(ContainerError::Malformed("container has no sections".into()));
    }
    if data.len() < PDB_HEADER_LEN + count * SECTION_ENTRY_LEN {
        return Err(ContainerError::Malformed("truncated section table".into()));
    }

    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let off = be_u32(data, PDB_HEADER_LEN + i * SECTION_ENTRY_LEN)
            .ok_or_else(|| ContainerError::Malformed("truncated section table".into()))? as usize;
        if off > data.len() || offsets.last().is_some_and(|&prev| off < prev) {
            return Err(ContainerError::Malformed(format!("bad offset {off} for section {i}")));
        }
        offsets.push(off);
    }

    Ok(offsets
        .iter()
        .enumerate()
        .map(|(i, &start)| start..offsets.get(i + 1).copied().unwrap_or(data.len()))
        .collect())
}

/// EXTH records of a header section (record 0, or the KF8 record 0).
pub fn exth_entries(record0: &[u8]) -> Result<Vec<ExthEntry>, ContainerError> {
    let flags = be_u32(record0, EXTH_FLAGS_AT).unwrap_or(0);
    if flags & EXTH_PRESENT == 0 {
        return Ok(Vec::new());
    }
    let header_len = be_u32(record0, MOBI_HEADER_LEN_AT)
        .ok_or_else(|| ContainerError::Malformed("truncated MOBI header".into()))? as usize;
    let start = MOBI_MAGIC_AT + header_len;
    if record0.get(start..start + 4) != Some(b"EXTH".as_slice()) {
        return Err(ContainerError::Malformed("EXTH flag set but no EXTH block".into()));
    }
    let count = be_u32(record0, start + 8)
        .ok_or_else(|| ContainerError::Malformed("truncated EXTH header".into()))?;

    let mut entries = Vec::new();
    let mut pos = start + 12;
    for _ in 0..count {
        let (Some(kind), Some(len)) = (be_u32(record0, pos), be_u32(record0, pos + 4)) else {
            return Err(ContainerError::Malformed("truncated EXTH record".into()));
        };
        let len = len as usize;
        if len < 8 || pos + len > record0.len() {
            return Err(ContainerError::Malformed(format!("bad EXTH record length {len}")));
        }
        entries.push(ExthEntry {
            kind,
            payload: pos + 8..pos + len,
        });
        pos += len;
    }
    Ok(entries)
}

fn decode_text(bytes: &[u8], encoding: u32) -> String {
    let codec = if encoding == UTF8_ENCODING {
        encoding_rs::UTF_8
    } else {
        encoding_rs::WINDOWS_1252
    };
    codec.decode_without_bom_handling(bytes).0.into_owned()
}

pub(crate) fn be_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(at..at.checked_add(4)?)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

pub(crate) fn be_u16(buf: &[u8], at: usize) -> Option<u16> {
    let bytes: [u8; 2] = buf.get(at..at.checked_add(2)?)?.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}
