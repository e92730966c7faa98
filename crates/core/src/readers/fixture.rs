//! Synthetic MOBI files for unit tests.

const MOBI_HEADER_LEN: usize = 232;

#[derive(Debug, Clone)]
pub(crate) struct MobiFixture {
    exth: Vec<(u32, Vec<u8>)>,
    resources: Vec<Vec<u8>>,
    text_length: u32,
    full_name: String,
    encoding: u32,
    dual_kf8: bool,
}

impl MobiFixture {
    pub(crate) fn new() -> Self {
        Self {
            exth: Vec::new(),
            resources: Vec::new(),
            text_length: 4600,
            full_name: "Fixture Book".to_string(),
            encoding: 65001,
            dual_kf8: false,
        }
    }

    pub(crate) fn resource(mut self, data: Vec<u8>) -> Self {
        self.resources.push(data);
        self
    }

    pub(crate) fn exth_text(mut self, kind: u32, value: &str) -> Self {
        self.exth.push((kind, value.as_bytes().to_vec()));
        self
    }

    pub(crate) fn exth_bytes(mut self, kind: u32, value: &[u8]) -> Self {
        self.exth.push((kind, value.to_vec()));
        self
    }

    /// MOBI text encoding: 65001 (UTF-8, the default) or 1252.
    pub(crate) fn text_encoding(mut self, encoding: u32) -> Self {
        self.encoding = encoding;
        self
    }

    pub(crate) fn exth_number(mut self, kind: u32, value: u32) -> Self {
        self.exth.push((kind, value.to_be_bytes().to_vec()));
        self
    }

    pub(crate) fn text_length(mut self, len: u32) -> Self {
        self.text_length = len;
        self
    }

    /// Append a BOUNDARY section and a KF8 header that repeats the EXTH records.
    pub(crate) fn dual_kf8(mut self) -> Self {
        self.dual_kf8 = true;
        self
    }

    /// Sections: record 0, one text record, the resources, then optionally
    /// BOUNDARY + KF8 record 0. The first resource index is always 2.
    pub(crate) fn build(&self) -> Vec<u8> {
        let mut exth = self.exth.clone();
        if self.dual_kf8 {
            let kf8_index = 2 + self.resources.len() as u32 + 1;
            exth.push((121, kf8_index.to_be_bytes().to_vec()));
        }

        let mut sections = vec![self.record0(&exth, 6), b"text".to_vec()];
        sections.extend(self.resources.iter().cloned());
        if self.dual_kf8 {
            sections.push(b"BOUNDARY".to_vec());
            sections.push(self.record0(&self.exth, 8));
        }
        palmdb(&sections)
    }

    fn record0(&self, exth: &[(u32, Vec<u8>)], version: u32) -> Vec<u8> {
        let mut exth_block = Vec::new();
        for (kind, data) in exth {
            exth_block.extend_from_slice(&kind.to_be_bytes());
            exth_block.extend_from_slice(&((data.len() + 8) as u32).to_be_bytes());
            exth_block.extend_from_slice(data);
        }
        while exth_block.len() % 4 != 0 {
            exth_block.push(0);
        }
        let exth_len = 12 + exth_block.len();

        let mut rec = vec![0u8; 16 + MOBI_HEADER_LEN];
        // PalmDOC header
        rec[0..2].copy_from_slice(&1u16.to_be_bytes());
        rec[4..8].copy_from_slice(&self.text_length.to_be_bytes());
        rec[8..10].copy_from_slice(&1u16.to_be_bytes());
        rec[10..12].copy_from_slice(&4096u16.to_be_bytes());
        // MOBI header
        rec[16..20].copy_from_slice(b"MOBI");
        rec[20..24].copy_from_slice(&(MOBI_HEADER_LEN as u32).to_be_bytes());
        rec[24..28].copy_from_slice(&2u32.to_be_bytes());
        rec[28..32].copy_from_slice(&self.encoding.to_be_bytes());
        rec[36..40].copy_from_slice(&version.to_be_bytes());
        let name_offset = rec.len() + exth_len;
        rec[84..88].copy_from_slice(&(name_offset as u32).to_be_bytes());
        rec[88..92].copy_from_slice(&(self.full_name.len() as u32).to_be_bytes());
        rec[108..112].copy_from_slice(&2u32.to_be_bytes());
        rec[128..132].copy_from_slice(&0x40u32.to_be_bytes());

        rec.extend_from_slice(b"EXTH");
        rec.extend_from_slice(&(exth_len as u32).to_be_bytes());
        rec.extend_from_slice(&(exth.len() as u32).to_be_bytes());
        rec.extend_from_slice(&exth_block);
        rec.extend_from_slice(self.full_name.as_bytes());
        rec.extend_from_slice(&[0, 0]);
        rec
    }
}

fn palmdb(sections: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; 78];
    out[..12].copy_from_slice(b"Fixture_Book");
    out[60..68].copy_from_slice(b"BOOKMOBI");
    out[76..78].copy_from_slice(&(sections.len() as u16).to_be_bytes());

    let mut offset = 78 + sections.len() * 8 + 2;
    for (i, section) in sections.iter().enumerate() {
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, (i * 2) as u8]);
        offset += section.len();
    }
    out.extend_from_slice(&[0, 0]);
    for section in sections {
        out.extend_from_slice(section);
    }
    out
}
