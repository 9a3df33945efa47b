use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// A PPTX package held fully in memory, entry order preserved.
#[derive(Debug)]
pub struct PptxPackage {
    pub entries: Vec<PptxEntry>,
}

#[derive(Debug)]
pub struct PptxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl PptxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| Error::structural(format!("open archive: {e}")))?;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|e| Error::structural(format!("archive entry {i}: {e}")))?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| Error::structural(format!("read entry {}: {e}", file.name())))?;
            entries.push(PptxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    /// Re-serializes the archive, swapping in `replacements` by entry name.
    /// Untouched entries keep their payload, compression method, timestamp
    /// and permissions.
    pub fn write_with_replacements(
        &self,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        for ent in &self.entries {
            let data = replacements
                .get(&ent.name)
                .cloned()
                .unwrap_or_else(|| ent.data.clone());
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts)
                    .map_err(|e| Error::Write(format!("add dir {}: {e}", ent.name)))?;
            } else {
                zout.start_file(&ent.name, opts)
                    .map_err(|e| Error::Write(format!("start entry {}: {e}", ent.name)))?;
                zout.write_all(&data)
                    .map_err(|e| Error::Write(format!("write entry {}: {e}", ent.name)))?;
            }
        }
        let cursor = zout
            .finish()
            .map_err(|e| Error::Write(format!("finish archive: {e}")))?;
        Ok(cursor.into_inner())
    }

    pub fn entry(&self, name: &str) -> Option<&PptxEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}
