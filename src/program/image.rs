//! Program image file format.
//!
//! An image (`<name>.mex`) is a JSON array of records produced by the
//! assembler, one per source statement:
//!
//! ```json
//! [
//!   { "address": "100", "label": "Start", "mnemonic": "LOAD", "operand_token": "X", "word": "1104" },
//!   { "address": "",    "label": "",      "mnemonic": "",     "operand_token": "",  "word": "" }
//! ]
//! ```
//!
//! Records with a blank address (comments, directives) are not executable and
//! are skipped by the loader. Next to the image may live a symbol table
//! (`<name>.map`); a core dump is written to `<name>.dmp`.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const IMAGE_EXTENSION: &str = "mex";
pub const SYMBOL_TABLE_EXTENSION: &str = "map";
pub const DUMP_EXTENSION: &str = "dmp";

/// One assembled statement as stored in an image file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRecord {
    /// 1-3 hex digits, or blank for a non-executable record.
    pub address: String,
    pub label: String,
    pub mnemonic: String,
    pub operand_token: String,
    /// Exactly 4 hex digits.
    pub word: String,
}

impl ImageRecord {
    /// Build an executable record from already-encoded values.
    pub fn new(address: u16, word: i16) -> Self {
        Self {
            address: format!("{:03X}", address & 0x0FFF),
            word: format!("{:04X}", word as u16),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, label: &str, mnemonic: &str, operand_token: &str) -> Self {
        self.label = label.to_string();
        self.mnemonic = mnemonic.to_string();
        self.operand_token = operand_token.to_string();
        self
    }

    /// Whether the loader places this record in memory.
    pub fn is_executable(&self) -> bool {
        !self.address.trim().is_empty()
    }

    /// Decode the address and word fields. `index` is the record's position
    /// in the image, used for diagnostics.
    pub fn parse(&self, index: usize) -> Result<(u16, i16), ImageError> {
        let address = self.address.trim();
        if address.is_empty() || address.len() > 3 || !is_hex(address) {
            return Err(ImageError::MalformedAddress {
                record: index,
                text: self.address.clone(),
            });
        }
        let word = self.word.trim();
        if word.len() != 4 || !is_hex(word) {
            return Err(ImageError::MalformedWord {
                record: index,
                text: self.word.clone(),
            });
        }

        // Both fields are validated hex digits of bounded length.
        let address = u16::from_str_radix(address, 16).map_err(|_| ImageError::MalformedAddress {
            record: index,
            text: self.address.clone(),
        })?;
        let word = u16::from_str_radix(word, 16).map_err(|_| ImageError::MalformedWord {
            record: index,
            text: self.word.clone(),
        })?;
        Ok((address, word as i16))
    }
}

fn is_hex(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii_hexdigit())
}

/// An ordered sequence of image records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramImage {
    pub records: Vec<ImageRecord>,
}

impl ProgramImage {
    pub fn new(records: Vec<ImageRecord>) -> Self {
        Self { records }
    }

    /// Build an image that places `words` at consecutive addresses from
    /// `origin`.
    pub fn from_words(origin: u16, words: &[i16]) -> Self {
        let records = words
            .iter()
            .enumerate()
            .map(|(i, &word)| ImageRecord::new(origin.wrapping_add(i as u16), word))
            .collect();
        Self { records }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ImageError> {
        serde_json::from_str(text).map_err(|e| ImageError::Corrupt(e.to_string()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ImageError> {
        serde_json::from_reader(reader).map_err(|e| ImageError::Corrupt(e.to_string()))
    }

    /// Read an image file from disk.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ImageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Write the image to disk as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ImageError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| ImageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).map_err(|e| ImageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Records the loader places in memory, with their image positions.
    pub fn executable(&self) -> impl Iterator<Item = (usize, &ImageRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.is_executable())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A program named by its base path; `.mex`, `.map` and `.dmp` files hang off
/// the same stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    stem: PathBuf,
}

impl ProgramSource {
    /// Accepts either the base name or a path with any extension.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            stem: path.as_ref().with_extension(""),
        }
    }

    pub fn name(&self) -> String {
        self.stem
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn image_path(&self) -> PathBuf {
        self.stem.with_extension(IMAGE_EXTENSION)
    }

    pub fn symbol_table_path(&self) -> PathBuf {
        self.stem.with_extension(SYMBOL_TABLE_EXTENSION)
    }

    pub fn dump_path(&self) -> PathBuf {
        self.stem.with_extension(DUMP_EXTENSION)
    }

    /// Whether a companion symbol table exists on disk. Its contents are not
    /// read.
    pub fn has_symbol_table(&self) -> bool {
        self.symbol_table_path().is_file()
    }

    pub fn read(&self) -> Result<ProgramImage, ImageError> {
        ProgramImage::read(self.image_path())
    }
}

/// Errors reading or decoding a program image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid machine code format: {0}")]
    Corrupt(String),

    #[error("record {record}: address {text:?} is not 1-3 hex digits")]
    MalformedAddress { record: usize, text: String },

    #[error("record {record}: word {text:?} is not 4 hex digits")]
    MalformedWord { record: usize, text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let rec = ImageRecord::new(0x100, 0x1104);
        assert_eq!(rec.address, "100");
        assert_eq!(rec.word, "1104");
        assert_eq!(rec.parse(0), Ok((0x100, 0x1104)));

        let rec = ImageRecord {
            address: "a".into(),
            word: "ffff".into(),
            ..ImageRecord::default()
        };
        assert_eq!(rec.parse(0), Ok((0x00A, -1)));
    }

    #[test]
    fn test_malformed_records() {
        let rec = ImageRecord {
            address: "1000".into(),
            word: "0000".into(),
            ..ImageRecord::default()
        };
        assert!(matches!(rec.parse(2), Err(ImageError::MalformedAddress { record: 2, .. })));

        let rec = ImageRecord {
            address: "10G".into(),
            word: "0000".into(),
            ..ImageRecord::default()
        };
        assert!(matches!(rec.parse(0), Err(ImageError::MalformedAddress { .. })));

        let rec = ImageRecord {
            address: "010".into(),
            word: "123".into(),
            ..ImageRecord::default()
        };
        assert!(matches!(rec.parse(5), Err(ImageError::MalformedWord { record: 5, .. })));
    }

    #[test]
    fn test_blank_address_not_executable() {
        let rec = ImageRecord {
            address: "   ".into(),
            mnemonic: "ORG".into(),
            ..ImageRecord::default()
        };
        assert!(!rec.is_executable());
    }

    #[test]
    fn test_json_missing_fields_default() {
        let image = ProgramImage::from_json_str(
            r#"[{"address": "100", "word": "7000"}, {"label": "comment"}]"#,
        )
        .unwrap();
        assert_eq!(image.len(), 2);
        assert_eq!(image.executable().count(), 1);
        assert_eq!(image.records[0].mnemonic, "");
    }

    #[test]
    fn test_corrupt_json() {
        assert!(matches!(
            ProgramImage::from_json_str("{not json"),
            Err(ImageError::Corrupt(_))
        ));
    }

    #[test]
    fn test_save_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = ProgramSource::new(dir.path().join("add"));
        let image = ProgramImage::from_words(0x100, &[0x1104, 0x7000]);
        image.save(source.image_path()).unwrap();

        assert_eq!(source.read().unwrap(), image);
        assert!(!source.has_symbol_table());
        std::fs::write(source.symbol_table_path(), "X 104").unwrap();
        assert!(source.has_symbol_table());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = ProgramSource::new(dir.path().join("nothing.mex"));
        assert!(matches!(source.read(), Err(ImageError::Io { .. })));
    }

    #[test]
    fn test_source_paths() {
        let source = ProgramSource::new("progs/loop.mex");
        assert_eq!(source.name(), "loop");
        assert_eq!(source.image_path(), PathBuf::from("progs/loop.mex"));
        assert_eq!(source.symbol_table_path(), PathBuf::from("progs/loop.map"));
        assert_eq!(source.dump_path(), PathBuf::from("progs/loop.dmp"));
    }
}
