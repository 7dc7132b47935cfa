//! Sphinx-3 binary parameter files.
//!
//! Layout:
//! - a text header: an `s3` line, `name value` lines, then `endhdr`
//! - the byte-order magic `0x11223344`, written in the file's native order
//! - int32 dimensions and float32 payload
//! - when the header carries `chksum0 yes`, a trailing u32 checksum over every payload word
//!
//! [`S3Reader`] decodes these files; [`S3Writer`] produces them (used to build small models
//! for tests and tooling).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

const MAGIC: u32 = 0x1122_3344;
const END_HEADER: &str = "endhdr";

fn checksum_step(sum: u32, word: u32) -> u32 {
    sum.rotate_left(20).wrapping_add(word)
}

/// Sequential reader over one parameter file held in memory.
pub struct S3Reader {
    path: PathBuf,
    data: Vec<u8>,
    pos: usize,
    swap: bool,
    header: Vec<(String, String)>,
    checksum: Option<u32>,
}

impl S3Reader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| Error::model_load(path, e.to_string()))?;
        Self::from_bytes(path, data)
    }

    /// Parse the header and byte-order magic of an in-memory file. `path` is only used in errors.
    pub fn from_bytes(path: impl AsRef<Path>, data: Vec<u8>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = Self {
            path,
            data,
            pos: 0,
            swap: false,
            header: Vec::new(),
            checksum: None,
        };
        reader.read_header()?;
        reader.read_magic()?;
        if reader.header_value("chksum0") == Some("yes") {
            reader.checksum = Some(0);
        }
        Ok(reader)
    }

    /// Look up a header attribute.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_word()? as i32)
    }

    /// Read a non-negative int32 dimension.
    pub fn read_count(&mut self, what: &str) -> Result<usize> {
        let v = self.read_i32()?;
        usize::try_from(v).map_err(|_| self.error(format!("negative {what}: {v}")))
    }

    pub fn read_f32s(&mut self, n: usize) -> Result<Vec<f32>> {
        let remaining = self.data.len().saturating_sub(self.pos);
        if n.checked_mul(4).is_none_or(|bytes| bytes > remaining) {
            return Err(self.error(format!(
                "header promises {n} values but only {remaining} bytes remain"
            )));
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(f32::from_bits(self.read_word()?));
        }
        Ok(out)
    }

    /// Verify the checksum (if any) and that no bytes remain.
    pub fn finish(mut self) -> Result<()> {
        if let Some(sum) = self.checksum.take() {
            let stored = self.read_word()?;
            if stored != sum {
                return Err(self.error(format!(
                    "checksum mismatch: computed {sum:#010x}, stored {stored:#010x}"
                )));
            }
        }
        let remaining = self.data.len() - self.pos;
        if remaining != 0 {
            return Err(self.error(format!("{remaining} trailing bytes after data")));
        }
        Ok(())
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> Error {
        Error::model_load(&self.path, message)
    }

    fn read_header(&mut self) -> Result<()> {
        let first = self.read_line()?;
        if first.trim() != "s3" {
            return Err(self.error("not a Sphinx-3 parameter file (missing 's3' header)"));
        }
        loop {
            let line = self.read_line()?;
            let mut parts = line.split_whitespace();
            let Some(name) = parts.next() else {
                continue;
            };
            if name == END_HEADER {
                return Ok(());
            }
            let value = parts.collect::<Vec<_>>().join(" ");
            self.header.push((name.to_owned(), value));
        }
    }

    fn read_line(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let Some(end) = rest.iter().position(|&b| b == b'\n') else {
            return Err(self.error("unterminated header"));
        };
        let line = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(line)
    }

    fn read_magic(&mut self) -> Result<()> {
        let raw = self.read_raw()?;
        if u32::from_le_bytes(raw) == MAGIC {
            self.swap = false;
        } else if u32::from_be_bytes(raw) == MAGIC {
            self.swap = true;
        } else {
            return Err(self.error("bad byte-order magic"));
        }
        Ok(())
    }

    fn read_raw(&mut self) -> Result<[u8; 4]> {
        let Some(bytes) = self.data.get(self.pos..self.pos + 4) else {
            return Err(self.error("unexpected end of file"));
        };
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        self.pos += 4;
        Ok(raw)
    }

    fn read_word(&mut self) -> Result<u32> {
        let raw = self.read_raw()?;
        let word = if self.swap {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        };
        if let Some(sum) = self.checksum.as_mut() {
            *sum = checksum_step(*sum, word);
        }
        Ok(word)
    }
}

/// Little-endian parameter file writer. Always emits a checksum.
pub struct S3Writer {
    buf: Vec<u8>,
    sum: u32,
}

impl S3Writer {
    pub fn new(header: &[(&str, &str)]) -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"s3\n");
        for (k, v) in header {
            buf.extend_from_slice(format!("{k} {v}\n").as_bytes());
        }
        buf.extend_from_slice(b"chksum0 yes\n");
        buf.extend_from_slice(format!("{END_HEADER}\n").as_bytes());
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        Self { buf, sum: 0 }
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.word(v as u32)
    }

    pub fn f32s(&mut self, values: &[f32]) -> &mut Self {
        for v in values {
            self.word(v.to_bits());
        }
        self
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        let sum = self.sum;
        self.buf.extend_from_slice(&sum.to_le_bytes());
        self.buf
    }

    pub fn write_to(self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(&self.into_bytes())?;
        Ok(())
    }

    fn word(&mut self, w: u32) -> &mut Self {
        self.buf.extend_from_slice(&w.to_le_bytes());
        self.sum = checksum_step(self.sum, w);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_written_values() -> anyhow::Result<()> {
        let mut w = S3Writer::new(&[("version", "1.0")]);
        w.i32(2).i32(3).f32s(&[0.5, -1.25]);
        let mut r = S3Reader::from_bytes("mem", w.into_bytes())?;
        assert_eq!(r.header_value("version"), Some("1.0"));
        assert_eq!(r.read_count("a")?, 2);
        assert_eq!(r.read_i32()?, 3);
        assert_eq!(r.read_f32s(2)?, vec![0.5, -1.25]);
        r.finish()?;
        Ok(())
    }

    #[test]
    fn big_endian_files_are_swapped() -> anyhow::Result<()> {
        let mut data = b"s3\nendhdr\n".to_vec();
        data.extend_from_slice(&MAGIC.to_be_bytes());
        data.extend_from_slice(&7i32.to_be_bytes());
        data.extend_from_slice(&2.0f32.to_bits().to_be_bytes());
        let mut r = S3Reader::from_bytes("mem", data)?;
        assert_eq!(r.read_i32()?, 7);
        assert_eq!(r.read_f32s(1)?, vec![2.0]);
        r.finish()?;
        Ok(())
    }

    #[test]
    fn corrupt_checksum_is_rejected() -> anyhow::Result<()> {
        let mut w = S3Writer::new(&[]);
        w.i32(1).f32s(&[3.0]);
        let mut bytes = w.into_bytes();
        let n = bytes.len();
        bytes[n - 1] ^= 0xff;
        let mut r = S3Reader::from_bytes("mem", bytes)?;
        r.read_i32()?;
        r.read_f32s(1)?;
        assert!(matches!(r.finish(), Err(Error::ModelLoad { .. })));
        Ok(())
    }

    #[test]
    fn missing_header_and_trailing_bytes_fail() -> anyhow::Result<()> {
        assert!(S3Reader::from_bytes("mem", b"nope\n".to_vec()).is_err());

        let mut data = b"s3\nendhdr\n".to_vec();
        data.extend_from_slice(&MAGIC.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3]);
        let r = S3Reader::from_bytes("mem", data)?;
        assert!(r.finish().is_err());
        Ok(())
    }

    #[test]
    fn oversized_counts_fail_before_allocating() -> anyhow::Result<()> {
        let mut w = S3Writer::new(&[]);
        w.i32(i32::MAX).f32s(&[1.0]);
        let mut r = S3Reader::from_bytes("mem", w.into_bytes())?;
        let n = r.read_count("values")?;
        let err = r.read_f32s(n).unwrap_err();
        assert!(matches!(err, Error::ModelLoad { ref message, .. } if message.contains("remain")));
        assert!(r.read_f32s(usize::MAX).is_err());
        Ok(())
    }
}
