//! Single-stream archive container with a trailing JSON index.
//!
//! An archive is a concatenation of opaque file payloads followed by a
//! fixed-size footer occupying exactly the last [`FOOTER_PAD_SIZE`]
//! bytes of the stream. The footer is a JSON object mapping file name
//! to `{o: start-offset, s: size}`, right-padded with NUL bytes.

use std::{
    collections::BTreeMap,
    io::{self, Write},
};

use positioned_io::{ReadAt, Slice};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Size of the trailing footer, in bytes. This is the largest index a
/// single archive can carry; `ArchiveWriter::close` fails if the
/// encoded index doesn't fit.
pub const FOOTER_PAD_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FileInfo {
    #[serde(rename = "o")]
    start_offset: u64,
    #[serde(rename = "s")]
    size: u64,
}

type Footer = BTreeMap<String, FileInfo>;

fn decode_footer(raw: &[u8]) -> Result<Footer> {
    let trimmed = trim_trailing_nul(raw);
    serde_json::from_slice(trimmed).map_err(|e| CoreError::FooterCorrupt {
        reason: e.to_string(),
    })
}

fn trim_trailing_nul(raw: &[u8]) -> &[u8] {
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
    &raw[..end]
}

fn encode_footer(footer: &Footer, out: &mut impl Write) -> Result<()> {
    let encoded = serde_json::to_vec(footer).map_err(|e| CoreError::FooterCorrupt {
        reason: e.to_string(),
    })?;

    if encoded.len() > FOOTER_PAD_SIZE {
        return Err(CoreError::FooterTooLarge {
            size: encoded.len(),
            max: FOOTER_PAD_SIZE,
        });
    }

    let mut padded = vec![0u8; FOOTER_PAD_SIZE];
    padded[..encoded.len()].copy_from_slice(&encoded);
    out.write_all(&padded)?;
    Ok(())
}

/// Reads archive entries out of a `ReadAt`-capable source once the
/// trailing footer has been decoded.
pub struct ArchiveReader<R> {
    footer: Footer,
    source: R,
}

impl<R: ReadAt> ArchiveReader<R> {
    /// Opens an archive reader over `source`, whose total size is
    /// `source_size`. Reads and decodes the trailing footer eagerly.
    pub fn open(source: R, source_size: u64) -> Result<Self> {
        if source_size < FOOTER_PAD_SIZE as u64 {
            return Err(CoreError::FooterCorrupt {
                reason: format!("source is only {source_size} bytes, smaller than the footer"),
            });
        }

        let mut raw = vec![0u8; FOOTER_PAD_SIZE];
        source.read_exact_at(source_size - FOOTER_PAD_SIZE as u64, &mut raw)?;
        let footer = decode_footer(&raw)?;

        Ok(Self { footer, source })
    }

    /// Returns a bounded, seekable section reader over the named
    /// entry, or `EntryNotFound`.
    pub fn entry(&self, name: &str) -> Result<Slice<&R>> {
        let info = self
            .footer
            .get(name)
            .ok_or_else(|| CoreError::EntryNotFound {
                name: name.to_string(),
            })?;

        Ok(Slice::new(
            &self.source,
            info.start_offset,
            Some(info.size),
        ))
    }

    /// Size, in bytes, of the named entry.
    pub fn entry_size(&self, name: &str) -> Result<u64> {
        self.footer
            .get(name)
            .map(|info| info.size)
            .ok_or_else(|| CoreError::EntryNotFound {
                name: name.to_string(),
            })
    }

    /// Names of every entry present in the archive, in no particular
    /// order.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.footer.keys().map(String::as_str)
    }
}

/// Sequential archive writer: `create` a named entry, `write` bytes
/// into it, `close` it implicitly by creating the next one or
/// explicitly by calling [`ArchiveWriter::close`].
pub struct ArchiveWriter<W> {
    footer: Footer,
    sink: W,
    open_file: Option<String>,
    written: u64,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            footer: Footer::new(),
            sink,
            open_file: None,
            written: 0,
        }
    }

    /// Opens a new entry for writing. Closes whichever entry was
    /// previously open, finalizing its recorded size.
    pub fn create(&mut self, name: &str) -> Result<()> {
        self.close_open_entry();

        if self.footer.contains_key(name) {
            return Err(CoreError::EntryExists {
                name: name.to_string(),
            });
        }

        self.footer.insert(
            name.to_string(),
            FileInfo {
                start_offset: self.written,
                size: 0,
            },
        );
        self.open_file = Some(name.to_string());
        Ok(())
    }

    /// Appends to the currently open entry.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.open_file.is_none() {
            return Err(CoreError::NoFileOpen);
        }

        self.sink.write_all(data)?;
        self.written += data.len() as u64;
        Ok(data.len())
    }

    /// Finalizes the last entry (if any) and writes the trailing
    /// footer.
    pub fn close(mut self) -> Result<W> {
        self.close_open_entry();
        encode_footer(&self.footer, &mut self.sink)?;
        Ok(self.sink)
    }

    fn close_open_entry(&mut self) {
        if let Some(name) = self.open_file.take() {
            if let Some(info) = self.footer.get_mut(&name) {
                info.size = self.written - info.start_offset;
            }
        }
    }
}

impl<W: Write> Write for ArchiveWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ArchiveWriter::write(self, buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.create(name).unwrap();
            writer.write(data).unwrap();
        }
        writer.close().unwrap().into_inner()
    }

    #[test]
    fn round_trip_exact_bytes() {
        let entries: &[(&str, &[u8])] = &[("a.sst", b"hello"), ("b.sst", b"world!!")];
        let buf = roundtrip(entries);

        assert_eq!(buf.len(), 5 + 7 + FOOTER_PAD_SIZE);

        let reader = ArchiveReader::open(buf.as_slice(), buf.len() as u64).unwrap();
        let mut out = vec![0u8; 5];
        reader.entry("a.sst").unwrap().read_exact_at(0, &mut out).unwrap();
        assert_eq!(out, b"hello");

        let mut out = vec![0u8; 7];
        reader.entry("b.sst").unwrap().read_exact_at(0, &mut out).unwrap();
        assert_eq!(out, b"world!!");
    }

    #[test]
    fn duplicate_create_fails() {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
        writer.create("a").unwrap();
        writer.write(b"x").unwrap();
        assert!(matches!(writer.create("a"), Err(CoreError::EntryExists { .. })));
    }

    #[test]
    fn write_without_create_fails() {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
        assert!(matches!(writer.write(b"x"), Err(CoreError::NoFileOpen)));
    }

    #[test]
    fn missing_entry_is_not_found() {
        let buf = roundtrip(&[("a", b"1")]);
        let reader = ArchiveReader::open(buf.as_slice(), buf.len() as u64).unwrap();
        assert!(matches!(
            reader.entry("nope"),
            Err(CoreError::EntryNotFound { .. })
        ));
    }

    #[test]
    fn creating_new_entry_closes_prior_one_with_correct_size() {
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
        writer.create("a").unwrap();
        writer.write(b"1234").unwrap();
        writer.create("b").unwrap();
        writer.write(b"567").unwrap();
        let buf = writer.close().unwrap().into_inner();

        let reader = ArchiveReader::open(buf.as_slice(), buf.len() as u64).unwrap();
        assert_eq!(reader.entry_size("a").unwrap(), 4);
        assert_eq!(reader.entry_size("b").unwrap(), 3);
    }
}
