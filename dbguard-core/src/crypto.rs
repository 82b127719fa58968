//! AES-256-CTR encryption layer applied on top of the archive stream.
//!
//! Every encrypted stream starts with a 16-byte header: an 8-byte
//! ASCII magic value followed by an 8-byte random salt. The key and
//! IV are derived from a passphrase and that salt via PBKDF2-HMAC-SHA512.
//! The CTR counter is keyed to the *plaintext* offset: plaintext block
//! 0 always corresponds to counter 0, even though it lands at
//! ciphertext offset [`HEADER_SIZE`].

use std::io::{self, Write};

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use pbkdf2::pbkdf2_hmac;
use positioned_io::ReadAt;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha512;

use crate::error::{CoreError, Result};

/// Identifies a stream as dbguard-encrypted.
pub const MAGIC: &[u8; 8] = b"DBCCrypt";
pub const SALT_LEN: usize = 8;
pub const HEADER_SIZE: usize = MAGIC.len() + SALT_LEN;
pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
const DERIVED_LEN: usize = KEY_LEN + IV_LEN;
pub const PBKDF2_ITERATIONS: u32 = 300_000;
/// Block size of the underlying AES-CTR cipher.
pub const BLOCK_SIZE: u64 = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

struct DerivedKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

fn derive(passphrase: &Secret<String>, salt: &[u8; SALT_LEN]) -> DerivedKey {
    let mut out = [0u8; DERIVED_LEN];
    pbkdf2_hmac::<Sha512>(
        passphrase.expose_secret().as_bytes(),
        salt,
        PBKDF2_ITERATIONS,
        &mut out,
    );

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&out[..KEY_LEN]);
    iv.copy_from_slice(&out[KEY_LEN..]);
    DerivedKey { key, iv }
}

fn new_cipher(derived: &DerivedKey) -> Aes256Ctr {
    Aes256Ctr::new(derived.key.as_slice().into(), derived.iv.as_slice().into())
}

/// Writes a `DBCCrypt` header followed by the AES-256-CTR encryption
/// of whatever is written to it. Buffers any final partial cipher
/// block until the next write or `finish`.
pub struct CryptoWriter<W> {
    sink: W,
    cipher: Aes256Ctr,
}

impl<W: Write> CryptoWriter<W> {
    /// Generates a fresh random salt, writes the header, and returns a
    /// writer ready to encrypt the plaintext stream.
    pub fn create(mut sink: W, passphrase: &Secret<String>) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        sink.write_all(MAGIC)?;
        sink.write_all(&salt)?;

        let cipher = new_cipher(&derive(passphrase, &salt));
        Ok(Self { sink, cipher })
    }

    pub fn finish(self) -> W {
        self.sink
    }
}

impl<W: Write> Write for CryptoWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut scratch = buf.to_vec();
        self.cipher.apply_keystream(&mut scratch);
        self.sink.write_all(&scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Random-access reader over a `DBCCrypt`-encrypted stream. Every read
/// re-seeks the keystream to the block containing the requested
/// plaintext offset, decrypts the covering block range, and copies out
/// the requested sub-slice. This mirrors the Go `readerAt.go`
/// behaviour of performing block-aligned ciphertext reads.
pub struct CryptoReaderAt<R> {
    source: R,
    derived: DerivedKey,
    plaintext_len: u64,
}

impl<R: ReadAt> CryptoReaderAt<R> {
    /// Opens a reader over `source`, whose total length (including the
    /// 16-byte header) is `source_len`. Validates the magic and reads
    /// the salt to re-derive the key.
    pub fn open(source: R, source_len: u64, passphrase: &Secret<String>) -> Result<Self> {
        if source_len < HEADER_SIZE as u64 {
            return Err(CoreError::CryptoHeaderInvalid {
                reason: format!("stream is only {source_len} bytes, shorter than the header"),
            });
        }

        let mut header = [0u8; HEADER_SIZE];
        source.read_exact_at(0, &mut header)?;

        if &header[..MAGIC.len()] != MAGIC {
            return Err(CoreError::CryptoHeaderInvalid {
                reason: "magic bytes did not match".to_string(),
            });
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&header[MAGIC.len()..]);

        Ok(Self {
            source,
            derived: derive(passphrase, &salt),
            plaintext_len: source_len - HEADER_SIZE as u64,
        })
    }

    pub fn len(&self) -> u64 {
        self.plaintext_len
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext_len == 0
    }
}

impl<R: ReadAt> ReadAt for CryptoReaderAt<R> {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        if pos >= self.plaintext_len {
            return Ok(0);
        }

        let want = buf.len().min((self.plaintext_len - pos) as usize);
        let block_start = pos - (pos % BLOCK_SIZE);
        let block_offset = (pos - block_start) as usize;
        let covering_len = block_offset + want;
        let aligned_len = covering_len.div_ceil(BLOCK_SIZE as usize) * BLOCK_SIZE as usize;

        let mut ciphertext = vec![0u8; aligned_len];
        let actually_read = self
            .source
            .read_at(HEADER_SIZE as u64 + block_start, &mut ciphertext)?;
        ciphertext.truncate(actually_read);

        if ciphertext.len() <= block_offset {
            return Ok(0);
        }

        let mut cipher = new_cipher(&self.derived);
        cipher
            .try_seek(block_start)
            .map_err(|e| io::Error::other(e.to_string()))?;
        cipher.apply_keystream(&mut ciphertext);

        let available = ciphertext.len() - block_offset;
        let copy_len = want.min(available);
        buf[..copy_len].copy_from_slice(&ciphertext[block_offset..block_offset + copy_len]);
        Ok(copy_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pass() -> Secret<String> {
        Secret::new("correct horse battery staple".to_string())
    }

    #[test]
    fn round_trip_full_read() {
        let plaintext = b"the quick brown fox jumps over the lazy dog, thirty-five bytes more";
        let mut writer = CryptoWriter::create(Cursor::new(Vec::new()), &pass()).unwrap();
        writer.write_all(plaintext).unwrap();
        let ciphertext = writer.finish().into_inner();

        assert_eq!(&ciphertext[..MAGIC.len()], MAGIC);

        let reader = CryptoReaderAt::open(ciphertext.as_slice(), ciphertext.len() as u64, &pass())
            .unwrap();
        assert_eq!(reader.len(), plaintext.len() as u64);

        let mut out = vec![0u8; plaintext.len()];
        reader.read_exact_at(0, &mut out).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn unaligned_partial_read() {
        let plaintext: Vec<u8> = (0u8..200).collect();
        let mut writer = CryptoWriter::create(Cursor::new(Vec::new()), &pass()).unwrap();
        writer.write_all(&plaintext).unwrap();
        let ciphertext = writer.finish().into_inner();

        let reader = CryptoReaderAt::open(ciphertext.as_slice(), ciphertext.len() as u64, &pass())
            .unwrap();

        let mut out = vec![0u8; 37];
        reader.read_exact_at(53, &mut out).unwrap();
        assert_eq!(out, plaintext[53..90]);
    }

    #[test]
    fn wrong_passphrase_yields_garbage_not_error() {
        let plaintext = b"secret contents";
        let mut writer = CryptoWriter::create(Cursor::new(Vec::new()), &pass()).unwrap();
        writer.write_all(plaintext).unwrap();
        let ciphertext = writer.finish().into_inner();

        let wrong = Secret::new("wrong password".to_string());
        let reader =
            CryptoReaderAt::open(ciphertext.as_slice(), ciphertext.len() as u64, &wrong).unwrap();
        let mut out = vec![0u8; plaintext.len()];
        reader.read_exact_at(0, &mut out).unwrap();
        assert_ne!(out, plaintext);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = vec![0u8; HEADER_SIZE + 4];
        assert!(matches!(
            CryptoReaderAt::open(buf.as_slice(), buf.len() as u64, &pass()),
            Err(CoreError::CryptoHeaderInvalid { .. })
        ));
    }
}
