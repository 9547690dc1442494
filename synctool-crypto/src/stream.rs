//! Chunked ChaCha20-Poly1305 stream format.
//!
//! Layout: a 12-byte header (`MAGIC` followed by an 8-byte random nonce
//! prefix), then a sequence of sealed chunks. Every chunk except the last
//! carries exactly `CHUNK_SIZE` plaintext bytes; the last carries fewer
//! (possibly zero) and is sealed with a distinct AAD, so dropping trailing
//! chunks is detected as truncation.
//!
//! Chunk nonce = nonce prefix || big-endian chunk counter.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::key::FileSecret;

pub const MAGIC: [u8; 4] = *b"STC1";
pub const NONCE_PREFIX_SIZE: usize = 8;
pub const HEADER_SIZE: usize = MAGIC.len() + NONCE_PREFIX_SIZE;
pub const CHUNK_SIZE: usize = 64 * 1024;
pub const TAG_SIZE: usize = 16;
pub const SEALED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

const AAD_MORE: &[u8] = &[0];
const AAD_LAST: &[u8] = &[1];

fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Push-based encryptor: feed plaintext with [`update`](Self::update), then
/// call [`finish`](Self::finish) once.
pub struct StreamEncryptor {
    cipher: ChaCha20Poly1305,
    prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u32,
    buffer: Vec<u8>,
}

impl StreamEncryptor {
    pub fn new(secret: &FileSecret) -> Self {
        let mut prefix = [0u8; NONCE_PREFIX_SIZE];
        rand::rng().fill_bytes(&mut prefix);
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(secret.as_bytes())),
            prefix,
            counter: 0,
            buffer: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    /// The header that must precede the sealed chunks.
    pub fn header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[..MAGIC.len()].copy_from_slice(&MAGIC);
        header[MAGIC.len()..].copy_from_slice(&self.prefix);
        header
    }

    /// Buffers plaintext and returns every chunk that is now complete.
    pub fn update(&mut self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.buffer.extend_from_slice(plaintext);
        let mut out = Vec::new();
        while self.buffer.len() >= CHUNK_SIZE {
            let rest = self.buffer.split_off(CHUNK_SIZE);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            out.extend_from_slice(&self.seal(&chunk, false)?);
        }
        Ok(out)
    }

    /// Seals the remaining buffered bytes as the final chunk.
    pub fn finish(mut self) -> CryptoResult<Vec<u8>> {
        let remaining = std::mem::take(&mut self.buffer);
        self.seal(&remaining, true)
    }

    fn seal(&mut self, chunk: &[u8], last: bool) -> CryptoResult<Vec<u8>> {
        let nonce = chunk_nonce(&self.prefix, self.counter);
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| CryptoError::Encryption("stream chunk counter overflow".into()))?;
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: chunk,
                    aad: if last { AAD_LAST } else { AAD_MORE },
                },
            )
            .map_err(|e| CryptoError::Encryption(format!("chunk seal failed: {e}")))
    }
}

/// Push-based decryptor, the mirror of [`StreamEncryptor`].
///
/// Sealed chunks of exactly `SEALED_CHUNK_SIZE` bytes are never final, so
/// they can be opened as soon as they are buffered.
pub struct StreamDecryptor {
    cipher: ChaCha20Poly1305,
    prefix: Option<[u8; NONCE_PREFIX_SIZE]>,
    counter: u32,
    buffer: Vec<u8>,
}

impl StreamDecryptor {
    pub fn new(secret: &FileSecret) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(secret.as_bytes())),
            prefix: None,
            counter: 0,
            buffer: Vec::with_capacity(SEALED_CHUNK_SIZE),
        }
    }

    /// Buffers ciphertext and returns plaintext for every complete chunk.
    pub fn update(&mut self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.buffer.extend_from_slice(ciphertext);

        if self.prefix.is_none() {
            if self.buffer.len() < HEADER_SIZE {
                return Ok(Vec::new());
            }
            self.read_header()?;
        }

        let mut out = Vec::new();
        while self.buffer.len() > SEALED_CHUNK_SIZE {
            let rest = self.buffer.split_off(SEALED_CHUNK_SIZE);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            out.extend_from_slice(&self.open(&chunk, false)?);
        }
        Ok(out)
    }

    /// Opens the final chunk; fails if the stream ended early.
    pub fn finish(mut self) -> CryptoResult<Vec<u8>> {
        if self.prefix.is_none() {
            if self.buffer.len() < HEADER_SIZE {
                return Err(CryptoError::Truncated);
            }
            self.read_header()?;
        }
        let remaining = std::mem::take(&mut self.buffer);
        if remaining.len() == SEALED_CHUNK_SIZE {
            // A full chunk still buffered means the final chunk never arrived.
            self.open(&remaining, false)?;
            return Err(CryptoError::Truncated);
        }
        if remaining.len() < TAG_SIZE {
            return Err(CryptoError::Truncated);
        }
        self.open(&remaining, true)
    }

    fn read_header(&mut self) -> CryptoResult<()> {
        if self.buffer[..MAGIC.len()] != MAGIC {
            return Err(CryptoError::InvalidHeader(
                "missing synctool stream magic".into(),
            ));
        }
        let mut prefix = [0u8; NONCE_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buffer[MAGIC.len()..HEADER_SIZE]);
        self.prefix = Some(prefix);
        self.buffer.drain(..HEADER_SIZE);
        Ok(())
    }

    fn open(&mut self, chunk: &[u8], last: bool) -> CryptoResult<Vec<u8>> {
        let prefix = self
            .prefix
            .ok_or_else(|| CryptoError::InvalidHeader("header not read".into()))?;
        let nonce = chunk_nonce(&prefix, self.counter);
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| CryptoError::Decryption("stream chunk counter overflow".into()))?;
        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: chunk,
                    aad: if last { AAD_LAST } else { AAD_MORE },
                },
            )
            .map_err(|_| {
                CryptoError::Decryption("chunk authentication failed (wrong key or tampered data)".into())
            })
    }
}

/// Encrypts `src` into `dst`, returning the number of ciphertext bytes written.
///
/// `dst` must not exist yet.
pub fn encrypt_file(secret: &FileSecret, src: &Path, dst: &Path) -> CryptoResult<u64> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create_new(dst)?);
    let written = encrypt_stream(secret, &mut reader, &mut writer)?;
    writer.flush()?;
    Ok(written)
}

/// Decrypts `src` into `dst`, returning the number of plaintext bytes written.
pub fn decrypt_file(secret: &FileSecret, src: &Path, dst: &Path) -> CryptoResult<u64> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create(dst)?);
    let written = decrypt_stream(secret, &mut reader, &mut writer)?;
    writer.flush()?;
    Ok(written)
}

pub fn encrypt_stream<R: Read, W: Write>(
    secret: &FileSecret,
    reader: &mut R,
    writer: &mut W,
) -> CryptoResult<u64> {
    let mut encryptor = StreamEncryptor::new(secret);
    let header = encryptor.header();
    writer.write_all(&header)?;
    let mut written = header.len() as u64;

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let sealed = encryptor.update(&buf[..n])?;
        writer.write_all(&sealed)?;
        written += sealed.len() as u64;
    }
    let sealed = encryptor.finish()?;
    writer.write_all(&sealed)?;
    written += sealed.len() as u64;
    Ok(written)
}

pub fn decrypt_stream<R: Read, W: Write>(
    secret: &FileSecret,
    reader: &mut R,
    writer: &mut W,
) -> CryptoResult<u64> {
    let mut decryptor = StreamDecryptor::new(secret);
    let mut written = 0u64;

    let mut buf = vec![0u8; SEALED_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let plain = decryptor.update(&buf[..n])?;
        writer.write_all(&plain)?;
        written += plain.len() as u64;
    }
    let plain = decryptor.finish()?;
    writer.write_all(&plain)?;
    written += plain.len() as u64;
    Ok(written)
}

/// Ciphertext length for a plaintext of `len` bytes.
pub fn sealed_len(len: u64) -> u64 {
    let chunk = CHUNK_SIZE as u64;
    let chunks = len / chunk + 1;
    HEADER_SIZE as u64 + len + chunks * TAG_SIZE as u64
}
