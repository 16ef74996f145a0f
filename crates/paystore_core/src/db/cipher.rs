//! Symmetric encryption primitive exposed to SQL as `sym_encrypt` and
//! `sym_decrypt`.
//!
//! Wire layout of a ciphertext:
//! `[format tag][flags][12-byte nonce][AES-256-GCM ciphertext + tag]`.
//! The passphrase is stretched into the 256-bit key with SHA-256.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::{Read, Write};

const FORMAT_TAG: u8 = 1;
const FLAG_COMPRESSED: u8 = 0b0000_0001;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 2 + NONCE_LEN;
const KEY_DOMAIN: &[u8] = b"paystore-sym-v1:";
// Upper bound on a plaintext, before compression and after inflation.
const MAX_PLAINTEXT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    EmptyKey,
    InvalidOptions,
    Truncated,
    UnsupportedFormat(u8),
    Rejected,
    Compression,
    TooLarge,
}

impl Display for CipherError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyKey => write!(f, "encryption key cannot be empty"),
            Self::InvalidOptions => write!(f, "unsupported encryption options"),
            Self::Truncated => write!(f, "ciphertext is truncated"),
            Self::UnsupportedFormat(tag) => write!(f, "unsupported ciphertext format {tag}"),
            Self::Rejected => write!(f, "wrong key or corrupt data"),
            Self::Compression => write!(f, "compressed payload is corrupt"),
            Self::TooLarge => write!(f, "plaintext exceeds {MAX_PLAINTEXT_BYTES} bytes"),
        }
    }
}

impl Error for CipherError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CipherOptions {
    compress: bool,
}

// Accepts `compress-algo=0|1` and `cipher-algo=aes256`, comma separated.
fn parse_options(options: &str) -> Result<CipherOptions, CipherError> {
    let mut compress = false;
    let mut cipher_named = false;
    for part in options.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let (name, value) = part.split_once('=').ok_or(CipherError::InvalidOptions)?;
        match (name.trim(), value.trim()) {
            ("compress-algo", "0") => compress = false,
            ("compress-algo", "1") => compress = true,
            ("cipher-algo", "aes256") => cipher_named = true,
            _ => return Err(CipherError::InvalidOptions),
        }
    }
    if !cipher_named {
        return Err(CipherError::InvalidOptions);
    }
    Ok(CipherOptions { compress })
}

fn cipher_for(passphrase: &str) -> Result<Aes256Gcm, CipherError> {
    if passphrase.is_empty() {
        return Err(CipherError::EmptyKey);
    }
    let digest = Sha256::new()
        .chain_update(KEY_DOMAIN)
        .chain_update(passphrase.as_bytes())
        .finalize();
    let key = Key::<Aes256Gcm>::from_slice(&digest);
    Ok(Aes256Gcm::new(key))
}

/// Encrypts `plaintext` under `passphrase`; every call draws a fresh nonce.
pub fn sym_encrypt(plaintext: &[u8], passphrase: &str, options: &str) -> Result<Vec<u8>, CipherError> {
    let options = parse_options(options)?;
    let cipher = cipher_for(passphrase)?;
    if plaintext.len() > MAX_PLAINTEXT_BYTES {
        return Err(CipherError::TooLarge);
    }

    let (flags, body) = if options.compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(plaintext)
            .map_err(|_| CipherError::Compression)?;
        let compressed = encoder.finish().map_err(|_| CipherError::Compression)?;
        (FLAG_COMPRESSED, compressed)
    } else {
        (0, plaintext.to_vec())
    };
    seal(&cipher, flags, &body)
}

fn seal(cipher: &Aes256Gcm, flags: u8, body: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), body)
        .map_err(|_| CipherError::Rejected)?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.push(FORMAT_TAG);
    out.push(flags);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Reverses [`sym_encrypt`]. Compression is read from the ciphertext header.
pub fn sym_decrypt(ciphertext: &[u8], passphrase: &str, options: &str) -> Result<Vec<u8>, CipherError> {
    parse_options(options)?;
    let cipher = cipher_for(passphrase)?;

    if ciphertext.len() < HEADER_LEN {
        return Err(CipherError::Truncated);
    }
    let (header, sealed) = ciphertext.split_at(HEADER_LEN);
    if header[0] != FORMAT_TAG {
        return Err(CipherError::UnsupportedFormat(header[0]));
    }
    let flags = header[1];
    let nonce = Nonce::from_slice(&header[2..]);

    let body = cipher
        .decrypt(nonce, sealed)
        .map_err(|_| CipherError::Rejected)?;
    if flags & FLAG_COMPRESSED == 0 {
        if body.len() > MAX_PLAINTEXT_BYTES {
            return Err(CipherError::TooLarge);
        }
        return Ok(body);
    }

    // One byte past the cap tells an oversized payload from an exact fit.
    let mut plaintext = Vec::new();
    ZlibDecoder::new(body.as_slice())
        .take(MAX_PLAINTEXT_BYTES as u64 + 1)
        .read_to_end(&mut plaintext)
        .map_err(|_| CipherError::Compression)?;
    if plaintext.len() > MAX_PLAINTEXT_BYTES {
        return Err(CipherError::TooLarge);
    }
    Ok(plaintext)
}
