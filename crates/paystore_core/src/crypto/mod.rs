//! Field-level symmetric encryption of JSON values.
//!
//! # Responsibility
//! - Encrypt a JSON value through the engine primitive and frame the
//!   ciphertext as base64 inside a JSON string, so it fits a JSON column.
//! - Decrypt such a value back to the exact original text.
//!
//! # Invariants
//! - The key is injected once; it never appears in errors or logs.
//! - Every call uses [`FieldCipher::OPTIONS`].
//! - Decrypting with the wrong key, or a non-string or tampered blob, fails;
//!   it never yields garbage.

mod rotation;

pub use rotation::{
    rotate_all, rotate_column, ColumnRotation, EncryptedColumn, ENCRYPTED_COLUMNS,
};

use crate::db::functions::{SYM_DECRYPT_FN, SYM_ENCRYPT_FN};
use crate::error::{StorageError, StorageResult, StorageResultExt};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ToSql, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt::{Debug, Formatter};

const ENCRYPT_CONTEXT: &str = "failed to encrypt value";
const DECRYPT_CONTEXT: &str = "failed to decrypt value";

/// Passphrase handed to the engine primitive.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct EncryptionKey(String);

impl EncryptionKey {
    pub fn new(passphrase: impl Into<String>) -> StorageResult<Self> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(StorageError::validation("encryption key cannot be empty"));
        }
        Ok(Self(passphrase))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for EncryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Engine-side symmetric primitive.
pub trait CipherEngine {
    fn encrypt(&self, plaintext: &[u8], key: &EncryptionKey, options: &str)
        -> StorageResult<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8], key: &EncryptionKey, options: &str)
        -> StorageResult<Vec<u8>>;
}

impl CipherEngine for Connection {
    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &EncryptionKey,
        options: &str,
    ) -> StorageResult<Vec<u8>> {
        let plaintext = std::str::from_utf8(plaintext)
            .map_err(|_| StorageError::unknown(ENCRYPT_CONTEXT, "plaintext is not UTF-8"))?;
        self.query_row(
            &format!("SELECT {SYM_ENCRYPT_FN}(?1, ?2, ?3)"),
            params![plaintext, key.expose(), options],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .context(ENCRYPT_CONTEXT)
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &EncryptionKey,
        options: &str,
    ) -> StorageResult<Vec<u8>> {
        self.query_row(
            &format!("SELECT {SYM_DECRYPT_FN}(?1, ?2, ?3)"),
            params![ciphertext, key.expose(), options],
            |row| row.get::<_, String>(0),
        )
        .map(String::into_bytes)
        .context(DECRYPT_CONTEXT)
    }
}

impl CipherEngine for Transaction<'_> {
    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &EncryptionKey,
        options: &str,
    ) -> StorageResult<Vec<u8>> {
        (**self).encrypt(plaintext, key, options)
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &EncryptionKey,
        options: &str,
    ) -> StorageResult<Vec<u8>> {
        (**self).decrypt(ciphertext, key, options)
    }
}

/// Stored form of an encrypted value: the text of a JSON string literal
/// holding base64 ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob(String);

impl EncryptedBlob {
    /// Accepts stored text only when it is a JSON string literal.
    pub fn parse(text: impl Into<String>) -> StorageResult<Self> {
        let text = text.into();
        if serde_json::from_str::<String>(&text).is_err() {
            return Err(StorageError::unknown(
                DECRYPT_CONTEXT,
                "stored value is not an encrypted JSON string",
            ));
        }
        Ok(Self(text))
    }

    /// JSON text as written to the column.
    pub fn as_json(&self) -> &str {
        &self.0
    }

    fn ciphertext(&self) -> StorageResult<Vec<u8>> {
        let encoded: String = serde_json::from_str(&self.0).map_err(|_| {
            StorageError::unknown(DECRYPT_CONTEXT, "stored value is not an encrypted JSON string")
        })?;
        BASE64
            .decode(encoded)
            .map_err(|err| StorageError::unknown(DECRYPT_CONTEXT, err))
    }
}

impl ToSql for EncryptedBlob {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(self.0.as_bytes())))
    }
}

impl FromSql for EncryptedBlob {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::parse(text).map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

/// Encrypts and decrypts JSON values under one injected key.
#[derive(Debug, Clone)]
pub struct FieldCipher {
    key: EncryptionKey,
}

impl FieldCipher {
    /// Compression plus AES-256, pinned for every call.
    pub const OPTIONS: &'static str = "compress-algo=1, cipher-algo=aes256";

    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    pub fn encrypt<E: CipherEngine + ?Sized>(
        &self,
        engine: &E,
        plaintext: &RawValue,
    ) -> StorageResult<EncryptedBlob> {
        let ciphertext = engine.encrypt(plaintext.get().as_bytes(), &self.key, Self::OPTIONS)?;
        let literal = serde_json::to_string(&BASE64.encode(ciphertext))
            .map_err(|err| StorageError::unknown(ENCRYPT_CONTEXT, err))?;
        Ok(EncryptedBlob(literal))
    }

    pub fn decrypt<E: CipherEngine + ?Sized>(
        &self,
        engine: &E,
        blob: &EncryptedBlob,
    ) -> StorageResult<Box<RawValue>> {
        let ciphertext = blob.ciphertext()?;
        let plaintext = engine.decrypt(&ciphertext, &self.key, Self::OPTIONS)?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| StorageError::unknown(DECRYPT_CONTEXT, "decrypted value is not UTF-8"))?;
        RawValue::from_string(text)
            .map_err(|_| StorageError::unknown(DECRYPT_CONTEXT, "decrypted value is not JSON"))
    }

    /// Serializes `value` and encrypts the resulting JSON.
    pub fn encrypt_value<E, T>(&self, engine: &E, value: &T) -> StorageResult<EncryptedBlob>
    where
        E: CipherEngine + ?Sized,
        T: Serialize + ?Sized,
    {
        let raw = serde_json::value::to_raw_value(value)
            .map_err(|err| StorageError::unknown(ENCRYPT_CONTEXT, err))?;
        self.encrypt(engine, &raw)
    }

    pub fn decrypt_value<E, T>(&self, engine: &E, blob: &EncryptedBlob) -> StorageResult<T>
    where
        E: CipherEngine + ?Sized,
        T: DeserializeOwned,
    {
        let raw = self.decrypt(engine, blob)?;
        serde_json::from_str(raw.get())
            .map_err(|_| StorageError::unknown(DECRYPT_CONTEXT, "decrypted value has another shape"))
    }
}
