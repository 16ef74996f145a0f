//! Scalar SQL functions registered on every connection at bootstrap.
//!
//! - `sym_encrypt(text, key, options) -> BLOB`
//! - `sym_decrypt(blob, key, options) -> TEXT`
//! - `json_contains(document, needle) -> BOOLEAN`, with `@>` semantics.

use super::cipher::{sym_decrypt, sym_encrypt, CipherError};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use serde_json::Value;

pub const SYM_ENCRYPT_FN: &str = "sym_encrypt";
pub const SYM_DECRYPT_FN: &str = "sym_decrypt";
pub const JSON_CONTAINS_FN: &str = "json_contains";

pub(crate) fn register_engine_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(SYM_ENCRYPT_FN, 3, FunctionFlags::SQLITE_UTF8, |ctx| {
        let plaintext: String = ctx.get(0)?;
        let key: String = ctx.get(1)?;
        let options: String = ctx.get(2)?;
        sym_encrypt(plaintext.as_bytes(), &key, &options).map_err(user_error)
    })?;

    conn.create_scalar_function(SYM_DECRYPT_FN, 3, FunctionFlags::SQLITE_UTF8, |ctx| {
        let ciphertext: Vec<u8> = ctx.get(0)?;
        let key: String = ctx.get(1)?;
        let options: String = ctx.get(2)?;
        let plaintext = sym_decrypt(&ciphertext, &key, &options).map_err(user_error)?;
        String::from_utf8(plaintext).map_err(|_| user_error(CipherError::Rejected))
    })?;

    conn.create_scalar_function(
        JSON_CONTAINS_FN,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(document) = ctx.get::<Option<String>>(0)? else {
                return Ok(false);
            };
            let needle: String = ctx.get(1)?;
            let document: Value = serde_json::from_str(&document)
                .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))?;
            let needle: Value = serde_json::from_str(&needle)
                .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))?;
            Ok(json_contains(&document, &needle))
        },
    )?;

    Ok(())
}

fn user_error(err: CipherError) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(err))
}

/// Top-level containment: every path/value of `needle` is present in
/// `document`. Arrays contain a value when any element contains it.
pub fn json_contains(document: &Value, needle: &Value) -> bool {
    match (document, needle) {
        (Value::Object(doc), Value::Object(wanted)) => wanted
            .iter()
            .all(|(key, value)| doc.get(key).is_some_and(|found| json_contains(found, value))),
        (Value::Array(doc), Value::Array(wanted)) => wanted
            .iter()
            .all(|value| doc.iter().any(|found| json_contains(found, value))),
        (Value::Array(doc), scalar) if !scalar.is_object() => doc.iter().any(|found| found == scalar),
        _ => document == needle,
    }
}
