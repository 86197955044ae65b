//! Key and value commands.

use super::{check_format, display_bytes, open, CommandResult};
use serde::Serialize;
use std::path::Path;
use tierkv_core::{CursorOptions, KvsConfig, Runtime, ValueCompression};

/// Options of the scan command.
#[derive(Debug, Default)]
pub struct ScanOptions {
    /// Key prefix filter.
    pub prefix: Option<String>,
    /// Descending order.
    pub reverse: bool,
    /// Maximum number of entries.
    pub limit: Option<usize>,
}

/// One scanned entry.
#[derive(Debug, Serialize)]
struct Entry {
    key: String,
    value: String,
}

/// Runs the put command.
pub fn put(
    rt: &Runtime,
    path: &Path,
    kvs: &str,
    key: &str,
    value: &str,
    compress: bool,
) -> CommandResult {
    let db = open(rt, path, false)?;
    let mut config = KvsConfig::new();
    if compress {
        config = config.compression(ValueCompression::Zstd);
    }
    let kvs = db.open_collection_with(kvs, config)?;
    kvs.put(key.as_bytes(), value.as_bytes())?;
    db.close()?;
    Ok(())
}

/// Runs the get command.
pub fn get(rt: &Runtime, path: &Path, kvs: &str, key: &str) -> CommandResult {
    let db = open(rt, path, true)?;
    let kvs = db.open_collection(kvs, &[])?;
    let value = kvs.get(key.as_bytes())?;
    db.close()?;
    match value {
        Some(value) => {
            println!("{}", display_bytes(&value));
            Ok(())
        }
        None => Err(format!("key {key:?} not found").into()),
    }
}

/// Runs the del command.
pub fn del(rt: &Runtime, path: &Path, kvs: &str, key: &str) -> CommandResult {
    let db = open(rt, path, false)?;
    let kvs = db.open_collection(kvs, &[])?;
    kvs.delete(key.as_bytes())?;
    db.close()?;
    Ok(())
}

/// Runs the scan command.
pub fn scan(
    rt: &Runtime,
    path: &Path,
    kvs: &str,
    options: &ScanOptions,
    format: &str,
) -> CommandResult {
    let json = check_format(format)?;
    let db = open(rt, path, true)?;
    let kvs = db.open_collection(kvs, &[])?;

    let mut cursor_options = CursorOptions::new().reverse(options.reverse);
    if let Some(prefix) = &options.prefix {
        cursor_options = cursor_options.prefix(prefix.as_bytes());
    }
    let mut cursor = kvs.cursor(cursor_options)?;

    let limit = options.limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();
    while entries.len() < limit {
        let Some((key, value)) = cursor.read()? else {
            break;
        };
        entries.push(Entry {
            key: display_bytes(&key),
            value: display_bytes(&value),
        });
    }
    cursor.destroy();
    db.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!("{}\t{}", entry.key, entry.value);
        }
        println!("({} entries)", entries.len());
    }
    Ok(())
}
