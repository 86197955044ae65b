//! CLI command implementations.

pub mod data;
pub mod database;
pub mod kvs;
pub mod maintenance;

use std::path::Path;
use tierkv_core::{Config, Kvdb, Runtime};

/// Result type of every command.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Opens the database at `path` for one command.
pub fn open(rt: &Runtime, path: &Path, read_only: bool) -> CommandResult<Kvdb> {
    let config = Config::new().read_only(read_only);
    Ok(Kvdb::open_with(rt, path, config)?)
}

/// Renders bytes as text, escaping anything that is not printable ASCII.
pub fn display_bytes(bytes: &[u8]) -> String {
    bytes.escape_ascii().to_string()
}

/// Checks an output format argument.
pub fn check_format(format: &str) -> CommandResult<bool> {
    match format {
        "text" => Ok(false),
        "json" => Ok(true),
        other => Err(format!("unknown format {other:?}, expected text or json").into()),
    }
}
