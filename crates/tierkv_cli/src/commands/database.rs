//! Database lifecycle commands.

use super::CommandResult;
use std::path::Path;
use tierkv_core::{Kvdb, Runtime};

/// Runs the create command.
pub fn create(rt: &Runtime, path: &Path, params: &[String]) -> CommandResult {
    let params: Vec<&str> = params.iter().map(String::as_str).collect();
    Kvdb::create(rt, path, &params)?;
    tracing::info!(path = %path.display(), ?params, "created database");
    println!("Created database at {}", path.display());
    Ok(())
}

/// Runs the drop command.
pub fn destroy(rt: &Runtime, path: &Path) -> CommandResult {
    Kvdb::destroy(rt, path)?;
    tracing::info!(path = %path.display(), "destroyed database");
    println!("Destroyed database at {}", path.display());
    Ok(())
}
