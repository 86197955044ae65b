//! Collection management commands.

use super::{open, CommandResult};
use std::path::Path;
use tierkv_core::Runtime;

/// Runs the kvs-create command.
pub fn create(rt: &Runtime, path: &Path, name: &str, params: &[String]) -> CommandResult {
    let db = open(rt, path, false)?;
    let params: Vec<&str> = params.iter().map(String::as_str).collect();
    db.create_collection(name, &params)?;
    db.close()?;
    tracing::info!(path = %path.display(), collection = name, ?params, "created collection");
    println!("Created collection {name}");
    Ok(())
}

/// Runs the kvs-drop command.
pub fn remove(rt: &Runtime, path: &Path, name: &str) -> CommandResult {
    let db = open(rt, path, false)?;
    db.drop_collection(name)?;
    db.close()?;
    tracing::info!(path = %path.display(), collection = name, "dropped collection");
    println!("Dropped collection {name}");
    Ok(())
}

/// Runs the kvs-list command.
pub fn list(rt: &Runtime, path: &Path) -> CommandResult {
    let db = open(rt, path, true)?;
    for name in db.collection_names()? {
        let kvs = db.open_collection(&name, &[])?;
        println!(
            "{name}\tprefix_len={}\tmclass={}",
            kvs.prefix_len(),
            kvs.media_class()
        );
    }
    db.close()?;
    Ok(())
}
