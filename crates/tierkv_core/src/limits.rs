//! Fixed limits and the validation helpers that enforce them.

use crate::error::{CoreError, CoreResult};

/// Maximum number of collections in one database.
pub const KVS_COUNT_MAX: usize = 256;

/// Maximum key length in bytes.
pub const KVS_KEY_LEN_MAX: usize = 1344;

/// Maximum value length in bytes.
pub const KVS_VALUE_LEN_MAX: usize = 1024 * 1024;

/// Maximum configured prefix length, and maximum prefix-delete filter length.
pub const KVS_PFX_LEN_MAX: usize = 32;

/// Maximum collection name length in bytes.
pub const KVS_NAME_LEN_MAX: usize = 32;

/// Checks a collection name: non-empty, bounded, `[A-Za-z0-9_-]` only.
pub(crate) fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_argument("collection name is empty"));
    }
    if name.len() > KVS_NAME_LEN_MAX {
        return Err(CoreError::invalid_argument(format!(
            "collection name is {} bytes, maximum is {KVS_NAME_LEN_MAX}",
            name.len()
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(CoreError::invalid_argument(format!(
            "collection name {name:?} contains {c:?}"
        )));
    }
    Ok(())
}

/// Checks a key against the global bounds and the collection's prefix length.
pub(crate) fn validate_key(key: &[u8], prefix_len: usize) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_argument("key is empty"));
    }
    if key.len() > KVS_KEY_LEN_MAX {
        return Err(CoreError::invalid_argument(format!(
            "key is {} bytes, maximum is {KVS_KEY_LEN_MAX}",
            key.len()
        )));
    }
    if key.len() < prefix_len {
        return Err(CoreError::invalid_argument(format!(
            "key is {} bytes, shorter than the collection prefix length {prefix_len}",
            key.len()
        )));
    }
    Ok(())
}

/// Checks a value length.
pub(crate) fn validate_value(value: &[u8]) -> CoreResult<()> {
    if value.len() > KVS_VALUE_LEN_MAX {
        return Err(CoreError::invalid_argument(format!(
            "value is {} bytes, maximum is {KVS_VALUE_LEN_MAX}",
            value.len()
        )));
    }
    Ok(())
}

/// Checks a prefix-delete filter.
pub(crate) fn validate_prefix_filter(prefix: &[u8], prefix_len: usize) -> CoreResult<()> {
    if prefix.is_empty() {
        return Err(CoreError::invalid_argument("prefix filter is empty"));
    }
    if prefix.len() > KVS_PFX_LEN_MAX {
        return Err(CoreError::invalid_argument(format!(
            "prefix filter is {} bytes, maximum is {KVS_PFX_LEN_MAX}",
            prefix.len()
        )));
    }
    if prefix_len != 0 && prefix.len() != prefix_len {
        return Err(CoreError::invalid_argument(format!(
            "prefix filter is {} bytes, collection prefix length is {prefix_len}",
            prefix.len()
        )));
    }
    Ok(())
}
