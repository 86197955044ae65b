//! Configuration.
//!
//! Every configurable object has a builder-style struct with defaults and a
//! `from_params` constructor that parses `key=value` strings, the form the
//! CLI and the runtime config file use. Unknown keys and malformed values are
//! rejected with `InvalidArgument`.

use crate::error::{CoreError, CoreResult};
use crate::limits::KVS_PFX_LEN_MAX;
use crate::mclass::MediaPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Default space-amplification low watermark, in percent.
pub const DEFAULT_SAMP_LWM_PCT: u32 = 117;

/// Default space-amplification high watermark, in percent.
pub const DEFAULT_SAMP_HWM_PCT: u32 = 135;

/// Default compaction poll interval.
pub const DEFAULT_COMPACTION_INTERVAL_MS: u64 = 1000;

/// Values shorter than this are stored uncompressed by default.
pub const DEFAULT_COMPRESSION_MIN_LENGTH: usize = 12;

/// Splits `key=value` strings.
pub(crate) fn parse_params<'a>(params: &[&'a str]) -> CoreResult<Vec<(&'a str, &'a str)>> {
    params
        .iter()
        .map(|param| {
            param
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| {
                    CoreError::invalid_argument(format!("parameter {param:?} is not key=value"))
                })
        })
        .collect()
}

pub(crate) fn parse_bool(key: &str, value: &str) -> CoreResult<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(bad_value(key, value)),
    }
}

pub(crate) fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value.parse().map_err(|_| bad_value(key, value))
}

fn bad_value(key: &str, value: &str) -> CoreError {
    CoreError::invalid_argument(format!("invalid value {value:?} for {key}"))
}

pub(crate) fn unknown_key(key: &str) -> CoreError {
    CoreError::invalid_argument(format!("unknown parameter {key:?}"))
}

/// Parameters fixed when a database is created.
#[derive(Debug, Clone, Default)]
pub struct CreateConfig {
    /// Capacity tier directory; `<home>/capacity` when unset.
    pub capacity_path: Option<PathBuf>,
    /// Staging tier directory; unconfigured when unset.
    pub staging_path: Option<PathBuf>,
    /// Pmem tier directory; unconfigured when unset.
    pub pmem_path: Option<PathBuf>,
}

impl CreateConfig {
    /// Creates a configuration with only the default capacity tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `storage.{capacity,staging,pmem}.path` parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for malformed or unknown parameters.
    pub fn from_params(params: &[&str]) -> CoreResult<Self> {
        let mut config = Self::default();
        for (key, value) in parse_params(params)? {
            let path = Some(PathBuf::from(value));
            match key {
                "storage.capacity.path" => config.capacity_path = path,
                "storage.staging.path" => config.staging_path = path,
                "storage.pmem.path" => config.pmem_path = path,
                _ => return Err(unknown_key(key)),
            }
        }
        Ok(config)
    }

    /// Sets the capacity tier directory.
    #[must_use]
    pub fn capacity_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.capacity_path = Some(path.into());
        self
    }

    /// Configures the staging tier.
    #[must_use]
    pub fn staging_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_path = Some(path.into());
        self
    }

    /// Configures the pmem tier.
    #[must_use]
    pub fn pmem_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pmem_path = Some(path.into());
        self
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Reject every mutation with `InvalidState`.
    pub read_only: bool,

    /// Fsync the WAL on every commit.
    pub durability: bool,

    /// Compaction stops once space amplification falls to this percentage.
    pub samp_lwm_pct: u32,

    /// Background compaction starts above this percentage.
    pub samp_hwm_pct: u32,

    /// Background poll interval; `None` uses the runtime default and
    /// `Duration::ZERO` disables the timer.
    pub compaction_interval: Option<Duration>,

    /// Sequences a tombstone outlives the compaction horizon before it may
    /// be discarded.
    pub tombstone_retention: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_only: false,
            durability: true,
            samp_lwm_pct: DEFAULT_SAMP_LWM_PCT,
            samp_hwm_pct: DEFAULT_SAMP_HWM_PCT,
            compaction_interval: None,
            tombstone_retention: 0,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses open-time parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for malformed or unknown parameters, or
    /// when the low watermark exceeds the high watermark.
    pub fn from_params(params: &[&str]) -> CoreResult<Self> {
        let mut config = Self::default();
        for (key, value) in parse_params(params)? {
            match key {
                "read_only" => config.read_only = parse_bool(key, value)?,
                "durability.enabled" => config.durability = parse_bool(key, value)?,
                "compaction.samp_lwm_pct" => config.samp_lwm_pct = parse_num(key, value)?,
                "compaction.samp_hwm_pct" => config.samp_hwm_pct = parse_num(key, value)?,
                "compaction.interval_ms" => {
                    config.compaction_interval =
                        Some(Duration::from_millis(parse_num(key, value)?));
                }
                "compaction.tombstone_retention" => {
                    config.tombstone_retention = parse_num(key, value)?;
                }
                _ => return Err(unknown_key(key)),
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.samp_lwm_pct < 100 || self.samp_lwm_pct > self.samp_hwm_pct {
            return Err(CoreError::invalid_argument(format!(
                "space amplification watermarks must satisfy 100 <= lwm <= hwm, got {} and {}",
                self.samp_lwm_pct, self.samp_hwm_pct
            )));
        }
        Ok(())
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether every commit fsyncs the WAL.
    #[must_use]
    pub const fn durability(mut self, value: bool) -> Self {
        self.durability = value;
        self
    }

    /// Sets the compaction watermarks.
    #[must_use]
    pub const fn samp_watermarks(mut self, lwm_pct: u32, hwm_pct: u32) -> Self {
        self.samp_lwm_pct = lwm_pct;
        self.samp_hwm_pct = hwm_pct;
        self
    }

    /// Sets the background compaction interval.
    #[must_use]
    pub const fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = Some(interval);
        self
    }

    /// Sets the tombstone retention window.
    #[must_use]
    pub const fn tombstone_retention(mut self, sequences: u64) -> Self {
        self.tombstone_retention = sequences;
        self
    }
}

/// Parameters fixed when a collection is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KvsCreateConfig {
    /// Required key prefix length; 0 disables prefix enforcement.
    pub prefix_len: usize,
    /// Media placement.
    pub policy: MediaPolicy,
}

impl KvsCreateConfig {
    /// Creates a configuration with no prefix and automatic placement.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `prefix.length` and `mclass.policy`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for malformed or unknown parameters.
    pub fn from_params(params: &[&str]) -> CoreResult<Self> {
        let mut config = Self::default();
        for (key, value) in parse_params(params)? {
            match key {
                "prefix.length" => config.prefix_len = parse_num(key, value)?,
                "mclass.policy" => config.policy = value.parse()?,
                _ => return Err(unknown_key(key)),
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.prefix_len > KVS_PFX_LEN_MAX {
            return Err(CoreError::invalid_argument(format!(
                "prefix.length {} exceeds {KVS_PFX_LEN_MAX}",
                self.prefix_len
            )));
        }
        Ok(())
    }

    /// Sets the prefix length.
    #[must_use]
    pub const fn prefix_len(mut self, len: usize) -> Self {
        self.prefix_len = len;
        self
    }

    /// Sets the media policy.
    #[must_use]
    pub const fn policy(mut self, policy: MediaPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Value compression algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueCompression {
    /// Store values as given.
    #[default]
    None,
    /// Compress with zstd.
    Zstd,
}

/// Parameters of one open collection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvsConfig {
    /// Compression applied to values written through this handle.
    pub compression: ValueCompression,
    /// Values shorter than this are never compressed.
    pub compression_min_length: usize,
}

impl Default for KvsConfig {
    fn default() -> Self {
        Self {
            compression: ValueCompression::None,
            compression_min_length: DEFAULT_COMPRESSION_MIN_LENGTH,
        }
    }
}

impl KvsConfig {
    /// Creates a configuration without compression.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `compression.value.algorithm` and `compression.value.min_length`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for malformed or unknown parameters.
    pub fn from_params(params: &[&str]) -> CoreResult<Self> {
        let mut config = Self::default();
        for (key, value) in parse_params(params)? {
            match key {
                "compression.value.algorithm" => {
                    config.compression = match value {
                        "none" => ValueCompression::None,
                        "zstd" => ValueCompression::Zstd,
                        _ => return Err(bad_value(key, value)),
                    };
                }
                "compression.value.min_length" => {
                    config.compression_min_length = parse_num(key, value)?;
                }
                _ => return Err(unknown_key(key)),
            }
        }
        Ok(config)
    }

    /// Sets the compression algorithm.
    #[must_use]
    pub const fn compression(mut self, compression: ValueCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the minimum compressible value length.
    #[must_use]
    pub const fn compression_min_length(mut self, len: usize) -> Self {
        self.compression_min_length = len;
        self
    }
}
