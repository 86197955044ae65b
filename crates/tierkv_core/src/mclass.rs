//! Media classes.
//!
//! A database spreads its files over up to three storage tiers. The capacity
//! tier always exists; staging and pmem exist only when a path was given at
//! create time. Each collection's segment file lives in the tier its
//! [`MediaPolicy`] selects, and the WAL lives on pmem when that tier is
//! configured.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Allocation granularity assumed when reporting allocated bytes.
const ALLOCATION_UNIT: u64 = 4096;

/// A storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaClass {
    /// Bulk storage; always configured.
    Capacity,
    /// Faster intermediate storage.
    Staging,
    /// Persistent memory.
    Pmem,
}

impl MediaClass {
    /// All classes, in reporting order.
    pub const ALL: [Self; 3] = [Self::Capacity, Self::Staging, Self::Pmem];

    /// Returns the lowercase class name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Staging => "staging",
            Self::Pmem => "pmem",
        }
    }
}

impl fmt::Display for MediaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaClass {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "capacity" => Ok(Self::Capacity),
            "staging" => Ok(Self::Staging),
            "pmem" => Ok(Self::Pmem),
            other => Err(CoreError::invalid_argument(format!(
                "unknown media class {other:?}"
            ))),
        }
    }
}

/// Which tier a collection's data is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaPolicy {
    /// Staging when configured, capacity otherwise.
    #[default]
    Auto,
    /// Capacity tier only.
    CapacityOnly,
    /// Staging tier only.
    StagingOnly,
    /// Pmem tier only.
    PmemOnly,
}

impl MediaPolicy {
    /// Resolves the policy against the configured tiers.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` when the policy names a tier that is not
    /// configured.
    pub fn resolve(self, layout: &MediaLayout) -> CoreResult<MediaClass> {
        let class = match self {
            Self::Auto if layout.is_configured(MediaClass::Staging) => MediaClass::Staging,
            Self::Auto | Self::CapacityOnly => MediaClass::Capacity,
            Self::StagingOnly => MediaClass::Staging,
            Self::PmemOnly => MediaClass::Pmem,
        };
        layout.dir(class)?;
        Ok(class)
    }
}

impl FromStr for MediaPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "capacity_only" => Ok(Self::CapacityOnly),
            "staging_only" => Ok(Self::StagingOnly),
            "pmem_only" => Ok(Self::PmemOnly),
            other => Err(CoreError::invalid_argument(format!(
                "unknown media policy {other:?}"
            ))),
        }
    }
}

/// Usage report for one media class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaClassInfo {
    /// Bytes allocated on the device, rounded up to the allocation unit.
    pub allocated_bytes: u64,
    /// Bytes of file content.
    pub used_bytes: u64,
    /// Directory backing the class.
    pub path: PathBuf,
}

/// Resolved directories of the configured tiers.
#[derive(Debug, Clone)]
pub struct MediaLayout {
    capacity: PathBuf,
    staging: Option<PathBuf>,
    pmem: Option<PathBuf>,
}

impl MediaLayout {
    /// Builds a layout; relative paths resolve under `home`.
    pub(crate) fn resolve(
        home: &Path,
        capacity: &str,
        staging: Option<&str>,
        pmem: Option<&str>,
    ) -> Self {
        let under_home = |p: &str| {
            let path = Path::new(p);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                home.join(path)
            }
        };
        Self {
            capacity: under_home(capacity),
            staging: staging.map(under_home),
            pmem: pmem.map(under_home),
        }
    }

    /// Whether `class` has a directory.
    #[must_use]
    pub fn is_configured(&self, class: MediaClass) -> bool {
        match class {
            MediaClass::Capacity => true,
            MediaClass::Staging => self.staging.is_some(),
            MediaClass::Pmem => self.pmem.is_some(),
        }
    }

    /// Returns the directory of `class`.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` if the class is not configured.
    pub fn dir(&self, class: MediaClass) -> CoreResult<&Path> {
        let dir = match class {
            MediaClass::Capacity => Some(&self.capacity),
            MediaClass::Staging => self.staging.as_ref(),
            MediaClass::Pmem => self.pmem.as_ref(),
        };
        dir.map(PathBuf::as_path).ok_or_else(|| {
            CoreError::not_supported(format!("media class {class} is not configured"))
        })
    }

    /// Directories of every configured class.
    pub(crate) fn configured_dirs(&self) -> impl Iterator<Item = (MediaClass, &Path)> {
        MediaClass::ALL
            .into_iter()
            .filter_map(move |class| self.dir(class).ok().map(|dir| (class, dir)))
    }

    /// The class holding the WAL.
    #[must_use]
    pub fn wal_class(&self) -> MediaClass {
        if self.pmem.is_some() {
            MediaClass::Pmem
        } else {
            MediaClass::Capacity
        }
    }

    /// Directory holding the WAL.
    #[must_use]
    pub fn wal_dir(&self) -> &Path {
        self.pmem.as_deref().unwrap_or(&self.capacity)
    }

    /// Measures the files of `class`.
    pub(crate) fn info(&self, class: MediaClass) -> CoreResult<MediaClassInfo> {
        let dir = self.dir(class)?;
        let mut used_bytes = 0u64;
        let mut allocated_bytes = 0u64;

        for entry in fs::read_dir(dir)? {
            let metadata = entry?.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let len = metadata.len();
            used_bytes += len;
            allocated_bytes += len.div_ceil(ALLOCATION_UNIT) * ALLOCATION_UNIT;
        }

        Ok(MediaClassInfo {
            allocated_bytes,
            used_bytes,
            path: dir.to_path_buf(),
        })
    }
}
