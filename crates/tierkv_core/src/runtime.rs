//! Process-scoped runtime context.
//!
//! A [`Runtime`] must exist before any database can be created, opened, or
//! destroyed. At most one is live per process. It carries the global
//! parameters and the registry of home directories currently open, which is
//! how a second open of the same home inside one process is refused even
//! though the advisory file lock would not see it.

use crate::config::{parse_bool, parse_num, parse_params, unknown_key, DEFAULT_COMPACTION_INTERVAL_MS};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

static RUNTIME_LIVE: AtomicBool = AtomicBool::new(false);

/// Global parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Whether engine logging should be emitted.
    pub logging_enabled: bool,
    /// Syslog-style level, 0 (emergency) through 7 (debug).
    pub logging_level: u8,
    /// Default background compaction interval for databases.
    pub compaction_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            logging_enabled: true,
            logging_level: 6,
            compaction_interval: Duration::from_millis(DEFAULT_COMPACTION_INTERVAL_MS),
        }
    }
}

impl RuntimeConfig {
    /// Loads the JSON file at `path` (if any), then applies `params`.
    ///
    /// Nested objects flatten to dotted keys, so `{"logging": {"level": 7}}`
    /// is the same as `logging.level=7`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for unreadable JSON, unknown keys or
    /// malformed values, and `IoFailure` if the file cannot be read.
    pub fn load(config_path: Option<&Path>, params: &[&str]) -> CoreResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            let text = fs::read_to_string(path)?;
            let json: Value = serde_json::from_str(&text).map_err(|e| {
                CoreError::invalid_argument(format!("config file {}: {e}", path.display()))
            })?;
            let mut flat = Vec::new();
            flatten_json("", &json, &mut flat)?;
            for (key, value) in &flat {
                config.apply(key, value)?;
            }
        }

        for (key, value) in parse_params(params)? {
            config.apply(key, value)?;
        }
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> CoreResult<()> {
        match key {
            "logging.enabled" => self.logging_enabled = parse_bool(key, value)?,
            "logging.level" => {
                let level: u8 = parse_num(key, value)?;
                if level > 7 {
                    return Err(CoreError::invalid_argument(format!(
                        "logging.level {level} is outside 0..=7"
                    )));
                }
                self.logging_level = level;
            }
            "compaction.interval_ms" => {
                self.compaction_interval = Duration::from_millis(parse_num(key, value)?);
            }
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// Directive for a `tracing` level filter matching the logging params.
    #[must_use]
    pub fn tracing_directive(&self) -> &'static str {
        if !self.logging_enabled {
            return "off";
        }
        match self.logging_level {
            0..=3 => "error",
            4 => "warn",
            5 | 6 => "info",
            _ => "debug",
        }
    }
}

fn flatten_json(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) -> CoreResult<()> {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_json(&key, v, out)?;
            }
        }
        Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Null | Value::Array(_) => {
            return Err(CoreError::invalid_argument(format!(
                "config key {prefix:?} must be a scalar"
            )));
        }
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    open_homes: Mutex<HashSet<PathBuf>>,
    finalized: AtomicBool,
}

impl RuntimeInner {
    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn ensure_live(&self) -> CoreResult<()> {
        if self.finalized.load(Ordering::Acquire) {
            return Err(CoreError::invalid_state("runtime has been finalized"));
        }
        Ok(())
    }

    /// Claims `home` for this process.
    pub(crate) fn register_home(&self, home: &Path) -> CoreResult<()> {
        let mut homes = self.open_homes.lock();
        self.ensure_live()?;
        if !homes.insert(home.to_path_buf()) {
            return Err(CoreError::busy(format!(
                "database {} is already open in this process",
                home.display()
            )));
        }
        Ok(())
    }

    pub(crate) fn release_home(&self, home: &Path) {
        self.open_homes.lock().remove(home);
    }

    pub(crate) fn is_open(&self, home: &Path) -> bool {
        self.open_homes.lock().contains(home)
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        if !self.finalized.load(Ordering::Acquire) {
            RUNTIME_LIVE.store(false, Ordering::Release);
        }
    }
}

/// The process-wide engine context.
///
/// # Example
///
/// ```no_run
/// use tierkv_core::{Kvdb, Runtime};
///
/// let rt = Runtime::init(None, &["logging.level=7"]).unwrap();
/// Kvdb::create(&rt, "/tmp/db", &[]).unwrap();
/// let db = Kvdb::open(&rt, "/tmp/db", &[]).unwrap();
/// db.close().unwrap();
/// rt.finalize().unwrap();
/// ```
#[derive(Debug)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Initializes the runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a runtime is already live in this process,
    /// and the errors of [`RuntimeConfig::load`].
    pub fn init(config_path: Option<&Path>, params: &[&str]) -> CoreResult<Self> {
        if RUNTIME_LIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoreError::invalid_state(
                "a runtime is already initialized in this process",
            ));
        }

        let config = match RuntimeConfig::load(config_path, params) {
            Ok(config) => config,
            Err(e) => {
                RUNTIME_LIVE.store(false, Ordering::Release);
                return Err(e);
            }
        };
        info!(
            logging = config.tracing_directive(),
            compaction_interval_ms = config.compaction_interval.as_millis() as u64,
            "runtime initialized"
        );

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                open_homes: Mutex::new(HashSet::new()),
                finalized: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the global parameters.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        self.inner.config()
    }

    /// Shuts the runtime down.
    ///
    /// Idempotent. After success, creating, opening, or destroying a
    /// database through this runtime fails with `InvalidState`, and a new
    /// runtime may be initialized.
    ///
    /// # Errors
    ///
    /// Returns `Busy` while any database is still open.
    pub fn finalize(&self) -> CoreResult<()> {
        let homes = self.inner.open_homes.lock();
        if self.inner.finalized.load(Ordering::Acquire) {
            return Ok(());
        }
        if !homes.is_empty() {
            return Err(CoreError::busy(format!(
                "{} database(s) still open",
                homes.len()
            )));
        }
        self.inner.finalized.store(true, Ordering::Release);
        RUNTIME_LIVE.store(false, Ordering::Release);
        debug!("runtime finalized");
        Ok(())
    }

    pub(crate) fn inner(&self) -> &Arc<RuntimeInner> {
        &self.inner
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}
