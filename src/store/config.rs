//! Store Configuration
//!
//! Configuration snapshots handed to each tier at construction. Nothing here
//! is read from files by the library itself; the binary assembles these from
//! command-line arguments and callers embedding the crate build them
//! directly or deserialize them from JSON.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::element::Lifespan;
use super::policy::EvictionPolicy;
use crate::error::{Error, Result};

/// Default spool drain interval (ms)
pub const DEFAULT_SPOOL_INTERVAL_MS: u64 = 200;

/// Default expiry sweep interval (s)
pub const DEFAULT_EXPIRY_INTERVAL_SECS: u64 = 120;

/// Default number of striped data-file handles
pub const DEFAULT_DISK_STRIPES: usize = 1;

/// Default spool buffer budget (30MB)
pub const DEFAULT_SPOOL_BUFFER_BYTES: u64 = 30 * 1024 * 1024;

/// Default number of TieredStore lock stripes
pub const DEFAULT_LOCK_STRIPES: usize = 128;

/// Default element lifespan applied to elements without one of their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifespanConfig {
    /// Time to live (s, 0 = unlimited)
    pub time_to_live_secs: u32,
    /// Time to idle (s, 0 = unlimited)
    pub time_to_idle_secs: u32,
    /// Elements never expire
    pub eternal: bool,
}

impl LifespanConfig {
    /// Lifespan applied to unset elements
    pub fn lifespan(&self) -> Lifespan {
        Lifespan {
            time_to_live_secs: if self.eternal { 0 } else { self.time_to_live_secs },
            time_to_idle_secs: if self.eternal { 0 } else { self.time_to_idle_secs },
            eternal: self.eternal,
        }
    }

    /// Whether nothing in the store can ever expire by default
    pub fn is_eternal(&self) -> bool {
        self.eternal || (self.time_to_live_secs == 0 && self.time_to_idle_secs == 0)
    }
}

/// Bounded memory tier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Store name, used in logs and errors
    pub name: String,
    /// Maximum element count (0 = unbounded)
    pub capacity: usize,
    /// Victim selection policy
    pub eviction_policy: EvictionPolicy,
    /// Default lifespan
    pub lifespan: LifespanConfig,
    /// Spill victims to a disk tier instead of dropping them
    pub overflow_to_disk: bool,
    /// Clear the memory tier after spooling it on flush
    pub clear_on_flush: bool,
    /// Seed for the sampling RNG (random when unset)
    pub sample_seed: Option<u64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            capacity: 10_000,
            eviction_policy: EvictionPolicy::Lru,
            lifespan: LifespanConfig::default(),
            overflow_to_disk: false,
            clear_on_flush: true,
            sample_seed: None,
        }
    }
}

impl MemoryConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("memory store name must not be empty".into()));
        }
        Ok(())
    }
}

/// Disk tier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Store name; the data and index files are `<name>.data` / `<name>.index`
    pub name: String,
    /// Directory holding the store's files
    pub directory: PathBuf,
    /// Maximum element count (0 = unbounded)
    pub capacity: usize,
    /// Keep the data across restarts
    pub persistent: bool,
    /// Default lifespan
    pub lifespan: LifespanConfig,
    /// Number of data-file handles (rounded up to a power of two)
    pub stripes: usize,
    /// Spool drain interval (ms)
    pub spool_interval_ms: u64,
    /// Expiry sweep interval (s)
    pub expiry_interval_secs: u64,
    /// Spool size beyond which `buffer_full` reports true
    pub spool_buffer_bytes: u64,
    /// Seed for the sampling RNG (random when unset)
    pub sample_seed: Option<u64>,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            directory: std::env::temp_dir().join("spoolcache"),
            capacity: 0,
            persistent: false,
            lifespan: LifespanConfig::default(),
            stripes: DEFAULT_DISK_STRIPES,
            spool_interval_ms: DEFAULT_SPOOL_INTERVAL_MS,
            expiry_interval_secs: DEFAULT_EXPIRY_INTERVAL_SECS,
            spool_buffer_bytes: DEFAULT_SPOOL_BUFFER_BYTES,
            sample_seed: None,
        }
    }
}

impl DiskConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("disk store name must not be empty".into()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "disk store name {:?} must not contain path separators",
                self.name
            )));
        }
        if self.spool_interval_ms == 0 {
            return Err(Error::Config("spool interval must be non-zero".into()));
        }
        if self.expiry_interval_secs == 0 {
            return Err(Error::Config("expiry interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Data-file handle count, at least one and a power of two
    pub fn effective_stripes(&self) -> usize {
        self.stripes.max(1).next_power_of_two()
    }

    pub fn spool_interval(&self) -> Duration {
        Duration::from_millis(self.spool_interval_ms)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn data_file(&self) -> PathBuf {
        self.directory.join(format!("{}.data", self.name))
    }

    pub fn index_file(&self) -> PathBuf {
        self.directory.join(format!("{}.index", self.name))
    }
}

/// Tier composition settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredConfig {
    /// Key lock stripes (rounded up to a power of two)
    pub lock_stripes: usize,
    /// Hand out copies on reads
    pub copy_on_read: bool,
    /// Store copies on writes
    pub copy_on_write: bool,
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            lock_stripes: DEFAULT_LOCK_STRIPES,
            copy_on_read: false,
            copy_on_write: false,
        }
    }
}

impl TieredConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lock_stripes == 0 {
            return Err(Error::Config("lock stripe count must be non-zero".into()));
        }
        Ok(())
    }
}

/// Complete two-tier configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cache tier
    pub memory: MemoryConfig,
    /// Authority tier
    pub disk: DiskConfig,
    /// Composition
    pub tiered: TieredConfig,
}

impl StoreConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;
        self.disk.validate()?;
        self.tiered.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.disk.spool_interval(), Duration::from_millis(200));
        assert_eq!(config.disk.expiry_interval(), Duration::from_secs(120));
        assert_eq!(config.tiered.lock_stripes, 128);
    }

    #[test]
    fn test_effective_stripes_rounds_up() {
        let mut config = DiskConfig::default();
        config.stripes = 0;
        assert_eq!(config.effective_stripes(), 1);
        config.stripes = 3;
        assert_eq!(config.effective_stripes(), 4);
        config.stripes = 8;
        assert_eq!(config.effective_stripes(), 8);
    }

    #[test]
    fn test_file_names() {
        let config = DiskConfig {
            name: "sessions".to_string(),
            directory: PathBuf::from("/tmp/cache"),
            ..Default::default()
        };
        assert_eq!(config.data_file(), PathBuf::from("/tmp/cache/sessions.data"));
        assert_eq!(config.index_file(), PathBuf::from("/tmp/cache/sessions.index"));
    }

    #[test]
    fn test_invalid_configs() {
        let config = DiskConfig {
            name: "a/b".to_string(),
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = DiskConfig {
            spool_interval_ms: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = TieredConfig {
            lock_stripes: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_eternal_lifespan_clears_limits() {
        let config = LifespanConfig {
            time_to_live_secs: 10,
            time_to_idle_secs: 5,
            eternal: true,
        };
        let lifespan = config.lifespan();
        assert!(lifespan.eternal);
        assert_eq!(lifespan.time_to_live_secs, 0);
        assert!(config.is_eternal());
    }

    #[test]
    fn test_json_roundtrip_with_partial_input() {
        let json = r#"{"memory":{"capacity":5,"eviction_policy":"LFU"},"disk":{"persistent":true}}"#;
        let config: StoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.memory.capacity, 5);
        assert_eq!(config.memory.eviction_policy, EvictionPolicy::Lfu);
        assert!(config.disk.persistent);
        assert_eq!(config.disk.spool_interval_ms, DEFAULT_SPOOL_INTERVAL_MS);
    }
}
