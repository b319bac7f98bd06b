use crate::proxy::MetricKind;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_ENV: &str = "HOSTMETRICS_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "hostmetrics.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub cache: CacheConfig,
    pub sampling: SamplingConfig,
    pub mounts: MountConfig,
    pub capabilities: BTreeMap<String, CapabilityConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    /// Per-kind ttl, keyed by metric kind name (`cpu`, `proc_mem`, ...).
    pub overrides: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 1_000,
            overrides: HashMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, kind: MetricKind) -> Duration {
        let ms = self.overrides.get(kind.as_str()).copied().unwrap_or(self.ttl_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Wait between the two samples of a rate metric that has no history yet.
    pub min_interval_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { min_interval_ms: 500 }
    }
}

impl SamplingConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub probe_timeout_ms: u64,
    /// Port probed for nfs mounts; 111 is the portmapper.
    pub probe_port: u16,
    pub refresh_interval_ms: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2_000,
            probe_port: 111,
            refresh_interval_ms: 30_000,
        }
    }
}

impl MountConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CapabilityConfig {
    Build(BuildConfig),
    Registry(RegistryConfig),
}

/// Link a shared object from an object file shipped inside an archive.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Output library path, or a directory to place `library_file` in.
    pub output: PathBuf,
    pub library_file: String,
    pub archive: PathBuf,
    /// Archive member holding the object to link.
    pub member: String,
    #[serde(default = "default_compiler")]
    pub compiler: PathBuf,
    #[serde(default = "default_archiver")]
    pub archiver: PathBuf,
    /// Shared objects the library links against, by file name.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub library_dirs: Vec<PathBuf>,
}

fn default_compiler() -> PathBuf {
    PathBuf::from("/usr/bin/gcc")
}

fn default_archiver() -> PathBuf {
    PathBuf::from("/bin/tar")
}

/// Pick an already installed library from enumerated install roots.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub vendor_prefix: String,
    #[serde(default = "default_preferred_suffix")]
    pub preferred_suffix: String,
    #[serde(default = "default_fallback_suffix")]
    pub fallback_suffix: String,
    pub library_file: String,
    #[serde(default)]
    pub roots: Vec<InstallRootConfig>,
}

fn default_preferred_suffix() -> String {
    " Server".to_string()
}

fn default_fallback_suffix() -> String {
    " API".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallRootConfig {
    pub label: String,
    pub path: PathBuf,
}

impl MetricsConfig {
    /// Loads the file named by `HOSTMETRICS_CONFIG`, or `hostmetrics.toml`.
    /// A missing default file means defaults; a missing explicit file is an error.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let s = std::fs::read_to_string(&path)?;
                Self::load_from_str(&s)
            }
            Err(_) => match std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
                Ok(s) => Self::load_from_str(&s),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: MetricsConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for name in self.cache.overrides.keys() {
            anyhow::ensure!(
                MetricKind::from_name(name).is_some(),
                "cache.overrides: unknown metric kind {:?}",
                name
            );
        }
        anyhow::ensure!(
            self.mounts.probe_timeout_ms > 0,
            "mounts.probe_timeout_ms must be > 0, got {}",
            self.mounts.probe_timeout_ms
        );
        anyhow::ensure!(self.mounts.probe_port > 0, "mounts.probe_port must be > 0");

        for (name, capability) in &self.capabilities {
            match capability {
                CapabilityConfig::Build(build) => {
                    anyhow::ensure!(
                        !build.member.is_empty(),
                        "capabilities.{}.member must be non-empty",
                        name
                    );
                    anyhow::ensure!(
                        !build.library_file.is_empty(),
                        "capabilities.{}.library_file must be non-empty",
                        name
                    );
                }
                CapabilityConfig::Registry(registry) => {
                    anyhow::ensure!(
                        !registry.library_file.is_empty(),
                        "capabilities.{}.library_file must be non-empty",
                        name
                    );
                }
            }
        }
        Ok(())
    }
}

/// Process-wide library paths, one per capability name.
///
/// Set by the capability loader once a library is found or built, or
/// externally to point a capability at a specific file.
pub mod properties {
    use parking_lot::RwLock;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::OnceLock;

    fn store() -> &'static RwLock<HashMap<String, PathBuf>> {
        static STORE: OnceLock<RwLock<HashMap<String, PathBuf>>> = OnceLock::new();
        STORE.get_or_init(|| RwLock::new(HashMap::new()))
    }

    pub fn shared_library(name: &str) -> Option<PathBuf> {
        store().read().get(name).cloned()
    }

    pub fn set_shared_library(name: &str, path: impl Into<PathBuf>) {
        store().write().insert(name.to_string(), path.into());
    }

    pub fn clear_shared_library(name: &str) {
        store().write().remove(name);
    }
}
