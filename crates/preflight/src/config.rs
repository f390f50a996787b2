//! Preflight configuration and validation policy.
//!
//! Everything a run needs (SSH settings, the policy, script locations) lives
//! in one [`PreflightConfig`] value passed explicitly through constructors.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PreflightError, Result};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Number of leading hosts tagged as masters.
pub const DEFAULT_MASTER_COUNT: usize = 3;

/// Maximum tolerated clock skew between a host and the local machine.
pub const DEFAULT_CLOCK_SKEW_TOLERANCE_SECS: i64 = 5;

/// Default path of the persisted detailed cluster view.
pub const DEFAULT_OUTPUT_PATH: &str = "cluster-info-detailed.yaml";

/// Script directory relative to the home directory.
const SCRIPT_DIR_SUFFIX: &str = ".cluster-checker/scripts";

/// SSH connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SshConfig {
    pub user: String,
    pub password: String,
    /// Port used when a host has no `:port` suffix.
    pub port: u16,
    /// Private key used instead of the password when set.
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            password: String::new(),
            port: DEFAULT_SSH_PORT,
            identity_file: None,
            connect_timeout_secs: 30,
        }
    }
}

impl SshConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// A supported OS release. Version and kernel are prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsRelease {
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub arch: String,
}

impl OsRelease {
    #[must_use]
    pub fn new(name: &str, version: &str, kernel: &str, arch: &str) -> Self {
        Self {
            os_name: name.to_string(),
            os_version: version.to_string(),
            kernel_version: kernel.to_string(),
            arch: arch.to_string(),
        }
    }

    /// Whether `actual` satisfies this entry.
    ///
    /// Name and arch must be identical; the actual version and kernel only
    /// need to start with the entry's version and kernel.
    #[must_use]
    pub fn matches(&self, actual: &OsRelease) -> bool {
        self.os_name == actual.os_name
            && self.arch == actual.arch
            && actual.os_version.starts_with(&self.os_version)
            && actual.kernel_version.starts_with(&self.kernel_version)
    }

    /// Policy-side description, with wildcard suffixes on prefixes.
    #[must_use]
    pub fn describe_supported(&self) -> String {
        format!(
            "{{Arch:{}, OS:{}, Version:{}.*, Kernel:{}.*}}",
            self.arch, self.os_name, self.os_version, self.kernel_version
        )
    }
}

impl fmt::Display for OsRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{Arch:{}, OS:{}, Version:{}, Kernel:{}}}",
            self.arch, self.os_name, self.os_version, self.kernel_version
        )
    }
}

/// Minimum hardware per instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HardwareMinimums {
    pub cpu_minimum: u32,
    /// GB.
    pub mem_minimum: u64,
    /// GB.
    pub system_disk_minimum: u64,
}

impl Default for HardwareMinimums {
    fn default() -> Self {
        Self {
            cpu_minimum: 4,
            mem_minimum: 8,
            system_disk_minimum: 100,
        }
    }
}

/// Validation policy, read-only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    pub supported_os: Vec<OsRelease>,
    pub hardware: HardwareMinimums,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            supported_os: vec![
                OsRelease::new("CentOS", "7.7", "3.10.0", "amd64"),
                OsRelease::new("CentOS", "7.8", "3.10.0", "amd64"),
                OsRelease::new("CentOS", "8.2", "4.18", "amd64"),
            ],
            hardware: HardwareMinimums::default(),
        }
    }
}

impl Policy {
    /// Supported releases, one description per entry.
    #[must_use]
    pub fn supported_os_descriptions(&self) -> Vec<String> {
        self.supported_os
            .iter()
            .map(OsRelease::describe_supported)
            .collect()
    }
}

/// Full configuration of a preflight run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreflightConfig {
    pub ssh: SshConfig,
    pub policy: Policy,
    /// Local directory the bundled probe is dumped into.
    /// Defaults to `~/.cluster-checker/scripts`.
    pub script_dir: Option<PathBuf>,
    pub master_count: usize,
    pub clock_skew_tolerance_secs: i64,
    /// Per-host deadline for distribution and collection. Unbounded if unset.
    pub host_timeout_secs: Option<u64>,
    pub output_path: PathBuf,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            ssh: SshConfig::default(),
            policy: Policy::default(),
            script_dir: None,
            master_count: DEFAULT_MASTER_COUNT,
            clock_skew_tolerance_secs: DEFAULT_CLOCK_SKEW_TOLERANCE_SECS,
            host_timeout_secs: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }
}

impl PreflightConfig {
    /// Load a configuration file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PreflightError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!(path = %path.display(), "Loaded preflight config");
        Ok(config)
    }

    /// Resolve the local script directory.
    ///
    /// # Errors
    /// Returns an error if no directory is configured and the home directory
    /// cannot be determined.
    pub fn script_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.script_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(SCRIPT_DIR_SUFFIX))
            .ok_or_else(|| PreflightError::Config("cannot determine home directory".into()))
    }

    #[must_use]
    pub fn host_timeout(&self) -> Option<Duration> {
        self.host_timeout_secs.map(Duration::from_secs)
    }
}
