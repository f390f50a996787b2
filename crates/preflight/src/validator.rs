//! Cluster policy validation.
//!
//! Checks run in a fixed order and stop at the first violation:
//! hostname uniqueness, time synchronization, then OS release and hardware
//! minimums for each instance.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{OsRelease, Policy, DEFAULT_CLOCK_SKEW_TOLERANCE_SECS};
use crate::error::{PolicyViolation, PreflightError, Result};
use crate::remote::RemoteExecutor;
use crate::types::{ClusterInfoDetailed, InstanceInfo, InstanceInfoExtended};

/// Command printing the remote clock as a Unix timestamp.
const REMOTE_CLOCK_COMMAND: &str = "date +%s";

/// Validates a collected cluster against a [`Policy`].
pub struct ClusterValidator {
    executor: Arc<dyn RemoteExecutor>,
    policy: Policy,
    clock_skew_tolerance_secs: i64,
}

impl ClusterValidator {
    #[must_use]
    pub fn new(executor: Arc<dyn RemoteExecutor>, policy: Policy) -> Self {
        Self {
            executor,
            policy,
            clock_skew_tolerance_secs: DEFAULT_CLOCK_SKEW_TOLERANCE_SECS,
        }
    }

    #[must_use]
    pub fn with_clock_skew_tolerance(mut self, secs: i64) -> Self {
        self.clock_skew_tolerance_secs = secs;
        self
    }

    /// Run every check in order.
    ///
    /// # Errors
    /// Returns the first [`PolicyViolation`], or a transport error raised
    /// while reading a remote clock.
    pub async fn validate(
        &self,
        detailed: &ClusterInfoDetailed,
        extended: &HashMap<String, InstanceInfoExtended>,
    ) -> Result<()> {
        validate_hostnames(detailed)?;
        self.validate_time_sync(detailed, extended).await?;

        for instance in &detailed.instance_infos {
            self.validate_os(instance)?;
            self.validate_resources(instance)?;
        }

        info!(
            instances = detailed.instance_infos.len(),
            "Cluster validation passed"
        );
        Ok(())
    }

    /// Every host must run exactly one time service, or none may; hosts with
    /// a service must be within the clock skew tolerance.
    ///
    /// # Errors
    /// Returns a violation for conflicting services, clock skew, a cluster
    /// with no time service, or a cluster where only some hosts have one.
    pub async fn validate_time_sync(
        &self,
        detailed: &ClusterInfoDetailed,
        extended: &HashMap<String, InstanceInfoExtended>,
    ) -> Result<()> {
        let mut with_service = Vec::new();
        let mut without_service = Vec::new();

        for instance in &detailed.instance_infos {
            let host = instance.private_ip.as_str();
            let facts = extended
                .get(host)
                .ok_or_else(|| PreflightError::MissingFacts {
                    host: host.to_string(),
                })?;
            let status = &facts.time_sync_status;

            let service = match (status.ntpd_active(), status.chronyd_active()) {
                (true, true) => {
                    return Err(PolicyViolation::ConflictingTimeServices {
                        host: host.to_string(),
                    }
                    .into())
                }
                (true, false) => Some("ntp"),
                (false, true) => Some("chrony"),
                (false, false) => None,
            };

            match service {
                Some(service) => {
                    let address = if facts.address.is_empty() {
                        host
                    } else {
                        facts.address.as_str()
                    };
                    self.check_clock_skew(host, address, service).await?;
                    with_service.push(host.to_string());
                }
                None => without_service.push(host.to_string()),
            }
        }

        if with_service.is_empty() {
            return Err(PolicyViolation::NoTimeSyncService.into());
        }
        if !without_service.is_empty() {
            return Err(PolicyViolation::InconsistentTimeSync {
                with_service: with_service.join(","),
                without_service: without_service.join(","),
            }
            .into());
        }
        Ok(())
    }

    /// Compare the clock of `host`, reached at `address`, with local time.
    async fn check_clock_skew(&self, host: &str, address: &str, service: &str) -> Result<()> {
        let output = self.executor.run(address, REMOTE_CLOCK_COMMAND).await?;
        let text = String::from_utf8_lossy(&output);
        let remote: i64 = text
            .trim()
            .parse()
            .map_err(|e| PreflightError::RemoteClock {
                host: host.to_string(),
                detail: format!("'{}': {e}", text.trim()),
            })?;

        let skew = remote - chrono::Utc::now().timestamp();
        debug!(host = %host, service, skew, "Checked remote clock");
        if skew.abs() > self.clock_skew_tolerance_secs {
            return Err(PolicyViolation::ClockSkew {
                host: host.to_string(),
                service: service.to_string(),
                skew_secs: skew,
                tolerance_secs: self.clock_skew_tolerance_secs,
            }
            .into());
        }
        Ok(())
    }

    /// The instance must match at least one supported OS entry.
    ///
    /// # Errors
    /// Returns [`PolicyViolation::UnsupportedOs`] listing the supported set.
    pub fn validate_os(&self, instance: &InstanceInfo) -> Result<(), PolicyViolation> {
        let actual = OsRelease {
            os_name: instance.os.clone(),
            os_version: instance.os_version.clone(),
            kernel_version: instance.kernel.clone(),
            arch: instance.arch.clone(),
        };
        if self.policy.supported_os.iter().any(|entry| entry.matches(&actual)) {
            return Ok(());
        }
        Err(PolicyViolation::UnsupportedOs {
            host: instance.private_ip.clone(),
            actual: actual.to_string(),
            supported: self.policy.supported_os_descriptions().join(",\n"),
        })
    }

    /// CPU, memory, system disk presence and system disk size, in that order.
    ///
    /// # Errors
    /// Returns the first threshold the instance falls below.
    pub fn validate_resources(&self, instance: &InstanceInfo) -> Result<(), PolicyViolation> {
        let required = &self.policy.hardware;
        let host = || instance.private_ip.clone();

        if instance.cpu < required.cpu_minimum {
            return Err(PolicyViolation::InsufficientCpu {
                host: host(),
                required: required.cpu_minimum,
                actual: instance.cpu,
            });
        }
        if instance.memory < required.mem_minimum {
            return Err(PolicyViolation::InsufficientMemory {
                host: host(),
                required: required.mem_minimum,
                actual: instance.memory,
            });
        }
        let disk = instance
            .system_disk()
            .ok_or_else(|| PolicyViolation::SystemDiskMissing { host: host() })?;
        if disk.capacity < required.system_disk_minimum {
            return Err(PolicyViolation::InsufficientSystemDisk {
                host: host(),
                required: required.system_disk_minimum,
                actual: disk.capacity,
            });
        }
        Ok(())
    }
}

/// Hostnames must be pairwise distinct.
///
/// # Errors
/// Returns [`PolicyViolation::DuplicateHostname`] naming both addresses.
pub fn validate_hostnames(detailed: &ClusterInfoDetailed) -> Result<(), PolicyViolation> {
    let mut seen: HashMap<&str, &str> = HashMap::with_capacity(detailed.instance_infos.len());
    for instance in &detailed.instance_infos {
        if let Some(previous) = seen.insert(&instance.host_name, &instance.private_ip) {
            return Err(PolicyViolation::DuplicateHostname {
                host: instance.private_ip.clone(),
                previous: previous.to_string(),
            });
        }
    }
    Ok(())
}
