//! Cluster and instance records.
//!
//! Field names follow the camelCase wire format shared by the probe output
//! and the persisted `cluster-info-detailed.yaml` artifact.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Hosts and credentials supplied by the operator before any probing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfoBrief {
    #[serde(default)]
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_password: String,
    /// Host addresses, optionally suffixed with `:port`.
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl ClusterInfoBrief {
    /// Load a brief from a YAML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Disk attached to an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    /// Total capacity in GB.
    #[serde(default)]
    pub capacity: u64,
    /// Remaining capacity in GB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remain: Option<u64>,
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub mount_point: String,
    /// `disk`, `part`, `lvm`, `rom`, ...
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl Disk {
    #[must_use]
    pub fn is_disk(&self) -> bool {
        self.kind == "disk"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCard {
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mac: String,
}

impl NetworkCard {
    /// Loopback and gateway pseudo-devices are not physical NICs.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.name == "lo" || self.name == "gw"
    }
}

/// Facts about a single host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_name: String,
    /// Positional role tag: `master` or `worker`.
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub mac_address: String,
    /// CPU core count.
    #[serde(default)]
    pub cpu: u32,
    /// Memory in KB as reported by the probe, whole GB once parsed.
    #[serde(default)]
    pub memory: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_disk: Vec<Disk>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_disk: Vec<Disk>,
    #[serde(rename = "privateIP", default)]
    pub private_ip: String,
    #[serde(rename = "publicIP", default, skip_serializing_if = "String::is_empty")]
    pub public_ip: String,
    /// Internet bandwidth in Mbps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_bandwidth: Option<u32>,
    #[serde(default)]
    pub network_cards: Vec<NetworkCard>,
    #[serde(rename = "imageID", default, skip_serializing_if = "String::is_empty")]
    pub image_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl InstanceInfo {
    /// The reconciled system disk, if one was found.
    #[must_use]
    pub fn system_disk(&self) -> Option<&Disk> {
        self.system_disk.first()
    }
}

/// Activity state of the time synchronization daemons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSyncStatus {
    #[serde(default)]
    pub ntpd: String,
    #[serde(default)]
    pub chronyd: String,
}

impl TimeSyncStatus {
    const ACTIVE: &'static str = "active";

    #[must_use]
    pub fn ntpd_active(&self) -> bool {
        self.ntpd == Self::ACTIVE
    }

    #[must_use]
    pub fn chronyd_active(&self) -> bool {
        self.chronyd == Self::ACTIVE
    }
}

/// Raw document emitted by the probe for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfoExtended {
    #[serde(default)]
    pub instance_info: InstanceInfo,
    #[serde(default)]
    pub time_sync_status: TimeSyncStatus,
    /// Base64 network device dump.
    #[serde(default)]
    pub network_devices_str: String,
    /// Base64 block device dump.
    #[serde(default)]
    pub block_devices_str: String,
    /// Host address as supplied in the brief, port included.
    #[serde(skip)]
    pub address: String,
}

/// Whole-cluster attributes. Reserved, currently empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterScopeInfo {}

/// Fully probed view of the cluster, one instance per host in host order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfoDetailed {
    #[serde(flatten)]
    pub cluster_info: ClusterScopeInfo,
    #[serde(rename = "instance_list", default)]
    pub instance_infos: Vec<InstanceInfo>,
}

impl ClusterInfoDetailed {
    /// Write the detailed view as YAML for operator inspection.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        info!(path = %path.display(), instances = self.instance_infos.len(), "Saved detailed cluster info");
        Ok(())
    }

    /// Read a previously saved detailed view.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PreflightError;

    fn sample_instance() -> InstanceInfo {
        InstanceInfo {
            host_name: "node1".into(),
            identifier: "master".into(),
            os: "CentOS".into(),
            os_version: "7.8.2003".into(),
            arch: "amd64".into(),
            kernel: "3.10.0-1127.el7.x86_64".into(),
            mac_address: "52:54:00:aa:bb:cc".into(),
            cpu: 8,
            memory: 16,
            system_disk: vec![Disk {
                name: "sda".into(),
                capacity: 200,
                kind: "disk".into(),
                ..Disk::default()
            }],
            data_disk: vec![Disk {
                name: "sdb".into(),
                capacity: 500,
                remain: Some(480),
                fs_type: "xfs".into(),
                mount_point: "/data".into(),
                kind: "disk".into(),
            }],
            private_ip: "10.0.0.1".into(),
            network_cards: vec![NetworkCard {
                name: "eth0".into(),
                ip: "10.0.0.1".into(),
                mac: "52:54:00:aa:bb:cc".into(),
            }],
            annotations: BTreeMap::from([("rack".to_string(), "r1".to_string())]),
            ..InstanceInfo::default()
        }
    }

    #[test]
    fn test_instance_yaml_roundtrip() {
        let instance = sample_instance();
        let yaml = serde_yaml::to_string(&instance).unwrap();
        let decoded: InstanceInfo = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(decoded, instance);
    }

    #[test]
    fn test_detailed_uses_instance_list_key() {
        let detailed = ClusterInfoDetailed {
            instance_infos: vec![sample_instance()],
            ..ClusterInfoDetailed::default()
        };
        let yaml = serde_yaml::to_string(&detailed).unwrap();
        assert!(yaml.contains("instance_list:"));
        assert!(yaml.contains("privateIP: 10.0.0.1"));
        assert!(yaml.contains("hostName: node1"));
    }

    #[test]
    fn test_detailed_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster-info-detailed.yaml");
        let detailed = ClusterInfoDetailed {
            instance_infos: vec![sample_instance()],
            ..ClusterInfoDetailed::default()
        };

        detailed.save(&path).unwrap();
        let loaded = ClusterInfoDetailed::load(&path).unwrap();
        assert_eq!(loaded, detailed);
    }

    #[test]
    fn test_extended_deserializes_probe_document() {
        let json = r#"{
            "instanceInfo": {"hostName": "node1", "os": "CentOS", "cpu": 4, "memory": 8388609},
            "timeSyncStatus": {"ntpd": "inactive", "chronyd": "active"},
            "networkDevicesStr": "",
            "blockDevicesStr": ""
        }"#;
        let extended: InstanceInfoExtended = serde_json::from_str(json).unwrap();
        assert_eq!(extended.instance_info.cpu, 4);
        assert!(extended.time_sync_status.chronyd_active());
        assert!(!extended.time_sync_status.ntpd_active());
    }

    #[test]
    fn test_brief_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brief.yaml");
        std::fs::write(
            &path,
            "sshUser: admin\nsshPassword: secret\nhosts:\n  - 10.0.0.1\n  - 10.0.0.2:2222\n",
        )
        .unwrap();

        let brief = ClusterInfoBrief::load(&path).unwrap();
        assert_eq!(brief.ssh_user, "admin");
        assert_eq!(brief.hosts, vec!["10.0.0.1", "10.0.0.2:2222"]);
    }

    #[test]
    fn test_missing_files_are_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");

        let err = ClusterInfoBrief::load(&missing).unwrap_err();
        assert!(matches!(err, PreflightError::Io(_)), "{err}");
        let err = ClusterInfoDetailed::load(&missing).unwrap_err();
        assert!(matches!(err, PreflightError::Io(_)), "{err}");
    }

    #[test]
    fn test_network_card_virtual() {
        let lo = NetworkCard { name: "lo".into(), ..NetworkCard::default() };
        let eth = NetworkCard { name: "eth0".into(), ..NetworkCard::default() };
        assert!(lo.is_virtual());
        assert!(!eth.is_virtual());
    }
}
