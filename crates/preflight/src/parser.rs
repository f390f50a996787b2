//! Probe output parsing and disk/network reconciliation.
//!
//! The probe prints one JSON document between sentinel markers. Two of its
//! fields are base64 dumps of `KEY="VALUE"` records separated by
//! `##SPLITER##`: one for network devices (`NAME`, `IP`, `MAC`) and one for
//! block devices (`NAME`, `MOUNTPOINT`, `FSTYPE`, `SIZE`, `TYPE`, `PKNAME`).

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::warn;

use crate::error::ParseError;
use crate::types::{Disk, InstanceInfo, InstanceInfoExtended, NetworkCard};

pub const INSTANCE_INFO_BEGIN: &str = "##INSTANCE_INFO_BEGIN##";
pub const INSTANCE_INFO_END: &str = "##INSTANCE_INFO_END##";

/// Separator between device records in a decoded dump.
pub const RECORD_SEPARATOR: &str = "##SPLITER##";

const KB_PER_GB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Parse the raw output of one host's probe.
///
/// `private_ip` is the already-known address of the host; the MAC address
/// of the interface carrying it is surfaced on the instance. When empty,
/// the `privateIP` reported by the probe is used instead.
///
/// # Errors
/// Returns a [`ParseError`] naming the fragment that failed.
pub fn parse_probe_output(
    raw: &str,
    private_ip: &str,
) -> Result<(InstanceInfo, InstanceInfoExtended), ParseError> {
    let json = between(raw, INSTANCE_INFO_BEGIN, INSTANCE_INFO_END)?;
    let extended: InstanceInfoExtended = serde_json::from_str(json)?;

    let mut instance = extended.instance_info.clone();
    if !private_ip.is_empty() {
        instance.private_ip = private_ip.to_string();
    }
    instance.memory = kb_to_gb(instance.memory);

    let network = decode_dump("networkDevicesStr", &extended.network_devices_str)?;
    let (cards, mac) = reconcile_network(parse_network_cards(&network), &instance.private_ip);
    instance.network_cards = cards;
    if let Some(mac) = mac {
        instance.mac_address = mac;
    }

    let block = decode_dump("blockDevicesStr", &extended.block_devices_str)?;
    let (system_disk, data_disks) = reconcile_disks(parse_block_devices(&block)?);
    instance.system_disk = system_disk.into_iter().collect();
    instance.data_disk = data_disks;

    Ok((instance, extended))
}

/// Slice between the begin and end markers.
fn between<'a>(raw: &'a str, begin: &'static str, end: &'static str) -> Result<&'a str, ParseError> {
    let start = raw
        .find(begin)
        .ok_or(ParseError::MissingBeginMarker(begin))?
        + begin.len();
    let len = raw[start..]
        .find(end)
        .ok_or(ParseError::MissingEndMarker(end))?;
    Ok(&raw[start..start + len])
}

/// Memory reported in KB, rounded up to whole GB.
#[must_use]
pub fn kb_to_gb(kb: u64) -> u64 {
    kb.div_ceil(KB_PER_GB)
}

/// Block size in bytes, truncated to whole GB.
#[must_use]
pub fn bytes_to_gb(bytes: u64) -> u64 {
    bytes / BYTES_PER_GB
}

fn decode_dump(field: &'static str, encoded: &str) -> Result<String, ParseError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|source| ParseError::Base64 { field, source })?;
    String::from_utf8(bytes).map_err(|_| ParseError::Utf8 { field })
}

/// Non-empty records of a decoded dump.
fn records(dump: &str) -> impl Iterator<Item = &str> {
    dump.split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|r| !r.is_empty())
}

/// Strip one leading and one trailing double quote, if present.
fn unquote(value: &str) -> &str {
    let value = value.strip_prefix('"').unwrap_or(value);
    value.strip_suffix('"').unwrap_or(value)
}

/// Split a `KEY="VALUE"` token. `None` if it does not have exactly two parts.
fn split_pair(token: &str) -> Option<(&str, &str)> {
    let mut parts = token.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => Some((key, unquote(value))),
        _ => None,
    }
}

/// Parse one record strictly: any malformed pair is an error.
fn parse_record(record: &str) -> Result<HashMap<&str, &str>, ParseError> {
    record
        .split_whitespace()
        .map(|token| {
            split_pair(token).ok_or_else(|| ParseError::MalformedPair {
                record: record.to_string(),
                pair: token.to_string(),
            })
        })
        .collect()
}

/// Parse network records. Malformed pairs are logged and skipped.
#[must_use]
pub fn parse_network_cards(dump: &str) -> Vec<NetworkCard> {
    records(dump)
        .map(|record| {
            let mut fields = HashMap::new();
            for token in record.split_whitespace() {
                match split_pair(token) {
                    Some((key, value)) => {
                        fields.insert(key, value);
                    }
                    None => warn!(pair = %token, "Parse net device pair failed"),
                }
            }
            let field = |key: &str| fields.get(key).copied().unwrap_or_default().to_string();
            NetworkCard {
                name: field("NAME"),
                ip: field("IP"),
                mac: field("MAC"),
            }
        })
        .collect()
}

/// Drop `lo`/`gw` and find the MAC of the interface carrying `private_ip`.
#[must_use]
pub fn reconcile_network(
    cards: Vec<NetworkCard>,
    private_ip: &str,
) -> (Vec<NetworkCard>, Option<String>) {
    let cards: Vec<NetworkCard> = cards.into_iter().filter(|c| !c.is_virtual()).collect();
    let mac = cards
        .iter()
        .rfind(|c| !private_ip.is_empty() && c.ip == private_ip)
        .map(|c| c.mac.clone());
    (cards, mac)
}

/// A block device record before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub disk: Disk,
    /// Parent device name (`PKNAME`), empty for whole disks.
    pub parent: String,
}

/// Parse block device records.
///
/// # Errors
/// Returns an error on a malformed pair or a non-numeric `SIZE`.
pub fn parse_block_devices(dump: &str) -> Result<Vec<BlockDevice>, ParseError> {
    records(dump)
        .map(|record| {
            let fields = parse_record(record)?;
            let field = |key: &str| fields.get(key).copied().unwrap_or_default().to_string();
            let size = field("SIZE");
            let bytes: u64 = size.parse().map_err(|_| ParseError::InvalidSize(size.clone()))?;
            Ok(BlockDevice {
                disk: Disk {
                    name: field("NAME"),
                    capacity: bytes_to_gb(bytes),
                    remain: None,
                    fs_type: field("FSTYPE"),
                    mount_point: field("MOUNTPOINT"),
                    kind: field("TYPE"),
                },
                parent: field("PKNAME"),
            })
        })
        .collect()
}

/// Split block devices into the system disk and data disks.
///
/// The device mounted at `/` is the system disk; when it is a partition its
/// parent device is promoted instead. Every other device of type `disk`
/// becomes a data disk, in input order. Partitions and other types are
/// dropped. Later records with a repeated name replace earlier ones.
#[must_use]
pub fn reconcile_disks(devices: Vec<BlockDevice>) -> (Option<Disk>, Vec<Disk>) {
    let mut system_name: Option<String> = None;
    let mut disks: Vec<Disk> = Vec::with_capacity(devices.len());

    for device in devices {
        if device.disk.mount_point == "/" {
            system_name = Some(if device.parent.is_empty() {
                device.disk.name.clone()
            } else {
                device.parent.clone()
            });
        }
        match disks.iter_mut().find(|d| d.name == device.disk.name) {
            Some(existing) => *existing = device.disk,
            None => disks.push(device.disk),
        }
    }

    let system_disk = system_name.and_then(|name| {
        disks
            .iter()
            .position(|d| d.name == name)
            .map(|index| disks.remove(index))
    });
    let data_disks = disks.into_iter().filter(Disk::is_disk).collect();
    (system_disk, data_disks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(records: &[&str]) -> String {
        STANDARD.encode(records.join(RECORD_SEPARATOR))
    }

    fn probe_output(network: &[&str], block: &[&str], memory_kb: u64) -> String {
        format!(
            "some banner\n{INSTANCE_INFO_BEGIN}{{\"instanceInfo\":{{\"hostName\":\"node1\",\"os\":\"CentOS\",\
             \"osVersion\":\"7.8.2003\",\"arch\":\"amd64\",\"kernel\":\"3.10.0-1127\",\"cpu\":8,\
             \"memory\":{memory_kb}}},\"timeSyncStatus\":{{\"ntpd\":\"inactive\",\"chronyd\":\"active\"}},\
             \"networkDevicesStr\":\"{}\",\"blockDevicesStr\":\"{}\"}}{INSTANCE_INFO_END}\ntrailer\n",
            encode(network),
            encode(block)
        )
    }

    const NET: [&str; 3] = [
        r#"NAME="lo" IP="127.0.0.1" MAC="00:00:00:00:00:00""#,
        r#"NAME="eth0" IP="10.0.0.1" MAC="52:54:00:aa:bb:cc""#,
        r#"NAME="eth1" IP="192.168.1.5" MAC="52:54:00:dd:ee:ff""#,
    ];

    const BLOCK: [&str; 3] = [
        r#"NAME="sda" MOUNTPOINT="" FSTYPE="" SIZE="214748364800" TYPE="disk" PKNAME="""#,
        r#"NAME="sda1" MOUNTPOINT="/" FSTYPE="xfs" SIZE="213674622976" TYPE="part" PKNAME="sda""#,
        r#"NAME="sdb" MOUNTPOINT="/data" FSTYPE="ext4" SIZE="536870912000" TYPE="disk" PKNAME="""#,
    ];

    #[test]
    fn test_memory_ceiling() {
        assert_eq!(kb_to_gb(8_388_608), 8);
        assert_eq!(kb_to_gb(8_388_609), 9);
        assert_eq!(kb_to_gb(0), 0);
        assert_eq!(kb_to_gb(1), 1);
    }

    #[test]
    fn test_block_size_floor() {
        assert_eq!(bytes_to_gb(107_374_182_400), 100);
        assert_eq!(bytes_to_gb(107_374_182_399), 99);
    }

    #[test]
    fn test_parse_full_output() {
        let raw = probe_output(&NET, &BLOCK, 16_318_480);
        let (instance, extended) = parse_probe_output(&raw, "10.0.0.1").unwrap();

        assert_eq!(instance.host_name, "node1");
        assert_eq!(instance.memory, 16);
        assert_eq!(instance.private_ip, "10.0.0.1");
        assert_eq!(instance.mac_address, "52:54:00:aa:bb:cc");
        assert_eq!(instance.network_cards.len(), 2);
        assert_eq!(instance.system_disk.len(), 1);
        assert_eq!(instance.system_disk[0].name, "sda");
        assert_eq!(instance.system_disk[0].capacity, 200);
        assert_eq!(instance.data_disk.len(), 1);
        assert_eq!(instance.data_disk[0].name, "sdb");
        assert_eq!(instance.data_disk[0].capacity, 500);
        assert!(extended.time_sync_status.chronyd_active());
    }

    #[test]
    fn test_missing_markers() {
        let err = parse_probe_output("no markers here", "").unwrap_err();
        assert!(matches!(err, ParseError::MissingBeginMarker(_)));

        let err = parse_probe_output(&format!("{INSTANCE_INFO_BEGIN}{{}}"), "").unwrap_err();
        assert!(matches!(err, ParseError::MissingEndMarker(_)));
    }

    #[test]
    fn test_malformed_json() {
        let raw = format!("{INSTANCE_INFO_BEGIN}{{not json{INSTANCE_INFO_END}");
        let err = parse_probe_output(&raw, "").unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn test_invalid_base64() {
        let raw = format!(
            "{INSTANCE_INFO_BEGIN}{{\"networkDevicesStr\":\"***\"}}{INSTANCE_INFO_END}"
        );
        let err = parse_probe_output(&raw, "").unwrap_err();
        assert!(matches!(err, ParseError::Base64 { field: "networkDevicesStr", .. }));
    }

    #[test]
    fn test_lo_and_gw_filtered_in_any_order() {
        let dump = [
            r#"NAME="gw" IP="10.0.0.254" MAC="""#,
            r#"NAME="eth0" IP="10.0.0.1" MAC="aa""#,
            r#"NAME="lo" IP="127.0.0.1" MAC="""#,
        ]
        .join(RECORD_SEPARATOR);
        let (cards, mac) = reconcile_network(parse_network_cards(&dump), "10.0.0.1");
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].name, "eth0");
        assert_eq!(mac.as_deref(), Some("aa"));
    }

    #[test]
    fn test_network_malformed_pair_skipped() {
        let cards = parse_network_cards(r#"NAME="eth0" BROKEN IP="10.0.0.1""#);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].name, "eth0");
        assert_eq!(cards[0].ip, "10.0.0.1");
        assert_eq!(cards[0].mac, "");
    }

    #[test]
    fn test_unquote_only_edges() {
        assert_eq!(unquote(r#""value""#), "value");
        assert_eq!(unquote(r#""value"#), "value");
        assert_eq!(unquote(r#"va"lue"#), r#"va"lue"#);
        assert_eq!(unquote(r#"""#), "");
        assert_eq!(unquote(""), "");
    }

    #[test]
    fn test_partition_promotes_parent() {
        let dump = [
            r#"NAME="sda1" MOUNTPOINT="/" FSTYPE="xfs" SIZE="1073741824" TYPE="part" PKNAME="sda""#,
            r#"NAME="sda" MOUNTPOINT="" FSTYPE="" SIZE="2147483648" TYPE="disk" PKNAME="""#,
        ]
        .join(RECORD_SEPARATOR);
        let (system, data) = reconcile_disks(parse_block_devices(&dump).unwrap());
        let system = system.unwrap();
        assert_eq!(system.name, "sda");
        assert_eq!(system.capacity, 2);
        assert!(data.iter().all(|d| d.name != "sda1"));
        assert!(data.is_empty());
    }

    #[test]
    fn test_unpartitioned_root_is_system_disk() {
        let dump = [
            r#"NAME="vda" MOUNTPOINT="/" FSTYPE="ext4" SIZE="107374182400" TYPE="disk" PKNAME="""#,
            r#"NAME="vdb" MOUNTPOINT="" FSTYPE="" SIZE="107374182400" TYPE="disk" PKNAME="""#,
            r#"NAME="sr0" MOUNTPOINT="" FSTYPE="" SIZE="1048576" TYPE="rom" PKNAME="""#,
        ]
        .join(RECORD_SEPARATOR);
        let (system, data) = reconcile_disks(parse_block_devices(&dump).unwrap());
        assert_eq!(system.unwrap().name, "vda");
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].name, "vdb");
    }

    #[test]
    fn test_data_disks_keep_input_order() {
        let dump = [
            r#"NAME="sdc" MOUNTPOINT="" FSTYPE="" SIZE="3221225472" TYPE="disk" PKNAME="""#,
            r#"NAME="sda" MOUNTPOINT="" FSTYPE="" SIZE="107374182400" TYPE="disk" PKNAME="""#,
            r#"NAME="sda1" MOUNTPOINT="/" FSTYPE="xfs" SIZE="1073741824" TYPE="part" PKNAME="sda""#,
            r#"NAME="nvme0n1" MOUNTPOINT="" FSTYPE="" SIZE="1073741824" TYPE="disk" PKNAME="""#,
            r#"NAME="sdb" MOUNTPOINT="" FSTYPE="" SIZE="2147483648" TYPE="disk" PKNAME="""#,
            r#"NAME="sdc" MOUNTPOINT="/data" FSTYPE="xfs" SIZE="4294967296" TYPE="disk" PKNAME="""#,
        ]
        .join(RECORD_SEPARATOR);
        let (system, data) = reconcile_disks(parse_block_devices(&dump).unwrap());
        assert_eq!(system.unwrap().name, "sda");

        let names: Vec<_> = data.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["sdc", "nvme0n1", "sdb"]);
        // The repeated record replaces the first one in place.
        assert_eq!(data[0].capacity, 4);
        assert_eq!(data[0].mount_point, "/data");
    }

    #[test]
    fn test_no_root_mount_has_no_system_disk() {
        let dump = r#"NAME="sdb" MOUNTPOINT="/data" FSTYPE="xfs" SIZE="1073741824" TYPE="disk" PKNAME="""#;
        let (system, data) = reconcile_disks(parse_block_devices(dump).unwrap());
        assert!(system.is_none());
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_invalid_size_names_value() {
        let dump = r#"NAME="sda" MOUNTPOINT="" FSTYPE="" SIZE="12G" TYPE="disk" PKNAME="""#;
        let err = parse_block_devices(dump).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSize(ref v) if v == "12G"));
        assert!(err.to_string().contains("12G"));
    }

    #[test]
    fn test_block_malformed_pair_is_error() {
        let dump = r#"NAME="sda" SIZE=1=2"#;
        let err = parse_block_devices(dump).unwrap_err();
        assert!(matches!(err, ParseError::MalformedPair { ref pair, .. } if pair == "SIZE=1=2"));
    }

    #[test]
    fn test_empty_dumps() {
        let raw = probe_output(&[], &[], 1024);
        let (instance, _) = parse_probe_output(&raw, "10.0.0.1").unwrap();
        assert!(instance.network_cards.is_empty());
        assert!(instance.system_disk.is_empty());
        assert!(instance.data_disk.is_empty());
        assert_eq!(instance.memory, 1);
    }
}
