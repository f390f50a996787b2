//! Error types for preflight validation.
//!
//! Three families mirror the stages of a run: [`RemoteError`] for the
//! remote-execution channel, [`ParseError`] for malformed probe output and
//! [`PolicyViolation`] for hosts that do not meet the cluster policy.
//! [`PreflightError`] wraps all of them for the top-level pipeline.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the remote-execution channel.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// TCP connection could not be established.
    #[error("[{host}] failed to connect: {message}")]
    Connect { host: String, message: String },

    /// SSH handshake or authentication failed.
    #[error("[{host}] SSH session failed: {message}")]
    Session { host: String, message: String },

    /// Command ran but exited with a non-zero status.
    #[error("[{host}] command '{command}' exited with status {status}: {output}")]
    CommandFailed {
        host: String,
        command: String,
        status: i32,
        output: String,
    },

    /// File transfer failed.
    #[error("[{host}] failed to copy {local} to {remote}: {message}")]
    Copy {
        host: String,
        local: String,
        remote: String,
        message: String,
    },

    /// Local I/O error while preparing a transfer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking worker running the SSH operation died.
    #[error("[{host}] remote task aborted: {message}")]
    Aborted { host: String, message: String },
}

/// Errors raised while parsing the probe output of one host.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Output has no `##INSTANCE_INFO_BEGIN##` marker.
    #[error("can't find begin marker {0}")]
    MissingBeginMarker(&'static str),

    /// Output has no `##INSTANCE_INFO_END##` marker after the begin marker.
    #[error("can't find end marker {0}")]
    MissingEndMarker(&'static str),

    /// The delimited block is not a valid instance document.
    #[error("invalid instance info JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A device dump is not valid base64.
    #[error("invalid base64 in {field}: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// A decoded device dump is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    Utf8 { field: &'static str },

    /// A record token is not a single `KEY=VALUE` pair.
    #[error("parse block device pair '{pair}' failed in record '{record}'")]
    MalformedPair { record: String, pair: String },

    /// A block device size is not an integer.
    #[error("block size '{0}' can't be converted to int")]
    InvalidSize(String),
}

/// A host or cluster that does not satisfy the policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// Two instances report the same hostname.
    #[error("hostname of {host} is duplicate with host {previous}")]
    DuplicateHostname { host: String, previous: String },

    /// Both ntpd and chronyd are running on one host.
    #[error("host {host} has ntpd.service and chronyd.service both active, please disable one of them")]
    ConflictingTimeServices { host: String },

    /// A host clock drifts beyond tolerance.
    #[error("host {host} has {service} configured, but its time differs from the local clock by {skew_secs}s (tolerance {tolerance_secs}s)")]
    ClockSkew {
        host: String,
        service: String,
        skew_secs: i64,
        tolerance_secs: i64,
    },

    /// No host runs a time synchronization service.
    #[error("no time sync service: all hosts have neither ntpd nor chronyd active")]
    NoTimeSyncService,

    /// Only part of the cluster runs a time synchronization service.
    #[error("some hosts [{with_service}] have a time sync service, but hosts [{without_service}] do not")]
    InconsistentTimeSync {
        with_service: String,
        without_service: String,
    },

    /// No supported OS entry matches the instance.
    #[error("instance {host}: the current host is {actual}, the OS only supports: {supported}")]
    UnsupportedOs {
        host: String,
        actual: String,
        supported: String,
    },

    #[error("instance {host}: cpu cores should be >= {required}, found {actual}")]
    InsufficientCpu { host: String, required: u32, actual: u32 },

    #[error("instance {host}: memory capacity should be >= {required}GB, found {actual}GB")]
    InsufficientMemory { host: String, required: u64, actual: u64 },

    #[error("instance {host}: system disk not found")]
    SystemDiskMissing { host: String },

    #[error("instance {host}: system disk capacity should be >= {required}GB, found {actual}GB")]
    InsufficientSystemDisk { host: String, required: u64, actual: u64 },
}

impl PolicyViolation {
    /// Suggested remediation for the operator.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::DuplicateHostname { .. } => {
                "Give every host a unique hostname (hostnamectl set-hostname)"
            }
            Self::ConflictingTimeServices { .. } => {
                "Disable either ntpd.service or chronyd.service on the host"
            }
            Self::ClockSkew { .. } => "Resynchronize the host clock with its time source",
            Self::NoTimeSyncService | Self::InconsistentTimeSync { .. } => {
                "Enable exactly one of ntpd or chronyd on every host"
            }
            Self::UnsupportedOs { .. } => "Reinstall the host with a supported OS release",
            Self::InsufficientCpu { .. }
            | Self::InsufficientMemory { .. }
            | Self::SystemDiskMissing { .. }
            | Self::InsufficientSystemDisk { .. } => "Maybe you should upgrade your machine",
        }
    }
}

/// Top-level error for a preflight run.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error(transparent)]
    Transport(#[from] RemoteError),

    #[error("[{host}] failed to parse probe output: {source}")]
    Parse {
        host: String,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// The probe script was not found on a host before execution.
    #[error("[{host}] script {path} is not found")]
    ScriptMissing { host: String, path: String },

    /// Copy or digest verification failed on one or more hosts.
    #[error("copy probe to {remote_path} failed on hosts [{}]", .failed.join(","))]
    Distribution {
        remote_path: String,
        failed: Vec<String>,
    },

    /// A host did not answer within the per-host timeout.
    #[error("[{host}] host unreachable: no response within {timeout:?}")]
    HostUnreachable { host: String, timeout: Duration },

    /// Collected facts are missing for an instance.
    #[error("no probe facts collected for host {host}")]
    MissingFacts { host: String },

    /// The remote clock output could not be read.
    #[error("get remote time of {host} failed: {detail}")]
    RemoteClock { host: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A host task panicked or was cancelled.
    #[error("host task failed: {0}")]
    Join(String),
}

impl PreflightError {
    /// Remediation text when the error carries a policy violation.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Policy(violation) => Some(violation.suggestion()),
            Self::HostUnreachable { .. } | Self::Transport(_) => {
                Some("Check SSH connectivity and credentials for the host")
            }
            _ => None,
        }
    }
}

pub type Result<T, E = PreflightError> = std::result::Result<T, E>;
