//! Distributed preflight validation for bare metal cluster hosts.
//!
//! Before a cluster is provisioned, every candidate host is probed over SSH.
//! A probe script is pushed to each host (with a digest check), executed
//! concurrently, and its output is parsed into typed instance records. The
//! records are then validated against a [`config::Policy`]: supported OS
//! releases, hardware minimums, hostname uniqueness and time synchronization.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use preflight::{ClusterCheck, ClusterInfoBrief, PreflightConfig, SshExecutor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let brief = ClusterInfoBrief::load("cluster-info-brief.yaml")?;
//!     let check = ClusterCheck::new(brief, PreflightConfig::default())?;
//!     let executor = Arc::new(SshExecutor::new(check.config().ssh.clone()));
//!
//!     let verdict = check.validate(executor).await;
//!     println!("{verdict}");
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod check;
pub mod collector;
pub mod config;
pub mod distributor;
pub mod error;
pub mod parser;
pub mod probe;
pub mod remote;
pub mod types;
pub mod validator;

pub use check::{CheckLevel, CheckMetadata, ClusterCheck, Verdict};
pub use collector::{Collection, FactCollector, RolePolicy};
pub use config::{HardwareMinimums, OsRelease, Policy, PreflightConfig, SshConfig};
pub use distributor::{DistributionReport, ProbeDistributor};
pub use error::{ParseError, PolicyViolation, PreflightError, RemoteError};
pub use parser::parse_probe_output;
pub use probe::ProbeScript;
pub use remote::{strip_port, RemoteExecutor, SshExecutor};
pub use types::{
    ClusterInfoBrief, ClusterInfoDetailed, ClusterScopeInfo, Disk, InstanceInfo,
    InstanceInfoExtended, NetworkCard, TimeSyncStatus,
};
pub use validator::ClusterValidator;
