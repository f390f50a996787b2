//! Remote execution boundary.
//!
//! The pipeline only needs three operations from a host: run a command,
//! copy a file, and test whether a file exists. [`RemoteExecutor`] captures
//! that contract; [`SshExecutor`] is the production implementation.

mod ssh;

use std::path::Path;

use async_trait::async_trait;

use crate::error::RemoteError;

pub use ssh::SshExecutor;

/// Trait for executing operations on remote hosts.
///
/// Hosts are passed exactly as supplied by the operator and may carry a
/// `:port` suffix.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `host` and return combined stdout and stderr.
    ///
    /// A non-zero exit status is an error.
    async fn run(&self, host: &str, command: &str) -> Result<Vec<u8>, RemoteError>;

    /// Copy a local file to `remote` on `host`.
    async fn copy_file(&self, host: &str, local: &Path, remote: &str)
        -> Result<(), RemoteError>;

    /// Whether `remote` exists as a regular file on `host`.
    async fn file_exists(&self, host: &str, remote: &str) -> Result<bool, RemoteError>;
}

/// Strip a `:port` suffix from a host address.
///
/// The stripped address is the key used to cross-reference per-host data.
#[must_use]
pub fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

/// Split a host address into address and port, falling back to `default_port`.
pub(crate) fn split_host_port(host: &str, default_port: u16) -> (&str, u16) {
    match host.split_once(':') {
        Some((addr, port)) => (addr, port.parse().unwrap_or(default_port)),
        None => (host, default_port),
    }
}
