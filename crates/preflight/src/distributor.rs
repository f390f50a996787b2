//! Probe distribution with digest verification.
//!
//! The local probe copy is finalized once (environment lines prepended),
//! then pushed to every host concurrently. Each host verifies the SHA-1 of
//! its copy against the local digest. Every host is attempted; failures are
//! collected rather than short-circuiting.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sha1::{Digest, Sha1};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{PreflightError, RemoteError, Result};
use crate::remote::RemoteExecutor;

/// A host whose copy could not be verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    pub host: String,
    pub reason: String,
}

/// Outcome of distributing the probe to every host, in host order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub remote_path: String,
    pub succeeded: Vec<String>,
    pub failures: Vec<HostFailure>,
}

impl DistributionReport {
    /// True only if every host received a verified copy.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn failed_hosts(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.host.clone()).collect()
    }

    /// Convert a report with failures into an error.
    ///
    /// # Errors
    /// Returns [`PreflightError::Distribution`] naming every failed host.
    pub fn into_result(self) -> Result<Self> {
        if self.all_succeeded() {
            Ok(self)
        } else {
            Err(PreflightError::Distribution {
                remote_path: self.remote_path.clone(),
                failed: self.failed_hosts(),
            })
        }
    }
}

/// Pushes the probe script to every host.
pub struct ProbeDistributor {
    executor: Arc<dyn RemoteExecutor>,
    host_timeout: Option<Duration>,
}

impl ProbeDistributor {
    #[must_use]
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            host_timeout: None,
        }
    }

    #[must_use]
    pub fn with_host_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.host_timeout = timeout;
        self
    }

    /// Prepend `KEY=VALUE` lines to the local script, then copy it to
    /// `remote_path` on every host and verify each copy.
    ///
    /// Host failures are reported in the returned report; only local I/O
    /// errors and task panics abort the call.
    ///
    /// # Errors
    /// Returns an error if the local script cannot be read or rewritten.
    pub async fn distribute(
        &self,
        hosts: &[String],
        local_script: &Path,
        remote_path: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<DistributionReport> {
        prepend_env(local_script, env)?;
        let digest = file_digest(local_script)?;
        debug!(script = %local_script.display(), %digest, "Computed probe digest");

        let mut set = JoinSet::new();
        for (index, host) in hosts.iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            let host = host.clone();
            let local = local_script.to_path_buf();
            let remote = remote_path.to_string();
            let digest = digest.clone();
            let timeout = self.host_timeout;
            set.spawn(async move {
                let copy = copy_and_verify(executor.as_ref(), &host, &local, &remote, &digest);
                let outcome = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, copy).await {
                        Ok(result) => result,
                        Err(_) => Err(format!("no response within {limit:?}")),
                    },
                    None => copy.await,
                };
                (index, host, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(hosts.len());
        while let Some(joined) = set.join_next().await {
            outcomes.push(joined.map_err(|e| PreflightError::Join(e.to_string()))?);
        }
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut report = DistributionReport {
            remote_path: remote_path.to_string(),
            ..DistributionReport::default()
        };
        for (_, host, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    debug!(host = %host, "Copy file digest validate success");
                    report.succeeded.push(host);
                }
                Err(reason) => {
                    error!(host = %host, %reason, "Copy file digest validate failed");
                    report.failures.push(HostFailure { host, reason });
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failures.len(),
            remote = %remote_path,
            "Probe distribution finished"
        );
        Ok(report)
    }
}

async fn copy_and_verify(
    executor: &dyn RemoteExecutor,
    host: &str,
    local: &Path,
    remote: &str,
    digest: &str,
) -> std::result::Result<(), String> {
    executor
        .copy_file(host, local, remote)
        .await
        .map_err(|e| e.to_string())?;
    let remote_digest = remote_digest(executor, host, remote)
        .await
        .map_err(|e| e.to_string())?;
    if remote_digest == digest {
        Ok(())
    } else {
        Err(format!(
            "digest mismatch: local {digest}, remote {remote_digest}"
        ))
    }
}

async fn remote_digest(
    executor: &dyn RemoteExecutor,
    host: &str,
    remote: &str,
) -> std::result::Result<String, RemoteError> {
    let output = executor.run(host, &format!("sha1sum {remote}")).await?;
    Ok(String::from_utf8_lossy(&output)
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string())
}

/// Hex SHA-1 of a file's content.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn file_digest(path: &Path) -> Result<String> {
    let content = std::fs::read(path)?;
    Ok(hex::encode(Sha1::digest(&content)))
}

/// Insert `KEY=VALUE` lines at the top of the script.
///
/// Keys are written in sorted order so the resulting digest is stable.
///
/// # Errors
/// Returns an error if the script cannot be read or written.
pub fn prepend_env(path: &Path, env: &BTreeMap<String, String>) -> Result<()> {
    if env.is_empty() {
        return Ok(());
    }
    let body = std::fs::read_to_string(path)?;
    let mut content: String = env.iter().map(|(k, v)| format!("{k}={v}\n")).collect();
    content.push_str(&body);
    std::fs::write(path, content)?;
    Ok(())
}
