//! Concurrent fact collection.
//!
//! Runs the distributed probe on every host at once, parses each output and
//! collates the results in the caller's host order once all tasks finish.
//! Collection is fail-fast: the first failing host aborts the remaining
//! tasks and no partial results are returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::DEFAULT_MASTER_COUNT;
use crate::error::{PreflightError, Result};
use crate::parser::parse_probe_output;
use crate::probe::ProbeScript;
use crate::remote::{strip_port, RemoteExecutor};
use crate::types::{ClusterInfoDetailed, InstanceInfo, InstanceInfoExtended};

pub const MASTER: &str = "master";
pub const WORKER: &str = "worker";

/// Positional role tagging: the first `master_count` hosts are masters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePolicy {
    pub master_count: usize,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            master_count: DEFAULT_MASTER_COUNT,
        }
    }
}

impl RolePolicy {
    #[must_use]
    pub fn identifier(&self, index: usize) -> &'static str {
        if index < self.master_count {
            MASTER
        } else {
            WORKER
        }
    }
}

/// Collected facts: the detailed view plus the raw probe documents keyed by
/// port-stripped host address.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub detailed: ClusterInfoDetailed,
    pub extended: HashMap<String, InstanceInfoExtended>,
}

/// Runs the probe on every host and parses the results.
pub struct FactCollector {
    executor: Arc<dyn RemoteExecutor>,
    roles: RolePolicy,
    host_timeout: Option<Duration>,
}

impl FactCollector {
    #[must_use]
    pub fn new(executor: Arc<dyn RemoteExecutor>, roles: RolePolicy) -> Self {
        Self {
            executor,
            roles,
            host_timeout: None,
        }
    }

    #[must_use]
    pub fn with_host_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.host_timeout = timeout;
        self
    }

    /// Execute `probe` on every host.
    ///
    /// # Errors
    /// Returns the first host failure: probe missing, transport error, parse
    /// error or timeout.
    pub async fn collect(&self, hosts: &[String], probe: &ProbeScript) -> Result<Collection> {
        let remote_path = probe.remote_path();
        let command = probe.command();

        let mut set = JoinSet::new();
        for (index, host) in hosts.iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            let host = host.clone();
            let remote_path = remote_path.clone();
            let command = command.clone();
            let identifier = self.roles.identifier(index);
            let timeout = self.host_timeout;
            set.spawn(async move {
                let probe = probe_host(executor.as_ref(), &host, &remote_path, &command);
                let result = match timeout {
                    Some(limit) => tokio::time::timeout(limit, probe).await.unwrap_or_else(|_| {
                        Err(PreflightError::HostUnreachable {
                            host: host.clone(),
                            timeout: limit,
                        })
                    }),
                    None => probe.await,
                };
                result.map(|(mut instance, extended)| {
                    instance.identifier = identifier.to_string();
                    (index, host, instance, extended)
                })
            });
        }

        let mut collected = Vec::with_capacity(hosts.len());
        while let Some(joined) = set.join_next().await {
            // Returning drops the set, which aborts the remaining host tasks.
            let outcome = joined.map_err(|e| PreflightError::Join(e.to_string()))?;
            collected.push(outcome?);
        }
        collected.sort_by_key(|(index, _, _, _)| *index);

        let mut collection = Collection::default();
        for (_, host, instance, mut extended) in collected {
            let key = strip_port(&host).to_string();
            extended.address = host;
            collection.extended.insert(key, extended);
            collection.detailed.instance_infos.push(instance);
        }

        info!(
            instances = collection.detailed.instance_infos.len(),
            "Collected instance facts"
        );
        Ok(collection)
    }
}

async fn probe_host(
    executor: &dyn RemoteExecutor,
    host: &str,
    remote_path: &str,
    command: &str,
) -> Result<(InstanceInfo, InstanceInfoExtended)> {
    if !executor.file_exists(host, remote_path).await? {
        return Err(PreflightError::ScriptMissing {
            host: host.to_string(),
            path: remote_path.to_string(),
        });
    }

    let output = executor.run(host, command).await?;
    debug!(host = %host, bytes = output.len(), "Probe finished");

    let raw = String::from_utf8_lossy(&output);
    parse_probe_output(&raw, strip_port(host)).map_err(|source| PreflightError::Parse {
        host: host.to_string(),
        source,
    })
}
