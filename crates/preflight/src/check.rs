//! The cluster preflight check.
//!
//! Ties the pipeline together: prepare the probe, distribute it, collect
//! facts, persist the detailed view, and validate it against the policy.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{error, info};

use crate::collector::{Collection, FactCollector, RolePolicy};
use crate::config::PreflightConfig;
use crate::distributor::ProbeDistributor;
use crate::error::{PreflightError, Result};
use crate::probe::ProbeScript;
use crate::remote::{strip_port, RemoteExecutor};
use crate::types::ClusterInfoBrief;
use crate::validator::ClusterValidator;

/// How a failed check should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckLevel {
    Warning,
    Fatal,
}

/// Static description of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckMetadata {
    pub description: &'static str,
    pub level: CheckLevel,
    pub explain: &'static str,
    pub suggestion: &'static str,
}

/// Result of a preflight run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    /// First failure, if any.
    pub reason: Option<String>,
    pub suggestion: Option<String>,
}

impl Verdict {
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
            suggestion: None,
        }
    }

    #[must_use]
    pub fn fail(err: &PreflightError, fallback_suggestion: &str) -> Self {
        Self {
            passed: false,
            reason: Some(format!("failed to validate cluster info: {err}")),
            suggestion: Some(err.suggestion().unwrap_or(fallback_suggestion).to_string()),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed {
            return write!(f, "✅ PASS");
        }
        write!(f, "❌ FAIL")?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n   suggestion: {suggestion}")?;
        }
        Ok(())
    }
}

/// Checks OS release and hardware of every host in a cluster.
#[derive(Debug, Clone)]
pub struct ClusterCheck {
    brief: ClusterInfoBrief,
    config: PreflightConfig,
    probe: ProbeScript,
}

impl ClusterCheck {
    /// Build a check from the operator's brief.
    ///
    /// The brief's credentials override the configured SSH user and
    /// password; an empty user falls back to `root`.
    ///
    /// # Errors
    /// Returns an error if the brief lists no hosts.
    pub fn new(brief: ClusterInfoBrief, mut config: PreflightConfig) -> Result<Self> {
        if brief.hosts.is_empty() {
            return Err(PreflightError::Config(
                "hosts must be configured in cluster-info-brief.yaml".into(),
            ));
        }
        config.ssh.user = if brief.ssh_user.is_empty() {
            "root".to_string()
        } else {
            brief.ssh_user.clone()
        };
        if !brief.ssh_password.is_empty() {
            config.ssh.password.clone_from(&brief.ssh_password);
        }
        Ok(Self {
            brief,
            config,
            probe: ProbeScript::bundled(),
        })
    }

    #[must_use]
    pub fn with_probe(mut self, probe: ProbeScript) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PreflightConfig {
        &self.config
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        "clustercheck"
    }

    #[must_use]
    pub fn metadata(&self) -> CheckMetadata {
        CheckMetadata {
            description: "Check the required os info and hardware resource of remote host",
            level: CheckLevel::Fatal,
            explain: "if host hardware resource does not meet requirements, the program may not run normally, or be very slow.",
            suggestion: "Maybe you should upgrade your machine",
        }
    }

    /// Assignments prepended to the probe before distribution.
    #[must_use]
    pub fn probe_env(&self) -> BTreeMap<String, String> {
        let hosts: Vec<&str> = self.brief.hosts.iter().map(|h| strip_port(h)).collect();
        BTreeMap::from([
            ("SSHHosts".to_string(), format!("({})", hosts.join(" "))),
            ("SSHPort".to_string(), self.config.ssh.port.to_string()),
        ])
    }

    /// Run the check and fold the outcome into a verdict.
    pub async fn validate(&self, executor: Arc<dyn RemoteExecutor>) -> Verdict {
        match self.run(executor).await {
            Ok(()) => {
                info!(check = self.name(), "Preflight check passed");
                Verdict::pass()
            }
            Err(e) => {
                error!(check = self.name(), "Preflight check failed: {e}");
                Verdict::fail(&e, self.metadata().suggestion)
            }
        }
    }

    /// Run the full pipeline, returning the first error.
    ///
    /// # Errors
    /// Returns transport, parse, distribution or policy errors.
    pub async fn run(&self, executor: Arc<dyn RemoteExecutor>) -> Result<()> {
        let collection = self.collect(Arc::clone(&executor)).await?;
        collection.detailed.save(&self.config.output_path)?;

        ClusterValidator::new(executor, self.config.policy.clone())
            .with_clock_skew_tolerance(self.config.clock_skew_tolerance_secs)
            .validate(&collection.detailed, &collection.extended)
            .await
    }

    /// Distribute the probe and collect facts from every host.
    ///
    /// # Errors
    /// Returns an error if any host fails distribution or collection.
    pub async fn collect(&self, executor: Arc<dyn RemoteExecutor>) -> Result<Collection> {
        let script_dir = self.config.script_dir()?;
        let working_copy = self.probe.working_copy(&script_dir)?;
        let remote_path = self.probe.remote_path();
        info!(
            hosts = self.brief.hosts.len(),
            script = %working_copy.path().display(),
            "Distributing probe"
        );

        ProbeDistributor::new(Arc::clone(&executor))
            .with_host_timeout(self.config.host_timeout())
            .distribute(
                &self.brief.hosts,
                working_copy.path(),
                &remote_path,
                &self.probe_env(),
            )
            .await?
            .into_result()?;

        FactCollector::new(
            executor,
            RolePolicy {
                master_count: self.config.master_count,
            },
        )
        .with_host_timeout(self.config.host_timeout())
        .collect(&self.brief.hosts, &self.probe)
        .await
    }
}
