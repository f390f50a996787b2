//! Probe script materialization.
//!
//! The probe is an opaque shell program. This module only knows how to put
//! it on the local disk: dump the bundled copy into the script directory and
//! make a per-run working copy that the distributor may rewrite.

use std::path::{Path, PathBuf};

use tracing::{debug, error};
use uuid::Uuid;

use crate::error::Result;

/// Probe bundled with the binary.
const BUNDLED_PROBE: &str = include_str!("../scripts/parseinstance.sh");

/// Directory the probe is copied to on every host.
const REMOTE_SCRIPT_DIR: &str = "/tmp";

/// A probe script and the parameters it is invoked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeScript {
    name: String,
    body: String,
    params: String,
}

impl Default for ProbeScript {
    fn default() -> Self {
        Self::bundled()
    }
}

impl ProbeScript {
    #[must_use]
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            body: body.into(),
            params: String::new(),
        }
    }

    /// The instance probe shipped with this crate.
    #[must_use]
    pub fn bundled() -> Self {
        Self::new("parseinstance", BUNDLED_PROBE)
    }

    /// Read a probe from disk. Its name is the lowercased file stem.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map_or_else(|| "probe".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Self::new(name, body))
    }

    #[must_use]
    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn params(&self) -> &str {
        &self.params
    }

    /// Fixed path of the probe on every remote host.
    #[must_use]
    pub fn remote_path(&self) -> String {
        format!("{REMOTE_SCRIPT_DIR}/{}.sh", self.name)
    }

    /// Command that runs the distributed probe.
    #[must_use]
    pub fn command(&self) -> String {
        let cmd = format!("bash {}", self.remote_path());
        if self.params.is_empty() {
            cmd
        } else {
            format!("{cmd} {}", self.params)
        }
    }

    /// Write the probe into `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written.
    pub fn dump(&self, dir: &Path) -> Result<PathBuf> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).inspect_err(|e| {
                error!(
                    dir = %dir.display(),
                    "Create script dir failed, please create it yourself: {e}"
                );
            })?;
        }
        let path = dir.join(format!("{}.sh", self.name));
        std::fs::write(&path, &self.body)?;
        set_executable(&path)?;
        debug!(path = %path.display(), "Dumped probe script");
        Ok(path)
    }

    /// Dump the probe and make a uniquely named working copy next to it.
    ///
    /// The copy is removed when the returned guard is dropped.
    ///
    /// # Errors
    /// Returns an error if either file cannot be written.
    pub fn working_copy(&self, dir: &Path) -> Result<WorkingCopy> {
        let source = self.dump(dir)?;
        let path = dir.join(format!("{}_{}.sh", self.name, Uuid::new_v4()));
        std::fs::copy(&source, &path)?;
        Ok(WorkingCopy { path })
    }
}

/// Per-run copy of the probe, deleted on drop.
#[derive(Debug)]
pub struct WorkingCopy {
    path: PathBuf,
}

impl WorkingCopy {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            error!(path = %self.path.display(), "Failed to remove probe copy: {e}");
        }
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_probe_paths() {
        let probe = ProbeScript::bundled();
        assert_eq!(probe.name(), "parseinstance");
        assert_eq!(probe.remote_path(), "/tmp/parseinstance.sh");
        assert_eq!(probe.command(), "bash /tmp/parseinstance.sh");
        assert_eq!(
            probe.with_params("--verbose").command(),
            "bash /tmp/parseinstance.sh --verbose"
        );
    }

    #[test]
    fn test_bundled_probe_emits_markers() {
        let probe = ProbeScript::bundled();
        assert!(probe.body.contains("##INSTANCE_INFO_BEGIN##"));
        assert!(probe.body.contains("##INSTANCE_INFO_END##"));
    }

    #[test]
    fn test_working_copy_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let probe = ProbeScript::new("Probe", "echo hi\n");

        let copy = probe.working_copy(dir.path()).unwrap();
        let path = copy.path().to_path_buf();
        assert!(path.exists());
        assert!(dir.path().join("probe.sh").exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo hi\n");

        drop(copy);
        assert!(!path.exists());
    }

    #[test]
    fn test_from_file_uses_lowercased_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CheckHost.sh");
        std::fs::write(&path, "true\n").unwrap();

        let probe = ProbeScript::from_file(&path).unwrap();
        assert_eq!(probe.name(), "checkhost");
        assert_eq!(probe.remote_path(), "/tmp/checkhost.sh");
    }
}
