//! SSH implementation of [`RemoteExecutor`] backed by `ssh2`.
//!
//! `ssh2` is blocking, so every operation opens its own session on tokio's
//! blocking pool. Sessions are never shared between host tasks.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use async_trait::async_trait;
use ssh2::{ExtendedData, Session};
use tracing::debug;

use super::{split_host_port, RemoteExecutor};
use crate::config::SshConfig;
use crate::error::RemoteError;

/// Mode of copied files; the probe must be executable.
const COPY_MODE: i32 = 0o755;

/// Executes commands over SSH with password or key authentication.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Open an authenticated session to `host`.
    fn connect(config: &SshConfig, host: &str) -> Result<Session, RemoteError> {
        let (addr, port) = split_host_port(host, config.port);
        let connect_err = |message: String| RemoteError::Connect {
            host: host.to_string(),
            message,
        };
        let session_err = |e: ssh2::Error| RemoteError::Session {
            host: host.to_string(),
            message: e.to_string(),
        };

        let socket = (addr, port)
            .to_socket_addrs()
            .map_err(|e| connect_err(format!("cannot resolve {addr}:{port}: {e}")))?
            .next()
            .ok_or_else(|| connect_err(format!("no address for {addr}:{port}")))?;
        let tcp = TcpStream::connect_timeout(&socket, config.connect_timeout())
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = Session::new().map_err(session_err)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(
            u32::try_from(config.connect_timeout().as_millis()).unwrap_or(u32::MAX),
        );
        session.handshake().map_err(session_err)?;

        match &config.identity_file {
            Some(key) => session
                .userauth_pubkey_file(&config.user, None, key, None)
                .map_err(session_err)?,
            None => session
                .userauth_password(&config.user, &config.password)
                .map_err(session_err)?,
        }
        if !session.authenticated() {
            return Err(RemoteError::Session {
                host: host.to_string(),
                message: format!("authentication failed for user '{}'", config.user),
            });
        }
        // Blocking reads of long-running probes must not time out.
        session.set_timeout(0);
        Ok(session)
    }

    /// Execute a command, returning its exit status and merged output.
    fn exec(config: &SshConfig, host: &str, command: &str) -> Result<(i32, Vec<u8>), RemoteError> {
        let session = Self::connect(config, host)?;
        let session_err = |e: ssh2::Error| RemoteError::Session {
            host: host.to_string(),
            message: e.to_string(),
        };

        let mut channel = session.channel_session().map_err(session_err)?;
        channel
            .handle_extended_data(ExtendedData::Merge)
            .map_err(session_err)?;
        channel.exec(command).map_err(session_err)?;

        let output = read_output(&mut channel, host)?;
        channel.wait_close().map_err(session_err)?;
        let status = channel.exit_status().map_err(session_err)?;

        debug!(host = %host, command = %command, status, "Remote command finished");
        Ok((status, output))
    }

    fn scp(config: &SshConfig, host: &str, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let copy_err = |message: String| RemoteError::Copy {
            host: host.to_string(),
            local: local.display().to_string(),
            remote: remote.to_string(),
            message,
        };

        let content = std::fs::read(local)?;
        let session = Self::connect(config, host)?;
        let mut channel = session
            .scp_send(Path::new(remote), COPY_MODE, content.len() as u64, None)
            .map_err(|e| copy_err(e.to_string()))?;
        channel
            .write_all(&content)
            .map_err(|e| copy_err(e.to_string()))?;
        channel.send_eof().map_err(|e| copy_err(e.to_string()))?;
        channel.wait_eof().map_err(|e| copy_err(e.to_string()))?;
        channel.close().map_err(|e| copy_err(e.to_string()))?;
        channel.wait_close().map_err(|e| copy_err(e.to_string()))?;

        debug!(host = %host, local = %local.display(), remote = %remote, "Copied file");
        Ok(())
    }

    /// Run a blocking SSH operation on the blocking pool.
    async fn blocking<T, F>(&self, host: &str, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&SshConfig, &str) -> Result<T, RemoteError> + Send + 'static,
    {
        let config = self.config.clone();
        let owned_host = host.to_string();
        tokio::task::spawn_blocking(move || op(&config, &owned_host))
            .await
            .map_err(|e| RemoteError::Aborted {
                host: host.to_string(),
                message: e.to_string(),
            })?
    }
}

/// Drain a channel, attributing read failures to `host`.
fn read_output(reader: &mut impl Read, host: &str) -> Result<Vec<u8>, RemoteError> {
    let mut output = Vec::new();
    reader
        .read_to_end(&mut output)
        .map_err(|e| RemoteError::Session {
            host: host.to_string(),
            message: format!("failed to read command output: {e}"),
        })?;
    Ok(output)
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<Vec<u8>, RemoteError> {
        let cmd = command.to_string();
        let (status, output) = self
            .blocking(host, move |config, host| Self::exec(config, host, &cmd))
            .await?;
        if status != 0 {
            return Err(RemoteError::CommandFailed {
                host: host.to_string(),
                command: command.to_string(),
                status,
                output: String::from_utf8_lossy(&output).into_owned(),
            });
        }
        Ok(output)
    }

    async fn copy_file(
        &self,
        host: &str,
        local: &Path,
        remote: &str,
    ) -> Result<(), RemoteError> {
        let local = local.to_path_buf();
        let remote = remote.to_string();
        self.blocking(host, move |config, host| {
            Self::scp(config, host, &local, &remote)
        })
        .await
    }

    async fn file_exists(&self, host: &str, remote: &str) -> Result<bool, RemoteError> {
        let cmd = format!("test -f '{remote}'");
        let (status, _) = self
            .blocking(host, move |config, host| Self::exec(config, host, &cmd))
            .await?;
        Ok(status == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "channel closed",
            ))
        }
    }

    #[test]
    fn test_read_failure_names_host() {
        let err = read_output(&mut BrokenPipe, "10.0.0.1:22").unwrap_err();
        match err {
            RemoteError::Session { host, message } => {
                assert_eq!(host, "10.0.0.1:22");
                assert!(message.contains("channel closed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_output_collects_all_bytes() {
        let mut reader = std::io::Cursor::new(b"line one\nline two\n".to_vec());
        let output = read_output(&mut reader, "10.0.0.1").unwrap();
        assert_eq!(output, b"line one\nline two\n");
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_connect_error() {
        let executor = SshExecutor::new(SshConfig {
            connect_timeout_secs: 1,
            ..SshConfig::default()
        });
        let err = executor
            .run("host.invalid:22", "true")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Connect { .. }), "{err}");
    }
}
