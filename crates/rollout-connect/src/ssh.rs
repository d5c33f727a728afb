//! Remote execution over the system `ssh` binary

use rollout_core::{CommandOutput, Host, RemoteError, RemoteExecutor, SshConfig};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

/// `ssh` exits with 255 when the connection itself failed
const SSH_CONNECT_FAILURE: i32 = 255;

/// Runs commands through `ssh` in batch mode
#[derive(Debug, Clone)]
pub struct SshExecutor {
    config: SshConfig,
    command_timeout: Duration,
}

impl SshExecutor {
    #[must_use]
    pub fn new(config: SshConfig, command_timeout: Duration) -> Self {
        Self {
            config,
            command_timeout,
        }
    }

    /// Argument vector passed to `ssh` (everything after the program name)
    fn args(&self, host: &Host, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(format!("{}@{}", self.config.user, host.address));
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError> {
        tracing::debug!(host = %host.hostname, command, "ssh exec");
        let child = Command::new("ssh")
            .args(self.args(host, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemoteError::Spawn(e.to_string()))?;

        let output = match tokio::time::timeout(self.command_timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|e| RemoteError::Spawn(e.to_string()))?,
            Err(_) => {
                return Err(RemoteError::Timeout {
                    host: host.hostname.clone(),
                    secs: self.command_timeout.as_secs(),
                })
            }
        };

        // Killed by a signal: no exit code
        let exit_code = output.status.code().unwrap_or(-1);
        let result = CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if exit_code == SSH_CONNECT_FAILURE {
            return Err(RemoteError::Connect {
                host: host.hostname.clone(),
                reason: result.failure_summary(),
            });
        }
        Ok(result)
    }

    async fn is_reachable(&self, host: &Host) -> bool {
        let target = (host.address.as_str(), self.config.port);
        matches!(
            tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(target)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_core::Role;
    use std::path::PathBuf;

    fn executor() -> SshExecutor {
        let config = SshConfig {
            user: "ops".into(),
            port: 2222,
            identity_file: Some(PathBuf::from("/etc/rollout/id_ed25519")),
            options: vec!["UserKnownHostsFile=/dev/null".into()],
            ..SshConfig::default()
        };
        SshExecutor::new(config, Duration::from_secs(60))
    }

    #[test]
    fn args_target_host_address() {
        let host = Host::new("wk-01", "10.0.0.21", Role::Worker);
        let args = executor().args(&host, "uname -r");
        assert!(args.contains(&"ops@10.0.0.21".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"/etc/rollout/id_ed25519".to_string()));
        assert!(args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("uname -r"));
        let dashdash = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(dashdash, args.len() - 2);
    }

    #[tokio::test]
    async fn unreachable_port_reports_false() {
        // Bind then drop to obtain a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = SshConfig {
            port,
            connect_timeout_secs: 1,
            ..SshConfig::default()
        };
        let exec = SshExecutor::new(config, Duration::from_secs(5));
        let host = Host::new("ghost", "127.0.0.1", Role::Edge);
        assert!(!exec.is_reachable(&host).await);
    }

    #[tokio::test]
    async fn listening_port_reports_true() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = SshConfig {
            port,
            connect_timeout_secs: 1,
            ..SshConfig::default()
        };
        let exec = SshExecutor::new(config, Duration::from_secs(5));
        let host = Host::new("alive", "127.0.0.1", Role::Edge);
        assert!(exec.is_reachable(&host).await);
    }
}
