// ABOUTME: Transport implementation driving the system OpenSSH client.
// ABOUTME: ssh-keyscan for host keys, ssh for auth/exec, shell helpers for files.

use crate::error::{Result, SshError};
use crate::fingerprint::fingerprint_keyscan_line;
use crate::transport::{shell_quote, Connection, ExecOutput, FileChannel, FileStat, Transport};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Transport backed by the system `ssh` and `ssh-keyscan` binaries.
///
/// Host key verification is handled by the sync engine's own pinning, so
/// the client runs with strict host key checking disabled and a null
/// known-hosts file. Authentication uses the fixed sync key only.
pub struct OpenSshTransport {
    key_path: PathBuf,
}

impl OpenSshTransport {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>> {
        // ssh-keyscan doubles as the reachability probe: a host that
        // cannot be reached yields no key line.
        let output = Command::new("ssh-keyscan")
            .arg("-p")
            .arg(port.to_string())
            .arg("-t")
            .arg("ed25519,rsa,ecdsa")
            .arg(host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SshError::Spawn {
                program: "ssh-keyscan".to_string(),
                source: e,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let fingerprint = stdout
            .lines()
            .find_map(|line| fingerprint_keyscan_line(host, line).ok())
            .ok_or_else(|| SshError::Connect {
                host: host.to_string(),
                port,
                message: "no host key received".to_string(),
            })?;

        Ok(Box::new(OpenSshConnection {
            host: host.to_string(),
            port,
            key_path: self.key_path.clone(),
            fingerprint,
            username: None,
        }))
    }
}

struct OpenSshConnection {
    host: String,
    port: u16,
    key_path: PathBuf,
    fingerprint: String,
    username: Option<String>,
}

/// Options common to every ssh invocation.
fn base_ssh_args(key_path: &PathBuf, port: u16) -> Vec<String> {
    vec![
        "-i".to_string(),
        key_path.display().to_string(),
        "-p".to_string(),
        port.to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "LogLevel=ERROR".to_string(),
    ]
}

async fn run_ssh(
    key_path: &PathBuf,
    port: u16,
    host: &str,
    username: &str,
    remote_command: &str,
    stdin: Option<&[u8]>,
) -> Result<ExecOutput> {
    let mut cmd = Command::new("ssh");
    cmd.args(base_ssh_args(key_path, port))
        .arg("-l")
        .arg(username)
        .arg(host)
        .arg("--")
        .arg(remote_command)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| SshError::Spawn {
        program: "ssh".to_string(),
        source: e,
    })?;

    if let Some(data) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle.write_all(data).await.map_err(|e| SshError::Exec {
                message: format!("failed to stream stdin: {e}"),
            })?;
        }
    }

    let output = child.wait_with_output().await.map_err(|e| SshError::Exec {
        message: format!("failed to collect output: {e}"),
    })?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code(),
    })
}

impl OpenSshConnection {
    fn authenticated_user(&self) -> Result<&str> {
        self.username.as_deref().ok_or_else(|| SshError::Exec {
            message: "connection is not authenticated".to_string(),
        })
    }
}

#[async_trait]
impl Connection for OpenSshConnection {
    async fn host_fingerprint(&self) -> Result<String> {
        Ok(self.fingerprint.clone())
    }

    async fn authenticate(&mut self, username: &str) -> Result<()> {
        let probe = run_ssh(&self.key_path, self.port, &self.host, username, "true", None).await?;
        if probe.success() {
            self.username = Some(username.to_string());
            Ok(())
        } else {
            Err(SshError::AuthenticationFailed {
                username: username.to_string(),
            })
        }
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let username = self.authenticated_user()?.to_string();
        run_ssh(&self.key_path, self.port, &self.host, &username, command, None).await
    }

    async fn open_files(&self) -> Result<Box<dyn FileChannel>> {
        let username = self.authenticated_user()?.to_string();
        Ok(Box::new(OpenSshFileChannel {
            host: self.host.clone(),
            port: self.port,
            key_path: self.key_path.clone(),
            username,
        }))
    }
}

struct OpenSshFileChannel {
    host: String,
    port: u16,
    key_path: PathBuf,
    username: String,
}

impl OpenSshFileChannel {
    async fn run(&self, remote_command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput> {
        run_ssh(
            &self.key_path,
            self.port,
            &self.host,
            &self.username,
            remote_command,
            stdin,
        )
        .await
    }
}

#[async_trait]
impl FileChannel for OpenSshFileChannel {
    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let quoted = shell_quote(path);
        let output = self
            .run(
                &format!("if [ -d {quoted} ]; then echo dir; elif [ -e {quoted} ]; then echo file; fi"),
                None,
            )
            .await?;
        match output.stdout.trim() {
            "dir" => Ok(Some(FileStat { is_dir: true })),
            "file" => Ok(Some(FileStat { is_dir: false })),
            _ => Ok(None),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let output = self.run(&format!("cat {}", shell_quote(path)), None).await?;
        if output.success() {
            Ok(output.stdout.into_bytes())
        } else if output.stderr.contains("No such file") {
            Err(SshError::FileNotFound {
                path: path.to_string(),
            })
        } else {
            Err(SshError::FileOperation {
                path: path.to_string(),
                message: output.stderr.trim().to_string(),
            })
        }
    }

    async fn write(&self, path: &str, data: &[u8], mode: u32) -> Result<()> {
        let quoted = shell_quote(path);
        let command = format!("cat > {quoted} && chmod {mode:o} {quoted}");
        let output = self.run(&command, Some(data)).await?;
        if output.success() {
            Ok(())
        } else {
            Err(SshError::FileOperation {
                path: path.to_string(),
                message: output.stderr.trim().to_string(),
            })
        }
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let output = self
            .run(&format!("rm -- {}", shell_quote(path)), None)
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(SshError::FileOperation {
                path: path.to_string(),
                message: output.stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_args_disable_interactive_prompts() {
        let args = base_ssh_args(&PathBuf::from("/etc/keywarden/keys-sync"), 22);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
    }

    #[test]
    fn test_base_args_carry_identity_and_port() {
        let args = base_ssh_args(&PathBuf::from("/k"), 2222);
        let identity = args.iter().position(|a| a == "-i").expect("should have -i");
        assert_eq!(args[identity + 1], "/k");
        let port = args.iter().position(|a| a == "-p").expect("should have -p");
        assert_eq!(args[port + 1], "2222");
    }

    #[tokio::test]
    async fn test_exec_requires_authentication() {
        let conn = OpenSshConnection {
            host: "web1".to_string(),
            port: 22,
            key_path: PathBuf::from("/k"),
            fingerprint: "fp".to_string(),
            username: None,
        };
        let result = conn.exec("true").await;
        assert!(matches!(result, Err(SshError::Exec { .. })));
    }

    #[tokio::test]
    async fn test_open_files_requires_authentication() {
        let conn = OpenSshConnection {
            host: "web1".to_string(),
            port: 22,
            key_path: PathBuf::from("/k"),
            fingerprint: "fp".to_string(),
            username: None,
        };
        assert!(conn.open_files().await.is_err());
    }
}
