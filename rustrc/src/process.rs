//! Runs commands as child processes of the current host.

use crate::client::{Command, CommandOutput, Config, Session};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::Duration;

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub default_timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl ProcessConfig {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            working_dir: None,
        }
    }

    pub fn working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

impl Config for ProcessConfig {
    type SessionType = ProcessSession;

    async fn create_session(&self) -> crate::Result<Self::SessionType> {
        Ok(ProcessSession {
            config: self.clone(),
        })
    }
}

pub struct ProcessSession {
    config: ProcessConfig,
}

impl ProcessSession {
    async fn collect_output(mut child: Child) -> crate::Result<CommandOutput> {
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| crate::Error::CommandError("Could not capture stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| crate::Error::CommandError("Could not capture stderr".into()))?;

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let (stdout_res, stderr_res) = tokio::join!(
            stdout.read_to_end(&mut stdout_buf),
            stderr.read_to_end(&mut stderr_buf)
        );
        stdout_res?;
        stderr_res?;

        let status = child.wait().await?;

        Ok(CommandOutput {
            stdout: stdout_buf,
            stderr: stderr_buf,
            status_code: status.code().and_then(|c| u32::try_from(c).ok()),
        })
    }
}

impl Session for ProcessSession {
    async fn exec(&self, cmd: &Command) -> crate::Result<CommandOutput> {
        let mut process = TokioCommand::new(cmd.get_cmd());
        process
            .args(cmd.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            process.current_dir(dir);
        }

        let child = process.spawn()?;
        let limit = cmd.get_timeout().unwrap_or(self.config.default_timeout);

        match tokio::time::timeout(limit, Self::collect_output(child)).await {
            Ok(result) => result,
            Err(_) => Err(crate::Error::Timeout(limit)),
        }
    }

    async fn disconnect(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::cmd;

    #[tokio::test]
    async fn test_exec_success() {
        let client = Client::connect(ProcessConfig::default()).await.unwrap();
        let output = client.exec(&cmd!("echo", "hello")).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "hello");
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit_is_not_an_error() {
        let client = Client::connect(ProcessConfig::default()).await.unwrap();
        let output = client.exec(&cmd!("sh", "-c", "exit 3")).await.unwrap();
        assert_eq!(output.status_code, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_exec_missing_binary() {
        let client = Client::connect(ProcessConfig::default()).await.unwrap();
        let result = client.exec(&cmd!("nonexistentcommand")).await;
        assert!(matches!(result, Err(crate::Error::IoError(_))));
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let client = Client::connect(ProcessConfig::default()).await.unwrap();
        let result = client
            .exec(&cmd!("sleep", "5").timeout(Duration::from_millis(100)))
            .await;
        assert!(matches!(result, Err(crate::Error::Timeout(_))));
    }
}
