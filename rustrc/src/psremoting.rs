//! PowerShell remoting (WinRM) sessions driven through a local PowerShell host.
//!
//! Every command is wrapped in `Invoke-Command` against the configured
//! computer. The remote exit code and output are carried back in a small
//! object so the local process can reproduce them.

use crate::client::{Command, CommandOutput, Config, Session};
use crate::powershell::{literal, PowerShell, WINDOWS_POWERSHELL};
use crate::process::{ProcessConfig, ProcessSession};
use tokio::time::Duration;

#[derive(Clone)]
pub struct PsCredential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PsCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PsCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PsRemotingConfig {
    pub computer_name: String,
    pub credential: Option<PsCredential>,
    pub use_ssl: bool,
    pub local_shell: String,
    pub timeout: Duration,
}

impl PsRemotingConfig {
    pub fn new<S: Into<String>>(computer_name: S, timeout: Duration) -> Self {
        Self {
            computer_name: computer_name.into(),
            credential: None,
            use_ssl: false,
            local_shell: WINDOWS_POWERSHELL.to_string(),
            timeout,
        }
    }

    pub fn credential<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.credential = Some(PsCredential {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn use_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn local_shell<S: Into<String>>(mut self, shell: S) -> Self {
        self.local_shell = shell.into();
        self
    }

    fn connection_params(&self) -> String {
        let mut params = format!("$params = @{{ ComputerName = {} }}\n", literal(&self.computer_name));
        if self.use_ssl {
            params.push_str("$params.UseSSL = $true\n");
        }
        if let Some(cred) = &self.credential {
            params.push_str(&format!(
                "$params.Credential = New-Object System.Management.Automation.PSCredential({}, (ConvertTo-SecureString {} -AsPlainText -Force))\n",
                literal(&cred.username),
                literal(&cred.password)
            ));
        }
        params
    }

    pub(crate) fn probe_script(&self) -> String {
        let mut script = String::from("$ErrorActionPreference = 'Stop'\n");
        script.push_str(&self.connection_params());
        script.push_str("$params.Remove('Credential') | Out-Null\n");
        script.push_str("$params.Remove('UseSSL') | Out-Null\n");
        script.push_str("Test-WSMan @params | Out-Null\n");
        script
    }

    pub(crate) fn invoke_script(&self, cmd: &Command) -> String {
        let args = cmd
            .get_args()
            .iter()
            .map(|a| literal(a))
            .collect::<Vec<_>>()
            .join(", ");

        let mut script = String::from("$ErrorActionPreference = 'Stop'\n");
        script.push_str(&self.connection_params());
        script.push_str(&format!(
            "$params.ArgumentList = @({}, [string[]]@({}))\n",
            literal(cmd.get_cmd()),
            args
        ));
        script.push_str(
            "$params.ScriptBlock = { param($exe, $argv) $out = & $exe @argv 2>&1 | Out-String; [pscustomobject]@{ Output = $out; Code = $LASTEXITCODE } }\n",
        );
        script.push_str("$result = Invoke-Command @params\n");
        script.push_str("[Console]::Out.Write($result.Output)\n");
        script.push_str("if ($null -eq $result.Code) { exit 0 } else { exit $result.Code }\n");
        script
    }
}

impl Config for PsRemotingConfig {
    type SessionType = PsRemotingSession;

    async fn create_session(&self) -> crate::Result<Self::SessionType> {
        let local = ProcessConfig::new(self.timeout).create_session().await?;
        let probe = PowerShell::new(self.probe_script())
            .executable(self.local_shell.as_str())
            .command();
        let output = local.exec(&probe).await?;
        if !output.success() {
            return Err(crate::Error::ConnectionError(format!(
                "WinRM is not reachable on {}: {}",
                self.computer_name,
                output.stderr_lossy()
            )));
        }

        Ok(PsRemotingSession {
            config: self.clone(),
            local,
        })
    }
}

pub struct PsRemotingSession {
    config: PsRemotingConfig,
    local: ProcessSession,
}

impl Session for PsRemotingSession {
    async fn exec(&self, cmd: &Command) -> crate::Result<CommandOutput> {
        let mut wrapped = PowerShell::new(self.config.invoke_script(cmd))
            .executable(self.config.local_shell.as_str())
            .command();
        if let Some(timeout) = cmd.get_timeout() {
            wrapped = wrapped.timeout(timeout);
        }
        self.local.exec(&wrapped).await
    }

    async fn disconnect(&mut self) -> crate::Result<()> {
        Ok(())
    }
}
