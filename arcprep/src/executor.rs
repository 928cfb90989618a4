//! Running probes on target devices.
//!
//! A [`Probe`] is a small PowerShell snippet that answers with one JSON
//! document. [`RemoteExecutor`] picks a transport per device (the local
//! host, PowerShell remoting or SSH), keeps the opened client for later
//! probes and returns the parsed JSON.

use crate::pwsh::{ensure_success, parse_json_output, AZCMAGENT_PS_PATH};
use crate::{Error, Result};
use async_trait::async_trait;
use log::{debug, info};
use rustrc::client::{Client, Command, CommandOutput};
use rustrc::powershell::{literal, PowerShell, WINDOWS_POWERSHELL};
use rustrc::process::ProcessConfig;
use rustrc::psremoting::PsRemotingConfig;
use rustrc::ssh::SSHConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

pub const WINRM_HTTP_PORT: u16 = 5985;
pub const WINRM_HTTPS_PORT: u16 = 5986;
pub const SSH_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Probe {
    PowerShellVersion,
    OsVersion,
    AzModule,
    ArcAgent,
    Endpoint { host: String, port: u16 },
    TlsVersion,
    ExecutionPolicy,
    MdeService,
    ArcExtensions,
}

impl Probe {
    pub fn script(&self) -> String {
        let body = match self {
            Probe::PowerShellVersion => {
                "$PSVersionTable.PSVersion | Select-Object Major, Minor | ConvertTo-Json -Compress"
                    .to_string()
            }
            Probe::OsVersion => "Get-CimInstance -ClassName Win32_OperatingSystem | \
                 Select-Object Caption, Version, BuildNumber | ConvertTo-Json -Compress"
                .to_string(),
            Probe::AzModule => "$m = Get-Module -ListAvailable -Name Az.Accounts | \
                 Sort-Object Version -Descending | Select-Object -First 1\n\
                 if ($m) { [pscustomobject]@{ Installed = $true; Version = $m.Version.ToString() } | ConvertTo-Json -Compress }\n\
                 else { [pscustomobject]@{ Installed = $false; Version = $null } | ConvertTo-Json -Compress }"
                .to_string(),
            Probe::ArcAgent => format!(
                "$p = {}\n\
                 if (-not (Test-Path $p)) {{ [pscustomobject]@{{ Installed = $false; Status = $null; Version = $null }} | ConvertTo-Json -Compress; return }}\n\
                 $show = & $p show -j 2>$null | Out-String | ConvertFrom-Json\n\
                 [pscustomobject]@{{ Installed = $true; Status = $show.status; Version = $show.agentVersion }} | ConvertTo-Json -Compress",
                AZCMAGENT_PS_PATH
            ),
            Probe::Endpoint { host, port } => format!(
                "$r = Test-NetConnection -ComputerName {} -Port {} -WarningAction SilentlyContinue\n\
                 [pscustomobject]@{{ Reachable = [bool]$r.TcpTestSucceeded }} | ConvertTo-Json -Compress",
                literal(host),
                port
            ),
            Probe::TlsVersion => "$key = 'HKLM:\\SYSTEM\\CurrentControlSet\\Control\\SecurityProviders\\SCHANNEL\\Protocols\\TLS 1.2\\Client'\n\
                 $enabled = $true\n\
                 if (Test-Path $key) { $v = Get-ItemProperty -Path $key -ErrorAction SilentlyContinue; if ($null -ne $v.Enabled -and $v.Enabled -eq 0) { $enabled = $false } }\n\
                 [pscustomobject]@{ Tls12Enabled = $enabled; Protocols = [Net.ServicePointManager]::SecurityProtocol.ToString() } | ConvertTo-Json -Compress"
                .to_string(),
            Probe::ExecutionPolicy => {
                "[pscustomobject]@{ Policy = (Get-ExecutionPolicy).ToString() } | ConvertTo-Json -Compress"
                    .to_string()
            }
            Probe::MdeService => "$s = Get-Service -Name Sense -ErrorAction SilentlyContinue\n\
                 if ($s) { [pscustomobject]@{ Installed = $true; Status = $s.Status.ToString() } | ConvertTo-Json -Compress }\n\
                 else { [pscustomobject]@{ Installed = $false; Status = $null } | ConvertTo-Json -Compress }"
                .to_string(),
            Probe::ArcExtensions => format!(
                "$root = Join-Path $env:SystemDrive 'Packages\\Plugins'\n\
                 $ext = @()\n\
                 if (Test-Path $root) {{\n\
                   foreach ($d in Get-ChildItem -Path $root -Directory) {{\n\
                     $state = $null\n\
                     $f = Get-ChildItem -Path $d.FullName -Recurse -Filter *.status -ErrorAction SilentlyContinue | Sort-Object LastWriteTime -Descending | Select-Object -First 1\n\
                     if ($f) {{ try {{ $state = @(Get-Content -Path $f.FullName -Raw | ConvertFrom-Json)[0].status.status }} catch {{ }} }}\n\
                     $ext += [pscustomobject]@{{ Name = $d.Name; Status = $state }}\n\
                   }}\n\
                 }}\n\
                 [pscustomobject]@{{ AgentInstalled = (Test-Path {}); Extensions = @($ext) }} | ConvertTo-Json -Compress -Depth 4",
                AZCMAGENT_PS_PATH
            ),
        };
        format!("$ErrorActionPreference = 'Stop'\n{}", body)
    }
}

#[async_trait]
pub trait DeviceExecutor: Send + Sync {
    /// Succeeds when the device can be reached over some transport.
    async fn reachable(&self, device: &str) -> Result<()>;

    async fn query(&self, device: &str, probe: &Probe) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    /// Local host by name, otherwise whatever remote port answers first.
    #[default]
    Auto,
    Local,
    WinRm,
    Ssh,
}

#[derive(Clone, Default)]
pub struct RemoteOptions {
    pub transport: Transport,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub use_ssl: bool,
    /// PowerShell host on the controller; `pwsh` works off Windows.
    pub local_shell: Option<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl RemoteOptions {
    pub fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
            ..Default::default()
        }
    }

    fn shell(&self) -> &str {
        self.local_shell.as_deref().unwrap_or(WINDOWS_POWERSHELL)
    }
}

impl std::fmt::Debug for RemoteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteOptions")
            .field("transport", &self.transport)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ssh_key", &self.ssh_key)
            .field("use_ssl", &self.use_ssl)
            .field("local_shell", &self.local_shell)
            .finish()
    }
}

pub enum DynamicClient {
    Local(Client<ProcessConfig>),
    WinRm(Client<PsRemotingConfig>),
    Ssh(Client<SSHConfig>),
}

impl DynamicClient {
    async fn exec(&self, cmd: &Command) -> Result<CommandOutput> {
        match self {
            DynamicClient::Local(client) => client.exec(cmd).await,
            DynamicClient::WinRm(client) => client.exec(cmd).await,
            DynamicClient::Ssh(client) => client.exec(cmd).await,
        }
        .map_err(Error::from)
    }

    fn kind(&self) -> &'static str {
        match self {
            DynamicClient::Local(_) => "local",
            DynamicClient::WinRm(_) => "WinRM",
            DynamicClient::Ssh(_) => "SSH",
        }
    }
}

pub fn is_local_device(device: &str) -> bool {
    let device = device.trim();
    if ["localhost", "127.0.0.1", "::1", "."]
        .iter()
        .any(|local| device.eq_ignore_ascii_case(local))
    {
        return true;
    }
    ["COMPUTERNAME", "HOSTNAME"].iter().any(|var| {
        std::env::var(var)
            .map(|name| !name.is_empty() && name.eq_ignore_ascii_case(device))
            .unwrap_or(false)
    })
}

pub async fn tcp_connect(device: &str, port: u16, limit: Duration) -> bool {
    matches!(
        timeout(limit, TcpStream::connect((device, port))).await,
        Ok(Ok(_))
    )
}

/// Opened clients per device name, shared by all probes of a run.
#[derive(Default)]
pub struct SessionPool {
    sessions: Mutex<HashMap<String, Arc<DynamicClient>>>,
}

impl SessionPool {
    pub async fn get(&self, device: &str) -> Option<Arc<DynamicClient>> {
        self.sessions
            .lock()
            .await
            .get(&device.to_ascii_lowercase())
            .cloned()
    }

    pub async fn insert(&self, device: &str, client: DynamicClient) -> Arc<DynamicClient> {
        let client = Arc::new(client);
        self.sessions
            .lock()
            .await
            .insert(device.to_ascii_lowercase(), Arc::clone(&client));
        client
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub struct RemoteExecutor {
    options: RemoteOptions,
    pool: SessionPool,
}

impl RemoteExecutor {
    pub fn new(options: RemoteOptions) -> Self {
        Self {
            options,
            pool: SessionPool::default(),
        }
    }

    async fn choose_transport(&self, device: &str) -> Result<Transport> {
        match self.options.transport {
            Transport::Auto => {}
            fixed => return Ok(fixed),
        }
        if is_local_device(device) {
            return Ok(Transport::Local);
        }

        let limit = self.options.connect_timeout;
        let winrm_port = if self.options.use_ssl {
            WINRM_HTTPS_PORT
        } else {
            WINRM_HTTP_PORT
        };
        if tcp_connect(device, winrm_port, limit).await {
            return Ok(Transport::WinRm);
        }
        if self.options.username.is_some() && tcp_connect(device, SSH_PORT, limit).await {
            return Ok(Transport::Ssh);
        }
        Err(Error::DeviceUnreachable(format!(
            "{} did not answer on port {}{}",
            device,
            winrm_port,
            if self.options.username.is_some() {
                format!(" or {}", SSH_PORT)
            } else {
                String::new()
            }
        )))
    }

    async fn connect(&self, device: &str) -> Result<DynamicClient> {
        let options = &self.options;
        let client = match self.choose_transport(device).await? {
            Transport::Local | Transport::Auto => {
                DynamicClient::Local(Client::connect(ProcessConfig::new(options.command_timeout)).await?)
            }
            Transport::WinRm => {
                let mut config = PsRemotingConfig::new(device, options.command_timeout)
                    .use_ssl(options.use_ssl)
                    .local_shell(options.shell());
                if let (Some(user), Some(password)) = (&options.username, &options.password) {
                    config = config.credential(user.as_str(), password.as_str());
                }
                DynamicClient::WinRm(Client::connect(config).await?)
            }
            Transport::Ssh => {
                let user = options.username.clone().ok_or_else(|| {
                    Error::ArgumentError("SSH needs a user name (--user)".to_string())
                })?;
                let config = match (&options.ssh_key, &options.password) {
                    (Some(key), _) => {
                        SSHConfig::key(user, (device, SSH_PORT), key.clone(), options.connect_timeout)
                            .await?
                    }
                    (None, Some(password)) => {
                        SSHConfig::password(
                            user,
                            password.clone(),
                            (device, SSH_PORT),
                            options.connect_timeout,
                        )
                        .await?
                    }
                    (None, None) => {
                        return Err(Error::ArgumentError(
                            "SSH needs a key (--ssh-key) or a password".to_string(),
                        ))
                    }
                };
                DynamicClient::Ssh(Client::connect(config).await?)
            }
        };
        info!("Connected to {} over {}", device, client.kind());
        Ok(client)
    }

    async fn client_for(&self, device: &str) -> Result<Arc<DynamicClient>> {
        if let Some(client) = self.pool.get(device).await {
            return Ok(client);
        }
        let client = self.connect(device).await?;
        Ok(self.pool.insert(device, client).await)
    }

    fn probe_command(&self, client: &DynamicClient, probe: &Probe) -> Command {
        let shell = match client {
            DynamicClient::Local(_) => self.options.shell(),
            DynamicClient::WinRm(_) | DynamicClient::Ssh(_) => WINDOWS_POWERSHELL,
        };
        PowerShell::new(probe.script()).executable(shell).command()
    }
}

#[async_trait]
impl DeviceExecutor for RemoteExecutor {
    async fn reachable(&self, device: &str) -> Result<()> {
        self.client_for(device)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                Error::DeviceUnreachable(_) | Error::ArgumentError(_) => e,
                other => Error::DeviceUnreachable(format!("{}: {}", device, other)),
            })
    }

    async fn query(&self, device: &str, probe: &Probe) -> Result<Value> {
        let client = self.client_for(device).await?;
        let command = self.probe_command(&client, probe);
        debug!("Running {:?} on {}", probe, device);
        let output = client.exec(&command).await?;
        ensure_success("powershell", &output)?;
        parse_json_output(&String::from_utf8_lossy(&output.stdout))?.ok_or_else(|| {
            Error::CheckExecution(format!("{:?} returned no output on {}", probe, device))
        })
    }
}
