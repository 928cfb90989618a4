use crate::logging::{log_skipped, log_success};
use crate::pwsh::ensure_success;
use crate::{Error, Result};
use log::info;
use rustrc::client::{Client, Command, CommandOutput};
use rustrc::process::ProcessConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::{fs::File, io::AsyncWriteExt};

pub const AGENT_DOWNLOAD_URL: &str = "https://aka.ms/AzureConnectedMachineAgent";
const MSI_NAME: &str = "AzureConnectedMachineAgent.msi";

const MSI_SUCCESS: u32 = 0;
const MSI_REBOOT_INITIATED: u32 = 1641;
const MSI_REBOOT_REQUIRED: u32 = 3010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled,
    Installed { reboot_required: bool },
}

pub fn msiexec_command(msi: &Path, log: &Path) -> Command {
    Command::new("msiexec.exe")
        .arg("/i")
        .arg(msi.to_string_lossy())
        .arg("/qn")
        .arg("/l*v")
        .arg(log.to_string_lossy())
}

/// Maps the msiexec exit status to "reboot required", or an error for any
/// status other than success and the two reboot codes.
pub fn interpret_msiexec_exit(output: &CommandOutput) -> Result<bool> {
    match output.status_code {
        Some(MSI_SUCCESS) => Ok(false),
        Some(MSI_REBOOT_REQUIRED) | Some(MSI_REBOOT_INITIATED) => Ok(true),
        _ => ensure_success("msiexec", output).map(|_| false),
    }
}

pub struct AgentInstaller {
    client: Client<ProcessConfig>,
    http: reqwest::Client,
    url: String,
    agent_path: PathBuf,
}

impl AgentInstaller {
    pub async fn new(agent_path: PathBuf, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::connect(ProcessConfig::new(timeout)).await?,
            http: reqwest::Client::new(),
            url: AGENT_DOWNLOAD_URL.to_string(),
            agent_path,
        })
    }

    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = url.into();
        self
    }

    pub fn is_installed(&self) -> bool {
        self.agent_path.is_file()
    }

    pub async fn download(&self, dest: &Path) -> Result<u64> {
        info!("Downloading {}", self.url);
        let response = self.http.get(&self.url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let mut file = File::create(dest).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(bytes.len() as u64)
    }

    /// Downloads and installs the agent unless it is already present.
    /// The msiexec log is written to `log_dir`.
    pub async fn install(&self, force: bool, log_dir: &Path) -> Result<InstallOutcome> {
        if self.is_installed() && !force {
            log_skipped("agent installation", self.agent_path.display(), "already installed");
            return Ok(InstallOutcome::AlreadyInstalled);
        }
        if !cfg!(windows) {
            return Err(Error::ArgumentError(
                "the Windows agent package can only be installed on Windows".to_string(),
            ));
        }

        let staging = tempfile::tempdir()?;
        let msi = staging.path().join(MSI_NAME);
        let size = self.download(&msi).await?;
        info!("Downloaded {} bytes to {}", size, msi.display());

        let log = log_dir.join("AzureConnectedMachineAgent_install.log");
        let output = self.client.exec(&msiexec_command(&msi, &log)).await?;
        let reboot_required = interpret_msiexec_exit(&output)?;
        log_success("installed Azure Connected Machine agent, log", log.display());
        Ok(InstallOutcome::Installed { reboot_required })
    }
}
