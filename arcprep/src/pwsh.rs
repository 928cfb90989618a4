//! Running PowerShell snippets that answer with `ConvertTo-Json`.

use crate::{Error, Result};
use rustrc::client::{Client, CommandOutput};
use rustrc::powershell::PowerShell;
use rustrc::process::ProcessConfig;
use serde_json::Value;

/// Extracts the JSON document from a script's stdout. Leading noise such as
/// module import banners is skipped; empty output is `None`.
pub fn parse_json_output(stdout: &str) -> Result<Option<Value>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(Some(value));
    }

    let start = trimmed
        .find(['{', '['])
        .ok_or_else(|| Error::CheckExecution(format!("expected JSON output, got: {}", trimmed)))?;
    Ok(Some(serde_json::from_str(&trimmed[start..])?))
}

/// Maps a failed script run to an error carrying whatever it printed.
pub fn ensure_success(tool: &str, output: &CommandOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    let stderr = output.stderr_lossy();
    Err(Error::ExternalTool {
        tool: tool.to_string(),
        code: output.status_code,
        output: if stderr.is_empty() {
            output.stdout_lossy()
        } else {
            stderr
        },
    })
}

pub async fn run_json(
    client: &Client<ProcessConfig>,
    shell: &str,
    script: &str,
) -> Result<Option<Value>> {
    let command = PowerShell::new(script).executable(shell).command();
    let output = client.exec(&command).await?;
    ensure_success(shell, &output)?;
    parse_json_output(&String::from_utf8_lossy(&output.stdout))
}

/// PowerShell source for the agent executable path on a device.
pub const AZCMAGENT_PS_PATH: &str =
    "(Join-Path $env:ProgramW6432 'AzureConnectedMachineAgent\\azcmagent.exe')";
