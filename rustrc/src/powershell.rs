//! Builds `powershell.exe -EncodedCommand` invocations.
//!
//! Scripts are shipped as base64 encoded UTF-16LE so that quoting survives
//! cmd.exe, OpenSSH and WinRM hops unchanged.

use crate::client::Command;
use base64::{engine::general_purpose::STANDARD, Engine as _};

pub const WINDOWS_POWERSHELL: &str = "powershell.exe";

#[derive(Debug, Clone)]
pub struct PowerShell {
    executable: String,
    script: String,
}

impl PowerShell {
    pub fn new<S: Into<String>>(script: S) -> Self {
        Self {
            executable: WINDOWS_POWERSHELL.to_string(),
            script: script.into(),
        }
    }

    /// Use another host binary, e.g. `pwsh` on a Linux controller.
    pub fn executable<S: Into<String>>(mut self, executable: S) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn encode(script: &str) -> String {
        let bytes: Vec<u8> = script
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        STANDARD.encode(bytes)
    }

    pub fn command(&self) -> Command {
        Command::new(self.executable.as_str())
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-ExecutionPolicy")
            .arg("Bypass")
            .arg("-EncodedCommand")
            .arg(Self::encode(&self.script))
    }
}

/// Quotes a value as a PowerShell single-quoted literal.
pub fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_utf16le() {
        assert_eq!(PowerShell::encode("dir"), "ZABpAHIA");
    }

    #[test]
    fn test_command_shape() {
        let cmd = PowerShell::new("Get-Date").command();
        assert_eq!(cmd.get_cmd(), "powershell.exe");
        assert_eq!(cmd.get_args().len(), 6);
        assert_eq!(cmd.get_args()[4], "-EncodedCommand");
        assert_eq!(cmd.get_args()[5], PowerShell::encode("Get-Date"));
    }

    #[test]
    fn test_literal_escapes_quotes() {
        assert_eq!(literal("it's"), "'it''s'");
    }
}
