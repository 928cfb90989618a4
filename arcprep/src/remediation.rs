use crate::types::Check;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remediation {
    pub summary: &'static str,
    pub action: &'static str,
}

pub static GENERIC: Remediation = Remediation {
    summary: "Unrecognised check",
    action: "Review the log file for details and consult the Azure Arc onboarding documentation",
};

static REMEDIATIONS: Lazy<HashMap<Check, Remediation>> = Lazy::new(|| {
    HashMap::from([
        (
            Check::DeviceConnectivity,
            Remediation {
                summary: "Device could not be reached",
                action: "Verify name resolution and firewall rules, and enable WinRM (Enable-PSRemoting) or OpenSSH on the device",
            },
        ),
        (
            Check::PowerShellVersion,
            Remediation {
                summary: "PowerShell is too old",
                action: "Install Windows Management Framework 5.1 or PowerShell 7",
            },
        ),
        (
            Check::OsVersion,
            Remediation {
                summary: "Operating system is not supported",
                action: "Upgrade to Windows Server 2016 or later; 2012/2012 R2 need Extended Security Updates",
            },
        ),
        (
            Check::AzModule,
            Remediation {
                summary: "Az PowerShell module missing",
                action: "Run Install-Module -Name Az -Scope AllUsers",
            },
        ),
        (
            Check::AzureArcAgent,
            Remediation {
                summary: "Azure Connected Machine agent missing or disconnected",
                action: "Install the agent (arcprep install) and run 'azcmagent connect', or 'azcmagent check' to troubleshoot",
            },
        ),
        (
            Check::NetworkConnectivity,
            Remediation {
                summary: "Required Azure endpoint unreachable",
                action: "Allow outbound HTTPS (443) to the listed endpoint through firewalls and proxies",
            },
        ),
        (
            Check::TlsVersion,
            Remediation {
                summary: "TLS 1.2 disabled",
                action: "Enable TLS 1.2 under SCHANNEL\\Protocols and set SchUseStrongCrypto for .NET",
            },
        ),
        (
            Check::ExecutionPolicy,
            Remediation {
                summary: "Execution policy blocks scripts",
                action: "Run Set-ExecutionPolicy RemoteSigned -Scope LocalMachine",
            },
        ),
        (
            Check::MdeService,
            Remediation {
                summary: "Defender for Endpoint sensor not running",
                action: "Onboard the device to Defender for Endpoint and start the Sense service",
            },
        ),
        (
            Check::MdeExtension,
            Remediation {
                summary: "MDE.Windows extension not healthy",
                action: "Reinstall the extension from Defender for Cloud or check the extension logs under C:\\Packages\\Plugins",
            },
        ),
    ])
});

/// Remediation hint for a check; unknown checks get [`GENERIC`].
pub fn remediation_for(check: &Check) -> &'static Remediation {
    REMEDIATIONS.get(check).unwrap_or(&GENERIC)
}
