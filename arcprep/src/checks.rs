//! The per-device prerequisite battery.
//!
//! Each check turns one probe answer into one or more [`CheckResult`]s.
//! Evaluation is kept in pure functions so the rules can be tested without
//! a device.

use crate::executor::{DeviceExecutor, Probe};
use crate::types::{Check, CheckResult, Severity, ValidationDepth};
use crate::Result;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

pub const HTTPS_PORT: u16 = 443;

pub const REQUIRED_ENDPOINTS: [&str; 6] = [
    "management.azure.com",
    "login.microsoftonline.com",
    "login.windows.net",
    "pas.windows.net",
    "gbl.his.arc.azure.com",
    "guestnotificationservice.azure.com",
];

pub const OPTIONAL_ENDPOINTS: [&str; 5] = [
    "aka.ms",
    "download.microsoft.com",
    "packages.microsoft.com",
    "dc.services.visualstudio.com",
    "winatp-gw-eus.microsoft.com",
];

const MDE_EXTENSION_SUFFIX: &str = "mde.windows";

#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub depth: ValidationDepth,
    pub min_powershell: (u32, u32),
    pub required_endpoints: Vec<String>,
    pub optional_endpoints: Vec<String>,
    pub endpoint_port: u16,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            depth: ValidationDepth::Basic,
            min_powershell: (5, 1),
            required_endpoints: REQUIRED_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
            optional_endpoints: OPTIONAL_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
            endpoint_port: HTTPS_PORT,
        }
    }
}

impl CheckOptions {
    pub fn with_depth(depth: ValidationDepth) -> Self {
        Self {
            depth,
            ..Default::default()
        }
    }

    /// Adds the regional guest configuration endpoint for `region`.
    pub fn with_region(mut self, region: &str) -> Self {
        let region = region.trim().to_ascii_lowercase().replace(' ', "");
        if !region.is_empty() {
            self.required_endpoints
                .push(format!("{}-gas.guestconfiguration.azure.com", region));
        }
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PowerShellInfo {
    pub major: Option<u32>,
    pub minor: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OsInfo {
    pub caption: Option<String>,
    pub version: Option<String>,
    pub build_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleInfo {
    pub installed: bool,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentInfo {
    pub installed: bool,
    pub status: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointInfo {
    pub reachable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TlsInfo {
    pub tls12_enabled: bool,
    pub protocols: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyInfo {
    pub policy: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceInfo {
    pub installed: bool,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtensionInfo {
    pub name: String,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtensionsInfo {
    pub agent_installed: bool,
    #[serde(default)]
    pub extensions: Vec<ExtensionInfo>,
}

/// A verdict before it is attached to a device.
pub type Finding = (Severity, String);

pub fn evaluate_powershell(info: &PowerShellInfo, minimum: (u32, u32)) -> Finding {
    let (Some(major), Some(minor)) = (info.major, info.minor) else {
        return (
            Severity::Error,
            "Could not determine the PowerShell version".to_string(),
        );
    };
    let found = format!("PowerShell {}.{}", major, minor);
    if (major, minor) >= minimum {
        (Severity::Ok, found)
    } else if major == minimum.0 {
        (
            Severity::Warning,
            format!("{} is older than {}.{}", found, minimum.0, minimum.1),
        )
    } else {
        (
            Severity::Error,
            format!("{} is below the required {}.{}", found, minimum.0, minimum.1),
        )
    }
}

fn version_pair(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

/// Returns the finding and the label kept for the report.
pub fn evaluate_os(info: &OsInfo) -> (Finding, String) {
    let caption = info
        .caption
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("Unknown OS");
    let label = match &info.build_number {
        Some(build) if !build.is_empty() => format!("{} (build {})", caption, build),
        _ => caption.to_string(),
    };

    if !caption.to_ascii_lowercase().contains("windows") {
        return (
            (Severity::Error, format!("{} is not a supported operating system", caption)),
            label,
        );
    }

    let finding = match info.version.as_deref().and_then(version_pair) {
        Some((major, _)) if major >= 10 => (Severity::Ok, format!("{} is supported", caption)),
        Some((6, 2)) | Some((6, 3)) => (
            Severity::Warning,
            format!("{} is only in extended support", caption),
        ),
        Some(_) => (
            Severity::Error,
            format!("{} is older than the supported versions", caption),
        ),
        None => (
            Severity::Error,
            format!("Could not determine the version of {}", caption),
        ),
    };
    (finding, label)
}

pub fn evaluate_az_module(info: &ModuleInfo) -> Finding {
    match (info.installed, &info.version) {
        (true, Some(version)) => (Severity::Ok, format!("Az.Accounts {} installed", version)),
        (true, None) => (Severity::Ok, "Az.Accounts installed".to_string()),
        (false, _) => (
            Severity::Warning,
            "Az.Accounts module is not installed".to_string(),
        ),
    }
}

pub fn evaluate_arc_agent(info: &AgentInfo, depth: ValidationDepth) -> Finding {
    if !info.installed {
        let severity = if depth.includes_mde() {
            Severity::Error
        } else {
            Severity::Warning
        };
        return (severity, "Azure Connected Machine agent is not installed".to_string());
    }
    let version = info.version.as_deref().unwrap_or("unknown version");
    match info.status.as_deref() {
        Some(status) if status.eq_ignore_ascii_case("Connected") => (
            Severity::Ok,
            format!("Agent {} is connected", version),
        ),
        status => (
            Severity::Warning,
            format!(
                "Agent {} is installed but {}",
                version,
                status
                    .map(|s| format!("reports '{}'", s))
                    .unwrap_or_else(|| "is not connected".to_string())
            ),
        ),
    }
}

pub fn evaluate_endpoint(host: &str, port: u16, required: bool, info: &EndpointInfo) -> Finding {
    if info.reachable {
        (Severity::Ok, format!("{}:{} reachable", host, port))
    } else if required {
        (Severity::Error, format!("{}:{} is not reachable", host, port))
    } else {
        (
            Severity::Warning,
            format!("{}:{} (optional) is not reachable", host, port),
        )
    }
}

pub fn evaluate_tls(info: &TlsInfo) -> Finding {
    let protocols = info.protocols.as_deref().unwrap_or("unknown");
    if info.tls12_enabled {
        (Severity::Ok, format!("TLS 1.2 enabled ({})", protocols))
    } else {
        (
            Severity::Warning,
            format!("TLS 1.2 is disabled for clients ({})", protocols),
        )
    }
}

pub fn evaluate_execution_policy(info: &PolicyInfo) -> Finding {
    let policy = info.policy.trim();
    if policy.eq_ignore_ascii_case("Restricted") || policy.eq_ignore_ascii_case("AllSigned") {
        (
            Severity::Warning,
            format!("Execution policy {} blocks onboarding scripts", policy),
        )
    } else {
        (Severity::Ok, format!("Execution policy {}", policy))
    }
}

pub fn evaluate_mde_service(info: &ServiceInfo) -> Finding {
    match (info.installed, info.status.as_deref()) {
        (false, _) => (
            Severity::Error,
            "Defender for Endpoint service (Sense) is not installed".to_string(),
        ),
        (true, Some(status)) if status.eq_ignore_ascii_case("Running") => {
            (Severity::Ok, "Sense service is running".to_string())
        }
        (true, status) => (
            Severity::Warning,
            format!("Sense service is {}", status.unwrap_or("not running")),
        ),
    }
}

pub fn evaluate_mde_extension(info: &ExtensionsInfo) -> Finding {
    if !info.agent_installed {
        return (
            Severity::Info,
            "Azure Arc agent not installed; MDE extension not applicable".to_string(),
        );
    }
    let extension = info
        .extensions
        .iter()
        .find(|e| e.name.to_ascii_lowercase().ends_with(MDE_EXTENSION_SUFFIX));
    match extension {
        None => (
            Severity::Info,
            "MDE.Windows extension is not installed".to_string(),
        ),
        Some(ext) => match ext.status.as_deref() {
            Some(status)
                if status.eq_ignore_ascii_case("success")
                    || status.eq_ignore_ascii_case("succeeded") =>
            {
                (Severity::Ok, format!("{} provisioned", ext.name))
            }
            status => (
                Severity::Warning,
                format!("{} status is {}", ext.name, status.unwrap_or("unknown")),
            ),
        },
    }
}

/// Results of one device plus its OS label, if the OS probe answered.
#[derive(Debug, Clone, Default)]
pub struct DeviceChecks {
    pub results: Vec<CheckResult>,
    pub os_label: Option<String>,
}

pub struct DeviceCheckRunner {
    executor: Arc<dyn DeviceExecutor>,
    options: CheckOptions,
}

impl DeviceCheckRunner {
    pub fn new(executor: Arc<dyn DeviceExecutor>, options: CheckOptions) -> Self {
        Self { executor, options }
    }

    pub fn options(&self) -> &CheckOptions {
        &self.options
    }

    async fn probe<T: DeserializeOwned>(&self, device: &str, probe: &Probe) -> Result<T> {
        let value = self.executor.query(device, probe).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Runs one probe and records its finding, or an Error row when the
    /// probe fails.
    async fn check<T, F>(
        &self,
        out: &mut Vec<CheckResult>,
        device: &str,
        check: Check,
        probe: Probe,
        evaluate: F,
    ) -> Option<T>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> Finding,
    {
        match self.probe::<T>(device, &probe).await {
            Ok(info) => {
                let (severity, details) = evaluate(&info);
                out.push(CheckResult::new(device, check, severity, details));
                Some(info)
            }
            Err(e) => {
                warn!("{} check failed on {}: {}", check, device, e);
                out.push(CheckResult::new(device, check, Severity::Error, e.to_string()));
                None
            }
        }
    }

    pub async fn run_checks(&self, device: &str) -> DeviceChecks {
        let depth = self.options.depth;
        let mut out = Vec::new();

        if let Err(e) = self.executor.reachable(device).await {
            warn!("{} is unreachable: {}", device, e);
            return DeviceChecks {
                results: vec![CheckResult::new(
                    device,
                    Check::DeviceConnectivity,
                    Severity::Error,
                    e.to_string(),
                )],
                os_label: None,
            };
        }
        out.push(CheckResult::new(
            device,
            Check::DeviceConnectivity,
            Severity::Ok,
            "Device is reachable",
        ));

        let minimum = self.options.min_powershell;
        self.check(&mut out, device, Check::PowerShellVersion, Probe::PowerShellVersion, |i: &PowerShellInfo| {
            evaluate_powershell(i, minimum)
        })
        .await;

        let mut os_label = None;
        self.check(&mut out, device, Check::OsVersion, Probe::OsVersion, |i: &OsInfo| {
            let (finding, label) = evaluate_os(i);
            os_label = Some(label);
            finding
        })
        .await;

        self.check(&mut out, device, Check::AzModule, Probe::AzModule, evaluate_az_module)
            .await;

        self.check(&mut out, device, Check::AzureArcAgent, Probe::ArcAgent, |i: &AgentInfo| {
            evaluate_arc_agent(i, depth)
        })
        .await;

        let port = self.options.endpoint_port;
        let mut endpoints: Vec<(&String, bool)> = self
            .options
            .required_endpoints
            .iter()
            .map(|e| (e, true))
            .collect();
        if depth.includes_extended_network() {
            endpoints.extend(self.options.optional_endpoints.iter().map(|e| (e, false)));
        }
        for (host, required) in endpoints {
            let probe = Probe::Endpoint {
                host: host.clone(),
                port,
            };
            self.check(&mut out, device, Check::NetworkConnectivity, probe, |i: &EndpointInfo| {
                evaluate_endpoint(host, port, required, i)
            })
            .await;
        }
        if depth.includes_extended_network() {
            self.check(&mut out, device, Check::TlsVersion, Probe::TlsVersion, evaluate_tls)
                .await;
        }

        self.check(
            &mut out,
            device,
            Check::ExecutionPolicy,
            Probe::ExecutionPolicy,
            evaluate_execution_policy,
        )
        .await;

        if depth.includes_mde() {
            self.check(&mut out, device, Check::MdeService, Probe::MdeService, evaluate_mde_service)
                .await;
            self.check(
                &mut out,
                device,
                Check::MdeExtension,
                Probe::ArcExtensions,
                evaluate_mde_extension,
            )
            .await;
        }

        debug!("{} produced {} results", device, out.len());
        DeviceChecks {
            results: out,
            os_label,
        }
    }
}
