use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Outcome of a single check. Ordering follows display priority,
/// `Error` being the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "OK")]
    Ok,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }

    pub fn is_issue(&self) -> bool {
        matches!(self, Severity::Warning | Severity::Error)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a prerequisite check.
///
/// Unknown names survive as `Other` so results produced by newer check
/// sets can still be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Check {
    DeviceConnectivity,
    PowerShellVersion,
    OsVersion,
    AzModule,
    AzureArcAgent,
    NetworkConnectivity,
    TlsVersion,
    ExecutionPolicy,
    MdeService,
    MdeExtension,
    Other(String),
}

impl Check {
    pub fn as_str(&self) -> &str {
        match self {
            Check::DeviceConnectivity => "Device Connectivity",
            Check::PowerShellVersion => "PowerShell Version",
            Check::OsVersion => "OS Version",
            Check::AzModule => "Az Module",
            Check::AzureArcAgent => "Azure Arc Agent",
            Check::NetworkConnectivity => "Network Connectivity",
            Check::TlsVersion => "TLS Version",
            Check::ExecutionPolicy => "Execution Policy",
            Check::MdeService => "MDE Service",
            Check::MdeExtension => "MDE Extension",
            Check::Other(name) => name,
        }
    }
}

impl From<&str> for Check {
    fn from(name: &str) -> Self {
        match name {
            "Device Connectivity" => Check::DeviceConnectivity,
            "PowerShell Version" => Check::PowerShellVersion,
            "OS Version" => Check::OsVersion,
            "Az Module" => Check::AzModule,
            "Azure Arc Agent" => Check::AzureArcAgent,
            "Network Connectivity" => Check::NetworkConnectivity,
            "TLS Version" => Check::TlsVersion,
            "Execution Policy" => Check::ExecutionPolicy,
            "MDE Service" => Check::MdeService,
            "MDE Extension" => Check::MdeExtension,
            other => Check::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Check {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Check {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Check::from(name.as_str()))
    }
}

/// One outcome of one check on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub device: String,
    pub check: Check,
    pub result: Severity,
    pub details: String,
}

impl CheckResult {
    pub fn new<D: Into<String>, S: Into<String>>(
        device: D,
        check: Check,
        result: Severity,
        details: S,
    ) -> Self {
        Self {
            device: device.into(),
            check,
            result,
            details: details.into(),
        }
    }
}

/// How much of the check battery to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationDepth {
    #[default]
    Basic,
    /// Adds the Defender for Endpoint checks; a missing Arc agent is fatal.
    Critical,
    /// Adds optional endpoints and the TLS configuration check.
    Comprehensive,
}

impl ValidationDepth {
    pub fn includes_mde(&self) -> bool {
        matches!(self, ValidationDepth::Critical | ValidationDepth::Comprehensive)
    }

    pub fn includes_extended_network(&self) -> bool {
        matches!(self, ValidationDepth::Comprehensive)
    }
}

impl FromStr for ValidationDepth {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ValidationDepth::Basic),
            "critical" => Ok(ValidationDepth::Critical),
            "comprehensive" => Ok(ValidationDepth::Comprehensive),
            other => Err(crate::Error::ArgumentError(format!(
                "unknown validation depth '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ValidationDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationDepth::Basic => write!(f, "Basic"),
            ValidationDepth::Critical => write!(f, "Critical"),
            ValidationDepth::Comprehensive => write!(f, "Comprehensive"),
        }
    }
}

/// Outcome of authentication and subscription selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing)]
    pub subscription_id: Option<String>,
    pub subscription_name: Option<String>,
}

impl AuthResult {
    pub fn succeeded<N: Into<String>, I: Into<String>>(name: N, id: I) -> Self {
        let name = name.into();
        Self {
            success: true,
            message: format!("Using subscription '{}'", name),
            subscription_id: Some(id.into()),
            subscription_name: Some(name),
        }
    }

    pub fn failed<M: Into<String>>(message: M) -> Self {
        Self {
            success: false,
            message: message.into(),
            subscription_id: None,
            subscription_name: None,
        }
    }
}

impl Default for AuthResult {
    fn default() -> Self {
        Self::failed("Authentication was not attempted")
    }
}

/// Registration state of the required resource providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceProviderStatus {
    pub checked: bool,
    pub registered_this_session: bool,
    pub unregistered: BTreeSet<String>,
}

impl ResourceProviderStatus {
    pub fn fully_registered(&self) -> bool {
        self.checked && self.unregistered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Info > Severity::Ok);
        assert_eq!(
            [Severity::Ok, Severity::Error, Severity::Info].iter().max(),
            Some(&Severity::Error)
        );
    }

    #[test]
    fn test_check_names_round_trip_through_taxonomy() {
        assert_eq!(Check::from("Azure Arc Agent"), Check::AzureArcAgent);
        assert_eq!(Check::from("MDE Service").as_str(), "MDE Service");
        assert_eq!(
            Check::from("Hotpatch Enrollment"),
            Check::Other("Hotpatch Enrollment".to_string())
        );
    }

    #[test]
    fn test_check_result_serializes_names() {
        let row = CheckResult::new("srv01", Check::OsVersion, Severity::Ok, "Windows Server 2022");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["check"], "OS Version");
        assert_eq!(json["result"], "OK");
    }

    #[test]
    fn test_depth_parsing() {
        assert_eq!(
            "Comprehensive".parse::<ValidationDepth>().unwrap(),
            ValidationDepth::Comprehensive
        );
        assert!("deep".parse::<ValidationDepth>().is_err());
        assert!(ValidationDepth::Critical.includes_mde());
        assert!(!ValidationDepth::Basic.includes_mde());
    }

    #[test]
    fn test_auth_result_hides_subscription_id() {
        let auth = AuthResult::succeeded("Production", "00000000-1111-2222-3333-444444444444");
        let json = serde_json::to_string(&auth).unwrap();
        assert!(json.contains("Production"));
        assert!(!json.contains("00000000-1111"));
    }

    #[test]
    fn test_provider_status_requires_check() {
        let status = ResourceProviderStatus::default();
        assert!(!status.fully_registered());
        let status = ResourceProviderStatus {
            checked: true,
            ..Default::default()
        };
        assert!(status.fully_registered());
    }
}
