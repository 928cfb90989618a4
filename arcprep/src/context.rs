//! State accumulated over one validation run.

use crate::types::{AuthResult, CheckResult, ResourceProviderStatus};
use std::collections::BTreeMap;

pub const UNKNOWN_OS: &str = "Unknown OS";

/// Check results per device, in execution order.
pub type DeviceResultSet = BTreeMap<String, Vec<CheckResult>>;

#[derive(Debug, Clone, Default)]
pub struct OsVersionMap(BTreeMap<String, String>);

impl OsVersionMap {
    pub fn record<D: Into<String>, L: Into<String>>(&mut self, device: D, label: L) {
        self.0.insert(device.into(), label.into());
    }

    pub fn label(&self, device: &str) -> &str {
        self.0.get(device).map(String::as_str).unwrap_or(UNKNOWN_OS)
    }
}

/// Everything the reporter needs, passed explicitly instead of living in
/// process wide state.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub results: DeviceResultSet,
    pub os_versions: OsVersionMap,
    pub auth: AuthResult,
    pub providers: ResourceProviderStatus,
}

impl RunContext {
    pub fn new(auth: AuthResult, providers: ResourceProviderStatus) -> Self {
        Self {
            auth,
            providers,
            ..Default::default()
        }
    }

    /// Stores a device's results. Returns false if the device was already
    /// recorded; the first set of results is kept.
    pub fn record_device(
        &mut self,
        device: &str,
        results: Vec<CheckResult>,
        os_label: Option<String>,
    ) -> bool {
        if self.results.contains_key(device) {
            return false;
        }
        if let Some(label) = os_label {
            self.os_versions.record(device, label);
        }
        self.results.insert(device.to_string(), results);
        true
    }

    pub fn all_results(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.values().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.results.values().all(Vec::is_empty)
    }
}
