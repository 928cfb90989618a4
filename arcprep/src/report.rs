//! Consolidated multi-device report.

use crate::context::RunContext;
use crate::remediation::{remediation_for, Remediation};
use crate::types::{AuthResult, Check, CheckResult, ResourceProviderStatus, Severity};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Warning checks that are grouped across devices next to the errors.
pub const HIGH_PRIORITY_WARNINGS: [Check; 3] = [
    Check::AzureArcAgent,
    Check::NetworkConnectivity,
    Check::PowerShellVersion,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub total: usize,
    pub ok: usize,
    pub info: usize,
    pub warning: usize,
    pub error: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        self.total += 1;
        match severity {
            Severity::Ok => self.ok += 1,
            Severity::Info => self.info += 1,
            Severity::Warning => self.warning += 1,
            Severity::Error => self.error += 1,
        }
    }

    pub fn from_results<'a, I: IntoIterator<Item = &'a CheckResult>>(results: I) -> Self {
        let mut counts = Self::default();
        for result in results {
            counts.add(result.result);
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Ready,
    Warnings,
    Errors,
}

impl DeviceStatus {
    pub fn from_counts(counts: &SeverityCounts) -> Self {
        if counts.error > 0 {
            DeviceStatus::Errors
        } else if counts.warning > 0 {
            DeviceStatus::Warnings
        } else {
            DeviceStatus::Ready
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceStatus::Ready => "Ready",
            DeviceStatus::Warnings => "Warnings",
            DeviceStatus::Errors => "Errors",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub device: String,
    pub os: String,
    pub counts: SeverityCounts,
    pub status: DeviceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub check: Check,
    pub severity: Severity,
    pub details: String,
    pub remediation: &'static Remediation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIssues {
    pub device: String,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueGroup {
    pub check: Check,
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Ready,
    ReadyWithMinorItems,
    PartiallyReady,
    NotReady,
    NoResults,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ready => "ready",
            Verdict::ReadyWithMinorItems => "ready with minor items",
            Verdict::PartiallyReady => "partially ready",
            Verdict::NotReady => "not ready",
            Verdict::NoResults => "no results collected",
        }
    }

    /// Whether onboarding can go ahead.
    pub fn is_ready(&self) -> bool {
        matches!(self, Verdict::Ready | Verdict::ReadyWithMinorItems)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn verdict(
    totals: &SeverityCounts,
    auth: &AuthResult,
    providers: &ResourceProviderStatus,
) -> Verdict {
    if totals.total == 0 {
        Verdict::NoResults
    } else if totals.error > 0 || !auth.success {
        Verdict::NotReady
    } else if !providers.fully_registered() {
        Verdict::PartiallyReady
    } else if totals.warning > 0 {
        Verdict::ReadyWithMinorItems
    } else {
        Verdict::Ready
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: String,
    pub totals: SeverityCounts,
    pub devices: Vec<DeviceSummary>,
    pub issues: Vec<DeviceIssues>,
    pub error_groups: Vec<IssueGroup>,
    pub warning_groups: Vec<IssueGroup>,
    pub auth: AuthResult,
    pub providers: ResourceProviderStatus,
    pub verdict: Verdict,
}

fn group_by_check<'a, I>(results: I) -> Vec<IssueGroup>
where
    I: IntoIterator<Item = &'a CheckResult>,
{
    let mut groups: BTreeMap<&Check, BTreeSet<&str>> = BTreeMap::new();
    for result in results {
        groups
            .entry(&result.check)
            .or_default()
            .insert(result.device.as_str());
    }
    groups
        .into_iter()
        .map(|(check, devices)| IssueGroup {
            check: check.clone(),
            devices: devices.into_iter().map(str::to_string).collect(),
        })
        .collect()
}

pub fn render(ctx: &RunContext) -> Report {
    let totals = SeverityCounts::from_results(ctx.all_results());

    let devices = ctx
        .results
        .iter()
        .map(|(device, results)| {
            let counts = SeverityCounts::from_results(results);
            DeviceSummary {
                device: device.clone(),
                os: ctx.os_versions.label(device).to_string(),
                status: DeviceStatus::from_counts(&counts),
                counts,
            }
        })
        .collect();

    let issues = ctx
        .results
        .iter()
        .filter_map(|(device, results)| {
            let issues: Vec<Issue> = results
                .iter()
                .filter(|r| r.result.is_issue())
                .map(|r| Issue {
                    check: r.check.clone(),
                    severity: r.result,
                    details: r.details.clone(),
                    remediation: remediation_for(&r.check),
                })
                .collect();
            (!issues.is_empty()).then(|| DeviceIssues {
                device: device.clone(),
                issues,
            })
        })
        .collect();

    let error_groups = group_by_check(ctx.all_results().filter(|r| r.result == Severity::Error));
    let warning_groups = group_by_check(ctx.all_results().filter(|r| {
        r.result == Severity::Warning && HIGH_PRIORITY_WARNINGS.contains(&r.check)
    }));

    Report {
        generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        verdict: verdict(&totals, &ctx.auth, &ctx.providers),
        totals,
        devices,
        issues,
        error_groups,
        warning_groups,
        auth: ctx.auth.clone(),
        providers: ctx.providers.clone(),
    }
}

/// Text rendering of a [`Report`], colored when `color` is set.
pub struct ReportView<'a> {
    pub report: &'a Report,
    pub color: bool,
}

impl<'a> ReportView<'a> {
    pub fn new(report: &'a Report, color: bool) -> Self {
        Self { report, color }
    }

    fn severity(&self, text: &str, severity: Severity) -> String {
        if !self.color {
            return text.to_string();
        }
        match severity {
            Severity::Ok => text.green().to_string(),
            Severity::Info => text.cyan().to_string(),
            Severity::Warning => text.yellow().to_string(),
            Severity::Error => text.red().to_string(),
        }
    }

    fn heading(&self, text: &str) -> String {
        if self.color {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn verdict(&self) -> String {
        let verdict = self.report.verdict;
        let severity = match verdict {
            Verdict::Ready => Severity::Ok,
            Verdict::ReadyWithMinorItems | Verdict::PartiallyReady => Severity::Warning,
            Verdict::NotReady => Severity::Error,
            Verdict::NoResults => Severity::Info,
        };
        self.severity(&verdict.as_str().to_uppercase(), severity)
    }
}

impl fmt::Display for ReportView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(f, "{}", self.heading("Azure Arc prerequisite report"))?;
        writeln!(f, "Generated: {}", report.generated_at)?;

        if report.verdict == Verdict::NoResults {
            writeln!(f)?;
            return writeln!(f, "Overall: {}", self.verdict());
        }

        let auth = if report.auth.success {
            self.severity(&report.auth.message, Severity::Ok)
        } else {
            self.severity(&report.auth.message, Severity::Error)
        };
        writeln!(f, "Azure context: {}", auth)?;
        if !report.providers.checked {
            writeln!(f, "Resource providers: not checked")?;
        } else if report.providers.unregistered.is_empty() {
            writeln!(f, "Resource providers: {}", self.severity("all registered", Severity::Ok))?;
        } else {
            let missing: Vec<&str> = report.providers.unregistered.iter().map(String::as_str).collect();
            writeln!(
                f,
                "Resource providers: {}{}",
                self.severity(&format!("not registered: {}", missing.join(", ")), Severity::Warning),
                if report.providers.registered_this_session {
                    " (registration requested; it can take several minutes)"
                } else {
                    ""
                }
            )?;
        }

        let t = &report.totals;
        writeln!(f)?;
        writeln!(
            f,
            "Checks: {} total, {} OK, {} warnings, {} errors, {} info",
            t.total,
            self.severity(&t.ok.to_string(), Severity::Ok),
            self.severity(&t.warning.to_string(), Severity::Warning),
            self.severity(&t.error.to_string(), Severity::Error),
            t.info
        )?;

        writeln!(f)?;
        writeln!(f, "{}", self.heading("Devices"))?;
        let width = report
            .devices
            .iter()
            .map(|d| d.device.len())
            .max()
            .unwrap_or(6)
            .max(6);
        for device in &report.devices {
            let status = match device.status {
                DeviceStatus::Ready => Severity::Ok,
                DeviceStatus::Warnings => Severity::Warning,
                DeviceStatus::Errors => Severity::Error,
            };
            writeln!(
                f,
                "  {:<width$}  {:<8}  ok {:>2}  warn {:>2}  err {:>2}  {}",
                device.device,
                self.severity(&device.status.to_string(), status),
                device.counts.ok,
                device.counts.warning,
                device.counts.error,
                device.os,
                width = width
            )?;
        }

        if !report.issues.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", self.heading("Issues"))?;
            for device in &report.issues {
                writeln!(f, "  {}", device.device)?;
                for issue in &device.issues {
                    writeln!(
                        f,
                        "    [{}] {}: {}",
                        self.severity(issue.severity.as_str(), issue.severity),
                        issue.check,
                        issue.details
                    )?;
                    writeln!(f, "        Fix: {}", issue.remediation.action)?;
                }
            }
        }

        for (title, groups, severity) in [
            ("Errors across devices", &report.error_groups, Severity::Error),
            ("Priority warnings across devices", &report.warning_groups, Severity::Warning),
        ] {
            if groups.is_empty() {
                continue;
            }
            writeln!(f)?;
            writeln!(f, "{}", self.heading(title))?;
            for group in groups {
                writeln!(
                    f,
                    "  {} ({}): {}",
                    self.severity(group.check.as_str(), severity),
                    group.devices.len(),
                    group.devices.join(", ")
                )?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Overall: {}", self.verdict())
    }
}
