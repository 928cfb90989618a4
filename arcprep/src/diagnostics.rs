//! Agent diagnostics collection through `azcmagent`.

use crate::logging::{log_failure, log_success};
use crate::{Error, Result};
use async_trait::async_trait;
use log::{info, warn};
use rustrc::client::{Client, Command, CommandOutput};
use rustrc::process::ProcessConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Nominal phases of `azcmagent logs`: label, end percentage and duration.
pub const LOG_PHASES: [(&str, u8, Duration); 4] = [
    ("Collecting agent logs", 20, Duration::from_secs(10)),
    ("Collecting extension logs", 60, Duration::from_secs(30)),
    ("Compressing archive", 85, Duration::from_secs(30)),
    ("Finalising archive", 99, Duration::from_secs(20)),
];

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Estimated progress of the archive step after `elapsed`. Purely
/// cosmetic; stays below 100 until the job really ends.
pub fn heuristic_percent(elapsed: Duration) -> (u8, &'static str) {
    let mut start_pct = 0u8;
    let mut remaining = elapsed;
    for (label, end_pct, nominal) in LOG_PHASES {
        if remaining < nominal {
            let span = f64::from(end_pct - start_pct);
            let fraction = remaining.as_secs_f64() / nominal.as_secs_f64();
            return (start_pct + (span * fraction) as u8, label);
        }
        remaining -= nominal;
        start_pct = end_pct;
    }
    let (label, end_pct, _) = LOG_PHASES[LOG_PHASES.len() - 1];
    (end_pct, label)
}

#[async_trait]
pub trait AgentCli: Send + Sync {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput>;

    fn is_installed(&self) -> bool;
}

pub fn default_agent_path() -> PathBuf {
    if cfg!(windows) {
        let program_files =
            std::env::var("ProgramW6432").unwrap_or_else(|_| "C:\\Program Files".to_string());
        Path::new(&program_files)
            .join("AzureConnectedMachineAgent")
            .join("azcmagent.exe")
    } else {
        PathBuf::from("/opt/azcmagent/bin/azcmagent")
    }
}

pub struct AzcmAgent {
    client: Client<ProcessConfig>,
    path: PathBuf,
}

impl AzcmAgent {
    pub async fn new(path: PathBuf, default_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::connect(ProcessConfig::new(default_timeout)).await?,
            path,
        })
    }
}

#[async_trait]
impl AgentCli for AzcmAgent {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let command = Command::new(self.path.to_string_lossy())
            .args(args.iter().cloned())
            .timeout(timeout);
        Ok(self.client.exec(&command).await?)
    }

    fn is_installed(&self) -> bool {
        self.path.is_file()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticStep {
    pub name: String,
    pub success: bool,
    pub exit_code: Option<u32>,
    pub output: String,
}

impl DiagnosticStep {
    fn from_result(name: &str, result: Result<CommandOutput>) -> Self {
        match result {
            Ok(output) => {
                let text = if output.success() || output.stderr.is_empty() {
                    output.stdout_lossy()
                } else {
                    output.stderr_lossy()
                };
                Self {
                    name: name.to_string(),
                    success: output.success(),
                    exit_code: output.status_code,
                    output: text,
                }
            }
            Err(e) => Self::failed(name, e.to_string()),
        }
    }

    fn failed(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            exit_code: None,
            output: reason,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsOutcome {
    pub steps: Vec<DiagnosticStep>,
    pub archive: Option<PathBuf>,
    pub archive_entries: Option<usize>,
}

impl DiagnosticsOutcome {
    pub fn success(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.success)
    }
}

pub fn archive_entry_count(path: &Path) -> Result<usize> {
    let file = std::fs::File::open(path)?;
    Ok(zip::ZipArchive::new(file)?.len())
}

pub struct DiagnosticsCollector {
    agent: Arc<dyn AgentCli>,
    step_timeout: Duration,
    logs_timeout: Duration,
}

impl DiagnosticsCollector {
    pub fn new(agent: Arc<dyn AgentCli>, step_timeout: Duration, logs_timeout: Duration) -> Self {
        Self {
            agent,
            step_timeout,
            logs_timeout,
        }
    }

    async fn step(&self, name: &str, args: &[&str]) -> DiagnosticStep {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        info!("Running azcmagent {}", args.join(" "));
        let step = DiagnosticStep::from_result(name, self.agent.run(&args, self.step_timeout).await);
        if step.success {
            log_success("ran", name);
        } else {
            warn!(
                "{} failed (exit code {}): {}",
                name,
                crate::error::exit_code(&step.exit_code),
                step.output
            );
        }
        step
    }

    /// Runs the archive step in the background and reports estimated
    /// progress until it ends or `logs_timeout` passes.
    async fn collect_logs(
        &self,
        archive: &Path,
        progress: &mut (dyn FnMut(u8, &str) + Send),
    ) -> DiagnosticStep {
        const NAME: &str = "Log archive";
        let args = vec![
            "logs".to_string(),
            "--full".to_string(),
            "--output".to_string(),
            archive.to_string_lossy().to_string(),
        ];
        let agent = Arc::clone(&self.agent);
        let limit = self.logs_timeout;
        let mut job = tokio::spawn(async move { agent.run(&args, limit).await });

        let start = Instant::now();
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        let joined = loop {
            tokio::select! {
                joined = &mut job => break Some(joined),
                _ = ticker.tick() => {
                    if start.elapsed() > limit {
                        job.abort();
                        break None;
                    }
                    let (pct, phase) = heuristic_percent(start.elapsed());
                    progress(pct, phase);
                }
            }
        };

        let step = match joined {
            None => DiagnosticStep::failed(NAME, Error::from(rustrc::Error::Timeout(limit)).to_string()),
            Some(Err(e)) => DiagnosticStep::failed(NAME, format!("background job ended abnormally: {}", e)),
            Some(Ok(result)) => DiagnosticStep::from_result(NAME, result),
        };
        if step.success {
            progress(100, "Done");
        }
        step
    }

    pub async fn collect(
        &self,
        region: &str,
        archive: &Path,
        progress: &mut (dyn FnMut(u8, &str) + Send),
    ) -> DiagnosticsOutcome {
        let mut outcome = DiagnosticsOutcome::default();
        if !self.agent.is_installed() {
            outcome.steps.push(DiagnosticStep::failed(
                "Agent",
                "azcmagent is not installed on this machine".to_string(),
            ));
            return outcome;
        }

        outcome
            .steps
            .push(self.step("Connectivity check", &["check", "--location", region]).await);
        outcome.steps.push(self.step("Agent status", &["show"]).await);
        outcome
            .steps
            .push(self.step("Extension list", &["extension", "list"]).await);

        let logs = self.collect_logs(archive, progress).await;
        let archived = logs.success;
        outcome.steps.push(logs);

        if archived && archive.is_file() {
            match archive_entry_count(archive) {
                Ok(entries) => {
                    log_success("collected log archive", archive.display());
                    outcome.archive_entries = Some(entries);
                }
                Err(e) => log_failure("read log archive", archive.display(), &e),
            }
            outcome.archive = Some(archive.to_path_buf());
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    struct FakeAgent {
        installed: bool,
        fail_verb: Option<&'static str>,
        logs_delay: Duration,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeAgent {
        fn new() -> Self {
            Self {
                installed: true,
                fail_verb: None,
                logs_delay: Duration::from_millis(10),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    fn write_archive(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for name in ["himds.log", "azcmagent.log", "ext/mde.log"] {
            zip.start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"log line\n").unwrap();
        }
        zip.finish().unwrap();
    }

    #[async_trait]
    impl AgentCli for FakeAgent {
        async fn run(&self, args: &[String], _timeout: Duration) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            let code = if Some(args[0].as_str()) == self.fail_verb { 1 } else { 0 };
            if args[0] == "logs" {
                tokio::time::sleep(self.logs_delay).await;
                if code == 0 {
                    write_archive(Path::new(&args[3]));
                }
            }
            Ok(CommandOutput {
                stdout: format!("{} done", args[0]).into_bytes(),
                stderr: if code == 0 { vec![] } else { b"failed".to_vec() },
                status_code: Some(code),
            })
        }

        fn is_installed(&self) -> bool {
            self.installed
        }
    }

    #[test]
    fn test_heuristic_phases() {
        assert_eq!(heuristic_percent(Duration::ZERO).0, 0);
        assert_eq!(heuristic_percent(Duration::from_secs(5)), (10, "Collecting agent logs"));
        assert_eq!(heuristic_percent(Duration::from_secs(10)).0, 20);
        assert_eq!(heuristic_percent(Duration::from_secs(25)).0, 40);
        assert_eq!(heuristic_percent(Duration::from_secs(3600)).0, 99);
        let mut last = 0;
        for secs in 0..120 {
            let (pct, _) = heuristic_percent(Duration::from_secs(secs));
            assert!(pct >= last);
            last = pct;
        }
    }

    #[tokio::test]
    async fn test_full_collection() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("AzureArcLogs.zip");
        let agent = Arc::new(FakeAgent::new());
        let collector = DiagnosticsCollector::new(agent.clone(), Duration::from_secs(5), Duration::from_secs(5));

        let mut seen = Vec::new();
        let outcome = collector
            .collect("westeurope", &archive, &mut |pct, _| seen.push(pct))
            .await;

        assert!(outcome.success());
        assert_eq!(outcome.steps.len(), 4);
        assert_eq!(outcome.archive_entries, Some(3));
        assert_eq!(seen.last(), Some(&100));
        let calls = agent.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["check", "--location", "westeurope"]);
        assert_eq!(calls[2], vec!["extension", "list"]);
        assert_eq!(calls[3][..2], ["logs".to_string(), "--full".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_step_is_reported_and_others_run() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(FakeAgent {
            fail_verb: Some("check"),
            ..FakeAgent::new()
        });
        let collector = DiagnosticsCollector::new(agent, Duration::from_secs(5), Duration::from_secs(5));
        let outcome = collector
            .collect("eastus", &dir.path().join("logs.zip"), &mut |_, _| {})
            .await;
        assert!(!outcome.success());
        assert!(!outcome.steps[0].success);
        assert_eq!(outcome.steps[0].exit_code, Some(1));
        assert_eq!(outcome.steps[0].output, "failed");
        assert!(outcome.steps[3].success);
    }

    #[tokio::test]
    async fn test_logs_timeout_is_a_failed_step() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(FakeAgent {
            logs_delay: Duration::from_secs(30),
            ..FakeAgent::new()
        });
        let collector =
            DiagnosticsCollector::new(agent, Duration::from_secs(5), Duration::from_millis(600));
        let outcome = collector
            .collect("eastus", &dir.path().join("logs.zip"), &mut |_, _| {})
            .await;
        let logs = outcome.steps.last().unwrap();
        assert!(!logs.success);
        assert!(logs.output.contains("timed out") || logs.output.contains("Timeout"));
        assert!(outcome.archive.is_none());
    }

    #[tokio::test]
    async fn test_missing_agent() {
        let agent = Arc::new(FakeAgent {
            installed: false,
            ..FakeAgent::new()
        });
        let collector = DiagnosticsCollector::new(agent.clone(), Duration::from_secs(1), Duration::from_secs(1));
        let outcome = collector
            .collect("eastus", Path::new("unused.zip"), &mut |_, _| {})
            .await;
        assert!(!outcome.success());
        assert!(agent.calls.lock().unwrap().is_empty());
    }
}
