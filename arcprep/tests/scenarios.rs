use arcprep::auth::AuthSession;
use arcprep::azure::{AzureApi, Subscription};
use arcprep::checks::{CheckOptions, DeviceCheckRunner};
use arcprep::context::RunContext;
use arcprep::executor::{DeviceExecutor, Probe};
use arcprep::orchestrator::{OrchestratorOptions, PrerequisiteOrchestrator};
use arcprep::prompt::NonInteractive;
use arcprep::providers::ResourceProviderRegistrar;
use arcprep::report::{render, DeviceStatus, ReportView, Verdict};
use arcprep::types::{Check, Severity, ValidationDepth};
use arcprep::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FakeAzure {
    subscriptions: Vec<Subscription>,
    provider_state: &'static str,
    provider_calls: AtomicUsize,
}

impl FakeAzure {
    fn with_subscription(provider_state: &'static str) -> Self {
        Self {
            subscriptions: vec![Subscription {
                id: "00000000-1111-2222-3333-444444444444".to_string(),
                name: "Contoso Production".to_string(),
                state: Some("Enabled".to_string()),
            }],
            provider_state,
            provider_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AzureApi for FakeAzure {
    async fn current_account(&self) -> Result<Option<String>> {
        Ok(Some("operator@contoso.com".to_string()))
    }

    async fn login(&self) -> Result<()> {
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.clone())
    }

    async fn set_subscription(&self, _subscription_id: &str) -> Result<()> {
        Ok(())
    }

    async fn provider_state(&self, _namespace: &str) -> Result<String> {
        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.provider_state.to_string())
    }

    async fn register_provider(&self, _namespace: &str) -> Result<()> {
        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Devices whose name starts with `bad` refuse connections.
struct Lab {
    ps_minor: u32,
}

#[async_trait]
impl DeviceExecutor for Lab {
    async fn reachable(&self, device: &str) -> Result<()> {
        if device.starts_with("bad") {
            Err(Error::DeviceUnreachable(format!("{}: connection refused", device)))
        } else {
            Ok(())
        }
    }

    async fn query(&self, _device: &str, probe: &Probe) -> Result<Value> {
        Ok(match probe {
            Probe::PowerShellVersion => json!({"Major": 5, "Minor": self.ps_minor}),
            Probe::OsVersion => json!({
                "Caption": "Microsoft Windows Server 2019 Standard",
                "Version": "10.0.17763",
                "BuildNumber": "17763"
            }),
            Probe::AzModule => json!({"Installed": true, "Version": "2.12.1"}),
            Probe::ArcAgent => json!({"Installed": true, "Status": "Connected", "Version": "1.44"}),
            Probe::Endpoint { .. } => json!({"Reachable": true}),
            Probe::TlsVersion => json!({"Tls12Enabled": true, "Protocols": "Tls12"}),
            Probe::ExecutionPolicy => json!({"Policy": "RemoteSigned"}),
            Probe::MdeService => json!({"Installed": true, "Status": "Running"}),
            Probe::ArcExtensions => json!({"AgentInstalled": true, "Extensions": []}),
        })
    }
}

fn orchestrator(azure: Arc<FakeAzure>, lab: Lab) -> PrerequisiteOrchestrator {
    let api: Arc<dyn AzureApi> = azure;
    PrerequisiteOrchestrator::new(
        AuthSession::new(Arc::clone(&api), Box::new(NonInteractive)),
        ResourceProviderRegistrar::new(api),
        DeviceCheckRunner::new(Arc::new(lab), CheckOptions::with_depth(ValidationDepth::Basic)),
    )
}

fn devices(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        concurrency: 2,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_one_unreachable_device_makes_the_run_not_ready() {
    let azure = Arc::new(FakeAzure::with_subscription("Registered"));
    let ctx = orchestrator(azure, Lab { ps_minor: 1 })
        .run(&devices(&["ok-server", "bad-server"]), &options())
        .await
        .unwrap();

    let bad = &ctx.results["bad-server"];
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].check, Check::DeviceConnectivity);
    assert_eq!(bad[0].result, Severity::Error);
    assert!(ctx.results["ok-server"]
        .iter()
        .all(|r| r.result == Severity::Ok));

    let report = render(&ctx);
    assert_eq!(report.verdict, Verdict::NotReady);
    assert_eq!(report.totals.error, 1);
    let status = |name: &str| {
        report
            .devices
            .iter()
            .find(|d| d.device == name)
            .map(|d| d.status)
    };
    assert_eq!(status("ok-server"), Some(DeviceStatus::Ready));
    assert_eq!(status("bad-server"), Some(DeviceStatus::Errors));
    assert_eq!(report.error_groups.len(), 1);
    assert_eq!(report.error_groups[0].devices, vec!["bad-server"]);

    let text = ReportView::new(&report, false).to_string();
    assert!(text.contains("NOT READY"));
    assert!(text.contains("Contoso Production"));
    assert!(!text.contains("00000000-1111-2222-3333-444444444444"));
}

#[tokio::test]
async fn test_failed_authentication_skips_provider_checks() {
    let azure = Arc::new(FakeAzure {
        subscriptions: Vec::new(),
        ..FakeAzure::with_subscription("Registered")
    });
    let ctx = orchestrator(Arc::clone(&azure), Lab { ps_minor: 1 })
        .run(&devices(&["ok-server"]), &options())
        .await
        .unwrap();

    assert!(!ctx.auth.success);
    assert!(!ctx.providers.checked);
    assert_eq!(azure.provider_calls.load(Ordering::SeqCst), 0);
    assert_eq!(render(&ctx).verdict, Verdict::NotReady);
}

#[tokio::test]
async fn test_warnings_only_is_ready_with_minor_items() {
    let azure = Arc::new(FakeAzure::with_subscription("Registered"));
    let ctx = orchestrator(azure, Lab { ps_minor: 0 })
        .run(&devices(&["srv01", "srv02"]), &options())
        .await
        .unwrap();

    let report = render(&ctx);
    assert_eq!(report.totals.error, 0);
    assert_eq!(report.totals.warning, 2);
    assert_eq!(report.verdict, Verdict::ReadyWithMinorItems);
    assert!(report.verdict.is_ready());
    assert!(report
        .devices
        .iter()
        .all(|d| d.status == DeviceStatus::Warnings));
}

#[tokio::test]
async fn test_unregistered_providers_make_the_run_partially_ready() {
    let azure = Arc::new(FakeAzure::with_subscription("NotRegistered"));
    let ctx = orchestrator(azure, Lab { ps_minor: 1 })
        .run(&devices(&["srv01"]), &options())
        .await
        .unwrap();

    assert!(ctx.providers.checked);
    assert!(ctx.providers.registered_this_session);
    assert_eq!(render(&ctx).verdict, Verdict::PartiallyReady);
}

#[tokio::test]
async fn test_device_order_does_not_change_the_outcome() {
    let mut reports = Vec::new();
    for order in [
        ["srv01", "bad-server", "srv02"],
        ["srv02", "srv01", "bad-server"],
    ] {
        let azure = Arc::new(FakeAzure::with_subscription("Registered"));
        let ctx = orchestrator(azure, Lab { ps_minor: 1 })
            .run(&devices(&order), &options())
            .await
            .unwrap();
        reports.push(render(&ctx));
    }
    assert_eq!(reports[0].totals, reports[1].totals);
    assert_eq!(reports[0].verdict, reports[1].verdict);
    assert_eq!(reports[0].devices, reports[1].devices);
}

#[tokio::test]
async fn test_empty_device_list_is_rejected() {
    let azure = Arc::new(FakeAzure::with_subscription("Registered"));
    let outcome = orchestrator(azure, Lab { ps_minor: 1 })
        .run(&devices(&["", "  "]), &options())
        .await;
    assert!(matches!(outcome, Err(Error::ArgumentError(_))));
}

#[test]
fn test_nothing_collected_reports_no_results() {
    let report = render(&RunContext::default());
    assert_eq!(report.verdict, Verdict::NoResults);
    let text = ReportView::new(&report, false).to_string();
    assert!(text.contains("NO RESULTS COLLECTED"));
}
