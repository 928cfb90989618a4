use crate::auth::AuthSession;
use crate::checks::DeviceCheckRunner;
use crate::context::RunContext;
use crate::devices::normalize;
use crate::logging::{log_skipped, log_success};
use crate::providers::{default_namespaces, ResourceProviderRegistrar};
use crate::types::{ResourceProviderStatus, Severity};
use crate::Result;

use futures::stream::{self, StreamExt};
use log::{info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub subscription_hint: Option<String>,
    pub concurrency: usize,
    pub provider_namespaces: Vec<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            subscription_hint: None,
            concurrency: default_concurrency(),
            provider_namespaces: default_namespaces(),
        }
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub struct PrerequisiteOrchestrator {
    auth: AuthSession,
    registrar: ResourceProviderRegistrar,
    runner: DeviceCheckRunner,
}

impl PrerequisiteOrchestrator {
    pub fn new(
        auth: AuthSession,
        registrar: ResourceProviderRegistrar,
        runner: DeviceCheckRunner,
    ) -> Self {
        Self {
            auth,
            registrar,
            runner,
        }
    }

    /// Authenticates once, checks resource providers once when that worked,
    /// then runs the check battery on every device. Device failures end up
    /// in the results; only an empty device list is an error.
    pub async fn run(
        &mut self,
        devices: &[String],
        options: &OrchestratorOptions,
    ) -> Result<RunContext> {
        let devices = normalize(devices)?;
        info!(
            "Validating {} device(s) at {} depth",
            devices.len(),
            self.runner.options().depth
        );

        let auth = self
            .auth
            .authenticate(options.subscription_hint.as_deref())
            .await;
        let providers = if auth.success {
            self.registrar
                .ensure_registered(&options.provider_namespaces)
                .await
        } else {
            log_skipped(
                "resource provider registration",
                "subscription",
                "authentication did not succeed",
            );
            ResourceProviderStatus::default()
        };

        let mut ctx = RunContext::new(auth, providers);
        let runner = &self.runner;
        let mut pending = stream::iter(devices)
            .map(|device| async move {
                let checks = runner.run_checks(&device).await;
                (device, checks)
            })
            .buffer_unordered(options.concurrency.max(1));

        while let Some((device, checks)) = pending.next().await {
            let worst = checks.results.iter().map(|r| r.result).max();
            match worst {
                Some(Severity::Error) => warn!("{} has blocking issues", device),
                Some(Severity::Warning) => warn!("{} passed with warnings", device),
                _ => log_success("validated", &device),
            }
            ctx.record_device(&device, checks.results, checks.os_label);
        }

        Ok(ctx)
    }
}
