use anyhow::Context;
use arcprep::auth::AuthSession;
use arcprep::azure::{AzCli, AzureApi};
use arcprep::checks::{CheckOptions, DeviceCheckRunner};
use arcprep::config::{self, CheckConfig, DiagnosticsConfig, GpoConfig, InstallConfig};
use arcprep::diagnostics::{default_agent_path, AzcmAgent, DiagnosticsCollector};
use arcprep::executor::{DeviceExecutor, RemoteExecutor};
use arcprep::gpo::{GpoDeployer, GpoRequest, PowerShellDirectory};
use arcprep::installer::{AgentInstaller, InstallOutcome};
use arcprep::logging::{default_log_name, init_logging, open_run_log, resolve_archive_path};
use arcprep::orchestrator::{OrchestratorOptions, PrerequisiteOrchestrator};
use arcprep::prompt::{InputSource, NonInteractive, StdinInput};
use arcprep::providers::ResourceProviderRegistrar;
use arcprep::report::{render, ReportView, Verdict};
use clap::ArgMatches;
use is_terminal::IsTerminal;
use rustrc::powershell::WINDOWS_POWERSHELL;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const AZ_TIMEOUT: Duration = Duration::from_secs(120);

fn input_for(force: bool) -> Box<dyn InputSource> {
    if force {
        Box::new(NonInteractive)
    } else {
        Box::new(StdinInput)
    }
}

fn log_in_cwd(prefix: &str) -> anyhow::Result<PathBuf> {
    let path = std::env::current_dir()?.join(default_log_name(prefix, "log"));
    init_logging(Some(&path));
    Ok(path)
}

async fn run_check(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = CheckConfig::try_from(matches)?;
    let mut input = input_for(config.force);
    let cwd = std::env::current_dir()?;
    let log_path = open_run_log(
        input.as_mut(),
        config.log_path.as_deref(),
        &cwd,
        &default_log_name("ArcPrereqCheck", "log"),
    );

    let api: Arc<dyn AzureApi> = Arc::new(AzCli::new(AZ_TIMEOUT).await?);
    let executor: Arc<dyn DeviceExecutor> = Arc::new(RemoteExecutor::new(config.remote.clone()));
    let mut options = CheckOptions::with_depth(config.depth);
    if let Some(region) = &config.region {
        options = options.with_region(region);
    }

    let mut orchestrator = PrerequisiteOrchestrator::new(
        AuthSession::new(Arc::clone(&api), input),
        ResourceProviderRegistrar::new(api),
        DeviceCheckRunner::new(executor, options),
    );
    let ctx = orchestrator
        .run(
            &config.devices,
            &OrchestratorOptions {
                subscription_hint: config.subscription.clone(),
                concurrency: config.concurrency,
                ..Default::default()
            },
        )
        .await?;

    let report = render(&ctx);
    print!("{}", ReportView::new(&report, std::io::stdout().is_terminal()));
    if let Some(path) = &config.json {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing JSON report to {}", path.display()))?;
        println!("JSON report: {}", path.display());
    }
    if let Some(path) = &log_path {
        println!("Log file: {}", path.display());
    }

    Ok(match report.verdict {
        Verdict::Ready | Verdict::ReadyWithMinorItems => ExitCode::SUCCESS,
        Verdict::PartiallyReady => ExitCode::from(2),
        Verdict::NotReady | Verdict::NoResults => ExitCode::FAILURE,
    })
}

async fn run_diagnostics(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = DiagnosticsConfig::try_from(matches)?;
    let mut input = input_for(config.force);
    let cwd = std::env::current_dir()?;
    let default_name = default_log_name("AzureArcLogs", "zip");
    let archive = match resolve_archive_path(
        input.as_mut(),
        config.output.as_deref(),
        &cwd,
        &default_name,
    ) {
        Ok(path) => path,
        Err(e) => {
            let fallback = cwd.join(&default_name);
            eprintln!(
                "Warning: archive location unavailable ({}). {}. Using {}",
                e,
                e.hint(),
                fallback.display()
            );
            fallback
        }
    };
    let log_path = archive.with_extension("log");
    init_logging(Some(&log_path));

    let agent = AzcmAgent::new(default_agent_path(), AZ_TIMEOUT).await?;
    let collector = DiagnosticsCollector::new(Arc::new(agent), AZ_TIMEOUT, config.timeout);
    let interactive = std::io::stderr().is_terminal();
    let outcome = collector
        .collect(&config.region, &archive, &mut |pct: u8, phase: &str| {
            if interactive {
                eprint!("\r{:>3}% {:<32}", pct, phase);
            }
        })
        .await;
    if interactive {
        eprintln!();
    }

    for step in &outcome.steps {
        let status = if step.success { "OK" } else { "FAILED" };
        println!("{:<20} {}", step.name, status);
        if !step.success && !step.output.is_empty() {
            println!("    {}", step.output);
        }
    }
    if let (Some(path), Some(entries)) = (&outcome.archive, outcome.archive_entries) {
        println!("Archive: {} ({} files)", path.display(), entries);
    }
    println!("Log file: {}", log_path.display());

    Ok(if outcome.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_install(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = InstallConfig::try_from(matches)?;
    let log_path = log_in_cwd("ArcAgentInstall")?;
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&log_dir)?;

    let installer = AgentInstaller::new(default_agent_path(), Duration::from_secs(900)).await?;
    match installer.install(config.force, &log_dir).await? {
        InstallOutcome::AlreadyInstalled => {
            println!("Azure Connected Machine agent is already installed (use --force to reinstall)")
        }
        InstallOutcome::Installed { reboot_required } => {
            println!("Azure Connected Machine agent installed");
            if reboot_required {
                println!("A reboot is required to finish the installation");
            }
        }
    }
    println!("Log file: {}", log_path.display());
    Ok(ExitCode::SUCCESS)
}

async fn run_gpo(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = GpoConfig::try_from(matches)?;
    let log_path = log_in_cwd("ArcGpoDeployment")?;

    let directory = PowerShellDirectory::new(WINDOWS_POWERSHELL, AZ_TIMEOUT).await?;
    let result = GpoDeployer::new(&directory)
        .deploy(&GpoRequest {
            name: config.name.clone(),
            target: config.target.clone(),
            create_ou: config.create_ou,
            comment: config.comment.clone(),
        })
        .await;

    println!(
        "GPO '{}' -> {}: {}",
        config.name,
        config.target,
        if result.success { "deployed" } else { "failed" }
    );
    println!(
        "  created GPO: {}  created OU: {}  linked: {}",
        result.gpo_created, result.ou_created, result.linked
    );
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
    for error in &result.errors {
        println!("  error: {}", error);
    }
    println!("Log file: {}", log_path.display());

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let matches = config::command().get_matches();

    let outcome = match matches.subcommand() {
        Some(("check", m)) => run_check(m).await,
        Some(("diagnostics", m)) => run_diagnostics(m).await,
        Some(("install", m)) => run_install(m).await,
        Some(("gpo", m)) => run_gpo(m).await,
        _ => Err(arcprep::Error::ArgumentError("unknown subcommand".to_string()).into()),
    };

    match outcome {
        Ok(code) => Ok(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let hint = e
                .downcast_ref::<arcprep::Error>()
                .map(arcprep::Error::hint)
                .unwrap_or("Review the log file for details");
            eprintln!("Hint: {}", hint);
            Ok(ExitCode::FAILURE)
        }
    }
}
