use crate::devices::read_device_file;
use crate::executor::{RemoteOptions, Transport};
use crate::orchestrator::default_concurrency;
use crate::types::ValidationDepth;
use crate::{Error, Result};
use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the password for remote sessions.
pub const PASSWORD_ENV: &str = "ARCPREP_PASSWORD";

pub fn command() -> Command {
    let force = Arg::new("force")
        .long("force")
        .action(ArgAction::SetTrue)
        .help("Never prompt; take defaults");

    command!()
        .about("Validates servers against Azure Arc and Defender for Endpoint onboarding prerequisites")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("check")
                .about("Run prerequisite checks against one or more devices")
                .arg(
                    Arg::new("devices")
                        .long("devices")
                        .short('f')
                        .value_parser(value_parser!(PathBuf))
                        .help("File with one device name per line"),
                )
                .arg(
                    Arg::new("device")
                        .long("device")
                        .short('d')
                        .action(ArgAction::Append)
                        .help("Device name; repeatable"),
                )
                .arg(Arg::new("subscription").long("subscription").short('s').help("Subscription id to use without prompting"))
                .arg(
                    Arg::new("depth")
                        .long("depth")
                        .value_parser(["basic", "critical", "comprehensive"])
                        .ignore_case(true)
                        .default_value("basic"),
                )
                .arg(Arg::new("region").long("region").help("Azure region for the regional endpoints"))
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .short('j')
                        .value_parser(value_parser!(usize)),
                )
                .arg(Arg::new("log-path").long("log-path").value_parser(value_parser!(PathBuf)))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .value_parser(value_parser!(PathBuf))
                        .help("Also write the report as JSON"),
                )
                .arg(
                    Arg::new("transport")
                        .long("transport")
                        .value_parser(["auto", "local", "winrm", "ssh"])
                        .default_value("auto"),
                )
                .arg(Arg::new("user").long("user").short('u').help(format!(
                    "Remote user; the password is read from {}",
                    PASSWORD_ENV
                )))
                .arg(Arg::new("ssh-key").long("ssh-key").value_parser(value_parser!(PathBuf)))
                .arg(Arg::new("ssl").long("ssl").action(ArgAction::SetTrue).help("Use WinRM over HTTPS"))
                .arg(Arg::new("shell").long("shell").help("Local PowerShell host, e.g. pwsh"))
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_parser(value_parser!(u64))
                        .default_value("120")
                        .help("Per probe timeout in seconds"),
                )
                .arg(force.clone()),
        )
        .subcommand(
            Command::new("diagnostics")
                .about("Collect Azure Connected Machine agent diagnostics")
                .arg(Arg::new("region").long("region").required(true))
                .arg(Arg::new("output").long("output").short('o').value_parser(value_parser!(PathBuf)))
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_parser(value_parser!(u64))
                        .default_value("600")
                        .help("Log archive timeout in seconds"),
                )
                .arg(force.clone()),
        )
        .subcommand(
            Command::new("install")
                .about("Download and install the Azure Connected Machine agent")
                .arg(Arg::new("log-dir").long("log-dir").value_parser(value_parser!(PathBuf)))
                .arg(force.clone()),
        )
        .subcommand(
            Command::new("gpo")
                .about("Create and link the onboarding Group Policy object")
                .arg(Arg::new("name").long("name").required(true))
                .arg(Arg::new("target").long("target").required(true).help("Distinguished name of the target OU"))
                .arg(Arg::new("create-ou").long("create-ou").action(ArgAction::SetTrue))
                .arg(Arg::new("comment").long("comment")),
        )
}

fn secs(matches: &ArgMatches, id: &str) -> Duration {
    Duration::from_secs(matches.get_one::<u64>(id).copied().unwrap_or(120))
}

#[derive(Debug)]
pub struct CheckConfig {
    pub devices: Vec<String>,
    pub subscription: Option<String>,
    pub depth: ValidationDepth,
    pub region: Option<String>,
    pub concurrency: usize,
    pub log_path: Option<PathBuf>,
    pub json: Option<PathBuf>,
    pub force: bool,
    pub remote: RemoteOptions,
}

impl TryFrom<&ArgMatches> for CheckConfig {
    type Error = Error;

    fn try_from(matches: &ArgMatches) -> Result<Self> {
        let mut devices = Vec::new();
        if let Some(path) = matches.get_one::<PathBuf>("devices") {
            devices.extend(read_device_file(path)?);
        }
        if let Some(names) = matches.get_many::<String>("device") {
            devices.extend(names.cloned());
        }
        if devices.is_empty() {
            return Err(Error::ArgumentError(
                "pass --devices <file> or at least one --device".to_string(),
            ));
        }

        let depth = matches
            .get_one::<String>("depth")
            .map(|d| d.parse::<ValidationDepth>())
            .transpose()?
            .unwrap_or_default();

        let transport = match matches.get_one::<String>("transport").map(String::as_str) {
            Some("local") => Transport::Local,
            Some("winrm") => Transport::WinRm,
            Some("ssh") => Transport::Ssh,
            _ => Transport::Auto,
        };
        let mut remote = RemoteOptions::new(Duration::from_secs(3), secs(matches, "timeout"));
        remote.transport = transport;
        remote.username = matches.get_one::<String>("user").cloned();
        remote.password = std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty());
        remote.ssh_key = matches.get_one::<PathBuf>("ssh-key").cloned();
        remote.use_ssl = matches.get_flag("ssl");
        remote.local_shell = matches.get_one::<String>("shell").cloned();

        Ok(Self {
            devices,
            subscription: matches.get_one::<String>("subscription").cloned(),
            depth,
            region: matches.get_one::<String>("region").cloned(),
            concurrency: matches
                .get_one::<usize>("concurrency")
                .copied()
                .filter(|n| *n > 0)
                .unwrap_or_else(default_concurrency),
            log_path: matches.get_one::<PathBuf>("log-path").cloned(),
            json: matches.get_one::<PathBuf>("json").cloned(),
            force: matches.get_flag("force"),
            remote,
        })
    }
}

#[derive(Debug)]
pub struct DiagnosticsConfig {
    pub region: String,
    pub output: Option<PathBuf>,
    pub timeout: Duration,
    pub force: bool,
}

impl TryFrom<&ArgMatches> for DiagnosticsConfig {
    type Error = Error;

    fn try_from(matches: &ArgMatches) -> Result<Self> {
        let region = matches
            .get_one::<String>("region")
            .cloned()
            .ok_or_else(|| Error::ArgumentError("--region is required".to_string()))?;
        Ok(Self {
            region,
            output: matches.get_one::<PathBuf>("output").cloned(),
            timeout: secs(matches, "timeout"),
            force: matches.get_flag("force"),
        })
    }
}

#[derive(Debug)]
pub struct InstallConfig {
    pub log_dir: Option<PathBuf>,
    pub force: bool,
}

impl TryFrom<&ArgMatches> for InstallConfig {
    type Error = Error;

    fn try_from(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            log_dir: matches.get_one::<PathBuf>("log-dir").cloned(),
            force: matches.get_flag("force"),
        })
    }
}

#[derive(Debug)]
pub struct GpoConfig {
    pub name: String,
    pub target: String,
    pub create_ou: bool,
    pub comment: Option<String>,
}

impl TryFrom<&ArgMatches> for GpoConfig {
    type Error = Error;

    fn try_from(matches: &ArgMatches) -> Result<Self> {
        let required = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .ok_or_else(|| Error::ArgumentError(format!("--{} is required", id)))
        };
        Ok(Self {
            name: required("name")?,
            target: required("target")?,
            create_ou: matches.get_flag("create-ou"),
            comment: matches.get_one::<String>("comment").cloned(),
        })
    }
}
