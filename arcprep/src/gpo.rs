//! Group Policy rollout of the onboarding configuration.

use crate::logging::{log_failure, log_success};
use crate::pwsh::run_json;
use crate::{Error, Result};
use async_trait::async_trait;
use log::{info, warn};
use rustrc::client::Client;
use rustrc::powershell::literal;
use rustrc::process::ProcessConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GpoInfo {
    pub display_name: String,
    pub id: String,
}

#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn get_gpo(&self, name: &str) -> Result<Option<GpoInfo>>;

    async fn new_gpo(&self, name: &str, comment: Option<&str>) -> Result<GpoInfo>;

    async fn ou_exists(&self, dn: &str) -> Result<bool>;

    async fn new_ou(&self, name: &str, parent_dn: &str) -> Result<()>;

    /// Display names of the GPOs linked to `target`.
    async fn gp_links(&self, target: &str) -> Result<Vec<String>>;

    async fn new_gp_link(&self, gpo_name: &str, target: &str) -> Result<()>;
}

/// `DirectoryApi` over the GroupPolicy and ActiveDirectory modules.
pub struct PowerShellDirectory {
    client: Client<ProcessConfig>,
    shell: String,
}

impl PowerShellDirectory {
    pub async fn new<S: Into<String>>(shell: S, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::connect(ProcessConfig::new(timeout)).await?,
            shell: shell.into(),
        })
    }

    async fn run(&self, script: String) -> Result<Option<serde_json::Value>> {
        let script = format!("$ErrorActionPreference = 'Stop'\n{}", script);
        run_json(&self.client, &self.shell, &script).await
    }
}

#[async_trait]
impl DirectoryApi for PowerShellDirectory {
    async fn get_gpo(&self, name: &str) -> Result<Option<GpoInfo>> {
        let value = self
            .run(format!(
                "Import-Module GroupPolicy\n\
                 $g = Get-GPO -Name {} -ErrorAction SilentlyContinue\n\
                 if ($g) {{ [pscustomobject]@{{ DisplayName = $g.DisplayName; Id = $g.Id.ToString() }} | ConvertTo-Json -Compress }}",
                literal(name)
            ))
            .await?;
        Ok(value.map(serde_json::from_value).transpose()?)
    }

    async fn new_gpo(&self, name: &str, comment: Option<&str>) -> Result<GpoInfo> {
        let comment = comment
            .map(|c| format!(" -Comment {}", literal(c)))
            .unwrap_or_default();
        let value = self
            .run(format!(
                "Import-Module GroupPolicy\n\
                 $g = New-GPO -Name {}{}\n\
                 [pscustomobject]@{{ DisplayName = $g.DisplayName; Id = $g.Id.ToString() }} | ConvertTo-Json -Compress",
                literal(name),
                comment
            ))
            .await?
            .ok_or_else(|| Error::CheckExecution(format!("New-GPO returned nothing for {}", name)))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn ou_exists(&self, dn: &str) -> Result<bool> {
        let value = self
            .run(format!(
                "Import-Module ActiveDirectory\n\
                 try {{ $null = Get-ADOrganizationalUnit -Identity {}; $found = $true }} catch {{ $found = $false }}\n\
                 ConvertTo-Json -Compress -InputObject $found",
                literal(dn)
            ))
            .await?;
        Ok(matches!(value, Some(serde_json::Value::Bool(true))))
    }

    async fn new_ou(&self, name: &str, parent_dn: &str) -> Result<()> {
        self.run(format!(
            "Import-Module ActiveDirectory\n\
             New-ADOrganizationalUnit -Name {} -Path {}",
            literal(name),
            literal(parent_dn)
        ))
        .await
        .map(|_| ())
    }

    async fn gp_links(&self, target: &str) -> Result<Vec<String>> {
        let value = self
            .run(format!(
                "Import-Module GroupPolicy\n\
                 ConvertTo-Json -Compress -InputObject @((Get-GPInheritance -Target {}).GpoLinks | ForEach-Object {{ $_.DisplayName }})",
                literal(target)
            ))
            .await?;
        Ok(match value {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        })
    }

    async fn new_gp_link(&self, gpo_name: &str, target: &str) -> Result<()> {
        self.run(format!(
            "Import-Module GroupPolicy\n\
             New-GPLink -Name {} -Target {} -LinkEnabled Yes | Out-Null",
            literal(gpo_name),
            literal(target)
        ))
        .await
        .map(|_| ())
    }
}

/// Splits `OU=Servers,OU=Azure,DC=contoso,DC=com` into `("Servers",
/// "OU=Azure,DC=contoso,DC=com")`. Commas escaped as `\,` stay in the name.
pub fn split_dn(dn: &str) -> Result<(String, String)> {
    let dn = dn.trim();
    let mut escaped = false;
    let split_at = dn.char_indices().find_map(|(i, c)| {
        let hit = c == ',' && !escaped;
        escaped = c == '\\' && !escaped;
        hit.then_some(i)
    });
    let invalid = || Error::ArgumentError(format!("'{}' is not an OU distinguished name", dn));

    let split_at = split_at.ok_or_else(invalid)?;
    let (rdn, parent) = (&dn[..split_at], dn[split_at + 1..].trim());
    let (kind, value) = rdn.split_once('=').ok_or_else(invalid)?;
    if !kind.trim().eq_ignore_ascii_case("OU") || value.trim().is_empty() || parent.is_empty() {
        return Err(invalid());
    }
    Ok((value.trim().replace("\\,", ","), parent.to_string()))
}

#[derive(Debug, Clone)]
pub struct GpoRequest {
    pub name: String,
    pub target: String,
    pub create_ou: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GpoDeployment {
    pub success: bool,
    pub gpo_created: bool,
    pub ou_created: bool,
    pub linked: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl GpoDeployment {
    pub fn add_error<S: Into<String>>(&mut self, error: S) {
        let error = error.into();
        log::error!("{}", error);
        self.errors.push(error);
        self.success = false;
    }

    pub fn add_warning<S: Into<String>>(&mut self, warning: S) {
        let warning = warning.into();
        warn!("{}", warning);
        self.warnings.push(warning);
    }
}

pub struct GpoDeployer<'a> {
    directory: &'a dyn DirectoryApi,
}

impl<'a> GpoDeployer<'a> {
    pub fn new(directory: &'a dyn DirectoryApi) -> Self {
        Self { directory }
    }

    /// Makes sure the GPO exists, the target OU exists and the GPO is
    /// linked to it. Stops at the first step that fails.
    pub async fn deploy(&self, request: &GpoRequest) -> GpoDeployment {
        let mut result = GpoDeployment {
            success: true,
            ..Default::default()
        };

        match self.directory.get_gpo(&request.name).await {
            Ok(Some(gpo)) => {
                result.add_warning(format!("GPO '{}' already exists; reusing it", gpo.display_name))
            }
            Ok(None) => match self
                .directory
                .new_gpo(&request.name, request.comment.as_deref())
                .await
            {
                Ok(gpo) => {
                    log_success("created GPO", &gpo.display_name);
                    result.gpo_created = true;
                }
                Err(e) => {
                    result.add_error(format!("Could not create GPO '{}': {}", request.name, e));
                    return result;
                }
            },
            Err(e) => {
                result.add_error(format!("Could not look up GPO '{}': {}", request.name, e));
                return result;
            }
        }

        match self.directory.ou_exists(&request.target).await {
            Ok(true) => info!("Target OU {} exists", request.target),
            Ok(false) if request.create_ou => {
                let created = match split_dn(&request.target) {
                    Ok((name, parent)) => self.directory.new_ou(&name, &parent).await,
                    Err(e) => Err(e),
                };
                match created {
                    Ok(()) => {
                        log_success("created OU", &request.target);
                        result.ou_created = true;
                    }
                    Err(e) => {
                        result.add_error(format!("Could not create OU {}: {}", request.target, e));
                        return result;
                    }
                }
            }
            Ok(false) => {
                result.add_error(format!(
                    "OU {} does not exist; create it or pass --create-ou",
                    request.target
                ));
                return result;
            }
            Err(e) => {
                result.add_error(format!("Could not look up OU {}: {}", request.target, e));
                return result;
            }
        }

        let links = match self.directory.gp_links(&request.target).await {
            Ok(links) => links,
            Err(e) => {
                log_failure("read GPO links of", &request.target, &e);
                result.add_warning(format!("Could not read existing links: {}", e));
                Vec::new()
            }
        };
        if links.iter().any(|l| l.eq_ignore_ascii_case(&request.name)) {
            result.add_warning(format!(
                "GPO '{}' is already linked to {}",
                request.name, request.target
            ));
            result.linked = true;
            return result;
        }

        match self.directory.new_gp_link(&request.name, &request.target).await {
            Ok(()) => {
                log_success(format!("linked GPO '{}' to", request.name), &request.target);
                result.linked = true;
            }
            Err(e) => result.add_error(format!("Could not link GPO: {}", e)),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDirectory {
        gpos: Mutex<Vec<String>>,
        ous: Mutex<Vec<String>>,
        links: Mutex<Vec<(String, String)>>,
        fail_link: bool,
    }

    #[async_trait]
    impl DirectoryApi for FakeDirectory {
        async fn get_gpo(&self, name: &str) -> Result<Option<GpoInfo>> {
            Ok(self.gpos.lock().unwrap().iter().find(|g| *g == name).map(|g| GpoInfo {
                display_name: g.clone(),
                id: "id".into(),
            }))
        }
        async fn new_gpo(&self, name: &str, _comment: Option<&str>) -> Result<GpoInfo> {
            self.gpos.lock().unwrap().push(name.to_string());
            Ok(GpoInfo {
                display_name: name.to_string(),
                id: "id".into(),
            })
        }
        async fn ou_exists(&self, dn: &str) -> Result<bool> {
            Ok(self.ous.lock().unwrap().iter().any(|o| o == dn))
        }
        async fn new_ou(&self, name: &str, parent_dn: &str) -> Result<()> {
            self.ous
                .lock()
                .unwrap()
                .push(format!("OU={},{}", name, parent_dn));
            Ok(())
        }
        async fn gp_links(&self, target: &str) -> Result<Vec<String>> {
            Ok(self
                .links
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, t)| t == target)
                .map(|(g, _)| g.clone())
                .collect())
        }
        async fn new_gp_link(&self, gpo_name: &str, target: &str) -> Result<()> {
            if self.fail_link {
                return Err(Error::CheckExecution("Access denied".into()));
            }
            self.links
                .lock()
                .unwrap()
                .push((gpo_name.to_string(), target.to_string()));
            Ok(())
        }
    }

    fn request(create_ou: bool) -> GpoRequest {
        GpoRequest {
            name: "Azure Arc Onboarding".into(),
            target: "OU=Servers,DC=contoso,DC=com".into(),
            create_ou,
            comment: None,
        }
    }

    #[test]
    fn test_split_dn() {
        assert_eq!(
            split_dn("OU=Servers,OU=Azure,DC=contoso,DC=com").unwrap(),
            ("Servers".to_string(), "OU=Azure,DC=contoso,DC=com".to_string())
        );
        assert_eq!(
            split_dn("OU=Paris\\, FR,DC=contoso,DC=com").unwrap(),
            ("Paris, FR".to_string(), "DC=contoso,DC=com".to_string())
        );
        assert!(split_dn("CN=Computers,DC=contoso,DC=com").is_err());
        assert!(split_dn("OU=Lonely").is_err());
    }

    #[tokio::test]
    async fn test_fresh_deployment_creates_everything() {
        let directory = FakeDirectory::default();
        let result = GpoDeployer::new(&directory).deploy(&request(true)).await;
        assert!(result.success, "{:?}", result.errors);
        assert!(result.gpo_created && result.ou_created && result.linked);
        assert_eq!(directory.links.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_ou_without_create_flag_fails() {
        let directory = FakeDirectory::default();
        let result = GpoDeployer::new(&directory).deploy(&request(false)).await;
        assert!(!result.success);
        assert!(result.errors[0].contains("--create-ou"));
        assert!(directory.links.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let directory = FakeDirectory::default();
        GpoDeployer::new(&directory).deploy(&request(true)).await;
        let again = GpoDeployer::new(&directory).deploy(&request(false)).await;
        assert!(again.success);
        assert!(!again.gpo_created && !again.ou_created);
        assert!(again.linked);
        assert_eq!(again.warnings.len(), 2);
        assert_eq!(directory.links.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_link_failure_is_reported() {
        let directory = FakeDirectory {
            fail_link: true,
            ..Default::default()
        };
        let result = GpoDeployer::new(&directory).deploy(&request(true)).await;
        assert!(!result.success);
        assert!(result.gpo_created);
        assert!(!result.linked);
    }
}
