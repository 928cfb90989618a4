//! Azure identity, subscription and resource provider access.

use crate::pwsh::ensure_success;
use crate::{Error, Result};
use async_trait::async_trait;
use rustrc::client::{Client, Command};
use rustrc::process::ProcessConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[async_trait]
pub trait AzureApi: Send + Sync {
    /// Name of the signed-in identity, if there is one.
    async fn current_account(&self) -> Result<Option<String>>;

    async fn login(&self) -> Result<()>;

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>>;

    async fn set_subscription(&self, subscription_id: &str) -> Result<()>;

    async fn provider_state(&self, namespace: &str) -> Result<String>;

    /// Requests registration without waiting for it to finish.
    async fn register_provider(&self, namespace: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct AccountShow {
    user: Option<AccountUser>,
}

#[derive(Debug, Deserialize)]
struct AccountUser {
    name: String,
}

/// `AzureApi` backed by the Azure CLI.
pub struct AzCli {
    client: Client<ProcessConfig>,
    executable: String,
}

impl AzCli {
    pub async fn new(timeout: Duration) -> Result<Self> {
        let executable = if cfg!(windows) { "az.cmd" } else { "az" };
        Ok(Self {
            client: Client::connect(ProcessConfig::new(timeout)).await?,
            executable: executable.to_string(),
        })
    }

    fn az(&self) -> Command {
        Command::new(self.executable.as_str())
    }

    async fn run(&self, command: Command) -> Result<String> {
        let output = self.client.exec(&command).await?;
        ensure_success("az", &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl AzureApi for AzCli {
    async fn current_account(&self) -> Result<Option<String>> {
        let output = self
            .client
            .exec(&self.az().args(["account", "show", "--output", "json"]))
            .await?;
        if !output.success() {
            return Ok(None);
        }
        let account: AccountShow = serde_json::from_slice(&output.stdout)?;
        Ok(account.user.map(|u| u.name))
    }

    async fn login(&self) -> Result<()> {
        // Interactive login can take as long as the operator needs.
        let command = self
            .az()
            .args(["login", "--output", "none"])
            .timeout(Duration::from_secs(600));
        self.run(command)
            .await
            .map(|_| ())
            .map_err(|e| Error::Authentication(e.to_string()))
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        let stdout = self
            .run(self.az().args(["account", "list", "--all", "--output", "json"]))
            .await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn set_subscription(&self, subscription_id: &str) -> Result<()> {
        self.run(
            self.az()
                .args(["account", "set", "--subscription"])
                .arg(subscription_id),
        )
        .await
        .map(|_| ())
    }

    async fn provider_state(&self, namespace: &str) -> Result<String> {
        let stdout = self
            .run(
                self.az()
                    .args(["provider", "show", "--namespace"])
                    .arg(namespace)
                    .args(["--query", "registrationState", "--output", "tsv"]),
            )
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn register_provider(&self, namespace: &str) -> Result<()> {
        self.run(
            self.az()
                .args(["provider", "register", "--namespace"])
                .arg(namespace),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_list_parsing() {
        let json = r#"[
            {"id": "1111", "name": "Dev", "state": "Enabled", "tenantId": "t", "isDefault": true},
            {"id": "2222", "name": "Prod", "tenantId": "t"}
        ]"#;
        let subs: Vec<Subscription> = serde_json::from_str(json).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].state.as_deref(), Some("Enabled"));
        assert_eq!(subs[1].name, "Prod");
        assert!(subs[1].state.is_none());
    }

    #[test]
    fn test_account_show_parsing() {
        let json = r#"{"user": {"name": "ops@contoso.com", "type": "user"}, "id": "1111"}"#;
        let account: AccountShow = serde_json::from_str(json).unwrap();
        assert_eq!(account.user.unwrap().name, "ops@contoso.com");
    }
}
