use crate::azure::AzureApi;
use crate::logging::{log_failure, log_success};
use crate::prompt::{select_index, InputSource};
use crate::types::AuthResult;
use log::{info, warn};
use std::sync::Arc;

/// Resolves the Azure identity and the working subscription for a run.
///
/// Subscription ids and tenant ids are never shown to the operator or
/// written to the log; only subscription names are.
pub struct AuthSession {
    api: Arc<dyn AzureApi>,
    input: Box<dyn InputSource>,
    max_attempts: Option<usize>,
}

impl AuthSession {
    pub fn new(api: Arc<dyn AzureApi>, input: Box<dyn InputSource>) -> Self {
        Self {
            api,
            input,
            max_attempts: None,
        }
    }

    pub fn max_attempts(mut self, max_attempts: Option<usize>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub async fn authenticate(&mut self, subscription_hint: Option<&str>) -> AuthResult {
        match self.api.current_account().await {
            Ok(Some(account)) => info!("Using existing Azure session for {}", account),
            Ok(None) | Err(_) => {
                info!("No active Azure session; starting interactive login");
                if let Err(e) = self.api.login().await {
                    log_failure("sign in to", "Azure", &e);
                    return AuthResult::failed(format!("Azure login did not complete: {}", e));
                }
            }
        }

        let subscriptions = match self.api.list_subscriptions().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                log_failure("list", "Azure subscriptions", &e);
                return AuthResult::failed(format!("Could not list subscriptions: {}", e));
            }
        };
        if subscriptions.is_empty() {
            warn!("The signed-in account cannot see any subscription");
            return AuthResult::failed("No subscriptions are available for the signed-in account");
        }

        let hinted = subscription_hint.and_then(|hint| {
            subscriptions
                .iter()
                .position(|s| s.id.eq_ignore_ascii_case(hint.trim()))
        });
        if subscription_hint.is_some() && hinted.is_none() {
            warn!("The requested subscription is not available to this account");
            self.input
                .message("The requested subscription was not found; choose one from the list.");
        }

        let index = match hinted {
            Some(index) => index,
            None => {
                let names: Vec<String> = subscriptions.iter().map(|s| s.name.clone()).collect();
                select_index(
                    self.input.as_mut(),
                    "Available subscriptions:",
                    &names,
                    0,
                    self.max_attempts,
                )
            }
        };

        let selected = &subscriptions[index];
        if let Err(e) = self.api.set_subscription(&selected.id).await {
            let reason = redact_id(&e.to_string(), &selected.id);
            log_failure("select subscription", &selected.name, &reason);
            return AuthResult::failed(format!(
                "Could not set subscription '{}' as the working context: {}",
                selected.name, reason
            ));
        }

        log_success("selected subscription", &selected.name);
        AuthResult::succeeded(selected.name.clone(), selected.id.clone())
    }
}

/// Masks every case-insensitive occurrence of `id` in `text`; tool errors
/// echo the subscription id back.
fn redact_id(text: &str, id: &str) -> String {
    let id = id.trim();
    if id.is_empty() {
        return text.to_string();
    }
    let haystack = text.to_ascii_lowercase();
    let needle = id.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in haystack.match_indices(&needle) {
        out.push_str(&text[last..start]);
        out.push_str("<subscription>");
        last = start + needle.len();
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::Subscription;
    use crate::prompt::{NonInteractive, ScriptedInput};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAzure {
        signed_in: bool,
        login_fails: bool,
        set_fails: bool,
        set_error: Option<String>,
        subscriptions: Vec<Subscription>,
        logins: Mutex<usize>,
        selected: Mutex<Option<String>>,
    }

    fn subs(n: usize) -> Vec<Subscription> {
        (1..=n)
            .map(|i| Subscription {
                id: format!("0000000{}-aaaa-bbbb-cccc-dddddddddddd", i),
                name: format!("Subscription {}", i),
                state: Some("Enabled".into()),
            })
            .collect()
    }

    #[async_trait]
    impl AzureApi for FakeAzure {
        async fn current_account(&self) -> Result<Option<String>> {
            Ok(self.signed_in.then(|| "ops@contoso.com".to_string()))
        }
        async fn login(&self) -> Result<()> {
            *self.logins.lock().unwrap() += 1;
            if self.login_fails {
                Err(Error::Authentication("user cancelled".into()))
            } else {
                Ok(())
            }
        }
        async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
            Ok(self.subscriptions.clone())
        }
        async fn set_subscription(&self, id: &str) -> Result<()> {
            if self.set_fails {
                return Err(Error::Authentication("forbidden".into()));
            }
            if let Some(output) = &self.set_error {
                return Err(Error::ExternalTool {
                    tool: "az".into(),
                    code: Some(1),
                    output: output.replace("{id}", id),
                });
            }
            *self.selected.lock().unwrap() = Some(id.to_string());
            Ok(())
        }
        async fn provider_state(&self, _: &str) -> Result<String> {
            Ok("Registered".into())
        }
        async fn register_provider(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hint_skips_prompt() {
        let api = Arc::new(FakeAzure {
            signed_in: true,
            subscriptions: subs(3),
            ..Default::default()
        });
        let mut session = AuthSession::new(api.clone(), Box::new(ScriptedInput::new(["1"])));
        let result = session
            .authenticate(Some("00000002-AAAA-bbbb-cccc-dddddddddddd"))
            .await;
        assert!(result.success);
        assert_eq!(result.subscription_name.as_deref(), Some("Subscription 2"));
        assert_eq!(*api.logins.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prompted_selection_uses_one_based_choice() {
        let api = Arc::new(FakeAzure {
            signed_in: true,
            subscriptions: subs(3),
            ..Default::default()
        });
        let mut session = AuthSession::new(api.clone(), Box::new(ScriptedInput::new(["abc", "4", "2"])));
        let result = session.authenticate(None).await;
        assert!(result.success);
        assert_eq!(result.subscription_name.as_deref(), Some("Subscription 2"));
        assert_eq!(
            api.selected.lock().unwrap().as_deref(),
            Some("00000002-aaaa-bbbb-cccc-dddddddddddd")
        );
    }

    #[tokio::test]
    async fn test_unknown_hint_falls_back_to_prompt_default() {
        let api = Arc::new(FakeAzure {
            signed_in: true,
            subscriptions: subs(2),
            ..Default::default()
        });
        let mut session = AuthSession::new(api, Box::new(NonInteractive));
        let result = session.authenticate(Some("not-a-subscription")).await;
        assert_eq!(result.subscription_name.as_deref(), Some("Subscription 1"));
    }

    #[tokio::test]
    async fn test_login_runs_without_session() {
        let api = Arc::new(FakeAzure {
            subscriptions: subs(1),
            ..Default::default()
        });
        let mut session = AuthSession::new(api.clone(), Box::new(NonInteractive));
        assert!(session.authenticate(None).await.success);
        assert_eq!(*api.logins.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let login_fails = Arc::new(FakeAzure {
            login_fails: true,
            subscriptions: subs(1),
            ..Default::default()
        });
        let result = AuthSession::new(login_fails, Box::new(NonInteractive))
            .authenticate(None)
            .await;
        assert!(!result.success);
        assert!(result.message.contains("login"));

        let no_subs = Arc::new(FakeAzure {
            signed_in: true,
            ..Default::default()
        });
        let result = AuthSession::new(no_subs, Box::new(NonInteractive))
            .authenticate(None)
            .await;
        assert!(!result.success);
        assert!(result.message.contains("No subscriptions"));

        let set_fails = Arc::new(FakeAzure {
            signed_in: true,
            set_fails: true,
            subscriptions: subs(1),
            ..Default::default()
        });
        let result = AuthSession::new(set_fails, Box::new(NonInteractive))
            .authenticate(None)
            .await;
        assert!(!result.success);
        assert!(result.subscription_id.is_none());
    }

    #[tokio::test]
    async fn test_context_failure_message_hides_the_subscription_id() {
        let api = Arc::new(FakeAzure {
            signed_in: true,
            subscriptions: subs(1),
            set_error: Some(
                "ERROR: The subscription of '{id}' doesn't exist in cloud 'AzureCloud'.".into(),
            ),
            ..Default::default()
        });
        let result = AuthSession::new(api, Box::new(NonInteractive))
            .authenticate(None)
            .await;
        assert!(!result.success);
        assert!(result.message.contains("Subscription 1"));
        assert!(result.message.contains("doesn't exist"));
        assert!(!result.message.contains("00000001-aaaa-bbbb-cccc-dddddddddddd"));
    }

    #[test]
    fn test_redact_id_is_case_insensitive() {
        assert_eq!(
            redact_id("no ABCD-1 here, abcd-1 there", "abcd-1"),
            "no <subscription> here, <subscription> there"
        );
        assert_eq!(redact_id("untouched", ""), "untouched");
    }
}
