use crate::azure::AzureApi;
use crate::logging::{log_failure, log_success};
use crate::types::ResourceProviderStatus;
use log::{info, warn};
use std::sync::Arc;

pub const DEFAULT_PROVIDER_NAMESPACES: [&str; 4] = [
    "Microsoft.HybridCompute",
    "Microsoft.GuestConfiguration",
    "Microsoft.HybridConnectivity",
    "Microsoft.AzureArcData",
];

pub fn default_namespaces() -> Vec<String> {
    DEFAULT_PROVIDER_NAMESPACES
        .iter()
        .map(|ns| ns.to_string())
        .collect()
}

pub struct ResourceProviderRegistrar {
    api: Arc<dyn AzureApi>,
}

impl ResourceProviderRegistrar {
    pub fn new(api: Arc<dyn AzureApi>) -> Self {
        Self { api }
    }

    /// Checks each namespace and requests registration for the ones that
    /// are not `Registered`. The returned status is the snapshot taken
    /// before registering; registration is not waited on, so a namespace
    /// registered here is still reported as unregistered for this run.
    pub async fn ensure_registered(&self, namespaces: &[String]) -> ResourceProviderStatus {
        let mut status = ResourceProviderStatus {
            checked: true,
            ..Default::default()
        };

        for namespace in namespaces {
            let state = match self.api.provider_state(namespace).await {
                Ok(state) => state,
                Err(e) => {
                    log_failure("query resource provider", namespace, &e);
                    status.unregistered.insert(namespace.clone());
                    continue;
                }
            };

            if state.eq_ignore_ascii_case("Registered") {
                info!("Resource provider {} is registered", namespace);
                continue;
            }

            warn!("Resource provider {} is {}", namespace, state);
            status.unregistered.insert(namespace.clone());
            match self.api.register_provider(namespace).await {
                Ok(()) => {
                    log_success("requested registration of", namespace);
                    status.registered_this_session = true;
                }
                Err(e) => log_failure("register resource provider", namespace, &e),
            }
        }

        status
    }
}
