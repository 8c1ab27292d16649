//! Model registry: the router and responder oracles

use super::{LlmError, LlmService, LoggingService, OpenAIService};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_ROUTER_MODEL: &str = "gpt-4o";
pub const DEFAULT_RESPONDER_MODEL: &str = "gpt-4o-mini";

/// Configuration for the oracle backend
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    /// OpenAI-compatible API root; `None` means api.openai.com
    pub base_url: Option<String>,
    pub router_model: String,
    pub responder_model: String,
}

impl LlmConfig {
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_key: non_empty("OPENAI_API_KEY"),
            base_url: non_empty("OPENAI_BASE_URL"),
            router_model: non_empty("ROUTER_MODEL")
                .unwrap_or_else(|| DEFAULT_ROUTER_MODEL.to_string()),
            responder_model: non_empty("RESPONDER_MODEL")
                .unwrap_or_else(|| DEFAULT_RESPONDER_MODEL.to_string()),
        }
    }
}

/// Oracles by role. Both roles may share one model.
pub struct ModelRegistry {
    services: BTreeMap<String, Arc<dyn LlmService>>,
    router_model: String,
    responder_model: String,
}

impl ModelRegistry {
    /// Build the OpenAI-backed services. Without an API key there is no way
    /// to route anything, so this is an error rather than an empty registry.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::auth("OPENAI_API_KEY is not set"))?;

        let mut services: BTreeMap<String, Arc<dyn LlmService>> = BTreeMap::new();
        for model in [&config.router_model, &config.responder_model] {
            if services.contains_key(model) {
                continue;
            }
            let service = OpenAIService::new(api_key, model.as_str(), config.base_url.as_deref())?;
            services.insert(
                model.clone(),
                Arc::new(LoggingService::new(Arc::new(service))),
            );
        }

        Ok(Self {
            services,
            router_model: config.router_model.clone(),
            responder_model: config.responder_model.clone(),
        })
    }

    /// Registry over pre-built services, used by tests to inject mocks
    #[allow(dead_code)] // Used in tests
    pub fn from_services(router: Arc<dyn LlmService>, responder: Arc<dyn LlmService>) -> Self {
        let router_model = router.model_id().to_string();
        let responder_model = responder.model_id().to_string();
        let mut services = BTreeMap::new();
        services.insert(router_model.clone(), router);
        services.entry(responder_model.clone()).or_insert(responder);
        Self {
            services,
            router_model,
            responder_model,
        }
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Oracle used for routing decisions
    pub fn router(&self) -> Result<Arc<dyn LlmService>, LlmError> {
        self.get(&self.router_model).ok_or_else(|| {
            LlmError::invalid_request(format!("router model {} not registered", self.router_model))
        })
    }

    /// Oracle used by responders and synthesis
    pub fn responder(&self) -> Result<Arc<dyn LlmService>, LlmError> {
        self.get(&self.responder_model).ok_or_else(|| {
            LlmError::invalid_request(format!(
                "responder model {} not registered",
                self.responder_model
            ))
        })
    }

    pub fn available_models(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}
