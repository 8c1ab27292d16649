//! Application configuration, read once at startup from the environment

use crate::llm::{LlmConfig, DEFAULT_BASE_URL};
use crate::responders::DEFAULT_TOP_K;
use crate::router::RouterStrategy;
use crate::runtime::EngineSettings;
use crate::search::{PineconeConfig, DEFAULT_EMBEDDING_MODEL};
use crate::state_machine::{AnswerPolicy, DEFAULT_MAX_ITERATIONS};
use crate::system_prompt::SYSTEM_PREAMBLE;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RESPONDER_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Google Programmable Search credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleConfig {
    pub api_key: String,
    pub cse_id: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    /// `None` leaves the web search responder out
    pub google: Option<GoogleConfig>,
    /// `None` leaves the knowledge base responder out
    pub pinecone: Option<PineconeConfig>,
    pub knowledge_base_top_k: usize,
    pub router: RouterStrategy,
    pub answer_policy: AnswerPolicy,
    pub max_iterations: u32,
    pub oracle_timeout: Duration,
    pub responder_timeout: Duration,
    pub db_path: PathBuf,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let llm = LlmConfig::from_lookup(&lookup);

        let google = match (get("GOOGLE_API_KEY"), get("GOOGLE_CSE_ID")) {
            (Some(api_key), Some(cse_id)) => Some(GoogleConfig { api_key, cse_id }),
            _ => None,
        };

        // Embeddings go through the oracle's OpenAI-compatible endpoint
        let pinecone = match (get("PINECONE_API_KEY"), get("PINECONE_INDEX_HOST"), &llm.api_key) {
            (Some(api_key), Some(index_host), Some(embedding_key)) => Some(PineconeConfig {
                api_key,
                index_host,
                embedding_api_key: embedding_key.clone(),
                embedding_base_url: llm.base_url.clone(),
                embedding_model: get("EMBEDDING_MODEL")
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            }),
            _ => None,
        };

        let db_path = get("CONCIERGE_DB_PATH").map_or_else(
            || {
                let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".concierge").join("sessions.db")
            },
            PathBuf::from,
        );

        Ok(Self {
            google,
            pinecone,
            knowledge_base_top_k: parse_or("KNOWLEDGE_BASE_TOP_K", get("KNOWLEDGE_BASE_TOP_K"), DEFAULT_TOP_K)?,
            router: parse_or("CONCIERGE_ROUTER", get("CONCIERGE_ROUTER"), RouterStrategy::default())?,
            answer_policy: parse_or(
                "CONCIERGE_ANSWER_POLICY",
                get("CONCIERGE_ANSWER_POLICY"),
                AnswerPolicy::default(),
            )?,
            max_iterations: parse_or(
                "CONCIERGE_MAX_ITERATIONS",
                get("CONCIERGE_MAX_ITERATIONS"),
                DEFAULT_MAX_ITERATIONS,
            )?,
            oracle_timeout: Duration::from_secs(parse_or(
                "CONCIERGE_ORACLE_TIMEOUT_SECS",
                get("CONCIERGE_ORACLE_TIMEOUT_SECS"),
                DEFAULT_ORACLE_TIMEOUT_SECS,
            )?),
            responder_timeout: Duration::from_secs(parse_or(
                "CONCIERGE_RESPONDER_TIMEOUT_SECS",
                get("CONCIERGE_RESPONDER_TIMEOUT_SECS"),
                DEFAULT_RESPONDER_TIMEOUT_SECS,
            )?),
            db_path,
            port: parse_or("CONCIERGE_PORT", get("CONCIERGE_PORT"), DEFAULT_PORT)?,
            llm,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_iterations: self.max_iterations,
            oracle_timeout: self.oracle_timeout,
            responder_timeout: self.responder_timeout,
            system_preamble: SYSTEM_PREAMBLE.to_string(),
            answer_policy: self.answer_policy,
        }
    }

    /// Oracle endpoint as it will be called
    pub fn oracle_endpoint(&self) -> &str {
        self.llm.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
