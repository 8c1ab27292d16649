//! Concierge - multi-responder query routing service
//!
//! A router oracle picks which responders (web search, knowledge base,
//! advisory personas) answer each query; an Elm-style state machine drives
//! the loop and per-session history is kept in SQLite.

mod api;
mod config;
mod conversation;
mod db;
mod error;
mod llm;
mod responders;
mod router;
mod runtime;
mod search;
mod state_machine;
mod system_prompt;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use llm::ModelRegistry;
use responders::{ResponderRegistry, SynthesisResponder};
use router::{CapabilityRouter, ClassifierRouter, Router, RouterStrategy};
use runtime::{DatabaseStorage, Orchestrator, SessionStore};
use search::{GoogleSearch, KnowledgeBase, PineconeKnowledgeBase, WebSearch};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is normal outside local development
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concierge=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // Oracles; a missing key is fatal
    let models = ModelRegistry::new(&config.llm)?;
    tracing::info!(
        models = ?models.available_models(),
        endpoint = %config.oracle_endpoint(),
        "LLM registry initialized"
    );
    let router_llm = models.router()?;
    let responder_llm = models.responder()?;

    let web: Option<Arc<dyn WebSearch>> = match &config.google {
        Some(google) => Some(Arc::new(GoogleSearch::new(&google.api_key, &google.cse_id)?)),
        None => {
            tracing::warn!("GOOGLE_API_KEY or GOOGLE_CSE_ID not set; web_search responder disabled");
            None
        }
    };
    let knowledge_base: Option<(Arc<dyn KnowledgeBase>, usize)> = match &config.pinecone {
        Some(pinecone) => Some((
            Arc::new(PineconeKnowledgeBase::new(pinecone.clone())?),
            config.knowledge_base_top_k,
        )),
        None => {
            tracing::warn!(
                "PINECONE_API_KEY or PINECONE_INDEX_HOST not set; knowledge_base responder disabled"
            );
            None
        }
    };

    let registry = ResponderRegistry::standard(responder_llm.clone(), web, knowledge_base)?;
    tracing::info!(responders = ?registry.names(), "Responder registry built");

    let router: Arc<dyn Router> = match config.router {
        RouterStrategy::Classifier => Arc::new(ClassifierRouter::new(router_llm)),
        RouterStrategy::Capabilities => Arc::new(CapabilityRouter::new(router_llm)),
    };
    tracing::info!(strategy = ?config.router, policy = ?config.answer_policy, "Router selected");

    let store: Arc<dyn SessionStore> = Arc::new(DatabaseStorage::new(db));
    let orchestrator = Orchestrator::new(
        store,
        router,
        Arc::new(registry),
        config.engine_settings(),
    )
    .with_synthesizer(Arc::new(SynthesisResponder::new(responder_llm)));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(orchestrator))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Concierge listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
