pub mod chat;
pub mod models;
pub mod sessions;

use std::path::PathBuf;
use std::sync::Arc;

use oxpilot_config::AppConfig;
use oxpilot_core::provider::Provider;
use oxpilot_providers::{OllamaProvider, OpenAiCompatProvider};
use oxpilot_session::persistence::SessionStore;

/// Build the configured LLM backend.
///
/// For the Ollama backend this fails fast when the server is unreachable,
/// before any session state is touched.
pub async fn build_provider(cfg: &AppConfig) -> Result<Arc<dyn Provider>, Box<dyn std::error::Error>> {
    if cfg.provider.backend == "openai" {
        let base_url = if cfg.provider.openai_base_url.is_empty() {
            "https://api.openai.com/v1".to_string()
        } else {
            cfg.provider.openai_base_url.clone()
        };
        let api_key = cfg.provider.openai_api_key.clone().unwrap_or_default();
        return Ok(Arc::new(OpenAiCompatProvider::new("openai", base_url, api_key)));
    }

    let ollama = OllamaProvider::new(cfg.provider.host.clone());
    ollama.ping_with_retry(3).await.map_err(|e| {
        format!(
            "cannot reach ollama at {}: {e}\nis the server running? try: ollama serve",
            cfg.provider.host
        )
    })?;
    Ok(Arc::new(ollama))
}

/// Build the session store from config.
pub fn build_store(cfg: &AppConfig) -> SessionStore {
    let root: PathBuf = cfg
        .sessions
        .root
        .clone()
        .unwrap_or_else(SessionStore::default_root);
    SessionStore::new(root)
}
