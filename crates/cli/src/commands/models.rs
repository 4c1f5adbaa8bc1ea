//! List the models available on the configured Ollama server.

use oxpilot_config::AppConfig;
use oxpilot_providers::OllamaProvider;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let cfg = AppConfig::load(&cwd)?;

    if cfg.provider.backend == "openai" {
        return Err("model listing is only supported for the ollama backend".into());
    }

    let ollama = OllamaProvider::new(cfg.provider.host.clone());
    ollama.ping_with_retry(3).await.map_err(|e| {
        format!(
            "cannot reach ollama at {}: {e}\nis the server running? try: ollama serve",
            cfg.provider.host
        )
    })?;

    let mut models = ollama.list_models().await?;
    if models.is_empty() {
        println!("no models pulled yet; try: ollama pull <model>");
        return Ok(());
    }
    models.sort();
    for model in models {
        println!("{model}");
    }
    Ok(())
}
