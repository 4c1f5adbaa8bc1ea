//! Configuration loading for oxpilot.
//!
//! Layered: defaults, then `~/.oxpilot/config.toml`, then
//! `<cwd>/.oxpilot/config.toml`, then environment overrides. Later layers
//! win field by field; a missing file is simply skipped.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure, mapping to `config.toml`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("context", &self.context)
            .field("tools", &self.tools)
            .field("hooks", &self.hooks)
            .field("sessions", &self.sessions)
            .finish()
    }
}

/// LLM backend selection and connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// "ollama" (native streaming) or "openai" (OpenAI-compatible endpoint).
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub openai_base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
}

fn default_backend() -> String {
    "ollama".into()
}
fn default_host() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "qwen3:8b".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host: default_host(),
            model: default_model(),
            openai_base_url: String::new(),
            openai_api_key: None,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("model", &self.model)
            .field("openai_base_url", &self.openai_base_url)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Context window and compaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,

    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

fn default_max_tokens() -> usize {
    32768
}
fn default_compaction_threshold() -> f64 {
    0.60
}
fn default_keep_recent() -> usize {
    8
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            compaction_threshold: default_compaction_threshold(),
            keep_recent: default_keep_recent(),
        }
    }
}

/// Limits for the built-in tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,

    #[serde(default = "default_shell_max_output")]
    pub shell_max_output: usize,

    #[serde(default = "default_read_max_lines")]
    pub read_max_lines: usize,
}

fn default_shell_timeout() -> u64 {
    30
}
fn default_shell_max_output() -> usize {
    8192
}
fn default_read_max_lines() -> usize {
    500
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: default_shell_timeout(),
            shell_max_output: default_shell_max_output(),
            read_max_lines: default_read_max_lines(),
        }
    }
}

/// External prompt/response hooks (shell command lines; empty = disabled).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HooksConfig {
    #[serde(default)]
    pub before_prompt: String,

    #[serde(default)]
    pub after_response: String,
}

/// Session storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionsConfig {
    /// Overrides the default `~/.oxpilot/sessions` root when set.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl AppConfig {
    /// Home config directory: `~/.oxpilot`.
    pub fn config_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".oxpilot")
    }

    /// Load configuration for the given workspace.
    pub fn load(cwd: &Path) -> Result<Self, String> {
        let mut cfg = AppConfig::default();
        merge_file(&mut cfg, &Self::config_dir().join("config.toml"))?;
        merge_file(&mut cfg, &cwd.join(".oxpilot").join("config.toml"))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("OXPILOT_MODEL") {
            if !model.trim().is_empty() {
                self.provider.model = model;
            }
        }
        if let Ok(host) = std::env::var("OXPILOT_OLLAMA_HOST") {
            if !host.trim().is_empty() {
                self.provider.host = host;
            }
        }
        if let Ok(url) = std::env::var("OXPILOT_OPENAI_BASE_URL") {
            if !url.trim().is_empty() {
                self.provider.openai_base_url = url;
            }
        }
        if let Ok(key) = std::env::var("OXPILOT_OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.provider.openai_api_key = Some(key);
            }
        }
    }

    /// Save this configuration to the home config file.
    pub fn save(&self) -> Result<(), String> {
        let dir = Self::config_dir();
        std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
        let data = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(dir.join("config.toml"), data).map_err(|e| e.to_string())
    }
}

fn merge_file(cfg: &mut AppConfig, path: &Path) -> Result<(), String> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(format!("read config {}: {e}", path.display())),
    };
    let layer: AppConfig =
        toml::from_str(&data).map_err(|e| format!("parse config {}: {e}", path.display()))?;
    *cfg = layer_over(cfg.clone(), layer, &data);
    Ok(())
}

/// Overlay `layer` on `base`, section by section. Only sections present in
/// the raw TOML override, so a file that only sets `[context]` leaves the
/// provider settings alone.
fn layer_over(base: AppConfig, layer: AppConfig, raw: &str) -> AppConfig {
    let table: toml::Table = raw.parse().unwrap_or_default();
    AppConfig {
        provider: if table.contains_key("provider") {
            layer.provider
        } else {
            base.provider
        },
        context: if table.contains_key("context") {
            layer.context
        } else {
            base.context
        },
        tools: if table.contains_key("tools") {
            layer.tools
        } else {
            base.tools
        },
        hooks: if table.contains_key("hooks") {
            layer.hooks
        } else {
            base.hooks
        },
        sessions: if table.contains_key("sessions") {
            layer.sessions
        } else {
            base.sessions
        },
    }
}
