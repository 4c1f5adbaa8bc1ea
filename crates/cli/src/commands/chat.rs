//! Interactive chat and single-message mode.

use std::io::Write;
use std::sync::Arc;

use oxpilot_config::AppConfig;
use oxpilot_core::event::AgentEvent;
use oxpilot_session::session::{AgentSession, PromptOptions, SessionConfig};
use oxpilot_tools::ToolLimits;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

const SYSTEM_PROMPT: &str = "You are oxpilot, a coding assistant working in the user's workspace. Prefer the provided tools to inspect and modify files; answer concisely.";

pub async fn run(
    message: Option<String>,
    model: Option<String>,
    continue_latest: bool,
    session_id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let cfg = AppConfig::load(&cwd)?;

    let provider = super::build_provider(&cfg).await?;
    let store = super::build_store(&cfg);

    let registry = Arc::new(oxpilot_tools::default_registry(&ToolLimits {
        shell_timeout_secs: cfg.tools.shell_timeout_secs,
        shell_max_output: cfg.tools.shell_max_output,
        read_max_lines: cfg.tools.read_max_lines,
    }));

    let cwd_str = cwd.to_string_lossy();
    let loaded = if let Some(id) = &session_id {
        Some(store.load_by_id(&cwd_str, id)?)
    } else if continue_latest {
        match store.continue_latest(&cwd_str) {
            Ok(loaded) => Some(loaded),
            Err(e) => {
                warn!(error = %e, "no session to continue, starting fresh");
                None
            }
        }
    } else {
        None
    };

    let session_cfg = SessionConfig {
        model: model.unwrap_or_else(|| cfg.provider.model.clone()),
        max_tokens: cfg.context.max_tokens,
        compaction_threshold: cfg.context.compaction_threshold,
        keep_recent: cfg.context.keep_recent,
        before_prompt_hook: cfg.hooks.before_prompt.clone(),
        after_response_hook: cfg.hooks.after_response.clone(),
        ..Default::default()
    };

    let session = AgentSession::new(session_cfg, provider, registry, store, loaded, SYSTEM_PROMPT)?;
    let _unsub = session.subscribe(Arc::new(print_event));

    if let Some(text) = message {
        let result = session.prompt(&text, PromptOptions::default()).await;
        session.save()?;
        result?;
        return Ok(());
    }

    println!(
        "oxpilot · model {} · session {}",
        session.model(),
        session.session_id()
    );
    println!("type a prompt, /model <name> to switch models, /quit to exit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }
        if let Some(model) = line.strip_prefix("/model ") {
            match session.set_model(model.trim()) {
                Ok(()) => println!("model set to {}", model.trim()),
                Err(e) => eprintln!("error: {e}"),
            }
            continue;
        }

        if let Err(e) = session.prompt(&line, PromptOptions::default()).await {
            eprintln!("error: {e}");
        }
    }

    session.save()?;
    Ok(())
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::Delta { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolCall { name, args, .. } => {
            println!("\n[tool] {name} {args}");
        }
        AgentEvent::ToolResult { name, result, .. } => {
            let preview: String = result.chars().take(200).collect();
            println!("[tool result] {name}: {preview}");
        }
        AgentEvent::TurnEnd => println!(),
        AgentEvent::Error { error } => eprintln!("\n[error] {error}"),
        _ => {}
    }
}
