//! The public session API.
//!
//! `AgentSession` is the entry point used by outer layers (CLI/TUI). It owns
//! the canonical message log and the persistence handle, injects the system
//! prompt, drives the agent loop for each prompt, republishes loop events on
//! the bus, and compacts history after a turn when the token estimate crosses
//! the configured threshold.
//!
//! All operations are safe for concurrent callers; only one prompt may be in
//! flight at a time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use oxpilot_agent::loop_runner::{LoopConfig, run_loop};
use oxpilot_core::error::SessionError;
use oxpilot_core::event::{AgentError, AgentEvent, EventBus, EventListener};
use oxpilot_core::message::{Message, Role, ToolCall};
use oxpilot_core::provider::{Provider, enhance_model_error};
use oxpilot_core::tool::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::compaction::{TokenEstimator, compact_messages, should_compact};
use crate::hooks::run_hook;
use crate::persistence::{
    EntryMeta, LoadedSession, LogRecord, LogWriter, SessionMeta, SessionStore, new_entry_id,
    new_session_id, now_rfc3339,
};

const HOOK_TIMEOUT: Duration = Duration::from_secs(10);
const COMPACTION_TIMEOUT: Duration = Duration::from_secs(20);
const COMPACTION_TOOL_NAME: &str = "context_compaction";

/// Session behavior knobs, usually filled from the application config.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Initial model (a loaded session's model wins when present).
    pub model: String,

    /// Turn limit per prompt; 0 means unlimited.
    pub max_turns: u32,

    /// Context window size used for the compaction trigger.
    pub max_tokens: usize,

    /// Compact once the estimate exceeds `max_tokens * compaction_threshold`.
    pub compaction_threshold: f64,

    /// Number of most recent messages kept verbatim by compaction.
    pub keep_recent: usize,

    /// Shell command run over the user text before each prompt.
    pub before_prompt_hook: String,

    /// Shell command run over the final assistant text after each prompt.
    pub after_response_hook: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_turns: 30,
            max_tokens: 32768,
            compaction_threshold: 0.60,
            keep_recent: 8,
            before_prompt_hook: String::new(),
            after_response_hook: String::new(),
        }
    }
}

/// Per-prompt options.
#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    /// Image file references attached to the user message, in order.
    pub images: Vec<String>,
}

struct SessionState {
    model: String,
    system_prompt: String,
    messages: Vec<Message>,
    session_id: String,
    session_file: PathBuf,
    writer: Arc<LogWriter>,
    cancel: Option<CancellationToken>,
}

pub struct AgentSession {
    cwd: String,
    cfg: SessionConfig,
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    store: SessionStore,
    estimator: TokenEstimator,
    bus: EventBus,
    streaming: AtomicBool,
    state: Mutex<SessionState>,
}

impl AgentSession {
    /// Create a session bound to the current working directory.
    ///
    /// With `loaded = None` a fresh log is created; otherwise the session
    /// resumes the loaded history (and its model, when recorded).
    pub fn new(
        cfg: SessionConfig,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        store: SessionStore,
        loaded: Option<LoadedSession>,
        system_prompt: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let cwd = std::env::current_dir()?.to_string_lossy().into_owned();

        let mut model = cfg.model.clone();
        let loaded = match loaded {
            Some(loaded) => loaded,
            None => store.create(&cwd, &model)?,
        };
        if let Some(loaded_model) = &loaded.model {
            if !loaded_model.trim().is_empty() {
                model = loaded_model.clone();
            }
        }

        let state = SessionState {
            model,
            system_prompt: system_prompt.into(),
            messages: loaded.messages,
            session_id: loaded.id,
            writer: Arc::new(LogWriter::new(loaded.file_path.clone())),
            session_file: loaded.file_path,
            cancel: None,
        };

        Ok(Self {
            cwd,
            cfg,
            provider,
            registry,
            store,
            estimator: TokenEstimator::new(),
            bus: EventBus::new(),
            streaming: AtomicBool::new(false),
            state: Mutex::new(state),
        })
    }

    /// Submit a user prompt and drive it to completion.
    pub async fn prompt(&self, text: &str, opts: PromptOptions) -> Result<(), SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        // the before_prompt hook may rewrite the user text; its failure is
        // surfaced but never aborts the prompt
        let mut text = text.to_string();
        if !self.cfg.before_prompt_hook.is_empty() {
            match run_hook(&self.cfg.before_prompt_hook, &text, HOOK_TIMEOUT).await {
                Ok(out) if !out.is_empty() => text = out,
                Ok(_) => {}
                Err(e) => self.bus.publish(&AgentEvent::Error {
                    error: AgentError::Hook {
                        message: e.to_string(),
                    },
                }),
            }
        }

        let (cancel, working, writer, model, system_prompt, user_msg) = {
            let mut st = self.state.lock().unwrap();
            if self.streaming.swap(true, Ordering::SeqCst) {
                return Err(SessionError::AlreadyStreaming);
            }
            let cancel = CancellationToken::new();
            st.cancel = Some(cancel.clone());

            let user_msg = Message::user(text)
                .with_entry_id(new_entry_id())
                .with_images(opts.images);
            let mut working = st.messages.clone();
            working.push(user_msg.clone());

            (
                cancel,
                working,
                Arc::clone(&st.writer),
                st.model.clone(),
                st.system_prompt.clone(),
                user_msg,
            )
        };

        let result = self
            .drive_prompt(cancel, working, writer, &model, system_prompt, user_msg)
            .await;

        {
            let mut st = self.state.lock().unwrap();
            st.cancel = None;
        }
        self.streaming.store(false, Ordering::SeqCst);

        result
    }

    async fn drive_prompt(
        &self,
        cancel: CancellationToken,
        mut working: Vec<Message>,
        writer: Arc<LogWriter>,
        model: &str,
        system_prompt: String,
        user_msg: Message,
    ) -> Result<(), SessionError> {
        self.persist(&writer, &user_msg);

        let loop_cfg = LoopConfig {
            model: model.to_string(),
            tools: self.registry.definitions(),
            max_turns: self.cfg.max_turns,
            system_prompt,
        };

        let mut events = run_loop(
            cancel,
            working.clone(),
            loop_cfg,
            Arc::clone(&self.provider),
            Some(Arc::clone(&self.registry)),
        );

        // the canonical log is rebuilt from events: deltas and tool calls
        // accumulate per turn and become the assistant message at turn_end
        let mut turn_text = String::new();
        let mut turn_calls: Vec<ToolCall> = Vec::new();
        let mut final_err: Option<AgentError> = None;

        while let Some(ev) = events.recv().await {
            self.bus.publish(&ev);
            match ev {
                AgentEvent::TurnStart => {
                    turn_text.clear();
                    turn_calls.clear();
                }
                AgentEvent::Delta { text } => turn_text.push_str(&text),
                AgentEvent::ToolCall { id, name, args } => {
                    turn_calls.push(ToolCall::function(id, name, args));
                }
                AgentEvent::ToolResult { id, result, .. } => {
                    let msg = Message::tool_result(id, result).with_entry_id(new_entry_id());
                    self.persist(&writer, &msg);
                    working.push(msg);
                }
                AgentEvent::TurnEnd => {
                    let text = turn_text.trim().to_string();
                    if !text.is_empty() || !turn_calls.is_empty() {
                        let msg = Message::assistant(text)
                            .with_tool_calls(std::mem::take(&mut turn_calls))
                            .with_entry_id(new_entry_id());
                        self.persist(&writer, &msg);
                        working.push(msg);
                    }
                    turn_text.clear();
                    turn_calls.clear();
                }
                AgentEvent::Error { error } => {
                    if !error.is_cancelled() {
                        final_err = Some(error);
                    }
                }
                AgentEvent::Start | AgentEvent::End => {}
            }
        }

        // partial assistant text up to a cancellation/error cut point is kept
        let partial = turn_text.trim().to_string();
        if !partial.is_empty() {
            let msg = Message::assistant(partial).with_entry_id(new_entry_id());
            self.persist(&writer, &msg);
            working.push(msg);
        }

        {
            let mut st = self.state.lock().unwrap();
            st.messages = working;
        }

        self.try_compact().await;

        if !self.cfg.after_response_hook.is_empty() {
            let last_text = {
                let st = self.state.lock().unwrap();
                st.messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                    .map(|m| m.content.clone())
            };
            if let Some(text) = last_text {
                if let Err(e) = run_hook(&self.cfg.after_response_hook, &text, HOOK_TIMEOUT).await {
                    warn!(error = %e, "after_response hook failed");
                }
            }
        }

        match final_err {
            Some(err) => Err(SessionError::Agent(enhance(err, model))),
            None => Ok(()),
        }
    }

    fn persist(&self, writer: &LogWriter, msg: &Message) {
        match writer.append(&LogRecord::from_message(msg)) {
            Ok(()) => {}
            Err(SessionError::AppendBuffered { message }) => {
                self.bus.publish(&AgentEvent::Error {
                    error: AgentError::Persistence { message },
                });
            }
            Err(e) => {
                self.bus.publish(&AgentEvent::Error {
                    error: AgentError::Persistence {
                        message: e.to_string(),
                    },
                });
            }
        }
    }

    /// Compact the history when it crossed the configured threshold. The
    /// compaction shows up on the bus as a synthetic tool call/result pair so
    /// UIs can render a "compacting…" hint.
    async fn try_compact(&self) {
        let (messages, model, writer) = {
            let st = self.state.lock().unwrap();
            (st.messages.clone(), st.model.clone(), Arc::clone(&st.writer))
        };

        if !should_compact(
            &messages,
            &self.estimator,
            self.cfg.max_tokens,
            self.cfg.compaction_threshold,
        ) {
            return;
        }

        let call_id = format!("compaction-{}", new_session_id());
        let token_count = self.estimator.estimate_messages(&messages);
        self.bus.publish(&AgentEvent::ToolCall {
            id: call_id.clone(),
            name: COMPACTION_TOOL_NAME.into(),
            args: serde_json::json!({ "token_count": token_count }).to_string(),
        });

        let Some(result) = compact_messages(
            Arc::clone(&self.provider),
            &model,
            &messages,
            self.cfg.keep_recent,
            &self.estimator,
            COMPACTION_TIMEOUT,
        )
        .await
        else {
            self.bus.publish(&AgentEvent::ToolResult {
                id: call_id,
                name: COMPACTION_TOOL_NAME.into(),
                result: "history below compaction size, skipped".into(),
            });
            return;
        };

        if let Some(message) = &result.summary_error {
            self.bus.publish(&AgentEvent::Error {
                error: AgentError::Compaction {
                    message: message.clone(),
                },
            });
        }

        {
            let mut st = self.state.lock().unwrap();
            st.messages = result.messages.clone();
        }

        if let Err(e) = writer.append(&LogRecord::Compaction {
            summary: result.summary.clone(),
            token_before: result.token_before,
            token_after: result.token_after,
            timestamp: now_rfc3339(),
        }) {
            self.bus.publish(&AgentEvent::Error {
                error: AgentError::Persistence {
                    message: e.to_string(),
                },
            });
        }

        debug!(
            token_before = result.token_before,
            token_after = result.token_after,
            "session history compacted"
        );
        self.bus.publish(&AgentEvent::ToolResult {
            id: call_id,
            name: COMPACTION_TOOL_NAME.into(),
            result: format!(
                "compacted history: {} -> {} tokens",
                result.token_before, result.token_after
            ),
        });
    }

    /// Abort any current generation, then reissue the text as a steering
    /// prompt.
    pub async fn steer(&self, text: &str) -> Result<(), SessionError> {
        if self.is_streaming() {
            self.abort();
            let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            while self.is_streaming() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        self.prompt(&format!("[Steer] {text}"), PromptOptions::default())
            .await
    }

    /// Continue the conversation; equivalent to `prompt`.
    pub async fn follow_up(&self, text: &str) -> Result<(), SessionError> {
        self.prompt(text, PromptOptions::default()).await
    }

    /// Cancel the in-flight prompt, if any.
    pub fn abort(&self) {
        let cancel = {
            let st = self.state.lock().unwrap();
            st.cancel.clone()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
    }

    /// Drop the in-memory log. History stays on disk; a marker record is
    /// appended so reloads see the clearing.
    pub fn clear_messages(&self) -> Result<(), SessionError> {
        let writer = {
            let mut st = self.state.lock().unwrap();
            st.messages.clear();
            Arc::clone(&st.writer)
        };
        writer.append(&LogRecord::from_message(
            &Message::system("[session cleared]").with_entry_id(new_entry_id()),
        ))
    }

    /// Register an event listener; the returned closure unsubscribes it.
    pub fn subscribe(&self, listener: EventListener) -> Box<dyn FnOnce() + Send> {
        self.bus.subscribe(listener)
    }

    pub fn model(&self) -> String {
        self.state.lock().unwrap().model.clone()
    }

    pub fn set_model(&self, model: &str) -> Result<(), SessionError> {
        if model.trim().is_empty() {
            return Err(SessionError::EmptyModel);
        }
        let writer = {
            let mut st = self.state.lock().unwrap();
            st.model = model.to_string();
            Arc::clone(&st.writer)
        };
        writer.append(&LogRecord::ModelChange {
            model: model.to_string(),
            timestamp: now_rfc3339(),
        })
    }

    /// Append additional text to the system prompt for subsequent prompts.
    pub fn append_system_prompt(&self, text: &str) {
        let mut st = self.state.lock().unwrap();
        if st.system_prompt.is_empty() {
            st.system_prompt = text.to_string();
        } else {
            st.system_prompt.push_str("\n\n");
            st.system_prompt.push_str(text);
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Snapshot of the canonical message log.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }

    /// Drain any buffered log records to disk.
    pub fn save(&self) -> Result<(), SessionError> {
        let writer = {
            let st = self.state.lock().unwrap();
            Arc::clone(&st.writer)
        };
        writer.flush()
    }

    pub fn session_id(&self) -> String {
        self.state.lock().unwrap().session_id.clone()
    }

    pub fn session_file(&self) -> PathBuf {
        self.state.lock().unwrap().session_file.clone()
    }

    /// Sibling sessions in this workspace, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionMeta>, SessionError> {
        self.store.list(&self.cwd)
    }

    /// Message entries of the current log; `limit > 0` keeps only the tail.
    pub fn list_entries(&self, limit: usize) -> Result<Vec<EntryMeta>, SessionError> {
        let file = self.session_file();
        self.store.list_entries(&file, limit)
    }

    /// Swap this session over to a sibling log. Forbidden while streaming.
    pub fn switch_session(&self, id: &str) -> Result<(), SessionError> {
        if self.is_streaming() {
            return Err(SessionError::Busy("switch_session"));
        }
        let loaded = self.store.load_by_id(&self.cwd, id)?;
        self.install(loaded);
        Ok(())
    }

    /// Branch a new session off the given entry and switch to it, returning
    /// the new session id. The original session is unmodified on disk.
    pub fn checkout(&self, entry_id: &str) -> Result<String, SessionError> {
        if self.is_streaming() {
            return Err(SessionError::Busy("checkout"));
        }
        let (current_id, current_file, model) = {
            let st = self.state.lock().unwrap();
            (st.session_id.clone(), st.session_file.clone(), st.model.clone())
        };
        let branch =
            self.store
                .checkout_from_entry(&self.cwd, &current_id, &current_file, entry_id, &model)?;
        let new_id = branch.id.clone();
        self.install(branch);
        Ok(new_id)
    }

    fn install(&self, loaded: LoadedSession) {
        let mut st = self.state.lock().unwrap();
        st.session_id = loaded.id;
        st.writer = Arc::new(LogWriter::new(loaded.file_path.clone()));
        st.session_file = loaded.file_path;
        st.messages = loaded.messages;
        if let Some(model) = loaded.model {
            if !model.trim().is_empty() {
                st.model = model;
            }
        }
    }
}

fn enhance(err: AgentError, model: &str) -> AgentError {
    match err {
        AgentError::Chat { message } => AgentError::Chat {
            message: enhance_model_error(&message, model),
        },
        AgentError::Stream { message } => AgentError::Stream {
            message: enhance_model_error(&message, model),
        },
        other => other,
    }
}
