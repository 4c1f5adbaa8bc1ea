//! End-to-end session scenarios: prompt → tools → reply, persistence
//! round-trips, compaction continuity, cancellation, and checkout branching.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use oxpilot_agent::testing::{ScriptedProvider, text_events, tool_call_events};
use oxpilot_core::error::{SessionError, ToolError};
use oxpilot_core::event::AgentEvent;
use oxpilot_core::message::Role;
use oxpilot_core::provider::{Provider, ToolParameters, ToolProperty};
use oxpilot_core::tool::{Tool, ToolRegistry};
use oxpilot_session::compaction::SUMMARY_PREFIX;
use oxpilot_session::persistence::SessionStore;
use oxpilot_session::session::{AgentSession, PromptOptions, SessionConfig};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct FakeReadTool;

#[async_trait]
impl Tool for FakeReadTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read a file"
    }
    fn parameters_schema(&self) -> ToolParameters {
        ToolParameters::default()
            .property("path", ToolProperty::string("file path"))
            .require("path")
    }
    async fn execute(
        &self,
        _cancel: CancellationToken,
        _args_json: &str,
    ) -> Result<String, ToolError> {
        Ok("CONTENT".to_string())
    }
}

fn collector(session: &AgentSession) -> Arc<Mutex<Vec<AgentEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _unsub = session.subscribe(Arc::new(move |ev| {
        sink.lock().unwrap().push(ev.clone());
    }));
    events
}

fn event_types(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}

fn session_with(
    root: &TempDir,
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    cfg: SessionConfig,
) -> AgentSession {
    AgentSession::new(
        cfg,
        provider,
        registry,
        SessionStore::new(root.path().to_path_buf()),
        None,
        "",
    )
    .unwrap()
}

fn default_cfg() -> SessionConfig {
    SessionConfig {
        model: "mock".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn single_turn_prompt_and_reply() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::single_text("hello"));
    let session = session_with(&root, provider, Arc::new(ToolRegistry::new()), default_cfg());
    let events = collector(&session);

    session.prompt("hi", PromptOptions::default()).await.unwrap();

    assert_eq!(
        event_types(&events.lock().unwrap()),
        vec!["start", "turn_start", "delta", "turn_end", "end"]
    );

    let msgs = session.messages();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].role, Role::User);
    assert_eq!(msgs[0].content, "hi");
    assert_eq!(msgs[1].role, Role::Assistant);
    assert_eq!(msgs[1].content, "hello");
    assert!(msgs.iter().all(|m| m.entry_id.is_some()));
}

#[tokio::test]
async fn tool_turn_produces_four_messages() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::script(vec![
        tool_call_events("tc-1", "read_file", r#"{"path":"x"}"#, ""),
        text_events("done"),
    ]));
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(FakeReadTool));
    let session = session_with(&root, provider, registry, default_cfg());

    session
        .prompt("read x", PromptOptions::default())
        .await
        .unwrap();

    let msgs = session.messages();
    assert_eq!(msgs.len(), 4);
    assert_eq!(msgs[0].role, Role::User);
    assert_eq!(msgs[1].role, Role::Assistant);
    assert_eq!(msgs[1].tool_calls.len(), 1);
    assert_eq!(msgs[1].tool_calls[0].function.name, "read_file");
    assert_eq!(msgs[2].role, Role::Tool);
    assert_eq!(msgs[2].content, "CONTENT");
    assert_eq!(msgs[2].tool_call_id.as_deref(), Some("tc-1"));
    assert_eq!(msgs[3].role, Role::Assistant);
    assert_eq!(msgs[3].content, "done");
}

#[tokio::test]
async fn reload_reconstructs_messages_exactly() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::script(vec![
        tool_call_events("tc-1", "read_file", r#"{"path":"x"}"#, ""),
        text_events("done"),
        text_events("and again"),
    ]));
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(FakeReadTool));
    let store_root = root.path().to_path_buf();
    let session = session_with(&root, provider, registry, default_cfg());

    session
        .prompt("read x", PromptOptions::default())
        .await
        .unwrap();
    session
        .prompt("thanks", PromptOptions::default())
        .await
        .unwrap();
    session.save().unwrap();

    let store = SessionStore::new(store_root);
    let reloaded = store.load(&session.session_file()).unwrap();
    assert_eq!(reloaded.id, session.session_id());
    assert_eq!(reloaded.messages, session.messages());
}

#[tokio::test]
async fn log_file_only_grows() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::script(vec![
        text_events("one"),
        text_events("two"),
    ]));
    let session = session_with(&root, provider, Arc::new(ToolRegistry::new()), default_cfg());
    let file = session.session_file();

    let mut last_len = std::fs::metadata(&file).unwrap().len();
    for text in ["first", "second"] {
        session.prompt(text, PromptOptions::default()).await.unwrap();
        let len = std::fs::metadata(&file).unwrap().len();
        assert!(len > last_len);
        last_len = len;
    }

    session.clear_messages().unwrap();
    assert!(std::fs::metadata(&file).unwrap().len() > last_len);
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn compaction_summary_reaches_next_request() {
    let root = TempDir::new().unwrap();
    let long = "a detailed analysis of the authentication module with retry handling and audit logging suggestions repeated for length";
    let provider = Arc::new(ScriptedProvider::script(vec![
        text_events(long),
        text_events(long),
        // summary request issued by the compactor after the second prompt
        text_events("Current task: fix the auth flow.\nCompleted operations: located the token refresh bug."),
        text_events("continuing from the summarized context"),
        // a second compaction pass may fire after the third prompt
        text_events("Current task: fix the auth flow."),
    ]));
    let cfg = SessionConfig {
        model: "mock".into(),
        max_tokens: 40,
        compaction_threshold: 0.2,
        keep_recent: 2,
        ..Default::default()
    };
    let session = session_with(
        &root,
        Arc::clone(&provider) as Arc<dyn Provider>,
        Arc::new(ToolRegistry::new()),
        cfg,
    );
    let events = collector(&session);

    session.prompt("analyze the auth module", PromptOptions::default()).await.unwrap();
    session.prompt("add edge cases", PromptOptions::default()).await.unwrap();

    let msgs = session.messages();
    assert_eq!(msgs[0].role, Role::System);
    assert!(msgs[0].content.starts_with(SUMMARY_PREFIX));
    assert!(msgs[0].content.contains("fix the auth flow"));
    // the hot tail survives verbatim
    assert_eq!(msgs.len(), 3);

    session.prompt("continue with the migration steps", PromptOptions::default()).await.unwrap();

    // the request carrying the follow-up must include the summary message
    let requests = provider.requests();
    let followup_with_summary = requests.iter().any(|req| {
        let has_followup = req
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.content.contains("continue with the migration steps"));
        let has_summary = req
            .messages
            .iter()
            .any(|m| m.role == Role::System && m.content.starts_with(SUMMARY_PREFIX));
        has_followup && has_summary
    });
    assert!(followup_with_summary);

    // compaction is surfaced as a synthetic tool call/result pair
    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolCall { name, .. } if name == "context_compaction"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolResult { name, .. } if name == "context_compaction"
    )));
}

#[tokio::test]
async fn abort_cancels_a_hanging_stream() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::hanging());
    let session = Arc::new(session_with(
        &root,
        provider,
        Arc::new(ToolRegistry::new()),
        default_cfg(),
    ));
    let events = collector(&session);

    let driver = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.prompt("hang", PromptOptions::default()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.is_streaming());
    session.abort();
    driver.await.unwrap().unwrap();

    let events = events.lock().unwrap();
    match events.last().unwrap() {
        AgentEvent::Error { error } => assert!(error.is_cancelled()),
        other => panic!("expected cancelled error, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::End)));
    assert!(!session.is_streaming());
}

#[tokio::test]
async fn concurrent_prompt_is_rejected() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::hanging());
    let session = Arc::new(session_with(
        &root,
        provider,
        Arc::new(ToolRegistry::new()),
        default_cfg(),
    ));

    let driver = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.prompt("hang", PromptOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = session
        .prompt("second", PromptOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AlreadyStreaming));

    session.abort();
    driver.await.unwrap().unwrap();
}

#[tokio::test]
async fn checkout_branches_without_touching_parent() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::script(vec![
        tool_call_events("tc-1", "read_file", r#"{"path":"x"}"#, ""),
        text_events("done"),
        text_events("branched reply"),
    ]));
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(FakeReadTool));
    let session = session_with(&root, provider, registry, default_cfg());

    session
        .prompt("read x", PromptOptions::default())
        .await
        .unwrap();

    let parent_id = session.session_id();
    let parent_file = session.session_file();
    let parent_len = std::fs::metadata(&parent_file).unwrap().len();
    let before_branch = session.messages();

    // branch from the assistant entry that carries the tool call
    let entries = session.list_entries(0).unwrap();
    let entry = entries
        .iter()
        .find(|e| e.role == Role::Assistant)
        .unwrap()
        .id
        .clone();
    let new_id = session.checkout(&entry).unwrap();

    assert_ne!(new_id, parent_id);
    assert_eq!(session.session_id(), new_id);
    let branched = session.messages();
    assert_eq!(branched.as_slice(), &before_branch[..2]);

    // the branch header points back at the parent
    let metas = session.list_sessions().unwrap();
    let branch_meta = metas.iter().find(|m| m.id == new_id).unwrap();
    assert_eq!(branch_meta.parent_id.as_deref(), Some(parent_id.as_str()));
    assert_eq!(branch_meta.parent_entry_id.as_deref(), Some(entry.as_str()));

    // prompting the branch leaves the parent file untouched
    session
        .prompt("continue here", PromptOptions::default())
        .await
        .unwrap();
    assert_eq!(std::fs::metadata(&parent_file).unwrap().len(), parent_len);
    assert_ne!(session.session_file(), parent_file);
}

#[tokio::test]
async fn switch_session_reloads_a_sibling() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::script(vec![
        text_events("first session reply"),
    ]));
    let store = SessionStore::new(root.path().to_path_buf());
    let cwd = std::env::current_dir().unwrap().to_string_lossy().into_owned();
    let sibling = store.create(&cwd, "mock").unwrap();

    let session = session_with(&root, provider, Arc::new(ToolRegistry::new()), default_cfg());
    session
        .prompt("hello", PromptOptions::default())
        .await
        .unwrap();
    assert_eq!(session.messages().len(), 2);

    session.switch_session(&sibling.id).unwrap();
    assert_eq!(session.session_id(), sibling.id);
    assert!(session.messages().is_empty());

    assert!(matches!(
        session.switch_session("no-such-session"),
        Err(SessionError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn before_prompt_hook_rewrites_user_text() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::single_text("ok"));
    let cfg = SessionConfig {
        model: "mock".into(),
        before_prompt_hook: "tr a-z A-Z".into(),
        ..Default::default()
    };
    let session = session_with(
        &root,
        Arc::clone(&provider) as Arc<dyn Provider>,
        Arc::new(ToolRegistry::new()),
        cfg,
    );

    session.prompt("shout", PromptOptions::default()).await.unwrap();

    let requests = provider.requests();
    let user = requests[0]
        .messages
        .iter()
        .find(|m| m.role == Role::User)
        .unwrap();
    assert_eq!(user.content, "SHOUT");
    assert_eq!(session.messages()[0].content, "SHOUT");
}

#[tokio::test]
async fn failing_hook_does_not_abort_the_prompt() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::single_text("ok"));
    let cfg = SessionConfig {
        model: "mock".into(),
        before_prompt_hook: "exit 7".into(),
        ..Default::default()
    };
    let session = session_with(&root, provider, Arc::new(ToolRegistry::new()), cfg);
    let events = collector(&session);

    session.prompt("hello", PromptOptions::default()).await.unwrap();

    assert_eq!(session.messages().len(), 2);
    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(e, AgentEvent::Error { .. })));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::End)));
}

#[tokio::test]
async fn steer_aborts_then_reissues() {
    let root = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::script(vec![text_events("steered reply")]));
    let session = Arc::new(session_with(
        &root,
        Arc::clone(&provider) as Arc<dyn Provider>,
        Arc::new(ToolRegistry::new()),
        default_cfg(),
    ));

    session.steer("look at the tests instead").await.unwrap();

    let msgs = session.messages();
    assert_eq!(msgs[0].content, "[Steer] look at the tests instead");
    assert_eq!(msgs[1].content, "steered reply");
}
