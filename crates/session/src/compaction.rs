//! Token-bounded history compaction.
//!
//! When a session's estimated token count crosses the configured threshold,
//! the cold prefix of the history is folded into a single system summary and
//! only the hot tail is kept verbatim. The summary comes from one streaming
//! LLM call; if that call fails or returns nothing, a deterministic fallback
//! quoting the last cold message is used instead.

use std::sync::Arc;
use std::time::Duration;

use oxpilot_core::message::{Message, Role};
use oxpilot_core::provider::{ChatRequest, LlmEvent, Provider};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Prefix of the system message produced by compaction.
pub const SUMMARY_PREFIX: &str = "History summary (auto-compacted):\n";

const SUMMARY_PROMPT: &str = "You are a conversation history compactor. Distill the following dialogue history into a concise summary.\n\nRequirements:\n1. Current task: one sentence stating the user's core goal\n2. Completed operations: the key actions already performed (files touched, findings)\n3. Current state: where the code/task stands right now\n4. Key findings: important technical details, error messages, decisions\n5. Outstanding work: what remains to be done\n\nDialogue history:\n";

/// Estimates token counts with a cl100k-family BPE encoder.
///
/// Falls back to `char_count / 3` when the encoder cannot be constructed.
pub struct TokenEstimator {
    bpe: Option<tiktoken_rs::CoreBPE>,
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self {
            bpe: tiktoken_rs::cl100k_base().ok(),
        }
    }

    pub fn estimate_text(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.chars().count() / 3,
        }
    }

    /// Per message: a constant overhead of 4 plus the role and content counts.
    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| 4 + self.estimate_text(m.role.as_str()) + self.estimate_text(&m.content))
            .sum()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the history is over the compaction threshold.
pub fn should_compact(
    messages: &[Message],
    estimator: &TokenEstimator,
    max_tokens: usize,
    threshold: f64,
) -> bool {
    if max_tokens == 0 || threshold <= 0.0 {
        return false;
    }
    estimator.estimate_messages(messages) as f64 > max_tokens as f64 * threshold
}

/// The outcome of one compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub summary: String,
    pub token_before: usize,
    pub token_after: usize,
    pub messages: Vec<Message>,
    /// Set when the summary call failed and the deterministic fallback was
    /// used instead.
    pub summary_error: Option<String>,
}

/// Compact a message list, keeping the last `keep_recent` messages verbatim.
///
/// Returns `None` when there is nothing to do (`len <= keep_recent + 1`).
/// The summary call runs under its own timeout, independent of user abort.
pub async fn compact_messages(
    provider: Arc<dyn Provider>,
    model: &str,
    messages: &[Message],
    keep_recent: usize,
    estimator: &TokenEstimator,
    timeout: Duration,
) -> Option<CompactionResult> {
    let keep_recent = if keep_recent == 0 { 8 } else { keep_recent };
    if messages.len() <= keep_recent + 1 {
        return None;
    }

    let token_before = estimator.estimate_messages(messages);
    let split = messages.len() - keep_recent;
    let cold = &messages[..split];
    let hot = &messages[split..];

    let history = build_history_text(cold);
    let (summary, summary_error) =
        match summarize_history(provider, model, &history, timeout).await {
            Ok(summary) => (summary, None),
            Err(e) => {
                warn!(error = %e, "history summarization failed, using fallback");
                (fallback_summary(cold), Some(e))
            }
        };

    let mut compacted = Vec::with_capacity(hot.len() + 1);
    compacted.push(Message::system(format!("{SUMMARY_PREFIX}{summary}")));
    compacted.extend_from_slice(hot);

    let token_after = estimator.estimate_messages(&compacted);
    debug!(token_before, token_after, "history compacted");

    Some(CompactionResult {
        summary,
        token_before,
        token_after,
        messages: compacted,
        summary_error,
    })
}

async fn summarize_history(
    provider: Arc<dyn Provider>,
    model: &str,
    history: &str,
    timeout: Duration,
) -> Result<String, String> {
    let request = ChatRequest {
        model: model.to_string(),
        messages: vec![Message::user(format!("{SUMMARY_PROMPT}{history}"))],
        tools: Vec::new(),
        stream: true,
    };

    // fresh token: user abort must not interrupt compaction
    let cancel = CancellationToken::new();

    let collect = async {
        let mut events = provider
            .chat(cancel.clone(), request)
            .await
            .map_err(|e| e.to_string())?;
        let mut summary = String::new();
        while let Some(event) = events.recv().await {
            match event {
                LlmEvent::MessageDelta(delta) => summary.push_str(&delta),
                LlmEvent::Error(e) => return Err(e.to_string()),
                _ => {}
            }
        }
        Ok(summary)
    };

    let summary = match tokio::time::timeout(timeout, collect).await {
        Ok(result) => result?,
        Err(_) => {
            cancel.cancel();
            return Err(format!("summary timed out after {}s", timeout.as_secs()));
        }
    };

    if summary.trim().is_empty() {
        return Err("empty summary".to_string());
    }
    Ok(summary)
}

fn build_history_text(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        if msg.content.trim().is_empty() {
            continue;
        }
        out.push('[');
        out.push_str(msg.role.as_str());
        out.push_str("] ");
        out.push_str(&msg.content);
        out.push('\n');
    }
    out
}

fn fallback_summary(messages: &[Message]) -> String {
    let Some(last) = messages.last() else {
        return "No prior history.".to_string();
    };
    format!(
        "Current task: continue the coding task in progress.\nCompleted operations: multiple dialogue turns and tool calls were executed.\nCurrent state: the session was compacted; recent context is preserved.\nKey findings: {}\nOutstanding work: continue from the latest user request.",
        truncate_bytes(&last.content, 300)
    )
}

fn truncate_bytes(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Whether a message is the system summary produced by compaction.
pub fn is_summary_message(msg: &Message) -> bool {
    msg.role == Role::System && msg.content.starts_with(SUMMARY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxpilot_agent::testing::{ScriptedProvider, text_events};

    fn long_messages(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("user message number {i} with a fair amount of text"))
                } else {
                    Message::assistant(format!("assistant reply number {i} with plenty of words"))
                }
            })
            .collect()
    }

    #[test]
    fn estimator_counts_something() {
        let estimator = TokenEstimator::new();
        assert!(estimator.estimate_text("hello world, this is a test") > 0);
        assert_eq!(estimator.estimate_text(""), 0);
    }

    #[test]
    fn message_estimate_includes_overhead() {
        let estimator = TokenEstimator::new();
        let msgs = vec![Message::user("hi")];
        assert!(estimator.estimate_messages(&msgs) >= 4);
    }

    #[test]
    fn should_compact_respects_threshold() {
        let estimator = TokenEstimator::new();
        let msgs = long_messages(10);
        assert!(should_compact(&msgs, &estimator, 10, 0.5));
        assert!(!should_compact(&msgs, &estimator, 1_000_000, 0.5));
        assert!(!should_compact(&msgs, &estimator, 0, 0.5));
        assert!(!should_compact(&msgs, &estimator, 10, 0.0));
    }

    #[tokio::test]
    async fn under_threshold_input_is_untouched() {
        let provider = Arc::new(ScriptedProvider::single_text("summary"));
        let estimator = TokenEstimator::new();
        let msgs = long_messages(5);

        let result = compact_messages(
            provider,
            "mock",
            &msgs,
            8,
            &estimator,
            Duration::from_secs(20),
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn compaction_keeps_hot_tail_verbatim() {
        let provider = Arc::new(ScriptedProvider::script(vec![text_events(
            "Current task: testing compaction.",
        )]));
        let estimator = TokenEstimator::new();
        let msgs = long_messages(12);

        let result = compact_messages(
            provider,
            "mock",
            &msgs,
            4,
            &estimator,
            Duration::from_secs(20),
        )
        .await
        .unwrap();

        assert_eq!(result.messages.len(), 5);
        assert!(is_summary_message(&result.messages[0]));
        assert!(result.messages[0].content.contains("testing compaction"));
        assert_eq!(&result.messages[1..], &msgs[8..]);
        assert!(result.summary_error.is_none());
        assert_eq!(result.token_before, estimator.estimate_messages(&msgs));
    }

    #[tokio::test]
    async fn empty_summary_uses_fallback() {
        let provider = Arc::new(ScriptedProvider::script(vec![text_events("")]));
        let estimator = TokenEstimator::new();
        let msgs = long_messages(12);

        let result = compact_messages(
            provider,
            "mock",
            &msgs,
            4,
            &estimator,
            Duration::from_secs(20),
        )
        .await
        .unwrap();

        assert!(result.summary_error.is_some());
        assert!(result.summary.contains("Current task:"));
        // the fallback quotes the last cold message
        assert!(result.summary.contains("number 7"));
    }

    #[tokio::test]
    async fn hung_summary_times_out_to_fallback() {
        let provider = Arc::new(ScriptedProvider::hanging());
        let estimator = TokenEstimator::new();
        let msgs = long_messages(12);

        let result = compact_messages(
            provider,
            "mock",
            &msgs,
            4,
            &estimator,
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert!(result.summary_error.unwrap().contains("timed out"));
        assert!(is_summary_message(&result.messages[0]));
    }

    #[test]
    fn fallback_truncates_at_300_bytes() {
        let long = "x".repeat(500);
        let msgs = vec![Message::user(long)];
        let summary = fallback_summary(&msgs);
        assert!(summary.contains(&format!("{}...", "x".repeat(300))));
    }

    #[test]
    fn history_text_skips_empty_messages() {
        let msgs = vec![
            Message::user("hello"),
            Message::assistant(""),
            Message::assistant("world"),
        ];
        let text = build_history_text(&msgs);
        assert_eq!(text, "[user] hello\n[assistant] world\n");
    }
}
