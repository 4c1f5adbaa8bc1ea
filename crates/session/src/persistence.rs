//! Append-only session logs.
//!
//! A session log is a newline-separated sequence of JSON records tagged by
//! `type`. The header is always the first record; records follow in the
//! chronological order of their events; loaders skip any line that fails to
//! decode. Files are never rewritten — appending is the only mutation.
//!
//! Logs live under `<root>/<workspace_digest>/<session_id>.log`, so parallel
//! projects in the same account never see each other's sessions.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{SecondsFormat, Utc};
use oxpilot_core::error::SessionError;
use oxpilot_core::message::{Message, Role, ToolCall};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// One record in a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    Header {
        id: String,
        cwd: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_entry_id: Option<String>,
        timestamp: String,
    },
    ModelChange {
        model: String,
        timestamp: String,
    },
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: Role,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        timestamp: String,
    },
    Compaction {
        summary: String,
        token_before: usize,
        token_after: usize,
        timestamp: String,
    },
}

impl LogRecord {
    /// Build a message record from a message, stamped now.
    pub fn from_message(msg: &Message) -> Self {
        LogRecord::Message {
            id: msg.entry_id.clone(),
            role: msg.role,
            content: msg.content.clone(),
            images: msg.images.clone(),
            tool_calls: msg.tool_calls.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            timestamp: now_rfc3339(),
        }
    }

    /// Rebuild the in-memory message from a message record.
    fn to_message(&self) -> Option<Message> {
        match self {
            LogRecord::Message {
                id,
                role,
                content,
                images,
                tool_calls,
                tool_call_id,
                ..
            } => {
                let mut msg = Message {
                    role: *role,
                    content: content.clone(),
                    images: images.clone(),
                    tool_calls: tool_calls.clone(),
                    tool_call_id: tool_call_id.clone(),
                    entry_id: id.clone(),
                };
                if msg.tool_call_id.as_deref() == Some("") {
                    msg.tool_call_id = None;
                }
                Some(msg)
            }
            _ => None,
        }
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Lexicographically sortable session id: UTC timestamp with nanoseconds.
pub fn new_session_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%S.%fZ").to_string()
}

/// Entry id: the same format with a stable prefix.
pub fn new_entry_id() -> String {
    format!("e-{}", new_session_id())
}

/// Fixed-length stable digest of the workspace path, used as a directory
/// name: first 12 hex chars of SHA-256 over the lowercased trimmed path.
pub fn workspace_digest(cwd: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cwd.trim().to_lowercase().as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Crash-buffered append-only writer for one session log.
///
/// Serialized records go into an in-memory queue first; every append then
/// tries to flush the whole queue. If a write fails the bytes stay queued and
/// the caller gets an error — a record is either on disk or still buffered,
/// never silently lost. `flush` drains the queue (the session calls it from
/// `save`).
pub struct LogWriter {
    path: PathBuf,
    pending: Mutex<VecDeque<Vec<u8>>>,
}

impl LogWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize and append one record, flushing anything still buffered
    /// first. On failure the record stays in the pending queue.
    pub fn append(&self, record: &LogRecord) -> Result<(), SessionError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut pending = self.pending.lock().unwrap();
        pending.push_back(line);
        self.flush_locked(&mut pending)
            .map_err(|e| SessionError::AppendBuffered {
                message: e.to_string(),
            })
    }

    /// Drain the pending queue to disk.
    pub fn flush(&self) -> Result<(), SessionError> {
        let mut pending = self.pending.lock().unwrap();
        self.flush_locked(&mut pending)
            .map_err(SessionError::from)
    }

    /// Number of records still waiting for a successful write.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn flush_locked(&self, pending: &mut VecDeque<Vec<u8>>) -> std::io::Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            create_log_dir(parent)?;
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let mut file = options.open(&self.path)?;

        while let Some(line) = pending.front() {
            file.write_all(line)?;
            pending.pop_front();
        }
        Ok(())
    }
}

/// Create a session directory with mode 0755, independent of the caller's
/// umask.
fn create_log_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(path)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Metadata of one session file in a workspace.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub id: String,
    pub file_path: PathBuf,
    pub cwd: String,
    pub parent_id: Option<String>,
    pub parent_entry_id: Option<String>,
    pub updated_at: SystemTime,
}

/// Metadata of one message entry, for history pickers.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub id: String,
    pub role: Role,
    pub preview: String,
    pub timestamp: String,
}

/// A session reconstructed from its log file.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub id: String,
    pub file_path: PathBuf,
    pub cwd: String,
    pub parent_id: Option<String>,
    pub parent_entry_id: Option<String>,
    pub model: Option<String>,
    pub messages: Vec<Message>,
}

/// Manages session files under a root directory.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Default root: `~/.oxpilot/sessions`.
    pub fn default_root() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".oxpilot").join("sessions")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workspace_dir(&self, cwd: &str) -> PathBuf {
        self.root.join(workspace_digest(cwd))
    }

    /// Create a fresh session log for the workspace.
    pub fn create(&self, cwd: &str, model: &str) -> Result<LoadedSession, SessionError> {
        self.create_with_parent(cwd, model, None, None)
    }

    fn create_with_parent(
        &self,
        cwd: &str,
        model: &str,
        parent_id: Option<String>,
        parent_entry_id: Option<String>,
    ) -> Result<LoadedSession, SessionError> {
        let id = new_session_id();
        let file_path = self.workspace_dir(cwd).join(format!("{id}.log"));

        let writer = LogWriter::new(file_path.clone());
        writer.append(&LogRecord::Header {
            id: id.clone(),
            cwd: cwd.to_string(),
            parent_id: parent_id.clone(),
            parent_entry_id: parent_entry_id.clone(),
            timestamp: now_rfc3339(),
        })?;
        if !model.is_empty() {
            writer.append(&LogRecord::ModelChange {
                model: model.to_string(),
                timestamp: now_rfc3339(),
            })?;
        }

        debug!(session = %id, path = %file_path.display(), "created session log");

        Ok(LoadedSession {
            id,
            file_path,
            cwd: cwd.to_string(),
            parent_id,
            parent_entry_id,
            model: if model.is_empty() { None } else { Some(model.to_string()) },
            messages: Vec::new(),
        })
    }

    /// List sessions for a workspace, newest first.
    pub fn list(&self, cwd: &str) -> Result<Vec<SessionMeta>, SessionError> {
        let dir = self.workspace_dir(cwd);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut metas = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("log") {
                continue;
            }
            let Ok(info) = entry.metadata() else {
                continue;
            };
            if info.is_dir() {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let header = read_header(&path);
            let (parent_id, parent_entry_id) = match header {
                Some(LogRecord::Header {
                    parent_id,
                    parent_entry_id,
                    ..
                }) => (parent_id, parent_entry_id),
                _ => (None, None),
            };
            metas.push(SessionMeta {
                id,
                file_path: path,
                cwd: cwd.to_string(),
                parent_id,
                parent_entry_id,
                updated_at: info.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    /// Reload the most recently updated session in the workspace.
    pub fn continue_latest(&self, cwd: &str) -> Result<LoadedSession, SessionError> {
        let list = self.list(cwd)?;
        match list.first() {
            Some(meta) => self.load(&meta.file_path),
            None => Err(SessionError::SessionNotFound("<latest>".into())),
        }
    }

    /// Load a sibling session by id.
    pub fn load_by_id(&self, cwd: &str, id: &str) -> Result<LoadedSession, SessionError> {
        if id.trim().is_empty() {
            return Err(SessionError::SessionNotFound(id.to_string()));
        }
        let path = self.workspace_dir(cwd).join(format!("{id}.log"));
        if !path.exists() {
            return Err(SessionError::SessionNotFound(id.to_string()));
        }
        self.load(&path)
    }

    /// Load a session from its log file, skipping unparseable lines.
    pub fn load(&self, file_path: &Path) -> Result<LoadedSession, SessionError> {
        let content = std::fs::read_to_string(file_path)?;

        let mut out = LoadedSession {
            id: String::new(),
            file_path: file_path.to_path_buf(),
            cwd: String::new(),
            parent_id: None,
            parent_entry_id: None,
            model: None,
            messages: Vec::new(),
        };

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "skipping corrupt session log line");
                    continue;
                }
            };
            match record {
                LogRecord::Header {
                    id,
                    cwd,
                    parent_id,
                    parent_entry_id,
                    ..
                } => {
                    out.id = id;
                    out.cwd = cwd;
                    out.parent_id = parent_id;
                    out.parent_entry_id = parent_entry_id;
                }
                LogRecord::ModelChange { model, .. } => {
                    out.model = Some(model);
                }
                ref msg @ LogRecord::Message { .. } => {
                    if let Some(message) = msg.to_message() {
                        out.messages.push(message);
                    }
                }
                LogRecord::Compaction { .. } => {}
            }
        }

        if out.id.is_empty() {
            out.id = file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
        }
        Ok(out)
    }

    /// List message entries (those carrying an id) from a session log.
    /// With `limit > 0`, only the most recent `limit` entries are returned.
    pub fn list_entries(
        &self,
        file_path: &Path,
        limit: usize,
    ) -> Result<Vec<EntryMeta>, SessionError> {
        let content = std::fs::read_to_string(file_path)?;
        let mut out = Vec::new();

        for line in content.lines() {
            let Ok(LogRecord::Message {
                id: Some(id),
                role,
                content,
                timestamp,
                ..
            }) = serde_json::from_str::<LogRecord>(line)
            else {
                continue;
            };
            if id.trim().is_empty() {
                continue;
            }
            let mut preview: String = content.trim().chars().take(40).collect();
            if content.trim().chars().count() > 40 {
                preview.push_str("...");
            }
            out.push(EntryMeta {
                id,
                role,
                preview,
                timestamp,
            });
        }

        if limit > 0 && out.len() > limit {
            out.drain(..out.len() - limit);
        }
        Ok(out)
    }

    /// Branch a new session off an entry of an existing log.
    ///
    /// The new log's header points back at the parent session and entry; the
    /// parent's message records up to and including the entry are replayed
    /// into the new log verbatim. The parent file is not touched.
    pub fn checkout_from_entry(
        &self,
        cwd: &str,
        current_session_id: &str,
        current_file: &Path,
        entry_id: &str,
        model: &str,
    ) -> Result<LoadedSession, SessionError> {
        if entry_id.trim().is_empty() {
            return Err(SessionError::EmptyEntryId);
        }

        let records = load_messages_until_entry(current_file, entry_id)?;
        if records.is_empty() {
            return Err(SessionError::EntryNotFound(entry_id.to_string()));
        }

        let created = self.create_with_parent(
            cwd,
            model,
            Some(current_session_id.to_string()),
            Some(entry_id.to_string()),
        )?;

        let writer = LogWriter::new(created.file_path.clone());
        for record in &records {
            writer.append(record)?;
        }

        self.load(&created.file_path)
    }
}

/// Collect message records up to and including the given entry id.
fn load_messages_until_entry(
    file_path: &Path,
    entry_id: &str,
) -> Result<Vec<LogRecord>, SessionError> {
    let content = std::fs::read_to_string(file_path)?;
    let mut out = Vec::new();
    let mut found = false;

    for line in content.lines() {
        let Ok(record) = serde_json::from_str::<LogRecord>(line) else {
            continue;
        };
        let LogRecord::Message { ref id, .. } = record else {
            continue;
        };
        let matches = id.as_deref() == Some(entry_id);
        out.push(record);
        if matches {
            found = true;
            break;
        }
    }

    if !found {
        return Err(SessionError::EntryNotFound(entry_id.to_string()));
    }
    Ok(out)
}

fn read_header(file_path: &Path) -> Option<LogRecord> {
    let content = std::fs::read_to_string(file_path).ok()?;
    for line in content.lines() {
        if let Ok(record @ LogRecord::Header { .. }) = serde_json::from_str::<LogRecord>(line) {
            return Some(record);
        }
    }
    None
}
