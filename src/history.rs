//! Persisted chat session shared with the text widget.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Page/session persistence consumed by the voice core.
pub trait SessionStore: Send + Sync {
    fn load_history(&self) -> Vec<ChatMessage>;
    fn append(&self, message: ChatMessage);
    fn set_conversation_id(&self, conversation_id: &str);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

/// JSON file store; the whole file is rewritten on every change.
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> StoredSession {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoredSession::default(),
            Err(e) => {
                log::warn!("Failed to read session file {}: {}", self.path.display(), e);
                return StoredSession::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Corrupt session file {}: {}", self.path.display(), e);
            StoredSession::default()
        })
    }

    fn write(&self, session: &StoredSession) {
        let result = serde_json::to_string_pretty(session)
            .map_err(std::io::Error::other)
            .and_then(|json| std::fs::write(&self.path, json));
        if let Err(e) = result {
            log::warn!("Failed to save session file {}: {}", self.path.display(), e);
        }
    }

    pub fn conversation_id(&self) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read().conversation_id
    }
}

impl SessionStore for FileSessionStore {
    fn load_history(&self) -> Vec<ChatMessage> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read().messages
    }

    fn append(&self, message: ChatMessage) {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut session = self.read();
        session.messages.push(message);
        self.write(&session);
    }

    fn set_conversation_id(&self, conversation_id: &str) {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut session = self.read();
        session.conversation_id = Some(conversation_id.to_string());
        self.write(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        assert!(store.load_history().is_empty());
        assert_eq!(store.conversation_id(), None);
    }

    #[test]
    fn appends_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        {
            let store = FileSessionStore::new(&path);
            store.append(ChatMessage::user("Is the car still available?"));
            store.append(ChatMessage::assistant("Yes it is."));
            store.set_conversation_id("c1");
        }
        let store = FileSessionStore::new(&path);
        assert_eq!(
            store.load_history(),
            vec![
                ChatMessage::user("Is the car still available?"),
                ChatMessage::assistant("Yes it is."),
            ]
        );
        assert_eq!(store.conversation_id().as_deref(), Some("c1"));
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileSessionStore::new(&path);
        assert!(store.load_history().is_empty());
        store.append(ChatMessage::user("hello"));
        assert_eq!(store.load_history().len(), 1);
    }
}
