use crate::io_struct::{Role, Turn};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Ordered turns of one conversation.
#[derive(Debug, Default, Clone)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::assistant(content));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// A session's history. Holding the lock for the span of a request keeps the
/// turns of concurrent same-session requests from interleaving.
pub type Session = Arc<Mutex<History>>;

/// Limits how much history is forwarded upstream. Stored history is never
/// truncated, and the newest turn is always forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryWindow {
    #[default]
    Unbounded,
    LastTurns(usize),
}

impl HistoryWindow {
    pub fn from_max_turns(max_turns: Option<usize>) -> Self {
        match max_turns {
            Some(n) => HistoryWindow::LastTurns(n),
            None => HistoryWindow::Unbounded,
        }
    }

    pub fn apply<'a>(&self, turns: &'a [Turn]) -> &'a [Turn] {
        match *self {
            HistoryWindow::Unbounded => turns,
            HistoryWindow::LastTurns(n) => {
                let mut start = turns.len().saturating_sub(n.max(1));
                // Never open the window on an assistant turn.
                while start < turns.len() && turns[start].role == Role::Assistant {
                    start += 1;
                }
                &turns[start..]
            }
        }
    }
}

/// In-memory conversation store. Sessions are created on first reference
/// and live until the store is dropped.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, session_id: &str) -> Session {
        if let Some(session) = self.sessions.get(session_id) {
            return session.clone();
        }
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                log::info!("Created new conversation session: {}", session_id);
                Session::default()
            })
            .clone()
    }

    pub async fn append_user(&self, session_id: &str, content: impl Into<String>) {
        self.get_or_create(session_id).lock().await.push_user(content);
    }

    pub async fn append_assistant(&self, session_id: &str, content: impl Into<String>) {
        self.get_or_create(session_id)
            .lock()
            .await
            .push_assistant(content);
    }

    /// Snapshot of a session's turns, `None` if it was never referenced.
    pub async fn history(&self, session_id: &str) -> Option<Vec<Turn>> {
        let session = self.sessions.get(session_id)?.clone();
        let history = session.lock().await;
        Some(history.turns().to_vec())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
