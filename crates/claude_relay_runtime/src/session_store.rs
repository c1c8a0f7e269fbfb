use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// In-memory thread id -> CLI session id map.
/// Contents are lost on restart; resuming depends on the CLI's own local state.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread_id: &str) -> Option<String> {
        self.lock().get(thread_id).cloned()
    }

    /// Overwrite any previous session recorded for `thread_id`.
    pub fn set(&self, thread_id: impl Into<String>, session_id: impl Into<String>) {
        self.lock().insert(thread_id.into(), session_id.into());
    }

    /// Remove the mapping; returns whether one existed.
    pub fn delete(&self, thread_id: &str) -> bool {
        self.lock().remove(thread_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
