use std::sync::{Arc, Mutex};

use crate::events::{EventQueue, QueueError};

/// An [`EventQueue`] double that records every publish. Tests can script the first `n` publishes
/// to fail, to exercise the relay's retry bookkeeping.
#[derive(Clone, Default)]
pub struct RecordingQueue {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    published: Vec<(String, serde_json::Value)>,
    failures_remaining: usize,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` publish calls fail.
    pub fn fail_next(&self, n: usize) {
        self.inner.lock().unwrap().failures_remaining = n;
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.inner.lock().unwrap().published.clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.inner.lock().unwrap().published.iter().map(|(t, _)| t.clone()).collect()
    }
}

impl EventQueue for RecordingQueue {
    async fn publish(&self, event_type: &str, payload: serde_json::Value) -> Result<(), QueueError> {
        let mut state = self.inner.lock().unwrap();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(QueueError::PublishFailed("scripted publish failure".to_string()));
        }
        state.published.push((event_type.to_string(), payload));
        Ok(())
    }
}
