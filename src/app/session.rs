//! Usage: Per-invocation session (correlation id + timing) attached to every diagnostic event.

use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    started_at: Instant,
}

impl Session {
    pub fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Root span; everything logged while it is entered carries `sid`.
    pub fn span(&self, command: &str) -> tracing::Span {
        tracing::info_span!("session", sid = %self.id, command = command)
    }

    pub fn finish(&self, exit_code: i32) {
        tracing::info!(
            sid = %self.id,
            exit_code,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "exit"
        );
    }
}
