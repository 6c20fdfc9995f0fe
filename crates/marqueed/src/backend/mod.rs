//! The backend seam: any publish/subscribe key-value store that can deliver
//! the switch map and heartbeat as change streams and accept per-switch
//! writes. The engine only ever talks to this trait; `firebase` is the one
//! real implementation.

mod firebase;

use std::collections::HashMap;

use async_trait::async_trait;

pub use firebase::FirebaseBackend;

use crate::engine::SwitchState;

/// Errors from the backend transport.
///
/// A dropped subscription stream is non-fatal (last-known state stays in
/// place until the stream recovers); a failed write is recovered by rollback.
/// The write-rejected and network-lost cases are deliberately not
/// distinguished: both settle a command as failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend transport error: {0}")]
    Transport(String),

    #[error("backend rejected write to {path}: HTTP {status}")]
    Rejected { path: String, status: u16 },

    #[error("backend is not connected")]
    NotConnected,
}

/// An observation delivered by the backend's subscription streams.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// The current full switch map (delivered once on attach, then on every
    /// change, including this client's own writes).
    Snapshot(HashMap<String, String>),

    /// The heartbeat value was (re)written to something non-null.
    Heartbeat,
}

/// Backend operations, mockable for tests.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Establish the subscription streams. Only valid once authentication has
    /// been handled; the token is part of backend construction.
    async fn connect(&mut self) -> Result<(), BackendError>;

    /// Next observation from the subscription streams, or None if nothing is
    /// currently available.
    async fn poll_event(&mut self) -> Option<BackendEvent>;

    /// Write one switch's state. Settles with success or a transport error.
    async fn write_switch(
        &mut self,
        switch_id: &str,
        state: SwitchState,
    ) -> Result<(), BackendError>;
}

/// Mock backend for tests: records writes and replays queued events.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockBackend {
    pub events: Vec<BackendEvent>,
    pub written: Vec<(String, SwitchState)>,
    pub fail_writes: bool,
    pub is_connected: bool,
}

#[cfg(test)]
impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl Backend for MockBackend {
    async fn connect(&mut self) -> Result<(), BackendError> {
        self.is_connected = true;
        Ok(())
    }

    async fn poll_event(&mut self) -> Option<BackendEvent> {
        if self.events.is_empty() {
            None
        } else {
            Some(self.events.remove(0))
        }
    }

    async fn write_switch(
        &mut self,
        switch_id: &str,
        state: SwitchState,
    ) -> Result<(), BackendError> {
        if self.fail_writes {
            return Err(BackendError::Transport("mock write failure".to_string()));
        }
        self.written.push((switch_id.to_string(), state));
        Ok(())
    }
}
