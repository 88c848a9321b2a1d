//! In-memory transports for tests and demos.
//!
//! [`MockTransport`] is cheaply cloneable: every clone shares the same script and
//! recording, so a test can keep one handle while a [`MessageBus`](crate::bus::MessageBus)
//! owns another.
//!
//! ```rust
//! use daq_msgbus::transport::MockTransport;
//!
//! let mock = MockTransport::new();
//! mock.on_command("P", ["1.0,2.0,3.0\n"]);
//! let handle = mock.clone();
//! // ... give `mock` to a bus, run a query ...
//! assert!(handle.written().is_empty());
//! ```

use super::Transport;
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    /// Lines returned by readline, in order
    replies: VecDeque<String>,
    /// Lines sitting in the input buffer before a flush
    stale: VecDeque<String>,
    /// Replies queued whenever a given command is written
    responders: HashMap<String, Vec<String>>,
    /// Every command written, without terminator
    written: Vec<String>,
    reads: usize,
    flushes: usize,
    fail_writes: Option<String>,
    fail_reads: Option<String>,
    fail_flushes: Option<String>,
}

/// Scripted transport recording every command.
///
/// When the script runs dry `readline` returns an empty string, which the query engine
/// treats as an exhausted stream.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    termination_character: String,
    termination_line: Option<String>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Empty script, `"\n"` terminator.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            termination_character: "\n".to_string(),
            termination_line: None,
        }
    }

    /// Queue reply lines up front.
    pub fn with_replies<I, L>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.push_replies(lines);
        self
    }

    /// Use a different terminator.
    pub fn with_termination_character(mut self, terminator: impl Into<String>) -> Self {
        self.termination_character = terminator.into();
        self
    }

    /// Report a multi-line reply marker.
    pub fn with_termination_line(mut self, marker: impl Into<String>) -> Self {
        self.termination_line = Some(marker.into());
        self
    }

    /// Queue one reply line.
    pub fn push_reply(&self, line: impl Into<String>) {
        self.state.lock().replies.push_back(line.into());
    }

    /// Queue several reply lines.
    pub fn push_replies<I, L>(&self, lines: I)
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let mut state = self.state.lock();
        state.replies.extend(lines.into_iter().map(Into::into));
    }

    /// Put a line in the input buffer that a flush should throw away.
    pub fn push_stale(&self, line: impl Into<String>) {
        self.state.lock().stale.push_back(line.into());
    }

    /// Queue `lines` every time `command` is written.
    pub fn on_command<I, L>(&self, command: impl Into<String>, lines: I)
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.state
            .lock()
            .responders
            .insert(command.into(), lines.into_iter().map(Into::into).collect());
    }

    /// Make every following write fail.
    pub fn fail_writes(&self, reason: impl Into<String>) {
        self.state.lock().fail_writes = Some(reason.into());
    }

    /// Make every following read fail.
    pub fn fail_reads(&self, reason: impl Into<String>) {
        self.state.lock().fail_reads = Some(reason.into());
    }

    /// Make every following flush fail, leaving stale input in place.
    pub fn fail_flushes(&self, reason: impl Into<String>) {
        self.state.lock().fail_flushes = Some(reason.into());
    }

    /// Commands written so far.
    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    /// Number of readline calls so far.
    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    /// Number of flush calls so far.
    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    /// Reply lines not yet read.
    pub fn pending_replies(&self) -> usize {
        let state = self.state.lock();
        state.replies.len() + state.stale.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.fail_writes {
            return Err(TransportError::Disconnected(reason.clone()));
        }
        state.written.push(command.to_string());
        if let Some(lines) = state.responders.get(command).cloned() {
            state.replies.extend(lines);
        }
        Ok(())
    }

    async fn readline(&mut self, _timeout: Option<Duration>) -> Result<String, TransportError> {
        let mut state = self.state.lock();
        state.reads += 1;
        if let Some(reason) = &state.fail_reads {
            return Err(TransportError::Disconnected(reason.clone()));
        }
        if let Some(line) = state.stale.pop_front() {
            return Ok(line);
        }
        Ok(state.replies.pop_front().unwrap_or_default())
    }

    async fn flush_input_buffer(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.flushes += 1;
        if let Some(reason) = &state.fail_flushes {
            return Err(TransportError::Disconnected(reason.clone()));
        }
        state.stale.clear();
        Ok(())
    }

    fn termination_character(&self) -> &str {
        &self.termination_character
    }

    fn termination_line(&self) -> Option<&str> {
        self.termination_line.as_deref()
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Trivial transport that answers every read with the last command written.
#[derive(Debug, Clone, Default)]
pub struct EchoTransport {
    last_write: String,
}

impl EchoTransport {
    /// Nothing written yet.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for EchoTransport {
    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.last_write = command.to_string();
        Ok(())
    }

    async fn readline(&mut self, _timeout: Option<Duration>) -> Result<String, TransportError> {
        Ok(format!("{}\n", self.last_write))
    }

    fn describe(&self) -> String {
        "echo".to_string()
    }
}
