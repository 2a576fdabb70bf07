//! Diagnostic message collection for read/write pipelines.
//!
//! Conversion and persistence routines accumulate human-readable
//! diagnostics here so callers can surface them after the fact, while
//! each message is also emitted as a `tracing` event as it happens.

use tracing::{debug, error, warn};

/// Severity of a collected diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

/// An accumulated diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
}

/// Ordered collection of diagnostics produced by one operation.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a debug-level note (e.g. a conversion attempt that did not match).
    pub fn debug(&mut self, text: impl Into<String>) {
        let text = text.into();
        debug!("{}", text);
        self.messages.push(Message { severity: Severity::Debug, text });
    }

    /// Record a warning that does not abort the operation.
    pub fn warning(&mut self, text: impl Into<String>) {
        let text = text.into();
        warn!("{}", text);
        self.messages.push(Message { severity: Severity::Warning, text });
    }

    /// Record an error; the operation is expected to fail afterwards.
    pub fn error(&mut self, text: impl Into<String>) {
        let text = text.into();
        error!("{}", text);
        self.messages.push(Message { severity: Severity::Error, text });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_warnings(&self) -> bool {
        self.messages.iter().any(|m| m.severity >= Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Move all messages from `other` into this log.
    pub fn append(&mut self, other: &mut MessageLog) {
        self.messages.append(&mut other.messages);
    }
}
