// Driver error classification.
//
// Engines report timeouts, dropped connections and the pull-end marker in
// different ways. A classifier turns a driver failure into one of the few
// classes the controller translates; everything classified `Other` is passed
// through to the caller untouched.

use std::fmt;
use std::sync::Arc;

use crate::error::ControllerError;
use crate::models::{ExecutionResult, Fetch, DEFAULT_PULL_END_MARKER};

/// What a driver failure means to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The engine enforced the statement time limit
    Timeout,
    /// The connection is gone; the session must be replaced
    ConnectionLost,
    /// A pulling collaborator ended the statement on purpose
    PullEnd,
    Other,
}

/// Driver-independent view of an error
#[derive(Debug, Clone)]
pub struct DriverFailure<'a> {
    pub message: &'a str,
    /// SQLSTATE or vendor error number, when the driver exposes one
    pub code: Option<&'a str>,
    /// The driver already knows the connection is closed
    pub connection_closed: bool,
}

impl<'a> DriverFailure<'a> {
    pub fn new(message: &'a str) -> Self {
        Self {
            message,
            code: None,
            connection_closed: false,
        }
    }

    pub fn with_code(mut self, code: Option<&'a str>) -> Self {
        self.code = code;
        self
    }

    pub fn with_connection_closed(mut self, closed: bool) -> Self {
        self.connection_closed = closed;
        self
    }
}

/// Pluggable per-backend failure classification
pub trait ErrorClassifier: Send + Sync + fmt::Debug {
    fn classify(&self, failure: &DriverFailure<'_>) -> FailureClass;
}

pub type SharedClassifier = Arc<dyn ErrorClassifier>;

/// Message substring matching.
///
/// Best effort: driver message texts change between versions.
#[derive(Debug, Clone)]
pub struct SubstringClassifier {
    timeout_markers: Vec<String>,
    lost_markers: Vec<String>,
    pull_end_marker: String,
}

impl SubstringClassifier {
    pub fn new(pull_end_marker: impl Into<String>) -> Self {
        Self {
            timeout_markers: Vec::new(),
            lost_markers: Vec::new(),
            pull_end_marker: pull_end_marker.into(),
        }
    }

    /// Markers MySQL and MySQL-compatible servers use
    pub fn mysql(pull_end_marker: impl Into<String>) -> Self {
        Self::new(pull_end_marker)
            .with_timeout_marker("maximum statement execution time exceeded")
            .with_timeout_marker("canceling statement due to statement timeout")
            .with_lost_marker("server has gone away")
            .with_lost_marker("Lost connection to MySQL server")
    }

    pub fn with_timeout_marker(mut self, marker: impl Into<String>) -> Self {
        self.timeout_markers.push(marker.into());
        self
    }

    pub fn with_lost_marker(mut self, marker: impl Into<String>) -> Self {
        self.lost_markers.push(marker.into());
        self
    }
}

impl ErrorClassifier for SubstringClassifier {
    fn classify(&self, failure: &DriverFailure<'_>) -> FailureClass {
        if !self.pull_end_marker.is_empty() && failure.message.contains(&self.pull_end_marker) {
            return FailureClass::PullEnd;
        }
        if self.timeout_markers.iter().any(|m| failure.message.contains(m.as_str())) {
            return FailureClass::Timeout;
        }
        if failure.connection_closed
            || self.lost_markers.iter().any(|m| failure.message.contains(m.as_str()))
        {
            return FailureClass::ConnectionLost;
        }
        FailureClass::Other
    }
}

/// SQLSTATE-based classification for PostgreSQL
#[derive(Debug, Clone)]
pub struct SqlStateClassifier {
    pull_end_marker: String,
}

impl SqlStateClassifier {
    /// query_canceled, raised by statement_timeout
    pub const QUERY_CANCELED: &'static str = "57014";

    pub fn new(pull_end_marker: impl Into<String>) -> Self {
        Self {
            pull_end_marker: pull_end_marker.into(),
        }
    }
}

impl Default for SqlStateClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PULL_END_MARKER)
    }
}

impl ErrorClassifier for SqlStateClassifier {
    fn classify(&self, failure: &DriverFailure<'_>) -> FailureClass {
        if !self.pull_end_marker.is_empty() && failure.message.contains(&self.pull_end_marker) {
            return FailureClass::PullEnd;
        }
        match failure.code {
            Some(Self::QUERY_CANCELED) => FailureClass::Timeout,
            // connection_exception class, admin/crash shutdown, cannot_connect_now
            Some(code) if code.starts_with("08") => FailureClass::ConnectionLost,
            Some("57P01") | Some("57P02") | Some("57P03") => FailureClass::ConnectionLost,
            _ if failure.connection_closed => FailureClass::ConnectionLost,
            _ => FailureClass::Other,
        }
    }
}

/// Translate a classified failure, handing back the original error when it is not translated.
///
/// `PullEnd` is returned as `Ok(())` so the caller can finish the pull as an empty result.
pub(crate) fn translate(
    class: FailureClass,
    message: &str,
    original: ControllerError,
) -> Result<(), ControllerError> {
    match class {
        FailureClass::PullEnd => Ok(()),
        FailureClass::Timeout => Err(ControllerError::StatementTimeout(message.to_string())),
        FailureClass::ConnectionLost => Err(ControllerError::DatabaseUnavailable(message.to_string())),
        FailureClass::Other => Err(original),
    }
}

/// Result handed back for a statement stopped by the pull-end marker
pub(crate) fn pull_end_result(fetch: Fetch) -> Option<ExecutionResult> {
    if fetch.wants_rows() {
        Some(ExecutionResult::empty())
    } else {
        None
    }
}
