use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::{ControllerError, Result};
use crate::models::{
    ExecutionOutcome, ExecutionRecord, ExecutionResult, HintValue, SessionInfo, SessionState,
};

/// Owns the single engine handle of a controller.
///
/// A reconnect replaces the previous handle and starts a fresh session, so
/// hints recorded against the old one are dropped with it.
pub struct Session<H> {
    handle: Option<H>,
    state: SessionState,
    hints: BTreeMap<String, HintValue>,
    connected_at: Option<DateTime<Utc>>,
    connect_count: u64,
    last_execution: Option<ExecutionRecord>,
    label: String,
}

impl<H> Session<H> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            handle: None,
            state: SessionState::Idle,
            hints: BTreeMap::new(),
            connected_at: None,
            connect_count: 0,
            last_execution: None,
            label: label.into(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Whether a new handle has to be opened.
    ///
    /// `is_alive` is consulted only for a handle the session still believes is usable.
    pub fn needs_connect(&mut self, is_alive: impl FnOnce(&H) -> bool) -> Result<bool> {
        match self.state {
            SessionState::Closed => Err(ControllerError::Internal(format!(
                "controller for {} is closed",
                self.label
            ))),
            SessionState::Idle | SessionState::Lost => Ok(true),
            SessionState::Connected => match &self.handle {
                None => Ok(true),
                Some(handle) if is_alive(handle) => Ok(false),
                Some(_) => {
                    tracing::warn!("Connection to {} was lost", self.label);
                    self.state = SessionState::Lost;
                    Ok(true)
                }
            },
        }
    }

    /// Install a freshly opened handle, handing back the one it replaces
    pub fn install(&mut self, handle: H) -> Option<H> {
        let previous = self.handle.replace(handle);
        self.state = SessionState::Connected;
        self.hints.clear();
        self.connected_at = Some(Utc::now());
        self.connect_count += 1;
        previous
    }

    pub fn handle(&self) -> Result<&H> {
        self.check_open()?;
        self.handle
            .as_ref()
            .ok_or_else(|| ControllerError::DatabaseUnavailable(format!("{} is not connected", self.label)))
    }

    pub fn handle_mut(&mut self) -> Result<&mut H> {
        self.check_open()?;
        let label = &self.label;
        self.handle
            .as_mut()
            .ok_or_else(|| ControllerError::DatabaseUnavailable(format!("{} is not connected", label)))
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ControllerError::Internal(format!(
                "controller for {} is closed",
                self.label
            )));
        }
        Ok(())
    }

    /// Mark the handle known-dead; the next `connect_if_loss` replaces it
    pub fn mark_lost(&mut self) {
        if self.state == SessionState::Connected {
            tracing::warn!("Marking connection to {} as lost", self.label);
            self.state = SessionState::Lost;
        }
    }

    /// Move to `Closed` and give up the handle. Returns `None` on every call after the first.
    pub fn take_for_close(&mut self) -> Option<H> {
        if self.is_closed() {
            return None;
        }
        self.state = SessionState::Closed;
        self.hints.clear();
        self.handle.take()
    }

    pub fn record_hint(&mut self, key: &str, value: HintValue) {
        self.hints.insert(key.to_string(), value);
    }

    pub fn clear_hints(&mut self) {
        self.hints.clear();
    }

    pub fn hints(&self) -> &BTreeMap<String, HintValue> {
        &self.hints
    }

    pub fn last_execution(&self) -> Option<&ExecutionRecord> {
        self.last_execution.as_ref()
    }

    /// Remember how a statement started at `started_at` / `start` ended
    pub fn record_execution(
        &mut self,
        sql: &str,
        started_at: DateTime<Utc>,
        start: Instant,
        result: &Result<Option<ExecutionResult>>,
        pull_ended: bool,
    ) {
        let outcome = match result {
            Ok(_) if pull_ended => ExecutionOutcome::PullEnded,
            Ok(rows) => ExecutionOutcome::Completed {
                row_count: rows.as_ref().map(ExecutionResult::len),
            },
            Err(e) if e.is_timeout() => ExecutionOutcome::TimedOut,
            Err(e) => ExecutionOutcome::Failed {
                message: e.to_string(),
            },
        };
        self.last_execution = Some(ExecutionRecord::new(sql, started_at, start.elapsed(), outcome));
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            state: self.state,
            connect_count: self.connect_count,
            connected_at: self.connected_at,
            hints: self.hints.clone(),
        }
    }
}

impl<H> Drop for Session<H> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::debug!("Releasing connection to {} on drop", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_is_idempotent() {
        let mut session: Session<u32> = Session::new("test");
        assert!(session.needs_connect(|_| true).unwrap());
        assert!(session.install(1).is_none());
        assert!(!session.needs_connect(|_| true).unwrap());
        assert!(!session.needs_connect(|_| true).unwrap());
        assert_eq!(session.info().connect_count, 1);
    }

    #[test]
    fn test_dead_handle_is_replaced() {
        let mut session: Session<u32> = Session::new("test");
        session.install(1);
        session.record_hint("enable_seqscan", HintValue::Bool(false));
        assert!(session.needs_connect(|_| false).unwrap());
        assert_eq!(session.state(), SessionState::Lost);

        assert_eq!(session.install(2), Some(1));
        assert_eq!(*session.handle().unwrap(), 2);
        assert!(session.hints().is_empty());
        assert_eq!(session.info().connect_count, 2);
    }

    #[test]
    fn test_close_is_terminal() {
        let mut session: Session<u32> = Session::new("test");
        session.install(7);
        assert_eq!(session.take_for_close(), Some(7));
        assert_eq!(session.take_for_close(), None);
        assert!(matches!(session.handle(), Err(ControllerError::Internal(_))));
        assert!(session.needs_connect(|_| true).is_err());
    }

    #[test]
    fn test_handle_before_connect_is_unavailable() {
        let session: Session<u32> = Session::new("test");
        assert!(matches!(session.handle(), Err(ControllerError::DatabaseUnavailable(_))));
    }

    #[test]
    fn test_record_execution_outcomes() {
        let mut session: Session<u32> = Session::new("test");
        let ok: Result<Option<ExecutionResult>> = Ok(Some(ExecutionResult::new(vec![vec![], vec![]])));
        session.record_execution("SELECT 1", Utc::now(), Instant::now(), &ok, false);
        assert_eq!(
            session.last_execution().unwrap().outcome,
            ExecutionOutcome::Completed { row_count: Some(2) }
        );

        let timeout: Result<Option<ExecutionResult>> =
            Err(ControllerError::StatementTimeout("too slow".to_string()));
        session.record_execution("SELECT pg_sleep(10)", Utc::now(), Instant::now(), &timeout, false);
        assert_eq!(session.last_execution().unwrap().outcome, ExecutionOutcome::TimedOut);

        session.record_execution("SELECT 1", Utc::now(), Instant::now(), &Ok(None), true);
        assert_eq!(session.last_execution().unwrap().outcome, ExecutionOutcome::PullEnded);
    }
}
