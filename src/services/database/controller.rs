// Controller contract shared by every database backend
use async_trait::async_trait;

use crate::error::{ControllerError, Result};
use crate::models::{
    Capabilities, DatabaseKind, ExecutionRecord, ExecutionResult, Fetch, HintValue, Index,
    Operation, Plan, SessionInfo,
};

/// Uniform driver interface over one database session.
///
/// Every operation exists on every backend. A backend lacking one keeps the
/// default body, which reports `Unsupported`, and leaves the operation out of
/// [`DbController::capabilities`].
///
/// Operations take `&mut self`: a controller owns a single connection and is
/// not shared between concurrent callers without external locking.
#[async_trait]
pub trait DbController: Send {
    fn kind(&self) -> DatabaseKind;

    /// Operations this backend implements
    fn capabilities(&self) -> Capabilities;

    fn session_info(&self) -> SessionInfo;

    /// Runtime signals of the most recent `execute`
    fn last_execution(&self) -> Option<&ExecutionRecord>;

    fn supports(&self, operation: Operation) -> bool {
        self.capabilities().supports(operation)
    }

    /// Open a connection unless a live one already exists
    async fn connect_if_loss(&mut self) -> Result<()>;

    /// Run one statement.
    ///
    /// `Fetch::None` discards the result set and returns `None`. A statement
    /// stopped by the pull-end marker yields an empty result.
    async fn execute(&mut self, sql: &str, fetch: Fetch) -> Result<Option<ExecutionResult>>;

    /// Plan the statement without running it
    async fn explain_physical_plan(&mut self, sql: &str, comment: &str) -> Result<Plan>;

    /// Plan annotated with runtime figures; runs the statement
    async fn explain_execution_plan(&mut self, sql: &str, comment: &str) -> Result<Plan> {
        let _ = (sql, comment);
        Err(ControllerError::unsupported(self.kind(), Operation::ExplainExecutionPlan))
    }

    async fn get_estimated_cost(&mut self, sql: &str, comment: &str) -> Result<f64> {
        let _ = (sql, comment);
        Err(ControllerError::unsupported(self.kind(), Operation::EstimatedCost))
    }

    /// Set a session-scoped runtime parameter
    async fn set_hint(&mut self, key: &str, value: HintValue) -> Result<()> {
        let _ = (key, value);
        Err(ControllerError::unsupported(self.kind(), Operation::SetHint))
    }

    /// Undo every hint set in the current session
    async fn reset_hints(&mut self) -> Result<()> {
        Err(ControllerError::unsupported(self.kind(), Operation::ResetHints))
    }

    /// Fails with `AlreadyExists` when an index of that name exists
    async fn create_index(&mut self, index: &Index) -> Result<()> {
        let _ = index;
        Err(ControllerError::unsupported(self.kind(), Operation::CreateIndex))
    }

    /// No error when the index does not exist
    async fn drop_index(&mut self, index: &Index) -> Result<()> {
        let _ = index;
        Err(ControllerError::unsupported(self.kind(), Operation::DropIndex))
    }

    /// Drop every secondary index; unique and primary-key indexes stay
    async fn drop_all_indexes(&mut self) -> Result<()> {
        Err(ControllerError::unsupported(self.kind(), Operation::DropAllIndexes))
    }

    async fn get_all_indexes_byte(&mut self) -> Result<u64> {
        Err(ControllerError::unsupported(self.kind(), Operation::IndexSize))
    }

    async fn get_table_indexes_byte(&mut self, table: &str) -> Result<u64> {
        let _ = table;
        Err(ControllerError::unsupported(self.kind(), Operation::IndexSize))
    }

    /// 0 for an index that does not exist
    async fn get_index_byte(&mut self, index: &Index) -> Result<u64> {
        let _ = index;
        Err(ControllerError::unsupported(self.kind(), Operation::IndexSize))
    }

    async fn get_existing_indexes(&mut self, table: &str) -> Result<Vec<Index>> {
        let _ = table;
        Err(ControllerError::unsupported(self.kind(), Operation::ExistingIndexes))
    }

    async fn get_all_table_names(&mut self) -> Result<Vec<String>> {
        Err(ControllerError::unsupported(self.kind(), Operation::TableNames))
    }

    async fn get_table_row_count(&mut self, table: &str) -> Result<u64> {
        let _ = table;
        Err(ControllerError::unsupported(self.kind(), Operation::TableRowCount))
    }

    /// Release the connection. Safe to call repeatedly.
    async fn close(&mut self) -> Result<()>;
}
