use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// How much of a statement's result to bring back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fetch {
    /// Discard any result set
    #[default]
    None,
    Rows,
    RowsWithColumnNames,
}

impl Fetch {
    pub fn from_flags(fetch: bool, fetch_column_names: bool) -> Self {
        match (fetch, fetch_column_names) {
            (false, _) => Fetch::None,
            (true, false) => Fetch::Rows,
            (true, true) => Fetch::RowsWithColumnNames,
        }
    }

    pub fn wants_rows(&self) -> bool {
        !matches!(self, Fetch::None)
    }

    pub fn wants_column_names(&self) -> bool {
        matches!(self, Fetch::RowsWithColumnNames)
    }
}

/// Rows produced by one statement execution
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    columns: Option<Vec<String>>,
    rows: Vec<Vec<Value>>,
}

impl ExecutionResult {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: None,
            rows,
        }
    }

    pub fn with_columns(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: Some(columns),
            rows,
        }
    }

    /// Build from column names and rows, keeping names only if `fetch` asks for them
    pub(crate) fn shaped(fetch: Fetch, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Option<Self> {
        match fetch {
            Fetch::None => None,
            Fetch::Rows => Some(Self::new(rows)),
            Fetch::RowsWithColumnNames => Some(Self::with_columns(columns, rows)),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Number of data rows, excluding the column-name row
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_cell(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Flat form: the column-name tuple first (when requested), then the data rows
    pub fn to_sequence(&self) -> Vec<Vec<Value>> {
        let mut sequence = Vec::with_capacity(self.rows.len() + 1);
        if let Some(columns) = &self.columns {
            sequence.push(columns.iter().cloned().map(Value::String).collect());
        }
        sequence.extend(self.rows.iter().cloned());
        sequence
    }
}

/// How the last statement ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ExecutionOutcome {
    Completed { row_count: Option<usize> },
    /// A pulling collaborator stopped the statement early
    PullEnded,
    TimedOut,
    Failed { message: String },
}

/// Runtime signals of the most recent statement, kept for pull
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub sql: String,
    pub started_at: DateTime<Utc>,
    pub execution_time_ms: f64,
    pub outcome: ExecutionOutcome,
}

impl ExecutionRecord {
    pub fn new(sql: &str, started_at: DateTime<Utc>, elapsed: Duration, outcome: ExecutionOutcome) -> Self {
        Self {
            sql: sql.to_string(),
            started_at,
            execution_time_ms: elapsed.as_secs_f64() * 1000.0,
            outcome,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.execution_time_ms / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_flags() {
        assert_eq!(Fetch::from_flags(false, true), Fetch::None);
        assert_eq!(Fetch::from_flags(true, false), Fetch::Rows);
        assert_eq!(Fetch::from_flags(true, true), Fetch::RowsWithColumnNames);
    }

    #[test]
    fn test_sequence_puts_column_names_first() {
        let result = ExecutionResult::with_columns(
            vec!["id".to_string(), "name".to_string()],
            vec![vec![json!(1), json!("ann")], vec![json!(2), json!("bob")]],
        );
        let sequence = result.to_sequence();
        assert_eq!(result.len(), 2);
        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence[0], vec![json!("id"), json!("name")]);
        assert_eq!(sequence[2], vec![json!(2), json!("bob")]);
    }

    #[test]
    fn test_shaped_drops_rows_without_fetch() {
        let shaped = ExecutionResult::shaped(Fetch::None, vec!["a".to_string()], vec![vec![json!(1)]]);
        assert!(shaped.is_none());

        let shaped = ExecutionResult::shaped(Fetch::Rows, vec!["a".to_string()], vec![vec![json!(1)]]).unwrap();
        assert!(shaped.columns().is_none());
        assert_eq!(shaped.first_cell(), Some(&json!(1)));
    }

    #[test]
    fn test_record_elapsed_roundtrip() {
        let record = ExecutionRecord::new(
            "SELECT 1",
            Utc::now(),
            Duration::from_millis(1500),
            ExecutionOutcome::Completed { row_count: Some(1) },
        );
        assert_eq!(record.execution_time_ms, 1500.0);
        assert_eq!(record.elapsed(), Duration::from_millis(1500));
    }
}
