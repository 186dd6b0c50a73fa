// MySQL controller over a single dedicated mysql_async connection
use async_trait::async_trait;
use chrono::Utc;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Row, Value as MySqlValue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ControllerError, Result};
use crate::models::{
    Capabilities, ConnectionConfig, DatabaseKind, ExecutionRecord, ExecutionResult, Fetch,
    Operation, Plan, SessionInfo,
};
use crate::services::database::classifier::{
    self, DriverFailure, ErrorClassifier, FailureClass, SubstringClassifier,
};
use crate::services::database::controller::DbController;
use crate::services::database::session::Session;
use crate::validation::SqlValidator;

/// EXPLAIN-only introspection; hints, cost, execution plans and index
/// management are not provided for MySQL.
const CAPABILITIES: Capabilities =
    Capabilities::new(&[Operation::Execute, Operation::ExplainPhysicalPlan]);

/// ER_BAD_DB_ERROR
const UNKNOWN_DATABASE: u16 = 1049;

pub struct MySQLController {
    config: ConnectionConfig,
    session: Session<Conn>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl MySQLController {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        if config.kind != DatabaseKind::MySql {
            return Err(ControllerError::Internal(format!(
                "MySQL controller cannot serve a {} configuration",
                config.kind
            )));
        }

        let classifier = Arc::new(SubstringClassifier::mysql(config.pull_end_marker.clone()));
        Ok(Self {
            session: Session::new(config.masked_url()),
            config,
            classifier,
        })
    }

    /// Replace the message-substring heuristic, e.g. with one keyed on server error codes
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn opts(config: &ConnectionConfig, database: Option<&str>) -> Opts {
        let password = config.password();
        OptsBuilder::default()
            .ip_or_hostname(config.host.as_str())
            .tcp_port(config.port())
            .user(Some(config.user()))
            .pass((!password.is_empty()).then_some(password))
            .db_name(database)
            .into()
    }

    fn connect_error(config: &ConnectionConfig, error: mysql_async::Error) -> ControllerError {
        match error {
            mysql_async::Error::Server(_) => ControllerError::MySql(error),
            other => ControllerError::DatabaseUnavailable(format!(
                "cannot connect to {}: {}",
                config.masked_url(),
                other
            )),
        }
    }

    async fn open(config: &ConnectionConfig) -> Result<Conn> {
        let database = Some(config.database.as_str());
        let mut conn = match Conn::new(Self::opts(config, database)).await {
            Ok(conn) => conn,
            Err(mysql_async::Error::Server(ref e))
                if e.code == UNKNOWN_DATABASE && config.create_database_if_missing =>
            {
                Self::create_database(config).await?;
                Conn::new(Self::opts(config, database))
                    .await
                    .map_err(|e| Self::connect_error(config, e))?
            }
            Err(e) => return Err(Self::connect_error(config, e)),
        };

        conn.query_drop(format!(
            "SET SESSION max_execution_time = {}",
            config.statement_timeout_ms
        ))
        .await?;
        Ok(conn)
    }

    async fn create_database(config: &ConnectionConfig) -> Result<()> {
        let mut admin = Conn::new(Self::opts(config, None))
            .await
            .map_err(|e| Self::connect_error(config, e))?;

        tracing::info!("Creating database {}", config.database);
        admin
            .query_drop(format!(
                "CREATE DATABASE IF NOT EXISTS {}",
                SqlValidator::quote_backtick(&config.database)
            ))
            .await?;
        admin.disconnect().await?;
        Ok(())
    }

    /// Classify a driver error; `Ok(())` means the pull-end marker stopped the statement
    fn translate(&mut self, error: mysql_async::Error) -> Result<()> {
        let class = classify(self.classifier.as_ref(), &error);
        if class == FailureClass::ConnectionLost {
            self.session.mark_lost();
        }
        let message = error.to_string();
        classifier::translate(class, &message, ControllerError::MySql(error))
    }

    async fn run(conn: &mut Conn, sql: &str, fetch: Fetch) -> mysql_async::Result<Option<ExecutionResult>> {
        if !fetch.wants_rows() {
            conn.query_drop(sql).await?;
            return Ok(None);
        }

        let mut result = conn.query_iter(sql).await?;
        let columns: Vec<String> = result
            .columns()
            .map(|columns| columns.iter().map(|c| c.name_str().into_owned()).collect())
            .unwrap_or_default();
        let rows: Vec<Row> = result.collect().await?;
        let rows = rows.iter().map(row_to_json).collect();

        Ok(ExecutionResult::shaped(fetch, columns, rows))
    }
}

#[async_trait]
impl DbController for MySQLController {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn session_info(&self) -> SessionInfo {
        self.session.info()
    }

    fn last_execution(&self) -> Option<&ExecutionRecord> {
        self.session.last_execution()
    }

    async fn connect_if_loss(&mut self) -> Result<()> {
        // No cheap liveness check; a lost connection is noticed by the failing statement
        if !self.session.needs_connect(|_| true)? {
            return Ok(());
        }

        let conn = Self::open(&self.config).await?;
        if let Some(previous) = self.session.install(conn) {
            if let Err(e) = previous.disconnect().await {
                tracing::debug!("Discarding dead MySQL connection: {}", e);
            }
        }
        tracing::info!("Connected to {}", self.config.masked_url());
        Ok(())
    }

    async fn execute(&mut self, sql: &str, fetch: Fetch) -> Result<Option<ExecutionResult>> {
        self.connect_if_loss().await?;
        if self.config.echo {
            tracing::debug!("[{}] {}", self.config.database, sql);
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = {
            let conn = self.session.handle_mut()?;
            Self::run(conn, sql, fetch).await
        };

        let (result, pull_ended) = match outcome {
            Ok(rows) => (Ok(rows), false),
            Err(e) => match self.translate(e) {
                Ok(()) => (Ok(classifier::pull_end_result(fetch)), true),
                Err(e) => (Err(e), false),
            },
        };
        self.session.record_execution(sql, started_at, start, &result, pull_ended);
        result
    }

    /// Runs `EXPLAIN format=json` and keeps the first cell of the first row as the raw payload
    async fn explain_physical_plan(&mut self, sql: &str, comment: &str) -> Result<Plan> {
        let statement = SqlValidator::single_statement(sql, DatabaseKind::MySql)?;
        let explain_sql = SqlValidator::with_comment(comment, &format!("EXPLAIN format=json {}", statement))?;

        self.connect_if_loss().await?;
        let outcome = {
            let conn = self.session.handle_mut()?;
            Self::run(conn, &explain_sql, Fetch::Rows).await
        };
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.translate(e)?;
                None
            }
        };

        match result.as_ref().and_then(ExecutionResult::first_cell) {
            Some(Value::String(raw)) => Plan::from_mysql_json(raw.clone()),
            Some(other) => Err(ControllerError::InvalidPlan(format!(
                "unexpected EXPLAIN cell: {}",
                other
            ))),
            None => Err(ControllerError::InvalidPlan("EXPLAIN returned no rows".to_string())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.session.take_for_close() {
            if let Err(e) = conn.disconnect().await {
                tracing::error!("Failed to close MySQL connection: {}", e);
            }
            tracing::info!("Closed connection to {}", self.config.masked_url());
        }
        Ok(())
    }
}

fn classify(classifier: &dyn ErrorClassifier, error: &mysql_async::Error) -> FailureClass {
    let message = error.to_string();
    let (code, connection_closed) = match error {
        mysql_async::Error::Server(server) => (Some(server.code.to_string()), false),
        mysql_async::Error::Io(_) => (None, true),
        _ => (None, false),
    };
    let failure = DriverFailure::new(&message)
        .with_code(code.as_deref())
        .with_connection_closed(connection_closed);
    classifier.classify(&failure)
}

fn mysql_value_to_json(value: &MySqlValue) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::String(format!("<{} bytes>", bytes.len())),
        },
        MySqlValue::Int(i) => Value::from(*i),
        MySqlValue::UInt(u) => Value::from(*u),
        MySqlValue::Float(f) => Value::from(*f),
        MySqlValue::Double(d) => Value::from(*d),
        MySqlValue::Date(y, m, d, h, min, s, _) => Value::String(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            y, m, d, h, min, s
        )),
        MySqlValue::Time(is_neg, d, h, m, s, _) => {
            let sign = if *is_neg { "-" } else { "" };
            let total_hours = d * 24 + *h as u32;
            Value::String(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
        }
    }
}

fn row_to_json(row: &Row) -> Vec<Value> {
    (0..row.len())
        .map(|idx| row.as_ref(idx).map(mysql_value_to_json).unwrap_or(Value::Null))
        .collect()
}
