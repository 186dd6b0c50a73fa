// PostgreSQL controller over a single dedicated tokio-postgres session
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

use crate::error::{ControllerError, Result};
use crate::models::{
    Capabilities, ConnectionConfig, DatabaseKind, ExecutionRecord, ExecutionResult, Fetch,
    HintValue, Index, Operation, Plan, PlanKind, SessionInfo,
};
use crate::services::database::classifier::{
    self, DriverFailure, ErrorClassifier, FailureClass, SqlStateClassifier,
};
use crate::services::database::controller::DbController;
use crate::services::database::session::Session;
use crate::validation::SqlValidator;

const CAPABILITIES: Capabilities = Capabilities::new(&Operation::ALL);

/// Database every server has, used to provision the target database
const MAINTENANCE_DATABASE: &str = "postgres";

const SYSTEM_SCHEMAS: &str = "('pg_catalog', 'information_schema', 'pg_toast')";

/// Live client plus the task driving its connection
pub struct PgHandle {
    client: Client,
    connection_task: JoinHandle<()>,
}

impl PgHandle {
    fn is_alive(&self) -> bool {
        !self.client.is_closed()
    }
}

/// Hypothetical index created through hypopg
#[derive(Debug, Clone)]
struct HypotheticalIndex {
    oid: u32,
    index: Index,
}

pub struct PostgreSQLController {
    config: ConnectionConfig,
    session: Session<PgHandle>,
    classifier: Arc<dyn ErrorClassifier>,
    hypothetical: BTreeMap<String, HypotheticalIndex>,
}

impl PostgreSQLController {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        if config.kind != DatabaseKind::PostgreSql {
            return Err(ControllerError::Internal(format!(
                "PostgreSQL controller cannot serve a {} configuration",
                config.kind
            )));
        }

        let classifier = Arc::new(SqlStateClassifier::new(config.pull_end_marker.clone()));
        Ok(Self {
            session: Session::new(config.masked_url()),
            config,
            classifier,
            hypothetical: BTreeMap::new(),
        })
    }

    /// Replace the SQLSTATE classification
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn simulates_indexes(&self) -> bool {
        self.config.postgres.simulate_index
    }

    async fn connect_to(config: &ConnectionConfig, database: &str) -> std::result::Result<PgHandle, tokio_postgres::Error> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(config.host.as_str())
            .port(config.port())
            .user(config.user())
            .dbname(database)
            // Startup option, so RESET ALL keeps the limit
            .options(format!("-c statement_timeout={}", config.statement_timeout_ms).as_str());
        if !config.password().is_empty() {
            pg.password(config.password());
        }

        let (client, connection) = pg.connect(NoTls).await?;
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("PostgreSQL connection terminated: {}", e);
            }
        });

        Ok(PgHandle {
            client,
            connection_task,
        })
    }

    fn connect_error(&self, error: tokio_postgres::Error) -> ControllerError {
        if error.as_db_error().is_some() {
            ControllerError::Postgres(error)
        } else {
            ControllerError::DatabaseUnavailable(format!(
                "cannot connect to {}: {}",
                self.config.masked_url(),
                error
            ))
        }
    }

    async fn open(&self) -> Result<PgHandle> {
        match Self::connect_to(&self.config, &self.config.database).await {
            Ok(handle) => Ok(handle),
            Err(e)
                if self.config.create_database_if_missing
                    && e.code() == Some(&SqlState::INVALID_CATALOG_NAME) =>
            {
                self.create_database().await?;
                Self::connect_to(&self.config, &self.config.database)
                    .await
                    .map_err(|e| self.connect_error(e))
            }
            Err(e) => Err(self.connect_error(e)),
        }
    }

    async fn create_database(&self) -> Result<()> {
        let admin = Self::connect_to(&self.config, MAINTENANCE_DATABASE)
            .await
            .map_err(|e| self.connect_error(e))?;

        let exists = admin
            .client
            .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&self.config.database])
            .await?
            .is_some();

        if !exists {
            tracing::info!("Creating database {}", self.config.database);
            let ddl = format!("CREATE DATABASE {}", SqlValidator::quote_ident(&self.config.database));
            match admin.client.batch_execute(&ddl).await {
                Ok(()) => {}
                // Created concurrently by someone else
                Err(e) if e.code() == Some(&SqlState::DUPLICATE_DATABASE) => {}
                Err(e) => return Err(e.into()),
            }
        }

        drop(admin.client);
        let _ = admin.connection_task.await;
        Ok(())
    }

    /// Classify a driver error; `Ok(())` means the pull-end marker stopped the statement
    fn translate(&mut self, error: tokio_postgres::Error) -> Result<()> {
        let message = match error.as_db_error() {
            Some(db) => db.message().to_string(),
            None => error.to_string(),
        };
        let client_closed = self.session.handle().map(|h| !h.is_alive()).unwrap_or(true);
        let failure = DriverFailure::new(&message)
            .with_code(error.code().map(SqlState::code))
            .with_connection_closed(error.is_closed() || client_closed);

        let class = self.classifier.classify(&failure);
        if class == FailureClass::ConnectionLost {
            self.session.mark_lost();
        }
        classifier::translate(class, &message, ControllerError::Postgres(error))
    }

    fn echo(&self, sql: &str) {
        if self.config.echo {
            tracing::debug!("[{}] {}", self.config.database, sql);
        }
    }

    async fn run(client: &Client, sql: &str, fetch: Fetch) -> std::result::Result<Option<ExecutionResult>, tokio_postgres::Error> {
        if !fetch.wants_rows() {
            client.batch_execute(sql).await?;
            return Ok(None);
        }

        // Prepared, so column names exist even for an empty result
        let statement = client.prepare(sql).await?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = client.query(&statement, &[]).await?;
        let rows = rows.iter().map(row_to_json).collect();

        Ok(ExecutionResult::shaped(fetch, columns, rows))
    }

    /// Run an internal statement, discarding results
    async fn batch(&mut self, sql: &str) -> Result<()> {
        self.batch_applied(sql).await.map(|_| ())
    }

    /// Like `batch`, but `Ok(false)` when the pull-end marker stopped the statement
    async fn batch_applied(&mut self, sql: &str) -> Result<bool> {
        self.connect_if_loss().await?;
        self.echo(sql);
        let outcome = {
            let client = &self.session.handle()?.client;
            client.batch_execute(sql).await
        };
        match outcome {
            Ok(()) => Ok(true),
            Err(e) => self.translate(e).map(|()| false),
        }
    }

    /// Run an internal query returning rows
    pub(crate) async fn query(&mut self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        self.connect_if_loss().await?;
        self.echo(sql);
        let outcome = {
            let client = &self.session.handle()?.client;
            client.query(sql, params).await
        };
        match outcome {
            Ok(rows) => Ok(rows),
            Err(e) => {
                self.translate(e)?;
                Ok(Vec::new())
            }
        }
    }

    async fn query_u64(&mut self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let rows = self.query(sql, params).await?;
        let value: i64 = match rows.first() {
            Some(row) => row.try_get(0)?,
            None => 0,
        };
        Ok(value.max(0) as u64)
    }

    async fn explain(&mut self, sql: &str, comment: &str, kind: PlanKind) -> Result<Plan> {
        let statement = SqlValidator::single_statement(sql, DatabaseKind::PostgreSql)?;
        let prefix = match kind {
            PlanKind::Physical => "EXPLAIN (VERBOSE, SETTINGS, FORMAT JSON)",
            PlanKind::Execution => "EXPLAIN (ANALYZE, VERBOSE, SETTINGS, SUMMARY, FORMAT JSON)",
        };
        let explain_sql = SqlValidator::with_comment(comment, &format!("{} {}", prefix, statement))?;

        let rows = self.query(&explain_sql, &[]).await?;
        let payload: Value = rows
            .first()
            .ok_or_else(|| ControllerError::InvalidPlan("EXPLAIN returned no rows".to_string()))?
            .try_get(0)?;

        Plan::from_postgres_json(kind, payload)
    }

    async fn create_hypothetical_index(&mut self, index: &Index) -> Result<()> {
        if self.hypothetical.contains_key(&index.index_name) {
            return Err(ControllerError::AlreadyExists(format!(
                "hypothetical index {}",
                index.index_name
            )));
        }

        let definition = hypothetical_index_sql(index);
        let rows = self
            .query("SELECT indexrelid FROM hypopg_create_index($1)", &[&definition])
            .await?;
        let oid: u32 = rows
            .first()
            .ok_or_else(|| ControllerError::Internal("hypopg_create_index returned no rows".to_string()))?
            .try_get(0)?;

        tracing::debug!("Created hypothetical index {} (oid {})", index.index_name, oid);
        self.hypothetical.insert(
            index.index_name.clone(),
            HypotheticalIndex {
                oid,
                index: index.clone(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl DbController for PostgreSQLController {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::PostgreSql
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
        if !self.session.needs_connect(PgHandle::is_alive)? {
            return Ok(());
        }

        let handle = self.open().await?;
        if let Some(previous) = self.session.install(handle) {
            previous.connection_task.abort();
        }
        // Hypothetical indexes live and die with the backend session
        self.hypothetical.clear();
        tracing::info!("Connected to {}", self.config.masked_url());

        if self.simulates_indexes() {
            let client = &self.session.handle()?.client;
            client.batch_execute("CREATE EXTENSION IF NOT EXISTS hypopg").await?;
        }
        Ok(())
    }

    async fn execute(&mut self, sql: &str, fetch: Fetch) -> Result<Option<ExecutionResult>> {
        self.connect_if_loss().await?;
        self.echo(sql);

        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = {
            let client = &self.session.handle()?.client;
            Self::run(client, sql, fetch).await
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

    async fn explain_physical_plan(&mut self, sql: &str, comment: &str) -> Result<Plan> {
        self.explain(sql, comment, PlanKind::Physical).await
    }

    async fn explain_execution_plan(&mut self, sql: &str, comment: &str) -> Result<Plan> {
        self.explain(sql, comment, PlanKind::Execution).await
    }

    async fn get_estimated_cost(&mut self, sql: &str, comment: &str) -> Result<f64> {
        let plan = self.explain(sql, comment, PlanKind::Physical).await?;
        plan.estimated_cost
            .ok_or_else(|| ControllerError::InvalidPlan("plan has no \"Total Cost\"".to_string()))
    }

    async fn set_hint(&mut self, key: &str, value: HintValue) -> Result<()> {
        let key = SqlValidator::validate_setting_name(key)?;
        let sql = format!("SET {} TO {}", key, SqlValidator::quote_literal(&value.to_string()));
        if self.batch_applied(&sql).await? {
            self.session.record_hint(key, value);
        }
        Ok(())
    }

    async fn reset_hints(&mut self) -> Result<()> {
        if self.batch_applied("RESET ALL").await? {
            self.session.clear_hints();
        }
        Ok(())
    }

    async fn create_index(&mut self, index: &Index) -> Result<()> {
        if self.simulates_indexes() {
            return self.create_hypothetical_index(index).await;
        }

        let sql = create_index_sql(index);
        match self.batch(&sql).await {
            Err(ControllerError::Postgres(e)) if e.code() == Some(&SqlState::DUPLICATE_TABLE) => {
                Err(ControllerError::AlreadyExists(format!("index {}", index.index_name)))
            }
            other => other,
        }
    }

    async fn drop_index(&mut self, index: &Index) -> Result<()> {
        if self.simulates_indexes() {
            if let Some(hypothetical) = self.hypothetical.get(&index.index_name).cloned() {
                self.query("SELECT hypopg_drop_index($1)", &[&hypothetical.oid]).await?;
                self.hypothetical.remove(&index.index_name);
            }
            return Ok(());
        }

        let sql = format!("DROP INDEX IF EXISTS {}", SqlValidator::quote_ident(&index.index_name));
        self.batch(&sql).await
    }

    async fn drop_all_indexes(&mut self) -> Result<()> {
        if self.simulates_indexes() {
            self.query("SELECT hypopg_reset()", &[]).await?;
            self.hypothetical.clear();
            return Ok(());
        }

        let sql = format!(
            "SELECT n.nspname::text, c.relname::text \
             FROM pg_index i \
             JOIN pg_class c ON c.oid = i.indexrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE NOT i.indisunique AND NOT i.indisprimary AND n.nspname NOT IN {}",
            SYSTEM_SCHEMAS
        );
        let rows = self.query(&sql, &[]).await?;
        let mut names = Vec::with_capacity(rows.len());
        for row in &rows {
            let schema: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            names.push((schema, name));
        }
        drop(rows);

        for (schema, name) in names {
            let ddl = format!(
                "DROP INDEX IF EXISTS {}.{}",
                SqlValidator::quote_ident(&schema),
                SqlValidator::quote_ident(&name)
            );
            self.batch(&ddl).await?;
        }
        Ok(())
    }

    async fn get_all_indexes_byte(&mut self) -> Result<u64> {
        if self.simulates_indexes() {
            return self
                .query_u64(
                    "SELECT COALESCE(SUM(hypopg_relation_size(indexrelid)), 0)::bigint FROM hypopg_list_indexes",
                    &[],
                )
                .await;
        }

        let sql = format!(
            "SELECT COALESCE(SUM(pg_relation_size(i.indexrelid)), 0)::bigint \
             FROM pg_index i \
             JOIN pg_class t ON t.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             WHERE n.nspname NOT IN {}",
            SYSTEM_SCHEMAS
        );
        self.query_u64(&sql, &[]).await
    }

    async fn get_table_indexes_byte(&mut self, table: &str) -> Result<u64> {
        if self.simulates_indexes() {
            return self
                .query_u64(
                    "SELECT COALESCE(SUM(hypopg_relation_size(indexrelid)), 0)::bigint \
                     FROM hypopg_list_indexes WHERE table_name = $1",
                    &[&table],
                )
                .await;
        }

        self.query_u64(
            "SELECT COALESCE(SUM(pg_relation_size(i.indexrelid)), 0)::bigint \
             FROM pg_index i JOIN pg_class t ON t.oid = i.indrelid \
             WHERE t.relname = $1",
            &[&table],
        )
        .await
    }

    async fn get_index_byte(&mut self, index: &Index) -> Result<u64> {
        if self.simulates_indexes() {
            return match self.hypothetical.get(&index.index_name).map(|h| h.oid) {
                Some(oid) => {
                    self.query_u64("SELECT hypopg_relation_size($1)::bigint", &[&oid])
                        .await
                }
                None => Ok(0),
            };
        }

        self.query_u64(
            "SELECT COALESCE(SUM(pg_relation_size(c.oid)), 0)::bigint \
             FROM pg_class c WHERE c.relkind = 'i' AND c.relname = $1",
            &[&index.index_name],
        )
        .await
    }

    async fn get_existing_indexes(&mut self, table: &str) -> Result<Vec<Index>> {
        let rows = self
            .query(
                "SELECT c.relname::text, array_agg(a.attname::text ORDER BY k.ord) \
                 FROM pg_index i \
                 JOIN pg_class c ON c.oid = i.indexrelid \
                 JOIN pg_class t ON t.oid = i.indrelid \
                 CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
                 WHERE t.relname = $1 \
                 GROUP BY c.relname \
                 ORDER BY c.relname",
                &[&table],
            )
            .await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let columns: Vec<String> = row.try_get(1)?;
            indexes.push(Index::new(table, columns, name));
        }

        if self.simulates_indexes() {
            indexes.extend(
                self.hypothetical
                    .values()
                    .filter(|h| h.index.table == table)
                    .map(|h| h.index.clone()),
            );
        }
        Ok(indexes)
    }

    async fn get_all_table_names(&mut self) -> Result<Vec<String>> {
        let rows = self
            .query(
                "SELECT tablename::text FROM pg_tables WHERE schemaname = 'public' ORDER BY tablename",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(ControllerError::from))
            .collect()
    }

    async fn get_table_row_count(&mut self, table: &str) -> Result<u64> {
        let sql = format!("SELECT count(*) FROM {}", SqlValidator::quote_ident(table));
        self.query_u64(&sql, &[]).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.session.take_for_close() {
            self.hypothetical.clear();
            let PgHandle {
                client,
                connection_task,
            } = handle;
            drop(client);
            if let Err(e) = connection_task.await {
                if !e.is_cancelled() {
                    tracing::error!("PostgreSQL connection task failed: {}", e);
                }
            }
            tracing::info!("Closed connection to {}", self.config.masked_url());
        }
        Ok(())
    }
}

fn column_list(index: &Index) -> String {
    index
        .columns
        .iter()
        .map(|c| SqlValidator::quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_index_sql(index: &Index) -> String {
    format!(
        "CREATE INDEX {} ON {} ({})",
        SqlValidator::quote_ident(&index.index_name),
        SqlValidator::quote_ident(&index.table),
        column_list(index)
    )
}

/// hypopg names hypothetical indexes itself
fn hypothetical_index_sql(index: &Index) -> String {
    format!(
        "CREATE INDEX ON {} ({})",
        SqlValidator::quote_ident(&index.table),
        column_list(index)
    )
}

fn to_json<T: Serialize>(value: Option<T>) -> Value {
    value
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(Value::Null)
}

fn cell_to_json(row: &Row, idx: usize, ty: &Type) -> Value {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(to_json),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx).map(to_json),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx).map(to_json),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(to_json),
        Type::OID => row.try_get::<_, Option<u32>>(idx).map(to_json),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx).map(to_json),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map(to_json),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)
            .map(|v| v.map(decimal_to_json).unwrap_or(Value::Null)),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<Value>>(idx)
            .map(|v| v.unwrap_or(Value::Null)),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| to_json(v.map(|d| d.to_string()))),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)
            .map(|v| to_json(v.map(|t| t.to_string()))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map(|v| to_json(v.map(|t| t.to_string()))),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| to_json(v.map(|t| t.to_rfc3339()))),
        _ => row.try_get::<_, Option<String>>(idx).map(to_json),
    };
    // Types without a JSON mapping show up as a placeholder
    value.unwrap_or_else(|_| Value::String(format!("<{}>", ty.name())))
}

/// JSON number when the decimal fits one, its exact text otherwise
fn decimal_to_json(value: Decimal) -> Value {
    let text = value.normalize().to_string();
    match text.parse::<serde_json::Number>() {
        Ok(number) => Value::Number(number),
        Err(_) => Value::String(text),
    }
}

fn row_to_json(row: &Row) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| cell_to_json(row, idx, column.type_()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn live_config() -> Option<ConnectionConfig> {
        std::env::var("PILOT_TEST_POSTGRES_URL")
            .ok()
            .and_then(|url| ConnectionConfig::from_url(&url).ok())
    }

    #[test]
    fn test_rejects_foreign_config() {
        let result = PostgreSQLController::new(ConnectionConfig::mysql("school"));
        assert!(matches!(result, Err(ControllerError::Internal(_))));
    }

    #[test]
    fn test_supports_every_operation() {
        let controller = PostgreSQLController::new(ConnectionConfig::postgres("stats_tiny")).unwrap();
        assert!(controller.capabilities().missing().is_empty());
        assert!(controller.supports(Operation::SetHint));
        assert_eq!(controller.session_info().state, crate::models::SessionState::Idle);
    }

    #[test]
    fn test_index_ddl() {
        let index = Index::new("student", ["id", "name"], "student_id_name_idx");
        assert_eq!(
            create_index_sql(&index),
            "CREATE INDEX \"student_id_name_idx\" ON \"student\" (\"id\", \"name\")"
        );
        assert_eq!(
            hypothetical_index_sql(&index),
            "CREATE INDEX ON \"student\" (\"id\", \"name\")"
        );
    }

    #[test]
    fn test_numeric_to_json() {
        assert_eq!(decimal_to_json(Decimal::new(8033, 2)), serde_json::json!(80.33));
        assert_eq!(decimal_to_json(Decimal::new(22500, 2)), serde_json::json!(225));
        assert_eq!(decimal_to_json(Decimal::new(-5, 1)), serde_json::json!(-0.5));
        assert_eq!(decimal_to_json(Decimal::ZERO), serde_json::json!(0));
    }

    #[tokio::test]
    async fn test_close_before_connect_is_noop() {
        let mut controller = PostgreSQLController::new(ConnectionConfig::postgres("stats_tiny")).unwrap();
        controller.close().await.unwrap();
        controller.close().await.unwrap();
        assert!(matches!(
            controller.execute("SELECT 1", Fetch::Rows).await,
            Err(ControllerError::Internal(_))
        ));
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL server in PILOT_TEST_POSTGRES_URL"]
    async fn test_live_contract() {
        let config = live_config().expect("PILOT_TEST_POSTGRES_URL");
        let mut controller = PostgreSQLController::new(config).unwrap();

        controller.connect_if_loss().await.unwrap();
        controller.connect_if_loss().await.unwrap();
        assert_eq!(controller.session_info().connect_count, 1);

        assert!(controller.execute("SELECT 1", Fetch::None).await.unwrap().is_none());
        let result = controller
            .execute("SELECT * FROM (VALUES (1, 'a'), (2, 'b')) AS t(id, name)", Fetch::RowsWithColumnNames)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.to_sequence()[0], vec![Value::from("id"), Value::from("name")]);

        let averaged = controller
            .execute("SELECT avg(score) FROM (VALUES (90), (75), (60)) AS t(score)", Fetch::Rows)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(averaged.to_sequence()[0], vec![serde_json::json!(75)]);

        let plan = controller.explain_physical_plan("SELECT 1;", "").await.unwrap();
        assert!(plan.estimated_cost.is_some());

        controller.set_hint("enable_seqscan", HintValue::Bool(false)).await.unwrap();
        assert_eq!(controller.session_info().hints.len(), 1);
        controller.reset_hints().await.unwrap();
        assert!(controller.session_info().hints.is_empty());

        let missing = Index::new("no_such_table", ["id"], "no_such_index");
        assert_eq!(controller.get_index_byte(&missing).await.unwrap(), 0);
        controller.drop_index(&missing).await.unwrap();

        controller.close().await.unwrap();
        controller.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL server in PILOT_TEST_POSTGRES_URL"]
    async fn test_live_hint_not_recorded_on_pull_end() {
        let config = live_config().expect("PILOT_TEST_POSTGRES_URL");
        let mut controller = PostgreSQLController::new(config)
            .unwrap()
            .with_classifier(Arc::new(SqlStateClassifier::new("no_such_planner_knob")));

        // Unknown parameter: the error message carries the marker
        controller
            .set_hint("no_such_planner_knob", HintValue::Bool(false))
            .await
            .unwrap();
        assert!(controller.session_info().hints.is_empty());

        controller.set_hint("enable_seqscan", HintValue::Bool(false)).await.unwrap();
        assert_eq!(controller.session_info().hints.len(), 1);
        controller.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL server in PILOT_TEST_POSTGRES_URL"]
    async fn test_live_statement_timeout() {
        let config = live_config()
            .expect("PILOT_TEST_POSTGRES_URL")
            .with_statement_timeout(Duration::from_millis(100));
        let mut controller = PostgreSQLController::new(config).unwrap();

        let err = controller.execute("SELECT pg_sleep(2)", Fetch::None).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!err.is_unavailable());
        controller.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL server in PILOT_TEST_POSTGRES_URL"]
    async fn test_live_create_index_twice() {
        let config = live_config().expect("PILOT_TEST_POSTGRES_URL");
        let mut controller = PostgreSQLController::new(config).unwrap();
        controller
            .execute("CREATE TABLE IF NOT EXISTS pilot_idx_test (id int, name text)", Fetch::None)
            .await
            .unwrap();

        let index = Index::with_default_name("pilot_idx_test", ["id"]);
        controller.drop_index(&index).await.unwrap();
        controller.create_index(&index).await.unwrap();
        assert!(matches!(
            controller.create_index(&index).await,
            Err(ControllerError::AlreadyExists(_))
        ));
        assert!(controller.get_index_byte(&index).await.unwrap() > 0);
        let existing = controller.get_existing_indexes("pilot_idx_test").await.unwrap();
        assert!(existing.contains(&index));

        controller.drop_index(&index).await.unwrap();
        controller.execute("DROP TABLE pilot_idx_test", Fetch::None).await.unwrap();
        controller.close().await.unwrap();
    }
}
