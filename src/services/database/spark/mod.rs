// SparkSQL controller: a session-configured in-process engine
//
// Tuning happens through session properties fixed when the session is built;
// per-statement hints are runtime configuration changes on that session.
// With a PostgreSQL data source the session reads its tables from PostgreSQL.

mod convert;
mod datasource;
pub mod properties;

use async_trait::async_trait;
use chrono::Utc;
use datafusion::arrow::array::Array;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::array_value_to_string;
use datafusion::config::ConfigOptions;
use datafusion::error::DataFusionError;
use datafusion::prelude::SessionContext;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::error::Elapsed;

use crate::error::{ControllerError, Result};
use crate::models::{
    Capabilities, ConnectionConfig, DataSourceKind, DatabaseKind, ExecutionRecord,
    ExecutionResult, Fetch, HintValue, Operation, Plan, PlanKind, SessionInfo,
};
use crate::services::database::classifier::{
    self, DriverFailure, ErrorClassifier, SubstringClassifier,
};
use crate::services::database::controller::DbController;
use crate::services::database::session::Session;
use crate::validation::SqlValidator;

pub use properties::{PropertyTarget, SessionSettings};

const CAPABILITIES: Capabilities = Capabilities::new(&[
    Operation::Execute,
    Operation::ExplainPhysicalPlan,
    Operation::ExplainExecutionPlan,
    Operation::SetHint,
    Operation::ResetHints,
    Operation::TableNames,
    Operation::TableRowCount,
]);

pub struct SparkSQLController {
    config: ConnectionConfig,
    session: Session<SessionContext>,
    classifier: Arc<dyn ErrorClassifier>,
    /// Engine configuration in effect before the first hint
    baseline: Option<ConfigOptions>,
    /// Engine keys changed by hints since `baseline` was taken
    hinted: BTreeSet<String>,
}

impl SparkSQLController {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        if config.kind != DatabaseKind::SparkSql {
            return Err(ControllerError::Internal(format!(
                "SparkSQL controller cannot serve a {} configuration",
                config.kind
            )));
        }
        // Fail on a bad master URL or property value before the first use
        SessionSettings::from_options(&config.spark)?;

        let classifier = Arc::new(SubstringClassifier::new(config.pull_end_marker.clone()));
        Ok(Self {
            session: Session::new(format!("spark session {}", config.spark.app_name)),
            config,
            classifier,
            baseline: None,
            hinted: BTreeSet::new(),
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// The live session, opening it first when needed
    async fn context(&mut self) -> Result<SessionContext> {
        self.connect_if_loss().await?;
        Ok(self.session.handle()?.clone())
    }

    /// Run `work` under the statement time limit
    async fn with_timeout<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, DataFusionError>> + Send,
    {
        let limit = self.config.statement_timeout();
        timeout_result(tokio::time::timeout(limit, work).await, limit)
    }

    /// `Ok(())` means the pull-end marker stopped the statement
    fn translate(&self, error: ControllerError) -> Result<()> {
        let message = error.to_string();
        let class = self.classifier.classify(&DriverFailure::new(&message));
        classifier::translate(class, &message, error)
    }

    async fn explain(&mut self, sql: &str, comment: &str, kind: PlanKind) -> Result<Plan> {
        let statement = SqlValidator::single_statement(sql, DatabaseKind::SparkSql)?;
        let prefix = match kind {
            PlanKind::Physical => "EXPLAIN",
            PlanKind::Execution => "EXPLAIN ANALYZE",
        };
        let explain_sql = SqlValidator::with_comment(comment, &format!("{} {}", prefix, statement))?;

        let ctx = self.context().await?;
        let batches = self
            .with_timeout(async move { ctx.sql(&explain_sql).await?.collect().await })
            .await?;
        let sections = plan_sections(&batches)?;

        let find = |plan_type: &str| {
            sections
                .iter()
                .find(|(t, _)| t == plan_type)
                .map(|(_, text)| text.as_str())
        };
        match kind {
            PlanKind::Physical => {
                let physical = find("physical_plan")
                    .ok_or_else(|| ControllerError::InvalidPlan("no physical_plan in EXPLAIN output".to_string()))?;
                Plan::from_indented_text(DatabaseKind::SparkSql, kind, find("logical_plan"), physical)
            }
            PlanKind::Execution => {
                let analyzed = find("Plan with Metrics")
                    .or_else(|| sections.last().map(|(_, text)| text.as_str()))
                    .ok_or_else(|| ControllerError::InvalidPlan("empty EXPLAIN ANALYZE output".to_string()))?;
                Plan::from_indented_text(DatabaseKind::SparkSql, kind, None, analyzed)
            }
        }
    }

    /// Current engine value of a configuration key
    fn current_value(ctx: &SessionContext, key: &str) -> Option<String> {
        ctx.state()
            .config()
            .options()
            .entries()
            .into_iter()
            .find(|entry| entry.key == key)
            .and_then(|entry| entry.value)
    }

    fn apply_option(ctx: &SessionContext, key: &str, value: &str) -> Result<()> {
        let state = ctx.state_ref();
        let mut state = state.write();
        state.config_mut().options_mut().set(key, value)?;
        Ok(())
    }

    /// Put `baseline` back, keeping changes made since then by anything other than a hint.
    ///
    /// Hinted keys return to their baseline value even when that value was unset.
    fn restore_options(ctx: &SessionContext, baseline: ConfigOptions, hinted: &BTreeSet<String>) -> Result<()> {
        let before: HashMap<String, Option<String>> = baseline
            .entries()
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect();
        let mut restored = baseline;

        let state = ctx.state_ref();
        let mut state = state.write();
        let options = state.config_mut().options_mut();
        for entry in options.entries() {
            if hinted.contains(&entry.key) {
                continue;
            }
            if let Some(value) = entry.value {
                let unchanged = before.get(&entry.key).and_then(|v| v.as_deref()) == Some(value.as_str());
                if !unchanged {
                    restored.set(&entry.key, &value)?;
                }
            }
        }
        *options = restored;
        Ok(())
    }
}

#[async_trait]
impl DbController for SparkSQLController {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::SparkSql
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
        // An in-process session cannot die on its own
        if !self.session.needs_connect(|_| true)? {
            return Ok(());
        }

        let settings = SessionSettings::from_options(&self.config.spark)?;
        if !settings.ignored.is_empty() {
            tracing::warn!(
                "Ignoring session properties without an equivalent: {}",
                settings.ignored.join(", ")
            );
        }
        let ctx = settings.build_context()?;

        if let Some(DataSourceKind::PostgreSql) = self.config.spark.datasource {
            datasource::register_postgres_tables(&ctx, &self.config).await?;
        }

        self.session.install(ctx);
        self.baseline = None;
        self.hinted.clear();
        tracing::info!(
            "Started session {} with {} partition(s)",
            settings.app_name,
            settings.target_partitions
        );
        Ok(())
    }

    async fn execute(&mut self, sql: &str, fetch: Fetch) -> Result<Option<ExecutionResult>> {
        let ctx = self.context().await?;
        if self.config.echo {
            tracing::debug!("[{}] {}", self.config.spark.app_name, sql);
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let statement = sql.to_string();
        let outcome = self
            .with_timeout(async move {
                let df = ctx.sql(&statement).await?;
                let columns: Vec<String> = df
                    .schema()
                    .fields()
                    .iter()
                    .map(|f| f.name().to_string())
                    .collect();
                let batches = df.collect().await?;
                Ok::<_, DataFusionError>((columns, batches))
            })
            .await
            .and_then(|(columns, batches)| {
                let rows = convert::batches_to_rows(&batches)?;
                Ok(ExecutionResult::shaped(fetch, columns, rows))
            });

        let (result, pull_ended) = match outcome {
            Ok(rows) => (Ok(rows), false),
            Err(e) if e.is_timeout() => (Err(e), false),
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

    async fn set_hint(&mut self, key: &str, value: HintValue) -> Result<()> {
        let key = SqlValidator::validate_setting_name(key)?;
        let ctx = self.context().await?;

        let (target, engine_value) = match properties::translate_property(key, &value.to_string())? {
            PropertyTarget::Option { key, value } => (key, value),
            PropertyTarget::MemoryLimit(_) => {
                return Err(ControllerError::InvalidInput(format!(
                    "{} can only be set when the session is created",
                    key
                )))
            }
            PropertyTarget::Ignored => {
                return Err(ControllerError::InvalidInput(format!(
                    "{} has no equivalent in this session",
                    key
                )))
            }
        };

        if self.baseline.is_none() {
            self.baseline = Some(ConfigOptions::clone(ctx.state().config().options()));
        }
        Self::apply_option(&ctx, &target, &engine_value)?;
        self.hinted.insert(target);
        self.session.record_hint(key, value);
        Ok(())
    }

    async fn reset_hints(&mut self) -> Result<()> {
        let ctx = self.context().await?;
        if let Some(baseline) = self.baseline.take() {
            Self::restore_options(&ctx, baseline, &self.hinted)?;
        }
        self.hinted.clear();
        self.session.clear_hints();
        Ok(())
    }

    async fn get_all_table_names(&mut self) -> Result<Vec<String>> {
        let ctx = self.context().await?;
        let state = ctx.state();
        let options = state.config().options();

        let schema = ctx
            .catalog(&options.catalog.default_catalog)
            .and_then(|catalog| catalog.schema(&options.catalog.default_schema))
            .ok_or_else(|| ControllerError::Internal("default schema is missing".to_string()))?;

        let mut names = schema.table_names();
        names.sort();
        Ok(names)
    }

    async fn get_table_row_count(&mut self, table: &str) -> Result<u64> {
        let ctx = self.context().await?;
        let sql = format!("SELECT count(*) FROM {}", SqlValidator::quote_ident(table));
        let batches = self
            .with_timeout(async move { ctx.sql(&sql).await?.collect().await })
            .await?;

        let rows = convert::batches_to_rows(&batches)?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ControllerError::Internal(format!("count(*) on {} returned no value", table)))
    }

    async fn close(&mut self) -> Result<()> {
        if self.session.take_for_close().is_some() {
            self.baseline = None;
            self.hinted.clear();
            tracing::info!("Stopped session {}", self.config.spark.app_name);
        }
        Ok(())
    }
}

fn timeout_result<T>(
    outcome: std::result::Result<std::result::Result<T, DataFusionError>, Elapsed>,
    limit: Duration,
) -> Result<T> {
    match outcome {
        Ok(result) => Ok(result?),
        Err(_) => Err(ControllerError::StatementTimeout(format!(
            "statement exceeded {} ms",
            limit.as_millis()
        ))),
    }
}

/// `(plan_type, plan)` pairs of an EXPLAIN result
fn plan_sections(batches: &[RecordBatch]) -> Result<Vec<(String, String)>> {
    let mut sections = Vec::new();
    for batch in batches {
        if batch.num_columns() < 2 {
            return Err(ControllerError::InvalidPlan("EXPLAIN output needs two columns".to_string()));
        }
        let (types, plans) = (batch.column(0), batch.column(1));
        for row in 0..batch.num_rows() {
            if types.is_null(row) || plans.is_null(row) {
                continue;
            }
            let plan_type = array_value_to_string(types, row).map_err(DataFusionError::from)?;
            let plan = array_value_to_string(plans, row).map_err(DataFusionError::from)?;
            sections.push((plan_type, plan));
        }
    }
    Ok(sections)
}
