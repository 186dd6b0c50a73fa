// Backend-agnostic data collection for a single SQL statement
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::models::{ExecutionOutcome, ExecutionResult, Fetch, Operation, Plan};
use crate::services::database::DbController;
use crate::validation::SqlValidator;

/// One piece of runtime data a collaborator can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataProduct {
    Records,
    ExecutionTime,
    PhysicalPlan,
    ExecutionPlan,
    EstimatedCost,
}

impl DataProduct {
    /// Controller operation the product is produced by
    pub fn operation(&self) -> Operation {
        match self {
            DataProduct::Records | DataProduct::ExecutionTime => Operation::Execute,
            DataProduct::PhysicalPlan => Operation::ExplainPhysicalPlan,
            DataProduct::ExecutionPlan => Operation::ExplainExecutionPlan,
            DataProduct::EstimatedCost => Operation::EstimatedCost,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub sql: String,
    #[serde(default)]
    pub comment: String,
    pub products: BTreeSet<DataProduct>,
}

impl PullRequest {
    pub fn new<I>(sql: impl Into<String>, products: I) -> Self
    where
        I: IntoIterator<Item = DataProduct>,
    {
        Self {
            sql: sql.into(),
            comment: String::new(),
            products: products.into_iter().collect(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PullResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
    /// True when a pulling collaborator stopped the statement early
    pub pull_ended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    /// Requested products the backend cannot produce
    pub unavailable: Vec<DataProduct>,
}

/// Gather the requested products for `request.sql`.
///
/// The statement runs at most once. Products outside the controller's
/// capabilities are reported in `unavailable`; any other failure aborts the pull.
pub async fn pull(controller: &mut dyn DbController, request: &PullRequest) -> Result<PullResponse> {
    let kind = controller.kind();
    let mut response = PullResponse::default();

    let (available, unavailable): (Vec<DataProduct>, Vec<DataProduct>) = request
        .products
        .iter()
        .copied()
        .partition(|product| controller.supports(product.operation()));
    response.unavailable = unavailable;
    if !response.unavailable.is_empty() {
        tracing::debug!("{} controller cannot produce {:?}", kind, response.unavailable);
    }

    let wants = |product: DataProduct| available.contains(&product);

    if wants(DataProduct::Records) || wants(DataProduct::ExecutionTime) {
        let fetch = if wants(DataProduct::Records) {
            Fetch::RowsWithColumnNames
        } else {
            Fetch::None
        };
        let sql = SqlValidator::with_comment(&request.comment, &request.sql)?;
        let records = controller.execute(&sql, fetch).await?;

        if let Some(record) = controller.last_execution() {
            response.pull_ended = record.outcome == ExecutionOutcome::PullEnded;
            if wants(DataProduct::ExecutionTime) {
                response.execution_time_ms = Some(record.execution_time_ms);
            }
        }
        if wants(DataProduct::Records) {
            response.records = records;
        }
    }

    if wants(DataProduct::PhysicalPlan) {
        response.physical_plan = Some(controller.explain_physical_plan(&request.sql, &request.comment).await?);
    }
    if wants(DataProduct::ExecutionPlan) {
        response.execution_plan = Some(controller.explain_execution_plan(&request.sql, &request.comment).await?);
    }
    if wants(DataProduct::EstimatedCost) {
        response.estimated_cost = Some(controller.get_estimated_cost(&request.sql, &request.comment).await?);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionConfig;
    use crate::services::database::create_controller;

    async fn spark_with_table() -> Box<dyn DbController> {
        let mut controller = create_controller(ConnectionConfig::spark("pull")).unwrap();
        controller
            .execute(
                "CREATE TABLE t (id INT, v VARCHAR) AS VALUES (1, 'a'), (2, 'b')",
                Fetch::None,
            )
            .await
            .unwrap();
        controller
    }

    #[tokio::test]
    async fn test_pull_records_and_time() {
        let mut controller = spark_with_table().await;
        let request = PullRequest::new(
            "SELECT id, v FROM t ORDER BY id",
            [DataProduct::Records, DataProduct::ExecutionTime],
        );
        let response = pull(controller.as_mut(), &request).await.unwrap();

        let records = response.records.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.columns().unwrap(), ["id".to_string(), "v".to_string()]);
        assert!(response.execution_time_ms.unwrap() >= 0.0);
        assert!(!response.pull_ended);
        assert!(response.unavailable.is_empty());
    }

    #[tokio::test]
    async fn test_pull_reports_unavailable_products() {
        let mut controller = spark_with_table().await;
        let request = PullRequest::new(
            "SELECT * FROM t",
            [DataProduct::PhysicalPlan, DataProduct::EstimatedCost],
        );
        let response = pull(controller.as_mut(), &request).await.unwrap();

        assert!(response.physical_plan.is_some());
        assert!(response.estimated_cost.is_none());
        assert!(response.records.is_none());
        assert_eq!(response.unavailable, vec![DataProduct::EstimatedCost]);
    }

    #[tokio::test]
    async fn test_execution_time_without_records() {
        let mut controller = spark_with_table().await;
        let request = PullRequest::new("SELECT count(*) FROM t", [DataProduct::ExecutionTime]);
        let response = pull(controller.as_mut(), &request).await.unwrap();
        assert!(response.records.is_none());
        assert!(response.execution_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_mysql_pull_is_capability_filtered() {
        let mut controller = create_controller(ConnectionConfig::mysql("pull")).unwrap();
        let request = PullRequest::new(
            "SELECT 1",
            [DataProduct::ExecutionPlan, DataProduct::EstimatedCost],
        );
        // Nothing requested is available, so no connection is attempted
        let response = pull(controller.as_mut(), &request).await.unwrap();
        assert_eq!(
            response.unavailable,
            vec![DataProduct::ExecutionPlan, DataProduct::EstimatedCost]
        );
    }

    #[test]
    fn test_product_operations() {
        assert_eq!(DataProduct::Records.operation(), Operation::Execute);
        assert_eq!(DataProduct::EstimatedCost.operation(), Operation::EstimatedCost);
    }
}
