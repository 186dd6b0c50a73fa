// Backend-neutral query plans.
//
// Each engine reports plans in its own EXPLAIN format: PostgreSQL as a JSON
// array of `{"Plan": ...}` documents, MySQL as a `query_block` JSON document,
// and the SparkSQL session as indented operator text. All of them are folded
// into the same `PlanNode` tree while the raw payload is kept verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ControllerError, Result};
use crate::models::DatabaseKind;

/// Whether the plan was produced without running the statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    /// Optimizer's choice, statement not executed
    Physical,
    /// Plan annotated with runtime measurements, statement executed
    Execution,
}

/// One operator in a plan tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub operator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_rows: Option<f64>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            estimated_cost: None,
            estimated_rows: None,
            properties: Map::new(),
            children: Vec::new(),
        }
    }

    /// Number of operators in this subtree
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(PlanNode::node_count).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(PlanNode::depth).max().unwrap_or(0)
    }

    /// Pre-order walk
    pub fn walk(&self) -> Vec<&PlanNode> {
        let mut nodes = vec![self];
        for child in &self.children {
            nodes.extend(child.walk());
        }
        nodes
    }

    pub fn find(&self, operator: &str) -> Option<&PlanNode> {
        self.walk().into_iter().find(|node| node.operator == operator)
    }
}

/// Execution plan reported by an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub backend: DatabaseKind,
    pub kind: PlanKind,
    /// Payload exactly as the engine returned it
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PlanNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical: Option<PlanNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
}

impl Plan {
    /// Parse the payload of `EXPLAIN (FORMAT JSON)`
    pub fn from_postgres_json(kind: PlanKind, payload: Value) -> Result<Self> {
        let document = match &payload {
            Value::Array(items) => items.first(),
            Value::Object(_) => Some(&payload),
            _ => None,
        }
        .and_then(Value::as_object)
        .ok_or_else(|| ControllerError::InvalidPlan("expected a JSON plan document".to_string()))?;

        let plan = document
            .get("Plan")
            .and_then(Value::as_object)
            .ok_or_else(|| ControllerError::InvalidPlan("missing \"Plan\" node".to_string()))?;

        let root = postgres_node(plan);
        let estimated_cost = root.estimated_cost;
        let execution_time_ms = document.get("Execution Time").and_then(Value::as_f64);

        Ok(Self {
            backend: DatabaseKind::PostgreSql,
            kind,
            raw: payload.to_string(),
            root: Some(root),
            logical: None,
            estimated_cost,
            execution_time_ms,
        })
    }

    /// Parse the payload of `EXPLAIN format=json`, keeping the text untouched
    pub fn from_mysql_json(raw: String) -> Result<Self> {
        let document: Value = serde_json::from_str(&raw)
            .map_err(|e| ControllerError::InvalidPlan(format!("MySQL plan is not JSON: {}", e)))?;

        let block = document
            .get("query_block")
            .and_then(Value::as_object)
            .ok_or_else(|| ControllerError::InvalidPlan("missing \"query_block\" node".to_string()))?;

        let root = mysql_node("query_block", block);
        let estimated_cost = root.estimated_cost;

        Ok(Self {
            backend: DatabaseKind::MySql,
            kind: PlanKind::Physical,
            raw,
            root: Some(root),
            logical: None,
            estimated_cost,
            execution_time_ms: None,
        })
    }

    /// Build from the indented text of a session engine's `EXPLAIN`
    pub fn from_indented_text(
        backend: DatabaseKind,
        kind: PlanKind,
        logical: Option<&str>,
        physical: &str,
    ) -> Result<Self> {
        let root = parse_indented(physical)
            .ok_or_else(|| ControllerError::InvalidPlan("empty physical plan".to_string()))?;

        let mut raw = String::new();
        if let Some(logical) = logical {
            raw.push_str(logical.trim_end());
            raw.push('\n');
        }
        raw.push_str(physical.trim_end());

        Ok(Self {
            backend,
            kind,
            raw,
            root: Some(root),
            logical: logical.and_then(parse_indented),
            estimated_cost: None,
            execution_time_ms: None,
        })
    }

    /// The raw payload as JSON, for engines that report JSON
    pub fn payload_json(&self) -> Result<Value> {
        serde_json::from_str(&self.raw)
            .map_err(|e| ControllerError::InvalidPlan(format!("plan payload is not JSON: {}", e)))
    }
}

fn postgres_node(plan: &Map<String, Value>) -> PlanNode {
    let operator = plan
        .get("Node Type")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");

    let mut node = PlanNode::new(operator);
    node.estimated_cost = plan.get("Total Cost").and_then(Value::as_f64);
    node.estimated_rows = plan.get("Plan Rows").and_then(Value::as_f64);

    for (key, value) in plan {
        match key.as_str() {
            "Plans" => {
                if let Some(children) = value.as_array() {
                    node.children = children
                        .iter()
                        .filter_map(Value::as_object)
                        .map(postgres_node)
                        .collect();
                }
            }
            "Node Type" | "Total Cost" | "Plan Rows" => {}
            _ => {
                node.properties.insert(key.clone(), value.clone());
            }
        }
    }

    node
}

fn mysql_node(operator: &str, block: &Map<String, Value>) -> PlanNode {
    let mut node = PlanNode::new(operator);

    for (key, value) in block {
        match value {
            Value::Object(inner) if key == "cost_info" => {
                node.estimated_cost = ["query_cost", "prefix_cost", "read_cost"]
                    .iter()
                    .find_map(|k| inner.get(*k).and_then(number_like));
                node.properties.insert(key.clone(), value.clone());
            }
            Value::Object(inner) => node.children.push(mysql_node(key, inner)),
            Value::Array(items) if items.iter().all(Value::is_object) && !items.is_empty() => {
                for item in items.iter().filter_map(Value::as_object) {
                    // `nested_loop: [{"table": {...}}, ...]` wraps each operator in a single-key object
                    match single_object_entry(item) {
                        Some((inner_key, inner)) => node.children.push(mysql_node(inner_key, inner)),
                        None => node.children.push(mysql_node(key, item)),
                    }
                }
            }
            _ => {
                node.properties.insert(key.clone(), value.clone());
            }
        }
    }

    if node.estimated_rows.is_none() {
        node.estimated_rows = ["rows_produced_per_join", "rows_examined_per_scan"]
            .iter()
            .find_map(|k| block.get(*k).and_then(number_like));
    }

    node
}

fn single_object_entry(item: &Map<String, Value>) -> Option<(&str, &Map<String, Value>)> {
    if item.len() != 1 {
        return None;
    }
    item.iter()
        .next()
        .and_then(|(k, v)| v.as_object().map(|inner| (k.as_str(), inner)))
}

/// MySQL reports costs as strings ("1.20")
fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Two spaces of indentation per tree level; `Operator: detail` per line
fn parse_indented(text: &str) -> Option<PlanNode> {
    let mut stack: Vec<(usize, PlanNode)> = Vec::new();
    let mut roots: Vec<PlanNode> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        let depth = indent / 2;
        let content = line.trim();

        let node = match content.split_once(": ") {
            Some((operator, detail)) => {
                let mut node = PlanNode::new(operator);
                node.properties
                    .insert("detail".to_string(), Value::String(detail.to_string()));
                node
            }
            None => PlanNode::new(content.trim_end_matches(':')),
        };

        while let Some((top_depth, _)) = stack.last() {
            if *top_depth < depth {
                break;
            }
            if let Some((_, finished)) = stack.pop() {
                attach(&mut stack, &mut roots, finished);
            }
        }
        stack.push((depth, node));
    }

    while let Some((_, finished)) = stack.pop() {
        attach(&mut stack, &mut roots, finished);
    }

    match roots.len() {
        0 => None,
        1 => roots.pop(),
        _ => {
            let mut wrapper = PlanNode::new("Plans");
            wrapper.children = roots;
            Some(wrapper)
        }
    }
}

fn attach(stack: &mut [(usize, PlanNode)], roots: &mut Vec<PlanNode>, node: PlanNode) {
    match stack.last_mut() {
        Some((_, parent)) => parent.children.push(node),
        None => roots.push(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MYSQL_JOIN_PLAN: &str = r#"{
      "query_block": {
        "select_id": 1,
        "cost_info": { "query_cost": "4.50" },
        "nested_loop": [
          {
            "table": {
              "table_name": "s",
              "access_type": "ALL",
              "rows_examined_per_scan": 3,
              "cost_info": { "read_cost": "0.25", "prefix_cost": "0.55" },
              "used_columns": ["id", "name", "score"]
            }
          },
          {
            "table": {
              "table_name": "c",
              "access_type": "ALL",
              "rows_examined_per_scan": 4,
              "cost_info": { "read_cost": "0.25", "prefix_cost": "4.50" },
              "attached_condition": "(`school`.`c`.`student_id` = `school`.`s`.`id`)"
            }
          }
        ]
      }
    }"#;

    #[test]
    fn test_mysql_plan_keeps_raw_payload() {
        let plan = Plan::from_mysql_json(MYSQL_JOIN_PLAN.to_string()).unwrap();
        assert_eq!(plan.raw, MYSQL_JOIN_PLAN);
        let payload = plan.payload_json().unwrap();
        assert!(payload.get("query_block").is_some());
    }

    #[test]
    fn test_mysql_plan_tree() {
        let plan = Plan::from_mysql_json(MYSQL_JOIN_PLAN.to_string()).unwrap();
        let root = plan.root.unwrap();
        assert_eq!(root.operator, "query_block");
        assert_eq!(root.estimated_cost, Some(4.5));
        assert_eq!(plan.estimated_cost, Some(4.5));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].operator, "table");
        assert_eq!(root.children[0].properties["table_name"], json!("s"));
        assert_eq!(root.children[1].estimated_cost, Some(4.5));
        assert_eq!(root.children[1].estimated_rows, Some(4.0));
    }

    #[test]
    fn test_mysql_plan_rejects_other_documents() {
        assert!(Plan::from_mysql_json("not json".to_string()).is_err());
        assert!(Plan::from_mysql_json("{\"plan\": {}}".to_string()).is_err());
    }

    #[test]
    fn test_postgres_plan() {
        let payload = json!([{
            "Plan": {
                "Node Type": "Hash Join",
                "Total Cost": 42.5,
                "Plan Rows": 120,
                "Join Type": "Inner",
                "Plans": [
                    { "Node Type": "Seq Scan", "Relation Name": "student", "Total Cost": 10.0, "Plan Rows": 100 },
                    { "Node Type": "Hash", "Total Cost": 20.0, "Plan Rows": 50,
                      "Plans": [{ "Node Type": "Seq Scan", "Relation Name": "course", "Total Cost": 15.0, "Plan Rows": 50 }] }
                ]
            },
            "Execution Time": 3.25
        }]);

        let plan = Plan::from_postgres_json(PlanKind::Execution, payload).unwrap();
        let root = plan.root.as_ref().unwrap();
        assert_eq!(root.operator, "Hash Join");
        assert_eq!(plan.estimated_cost, Some(42.5));
        assert_eq!(plan.execution_time_ms, Some(3.25));
        assert_eq!(root.node_count(), 4);
        assert_eq!(root.depth(), 3);
        assert_eq!(root.properties["Join Type"], json!("Inner"));
        assert!(!root.properties.contains_key("Plans"));
        assert!(root.find("Hash").is_some());
    }

    #[test]
    fn test_postgres_plan_missing_node() {
        assert!(Plan::from_postgres_json(PlanKind::Physical, json!([{ "Nope": 1 }])).is_err());
    }

    #[test]
    fn test_indented_text_plan() {
        let physical = "ProjectionExec: expr=[id@0 as id]\n  HashJoinExec: mode=CollectLeft, join_type=Inner\n    DataSourceExec: partitions=1\n    DataSourceExec: partitions=1\n";
        let logical = "Projection: s.id\n  Inner Join: s.id = c.student_id\n    TableScan: s\n    TableScan: c";

        let plan = Plan::from_indented_text(
            DatabaseKind::SparkSql,
            PlanKind::Physical,
            Some(logical),
            physical,
        )
        .unwrap();

        let root = plan.root.unwrap();
        assert_eq!(root.operator, "ProjectionExec");
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].operator, "HashJoinExec");
        assert_eq!(root.children[0].children.len(), 2);
        assert_eq!(root.properties["detail"], json!("expr=[id@0 as id]"));

        let logical = plan.logical.unwrap();
        assert_eq!(logical.operator, "Projection");
        assert_eq!(logical.node_count(), 4);
    }

    #[test]
    fn test_indented_text_rejects_empty() {
        assert!(Plan::from_indented_text(DatabaseKind::SparkSql, PlanKind::Physical, None, "  \n").is_err());
    }
}
