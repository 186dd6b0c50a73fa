use serde::{Deserialize, Serialize};
use std::fmt;

/// Operations of the controller contract that a backend may lack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Execute,
    ExplainPhysicalPlan,
    ExplainExecutionPlan,
    EstimatedCost,
    SetHint,
    ResetHints,
    CreateIndex,
    DropIndex,
    DropAllIndexes,
    IndexSize,
    ExistingIndexes,
    TableNames,
    TableRowCount,
}

impl Operation {
    pub const ALL: [Operation; 13] = [
        Operation::Execute,
        Operation::ExplainPhysicalPlan,
        Operation::ExplainExecutionPlan,
        Operation::EstimatedCost,
        Operation::SetHint,
        Operation::ResetHints,
        Operation::CreateIndex,
        Operation::DropIndex,
        Operation::DropAllIndexes,
        Operation::IndexSize,
        Operation::ExistingIndexes,
        Operation::TableNames,
        Operation::TableRowCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Execute => "execute",
            Operation::ExplainPhysicalPlan => "explain_physical_plan",
            Operation::ExplainExecutionPlan => "explain_execution_plan",
            Operation::EstimatedCost => "get_estimated_cost",
            Operation::SetHint => "set_hint",
            Operation::ResetHints => "reset_hints",
            Operation::CreateIndex => "create_index",
            Operation::DropIndex => "drop_index",
            Operation::DropAllIndexes => "drop_all_indexes",
            Operation::IndexSize => "index_size",
            Operation::ExistingIndexes => "get_existing_indexes",
            Operation::TableNames => "get_all_table_names",
            Operation::TableRowCount => "get_table_row_count",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of operations a backend implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(&'static [Operation]);

impl Capabilities {
    pub const fn new(operations: &'static [Operation]) -> Self {
        Self(operations)
    }

    pub fn supports(&self, operation: Operation) -> bool {
        self.0.contains(&operation)
    }

    pub fn operations(&self) -> &'static [Operation] {
        self.0
    }

    /// Operations of the contract this backend does not provide
    pub fn missing(&self) -> Vec<Operation> {
        Operation::ALL
            .iter()
            .copied()
            .filter(|op| !self.supports(*op))
            .collect()
    }
}

impl Serialize for Capabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ_ONLY: Capabilities =
        Capabilities::new(&[Operation::Execute, Operation::ExplainPhysicalPlan]);

    #[test]
    fn test_supports_and_missing() {
        assert!(READ_ONLY.supports(Operation::Execute));
        assert!(!READ_ONLY.supports(Operation::SetHint));
        let missing = READ_ONLY.missing();
        assert_eq!(missing.len(), Operation::ALL.len() - 2);
        assert!(missing.contains(&Operation::CreateIndex));
    }

    #[test]
    fn test_serializes_as_operation_names() {
        let json = serde_json::to_value(READ_ONLY).unwrap();
        assert_eq!(json, serde_json::json!(["execute", "explain_physical_plan"]));
    }
}
