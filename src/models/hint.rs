use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ControllerError, Result};
use crate::validation::SqlValidator;

/// Typed value of a session-scoped runtime parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HintValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for HintValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HintValue::Bool(v) => write!(f, "{}", v),
            HintValue::Int(v) => write!(f, "{}", v),
            HintValue::Float(v) => write!(f, "{}", v),
            HintValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for HintValue {
    fn from(v: bool) -> Self {
        HintValue::Bool(v)
    }
}

impl From<i64> for HintValue {
    fn from(v: i64) -> Self {
        HintValue::Int(v)
    }
}

impl From<i32> for HintValue {
    fn from(v: i32) -> Self {
        HintValue::Int(v as i64)
    }
}

impl From<f64> for HintValue {
    fn from(v: f64) -> Self {
        HintValue::Float(v)
    }
}

impl From<&str> for HintValue {
    fn from(v: &str) -> Self {
        HintValue::Text(v.to_string())
    }
}

impl From<String> for HintValue {
    fn from(v: String) -> Self {
        HintValue::Text(v)
    }
}

/// A runtime parameter override scoped to the current session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    pub key: String,
    pub value: HintValue,
}

impl Hint {
    pub fn new(key: impl Into<String>, value: impl Into<HintValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Scan directives understood by pg_hint_plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMethod {
    SeqScan,
    TidScan,
    IndexScan,
    IndexOnlyScan,
    BitmapScan,
    NoSeqScan,
    NoTidScan,
    NoIndexScan,
    NoIndexOnlyScan,
    NoBitmapScan,
}

/// Join directives understood by pg_hint_plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinMethod {
    NestLoop,
    HashJoin,
    MergeJoin,
    Memoize,
    NoNestLoop,
    NoHashJoin,
    NoMergeJoin,
    NoMemoize,
}

impl fmt::Display for ScanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for JoinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Optimizer directives carried in a leading `/*+ ... */` comment.
///
/// Pass the rendered comment as the `comment` argument of the explain
/// operations, or prefix it to a statement before executing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanHints {
    directives: Vec<String>,
}

impl PlanHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(mut self, method: ScanMethod, table: &str) -> Result<Self> {
        let table = SqlValidator::validate_identifier(table)?;
        self.directives.push(format!("{}({})", method, table));
        Ok(self)
    }

    pub fn join(mut self, method: JoinMethod, tables: &[&str]) -> Result<Self> {
        let tables = table_list(tables, 2)?;
        self.directives.push(format!("{}({})", method, tables));
        Ok(self)
    }

    /// Fix the join order
    pub fn leading(mut self, tables: &[&str]) -> Result<Self> {
        let tables = table_list(tables, 1)?;
        self.directives.push(format!("Leading({})", tables));
        Ok(self)
    }

    /// Row count correction, e.g. `Rows(a b #100)`
    pub fn rows(mut self, tables: &[&str], rows: u64) -> Result<Self> {
        let tables = table_list(tables, 1)?;
        self.directives.push(format!("Rows({} #{})", tables, rows));
        Ok(self)
    }

    pub fn parallel(mut self, table: &str, workers: u32) -> Result<Self> {
        let table = SqlValidator::validate_identifier(table)?;
        self.directives.push(format!("Parallel({} {})", table, workers));
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn to_comment(&self) -> String {
        if self.directives.is_empty() {
            String::new()
        } else {
            format!("/*+ {} */", self.directives.join(" "))
        }
    }
}

/// Space-separated table names or aliases, each a plain identifier
fn table_list(tables: &[&str], at_least: usize) -> Result<String> {
    if tables.len() < at_least {
        return Err(ControllerError::InvalidInput(format!(
            "Directive needs at least {} table(s), got {}",
            at_least,
            tables.len()
        )));
    }
    let checked = tables
        .iter()
        .map(|table| SqlValidator::validate_identifier(table))
        .collect::<Result<Vec<_>>>()?;
    Ok(checked.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_value_display() {
        assert_eq!(HintValue::from(false).to_string(), "false");
        assert_eq!(HintValue::from(64).to_string(), "64");
        assert_eq!(HintValue::from(0.5).to_string(), "0.5");
        assert_eq!(HintValue::from("64MB").to_string(), "64MB");
    }

    #[test]
    fn test_hint_value_untagged_json() {
        let value: HintValue = serde_json::from_str("true").unwrap();
        assert_eq!(value, HintValue::Bool(true));
        let value: HintValue = serde_json::from_str("12").unwrap();
        assert_eq!(value, HintValue::Int(12));
        let value: HintValue = serde_json::from_str("\"off\"").unwrap();
        assert_eq!(value, HintValue::Text("off".to_string()));
    }

    #[test]
    fn test_plan_hints_comment() {
        let hints = PlanHints::new()
            .scan(ScanMethod::IndexScan, "s")
            .and_then(|h| h.join(JoinMethod::HashJoin, &["s", "c"]))
            .and_then(|h| h.leading(&["c", "s"]))
            .and_then(|h| h.rows(&["s", "c"], 100))
            .unwrap();
        assert_eq!(
            hints.to_comment(),
            "/*+ IndexScan(s) HashJoin(s c) Leading(c s) Rows(s c #100) */"
        );
        assert!(SqlValidator::with_comment(&hints.to_comment(), "SELECT 1").is_ok());
    }

    #[test]
    fn test_plan_hints_reject_bad_tables() {
        let injected = PlanHints::new().scan(ScanMethod::SeqScan, "s) */ DROP TABLE student; /*+ SeqScan(s");
        assert!(matches!(injected, Err(ControllerError::InvalidInput(_))));
        assert!(PlanHints::new().join(JoinMethod::NestLoop, &["s"]).is_err());
        assert!(PlanHints::new().leading(&[]).is_err());
        assert!(PlanHints::new().parallel("a b", 2).is_err());
    }

    #[test]
    fn test_empty_plan_hints() {
        assert!(PlanHints::new().is_empty());
        assert_eq!(PlanHints::new().to_comment(), "");
    }
}
