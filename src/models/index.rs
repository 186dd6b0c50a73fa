use serde::{Deserialize, Serialize};

/// Secondary index description.
///
/// Existence is decided by the engine's catalog; this is only a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    pub table: String,
    pub columns: Vec<String>,
    pub index_name: String,
}

impl Index {
    pub fn new<I, S>(table: impl Into<String>, columns: I, index_name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            index_name: index_name.into(),
        }
    }

    /// Conventional name `<table>_<col1>_<col2>_idx`
    pub fn with_default_name<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = table.into();
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let index_name = format!("{}_{}_idx", table, columns.join("_"));
        Self {
            table,
            columns,
            index_name,
        }
    }
}
