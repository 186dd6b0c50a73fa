// Spark session properties mapped onto the in-process engine's configuration
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use datafusion::execution::SessionStateBuilder;
use datafusion::prelude::{SessionConfig, SessionContext};
use std::collections::BTreeMap;

use crate::error::{ControllerError, Result};
use crate::models::SparkOptions;

const TARGET_PARTITIONS: &str = "datafusion.execution.target_partitions";

/// Where a single Spark property ends up
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyTarget {
    /// Engine configuration key and value
    Option { key: String, value: String },
    /// Memory pool size in bytes; only settable when the session is created
    MemoryLimit(usize),
    /// No equivalent
    Ignored,
}

/// Translate one Spark (or engine-native `datafusion.*`) property
pub fn translate_property(key: &str, value: &str) -> Result<PropertyTarget> {
    let option = |target: &str, value: String| PropertyTarget::Option {
        key: target.to_string(),
        value,
    };

    let target = match key {
        k if k.starts_with("datafusion.") => option(k, value.to_string()),
        "spark.sql.cbo.enabled" => option("datafusion.execution.collect_statistics", parse_bool(key, value)?.to_string()),
        "spark.sql.cbo.joinReorder.enabled" => option(
            "datafusion.optimizer.top_down_join_key_reordering",
            parse_bool(key, value)?.to_string(),
        ),
        "spark.sql.shuffle.partitions" => option(TARGET_PARTITIONS, parse_count(key, value)?.to_string()),
        // Sort-merge preferred means hash join not preferred
        "spark.sql.join.preferSortMergeJoin" => {
            option("datafusion.optimizer.prefer_hash_join", (!parse_bool(key, value)?).to_string())
        }
        "spark.sql.autoBroadcastJoinThreshold" => {
            // -1 disables broadcast joins
            let bytes = if value.trim() == "-1" { 0 } else { parse_byte_size(key, value)? };
            option("datafusion.optimizer.hash_join_single_partition_threshold", bytes.to_string())
        }
        "spark.driver.memory" | "spark.executor.memory" => PropertyTarget::MemoryLimit(parse_byte_size(key, value)?),
        _ => PropertyTarget::Ignored,
    };
    Ok(target)
}

fn invalid(key: &str, value: &str) -> ControllerError {
    ControllerError::InvalidInput(format!("Invalid value {:?} for {}", value, key))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(key, value)),
    }
}

/// Spark size string (`512m`, `20g`, `10MB`, plain bytes)
pub fn parse_byte_size(key: &str, value: &str) -> Result<usize> {
    let trimmed = value.trim().to_ascii_lowercase();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(digits_end);

    let number: usize = number.parse().map_err(|_| invalid(key, value))?;
    let multiplier: usize = match unit.trim() {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        "t" | "tb" => 1 << 40,
        _ => return Err(invalid(key, value)),
    };
    number.checked_mul(multiplier).ok_or_else(|| invalid(key, value))
}

/// Parallelism of a `local`, `local[N]` or `local[*]` master
pub fn parse_master_url(master_url: &str) -> Result<usize> {
    let unsupported = || {
        ControllerError::Internal(format!(
            "Unsupported master URL {:?}: only local, local[N] and local[*] are available",
            master_url
        ))
    };

    match master_url.trim() {
        "local" => Ok(1),
        "local[*]" => Ok(num_cpus::get()),
        other => {
            let threads = other
                .strip_prefix("local[")
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(unsupported)?;
            match threads.parse::<usize>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(unsupported()),
            }
        }
    }
}

/// Engine settings derived from [`SparkOptions`]
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub app_name: String,
    pub target_partitions: usize,
    /// Engine options, applied after the partition count so they can override it
    pub options: BTreeMap<String, String>,
    pub memory_limit: Option<usize>,
    /// Properties without an equivalent
    pub ignored: Vec<String>,
}

impl SessionSettings {
    pub fn from_options(spark: &SparkOptions) -> Result<Self> {
        let mut settings = Self {
            app_name: spark.app_name.clone(),
            target_partitions: parse_master_url(&spark.master_url)?,
            options: BTreeMap::new(),
            memory_limit: None,
            ignored: Vec::new(),
        };

        for (key, value) in &spark.session_properties {
            match translate_property(key, value)? {
                PropertyTarget::Option { key, value } => {
                    settings.options.insert(key, value);
                }
                PropertyTarget::MemoryLimit(bytes) => {
                    // Driver and executor share one pool here; keep the larger
                    settings.memory_limit = Some(settings.memory_limit.map_or(bytes, |m| m.max(bytes)));
                }
                PropertyTarget::Ignored => settings.ignored.push(key.clone()),
            }
        }
        Ok(settings)
    }

    pub fn build_context(&self) -> Result<SessionContext> {
        let mut config = SessionConfig::new().with_target_partitions(self.target_partitions);
        for (key, value) in &self.options {
            config.options_mut().set(key, value)?;
        }

        let mut runtime = RuntimeEnvBuilder::new();
        if let Some(limit) = self.memory_limit {
            runtime = runtime.with_memory_limit(limit, 1.0);
        }

        let state = SessionStateBuilder::new()
            .with_config(config)
            .with_runtime_env(runtime.build_arc()?)
            .with_default_features()
            .build();

        Ok(SessionContext::new_with_state(state))
    }
}
