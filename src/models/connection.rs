use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::ControllerError;
use crate::models::HintValue;

/// Marker a pulling collaborator raises inside the engine to stop a statement early
pub const DEFAULT_PULL_END_MARKER: &str = "PilotScopePullEnd";

/// Database engine behind a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DatabaseKind {
    #[serde(rename = "postgresql", alias = "postgres")]
    PostgreSql,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "spark", alias = "sparksql")]
    SparkSql,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::PostgreSql => "postgresql",
            DatabaseKind::MySql => "mysql",
            DatabaseKind::SparkSql => "spark",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseKind::PostgreSql => 5432,
            DatabaseKind::MySql => 3306,
            // The SparkSQL session is in-process; the port only matters for its data source
            DatabaseKind::SparkSql => 5432,
        }
    }

    pub fn default_user(&self) -> &'static str {
        match self {
            DatabaseKind::PostgreSql | DatabaseKind::SparkSql => "postgres",
            DatabaseKind::MySql => "root",
        }
    }

    fn url_scheme(&self) -> &'static str {
        match self {
            DatabaseKind::PostgreSql => "postgresql",
            DatabaseKind::MySql => "mysql",
            DatabaseKind::SparkSql => "spark",
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseKind::PostgreSql),
            "mysql" | "mariadb" => Ok(DatabaseKind::MySql),
            "spark" | "sparksql" => Ok(DatabaseKind::SparkSql),
            _ => Err(ControllerError::InvalidInput(format!(
                "Unsupported database kind: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters for one controller.
///
/// Owned by the caller; a controller keeps its own copy and never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub kind: DatabaseKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub create_database_if_missing: bool,
    /// Log every statement sent to the engine
    #[serde(default)]
    pub echo: bool,
    #[serde(default = "default_pull_end_marker")]
    pub pull_end_marker: String,
    #[serde(default)]
    pub postgres: PostgresOptions,
    #[serde(default)]
    pub spark: SparkOptions,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_database() -> String {
    "stats_tiny".to_string()
}

fn default_statement_timeout_ms() -> u64 {
    300_000
}

fn default_true() -> bool {
    true
}

fn default_pull_end_marker() -> String {
    DEFAULT_PULL_END_MARKER.to_string()
}

impl ConnectionConfig {
    pub fn new(kind: DatabaseKind) -> Self {
        Self {
            kind,
            host: default_host(),
            port: None,
            database: default_database(),
            user: None,
            password: None,
            statement_timeout_ms: default_statement_timeout_ms(),
            create_database_if_missing: true,
            echo: false,
            pull_end_marker: default_pull_end_marker(),
            postgres: PostgresOptions::default(),
            spark: SparkOptions::default(),
        }
    }

    pub fn postgres(database: impl Into<String>) -> Self {
        Self::new(DatabaseKind::PostgreSql).with_database(database)
    }

    pub fn mysql(database: impl Into<String>) -> Self {
        Self::new(DatabaseKind::MySql).with_database(database)
    }

    pub fn spark(database: impl Into<String>) -> Self {
        Self::new(DatabaseKind::SparkSql).with_database(database)
    }

    /// Parse a `postgresql://`, `mysql://` or `spark://` URL
    pub fn from_url(connection_url: &str) -> Result<Self, ControllerError> {
        let url = Url::parse(connection_url)
            .map_err(|e| ControllerError::InvalidInput(format!("Invalid connection URL: {}", e)))?;

        let kind = url.scheme().parse::<DatabaseKind>()?;
        let mut config = Self::new(kind);

        if let Some(host) = url.host_str() {
            config.host = host.to_string();
        }
        config.port = url.port();
        if !url.username().is_empty() {
            config.user = Some(url.username().to_string());
        }
        config.password = url.password().map(|p| p.to_string());

        let database = url.path().trim_start_matches('/');
        if !database.is_empty() {
            config.database = database.to_string();
        }

        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_simulated_indexes(mut self, enabled: bool) -> Self {
        self.postgres.simulate_index = enabled;
        self
    }

    pub fn with_spark(mut self, spark: SparkOptions) -> Self {
        self.spark = spark;
        self
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.kind.default_port())
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or_else(|| self.kind.default_user())
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    /// Same parameters pointed at another engine kind
    pub fn for_kind(&self, kind: DatabaseKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Full connection URL, including credentials
    pub fn connection_url(&self) -> String {
        let mut url = format!("{}://", self.kind.url_scheme());
        url.push_str(self.user());
        if !self.password().is_empty() {
            url.push(':');
            url.push_str(self.password());
        }
        url.push_str(&format!("@{}:{}/{}", self.host, self.port(), self.database));
        url
    }

    /// Connection URL with the password masked, for logging
    pub fn masked_url(&self) -> String {
        match Url::parse(&self.connection_url()) {
            Ok(parsed) => {
                let mut masked = parsed.clone();
                if parsed.password().is_some() {
                    let _ = masked.set_password(Some("***"));
                }
                masked.to_string()
            }
            Err(_) => "[invalid-url]".to_string(),
        }
    }
}

/// PostgreSQL specific extras
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostgresOptions {
    /// Route index operations through hypothetical (hypopg) indexes
    #[serde(default)]
    pub simulate_index: bool,
}

/// Relational engine a SparkSQL session reads its tables from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    #[serde(alias = "postgres")]
    PostgreSql,
}

/// SparkSQL session extras
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparkOptions {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_master_url")]
    pub master_url: String,
    /// Session properties applied when the session is created
    #[serde(default)]
    pub session_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub datasource: Option<DataSourceKind>,
    /// Tables to load from the data source; empty loads every public table
    #[serde(default)]
    pub datasource_tables: Vec<String>,
}

fn default_app_name() -> String {
    "pilot".to_string()
}

fn default_master_url() -> String {
    "local[*]".to_string()
}

impl Default for SparkOptions {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            master_url: default_master_url(),
            session_properties: BTreeMap::new(),
            datasource: None,
            datasource_tables: Vec::new(),
        }
    }
}

impl SparkOptions {
    pub fn set_session_property(mut self, key: impl Into<String>, value: impl Into<HintValue>) -> Self {
        self.session_properties
            .insert(key.into(), value.into().to_string());
        self
    }

    pub fn set_session_properties<K, V, I>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<HintValue>,
    {
        for (key, value) in properties {
            self.session_properties
                .insert(key.into(), value.into().to_string());
        }
        self
    }

    /// Turn on the cost-based optimizer and join reordering
    pub fn enable_cardinality_estimation(self) -> Self {
        self.set_session_properties([
            ("spark.sql.cbo.enabled", true),
            ("spark.sql.cbo.joinReorder.enabled", true),
        ])
    }

    pub fn use_postgresql_datasource(mut self) -> Self {
        self.datasource = Some(DataSourceKind::PostgreSql);
        self
    }

    pub fn with_datasource_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datasource_tables = tables.into_iter().map(Into::into).collect();
        self
    }
}

/// Lifecycle of the single session a controller owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Never connected
    Idle,
    Connected,
    /// Known-dead; the next operation reconnects
    Lost,
    /// Released for good
    Closed,
}

/// Read-only snapshot of a controller's session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub state: SessionState,
    pub connect_count: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub hints: BTreeMap<String, HintValue>,
}
