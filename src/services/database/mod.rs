// Database controllers: one uniform contract over each supported engine
pub mod classifier;
pub mod controller;
pub mod mysql;
pub mod postgresql;
pub mod session;
pub mod spark;

pub use classifier::{DriverFailure, ErrorClassifier, FailureClass, SqlStateClassifier, SubstringClassifier};
pub use controller::DbController;
pub use mysql::MySQLController;
pub use postgresql::PostgreSQLController;
pub use session::Session;
pub use spark::SparkSQLController;

use crate::error::Result;
use crate::models::{ConnectionConfig, DatabaseKind};

/// Factory function to create the controller for `config.kind`.
///
/// No connection is opened; the first operation (or `connect_if_loss`) does that.
pub fn create_controller(config: ConnectionConfig) -> Result<Box<dyn DbController>> {
    tracing::debug!("Creating {} controller for {}", config.kind, config.masked_url());
    match config.kind {
        DatabaseKind::PostgreSql => Ok(Box::new(PostgreSQLController::new(config)?)),
        DatabaseKind::MySql => Ok(Box::new(MySQLController::new(config)?)),
        DatabaseKind::SparkSql => Ok(Box::new(SparkSQLController::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use crate::models::{Operation, SessionState, SparkOptions};

    #[test]
    fn test_factory_picks_backend() {
        for kind in [DatabaseKind::PostgreSql, DatabaseKind::MySql, DatabaseKind::SparkSql] {
            let controller = create_controller(ConnectionConfig::new(kind)).unwrap();
            assert_eq!(controller.kind(), kind);
            assert_eq!(controller.session_info().state, SessionState::Idle);
        }
    }

    #[test]
    fn test_capabilities_differ_per_backend() {
        let pg = create_controller(ConnectionConfig::postgres("x")).unwrap();
        let mysql = create_controller(ConnectionConfig::mysql("x")).unwrap();
        let spark = create_controller(ConnectionConfig::spark("x")).unwrap();

        assert!(Operation::ALL.iter().all(|op| pg.supports(*op)));
        assert!(mysql.supports(Operation::ExplainPhysicalPlan));
        assert!(!mysql.supports(Operation::SetHint));
        assert!(spark.supports(Operation::SetHint));
        assert!(!spark.supports(Operation::CreateIndex));
    }

    #[test]
    fn test_factory_rejects_bad_spark_master() {
        let config = ConnectionConfig::spark("x").with_spark(SparkOptions {
            master_url: "mesos://host:5050".to_string(),
            ..SparkOptions::default()
        });
        assert!(matches!(create_controller(config), Err(ControllerError::Internal(_))));
    }
}
