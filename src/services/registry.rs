use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{ControllerError, Result};
use crate::models::{Capabilities, ConnectionConfig, DatabaseKind, SessionState};
use crate::services::database::{create_controller, DbController};

/// Controller handle shared between callers; the mutex serializes use of its single connection
pub type SharedController = Arc<Mutex<Box<dyn DbController>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ControllerId(Uuid);

impl ControllerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ControllerError::InvalidInput(format!("Invalid controller id {:?}: {}", s, e)))
    }
}

impl Default for ControllerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Entry {
    name: String,
    kind: DatabaseKind,
    masked_url: String,
    capabilities: Capabilities,
    controller: SharedController,
}

/// Listing row for one registered controller
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSummary {
    pub id: ControllerId,
    pub name: String,
    pub kind: DatabaseKind,
    pub url: String,
    /// `None` while another caller holds the controller
    pub state: Option<SessionState>,
    pub capabilities: Capabilities,
}

/// Explicit owner of every live controller in the process.
///
/// Cloning yields another handle to the same set.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    entries: Arc<RwLock<HashMap<ControllerId, Entry>>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a controller for `config` and register it under `name`
    pub async fn open(&self, name: &str, config: ConnectionConfig) -> Result<(ControllerId, SharedController)> {
        let masked_url = config.masked_url();
        let controller = create_controller(config)?;
        let id = self.register(name, controller, masked_url).await?;
        let shared = self.get(id).await?;
        Ok((id, shared))
    }

    /// Register an already built controller
    pub async fn register(
        &self,
        name: &str,
        controller: Box<dyn DbController>,
        masked_url: String,
    ) -> Result<ControllerId> {
        let mut entries = self.entries.write().await;
        if entries.values().any(|entry| entry.name == name) {
            return Err(ControllerError::AlreadyExists(format!("controller {}", name)));
        }

        let id = ControllerId::new();
        tracing::info!(
            "Registered {} controller {} ({}) for {}",
            controller.kind(),
            name,
            id,
            masked_url
        );
        entries.insert(
            id,
            Entry {
                name: name.to_string(),
                kind: controller.kind(),
                masked_url,
                capabilities: controller.capabilities(),
                controller: Arc::new(Mutex::new(controller)),
            },
        );
        Ok(id)
    }

    pub async fn get(&self, id: ControllerId) -> Result<SharedController> {
        let entries = self.entries.read().await;
        entries
            .get(&id)
            .map(|entry| entry.controller.clone())
            .ok_or_else(|| ControllerError::InvalidInput(format!("Unknown controller {}", id)))
    }

    pub async fn find_by_name(&self, name: &str) -> Option<(ControllerId, SharedController)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, entry)| (*id, entry.controller.clone()))
    }

    /// Summaries sorted by name. Never waits on a busy controller.
    pub async fn list(&self) -> Vec<ControllerSummary> {
        let entries = self.entries.read().await;
        let mut summaries: Vec<ControllerSummary> = entries
            .iter()
            .map(|(id, entry)| {
                let state = entry
                    .controller
                    .try_lock()
                    .ok()
                    .map(|controller| controller.session_info().state);
                ControllerSummary {
                    id: *id,
                    name: entry.name.clone(),
                    kind: entry.kind,
                    url: entry.masked_url.clone(),
                    state,
                    capabilities: entry.capabilities,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Close the controller and forget it. Returns false for an unknown id.
    pub async fn remove(&self, id: ControllerId) -> Result<bool> {
        let entry = {
            let mut entries = self.entries.write().await;
            entries.remove(&id)
        };
        let Some(entry) = entry else {
            return Ok(false);
        };

        entry.controller.lock().await.close().await?;
        tracing::info!("Closed and removed controller {} ({})", entry.name, id);
        Ok(true)
    }

    /// Close every controller, returning how many closed cleanly
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(ControllerId, Entry)> = {
            let mut entries = self.entries.write().await;
            entries.drain().collect()
        };

        let results = join_all(drained.into_iter().map(|(id, entry)| async move {
            let result = entry.controller.lock().await.close().await;
            (id, entry.name, result)
        }))
        .await;

        let mut closed = 0;
        for (id, name, result) in results {
            match result {
                Ok(()) => closed += 1,
                Err(e) => tracing::error!("Failed to close controller {} ({}): {}", name, id, e),
            }
        }
        tracing::info!("Closed {} controller(s)", closed);
        closed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fetch, Operation};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = ControllerRegistry::new();
        assert_eq!(registry.len().await, 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_open_and_lookup() {
        let registry = ControllerRegistry::new();
        let (id, controller) = registry.open("spark", ConnectionConfig::spark("stats")).await.unwrap();

        assert_eq!(registry.len().await, 1);
        assert!(Arc::ptr_eq(&controller, &registry.get(id).await.unwrap()));

        let (found, _) = registry.find_by_name("spark").await.unwrap();
        assert_eq!(found, id);
        assert!(registry.find_by_name("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = ControllerRegistry::new();
        assert_ok!(registry.open("a", ConnectionConfig::spark("x")).await.map(|(id, _)| id));
        let err = assert_err!(registry.open("a", ConnectionConfig::spark("y")).await.map(|(id, _)| id));
        assert!(matches!(err, ControllerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_shared_controller_serializes_callers() {
        let registry = ControllerRegistry::new();
        let (_, controller) = registry.open("spark", ConnectionConfig::spark("x")).await.unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    let mut controller = controller.lock().await;
                    controller
                        .execute(&format!("SELECT {}", i), Fetch::Rows)
                        .await
                        .map(|result| result.map(|r| r.len()))
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), Some(1));
        }
        assert_eq!(controller.lock().await.session_info().connect_count, 1);
    }

    #[tokio::test]
    async fn test_list_reports_state_and_capabilities() {
        let registry = ControllerRegistry::new();
        registry.open("pg", ConnectionConfig::postgres("x")).await.unwrap();
        let (_, spark) = registry.open("spark", ConnectionConfig::spark("x")).await.unwrap();
        spark.lock().await.connect_if_loss().await.unwrap();

        let summaries = registry.list().await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "pg");
        assert_eq!(summaries[0].state, Some(SessionState::Idle));
        assert!(summaries[0].capabilities.supports(Operation::CreateIndex));
        assert_eq!(summaries[1].state, Some(SessionState::Connected));

        let _busy = spark.lock().await;
        let summaries = registry.list().await;
        assert_eq!(summaries[1].state, None);
        assert!(summaries[1].capabilities.supports(Operation::SetHint));
    }

    #[tokio::test]
    async fn test_remove_closes_controller() {
        let registry = ControllerRegistry::new();
        let (id, controller) = registry.open("spark", ConnectionConfig::spark("x")).await.unwrap();
        controller.lock().await.connect_if_loss().await.unwrap();

        assert!(registry.remove(id).await.unwrap());
        assert!(!registry.remove(id).await.unwrap());
        assert_eq!(controller.lock().await.session_info().state, SessionState::Closed);
        assert!(registry.get(id).await.is_err());
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ControllerRegistry::new();
        for name in ["a", "b", "c"] {
            registry.open(name, ConnectionConfig::spark(name)).await.unwrap();
        }
        assert_eq!(registry.close_all().await, 3);
        assert!(registry.is_empty().await);
        assert_eq!(registry.close_all().await, 0);
    }

    #[test]
    fn test_controller_id_parse() {
        let id = ControllerId::new();
        assert_eq!(ControllerId::parse(&id.to_string()).unwrap(), id);
        assert!(matches!(
            ControllerId::parse("not-a-uuid"),
            Err(ControllerError::InvalidInput(_))
        ));
    }
}
