use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use strata_core::{AppName, PartitionId};

use super::r#trait::{AppState, BorrowError, BorrowedPartition, PartitionBorrower, ProcessorKind};

/// Engines per processor kind, per partition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PartitionEngines {
    pub command: usize,
    pub query: usize,
    pub actualizer: usize,
    pub scheduler: usize,
}

impl PartitionEngines {
    pub fn with_actualizers(mut self, actualizer: usize) -> Self {
        self.actualizer = actualizer;
        self
    }

    fn count(&self, kind: ProcessorKind) -> usize {
        match kind {
            ProcessorKind::Command => self.command,
            ProcessorKind::Query => self.query,
            ProcessorKind::Actualizer => self.actualizer,
            ProcessorKind::Scheduler => self.scheduler,
        }
    }
}

impl Default for PartitionEngines {
    fn default() -> Self {
        Self {
            command: 1,
            query: 10,
            actualizer: 10,
            scheduler: 1,
        }
    }
}

const KINDS: [ProcessorKind; 4] = [
    ProcessorKind::Command,
    ProcessorKind::Query,
    ProcessorKind::Actualizer,
    ProcessorKind::Scheduler,
];

#[derive(Clone)]
struct EnginePool {
    size: usize,
    semaphore: Arc<Semaphore>,
}

struct DeployedApp {
    state: Arc<AppState>,
    pools: HashMap<(PartitionId, ProcessorKind), EnginePool>,
}

/// In-process partition borrower.
///
/// One semaphore per `(app, partition, kind)` models the engine pool; a
/// borrow holds one permit until the partition is released.
#[derive(Default)]
pub struct InMemoryAppPartitions {
    apps: RwLock<HashMap<AppName, DeployedApp>>,
}

impl InMemoryAppPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy an application on the given partitions.
    ///
    /// Redeploying replaces the app state. Engine pools of partitions that
    /// were already deployed are kept, so outstanding borrows stay counted.
    pub fn deploy(
        &self,
        state: AppState,
        partitions: impl IntoIterator<Item = PartitionId>,
        engines: PartitionEngines,
    ) {
        let app = state.definition().app().clone();
        let state = Arc::new(state);
        let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);

        let deployed = apps.entry(app).or_insert_with(|| DeployedApp {
            state: state.clone(),
            pools: HashMap::new(),
        });
        deployed.state = state;

        for partition in partitions {
            for kind in KINDS {
                let size = engines.count(kind);
                deployed
                    .pools
                    .entry((partition, kind))
                    .or_insert_with(|| EnginePool {
                        size,
                        semaphore: Arc::new(Semaphore::new(size)),
                    });
            }
        }
    }

    /// Remove an application. Waiting and future borrows fail.
    pub fn undeploy(&self, app: &AppName) {
        let removed = self
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app);
        if let Some(deployed) = removed {
            for pool in deployed.pools.values() {
                pool.semaphore.close();
            }
        }
    }

    /// Engines of `kind` currently free in `partition`.
    pub fn available_engines(
        &self,
        app: &AppName,
        partition: PartitionId,
        kind: ProcessorKind,
    ) -> Option<usize> {
        self.lookup(app, partition, kind)
            .ok()
            .map(|(_, pool)| pool.semaphore.available_permits())
    }

    fn lookup(
        &self,
        app: &AppName,
        partition: PartitionId,
        kind: ProcessorKind,
    ) -> Result<(Arc<AppState>, EnginePool), BorrowError> {
        let apps = self
            .apps
            .read()
            .map_err(|_| BorrowError::Unavailable("partition table lock poisoned".to_string()))?;
        let deployed = apps
            .get(app)
            .ok_or_else(|| BorrowError::AppNotDeployed(app.clone()))?;
        let pool = deployed
            .pools
            .get(&(partition, kind))
            .ok_or_else(|| BorrowError::PartitionNotDeployed {
                app: app.clone(),
                partition,
            })?;
        Ok((deployed.state.clone(), pool.clone()))
    }
}

#[async_trait]
impl PartitionBorrower for InMemoryAppPartitions {
    async fn borrow(
        &self,
        app: &AppName,
        partition: PartitionId,
        kind: ProcessorKind,
    ) -> Result<BorrowedPartition, BorrowError> {
        let (state, pool) = self.lookup(app, partition, kind)?;
        if pool.size == 0 {
            return Err(BorrowError::NoEngines {
                app: app.clone(),
                partition,
                kind,
            });
        }

        let permit = pool
            .semaphore
            .acquire_owned()
            .await
            .map_err(|_| BorrowError::AppNotDeployed(app.clone()))?;
        Ok(BorrowedPartition::new(state, partition, kind, move || drop(permit)))
    }
}
