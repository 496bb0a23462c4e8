//! Process-wide registry of running async actualizers.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use strata_core::{AppName, PartitionId, QName};

use crate::actualizers::{ActualizerServices, AsyncActualizer, ErrorSink, default_error_sink};
use crate::config::ActualizerConfig;
use crate::partitions::{BorrowError, ProcessorKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("actualizer {projector} [{partition}] of {app} is already running")]
    AlreadyRunning {
        app: AppName,
        partition: PartitionId,
        projector: QName,
    },

    #[error("supervisor is shut down")]
    ShutDown,

    #[error(transparent)]
    Borrow(#[from] BorrowError),
}

/// Identity of one async actualizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActualizerKey {
    pub app: AppName,
    pub partition: PartitionId,
    pub projector: QName,
}

struct RunningActualizer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Starts, stops and tracks the async actualizers of a process.
///
/// Each actualizer runs as one task with its own retry loop. At most one
/// task exists per [`ActualizerKey`]; a key can be deployed again only after
/// its previous task was undeployed and joined.
pub struct ActualizerSupervisor {
    services: ActualizerServices,
    config: ActualizerConfig,
    error_sink: ErrorSink,
    root: CancellationToken,
    tracker: TaskTracker,
    running: Mutex<HashMap<ActualizerKey, RunningActualizer>>,
}

impl ActualizerSupervisor {
    pub fn new(services: ActualizerServices, config: ActualizerConfig) -> Self {
        Self {
            services,
            config: config.normalized(),
            error_sink: default_error_sink(),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = sink;
        self
    }

    /// Start an actualizer for every async projector of `app` in `partition`.
    ///
    /// Returns the projectors started. Nothing is started if any of them is
    /// already running.
    pub async fn deploy(
        &self,
        app: &AppName,
        partition: PartitionId,
    ) -> Result<Vec<QName>, SupervisorError> {
        if self.root.is_cancelled() {
            return Err(SupervisorError::ShutDown);
        }

        let projectors: Vec<QName> = {
            let borrowed = self
                .services
                .partitions
                .borrow(app, partition, ProcessorKind::Actualizer)
                .await?;
            borrowed
                .app_state()
                .definition()
                .async_projectors()
                .map(|p| p.name().clone())
                .collect()
        };

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<ActualizerKey> = projectors
            .iter()
            .map(|projector| ActualizerKey {
                app: app.clone(),
                partition,
                projector: projector.clone(),
            })
            .collect();
        if let Some(key) = keys.iter().find(|key| running.contains_key(key)) {
            return Err(SupervisorError::AlreadyRunning {
                app: key.app.clone(),
                partition: key.partition,
                projector: key.projector.clone(),
            });
        }

        for key in keys {
            let actualizer = AsyncActualizer::new(
                key.app.clone(),
                key.partition,
                key.projector.clone(),
                self.services.clone(),
                self.config.clone(),
            )
            .with_error_sink(self.error_sink.clone());
            let cancel = self.root.child_token();
            let token = cancel.clone();
            let handle = self
                .tracker
                .spawn(async move { actualizer.run(token).await });
            running.insert(key, RunningActualizer { cancel, handle });
        }

        info!(app = %app, partition = %partition, actualizers = projectors.len(), "actualizers deployed");
        Ok(projectors)
    }

    /// Stop the actualizers of one partition and wait until they exited.
    pub async fn undeploy(&self, app: &AppName, partition: PartitionId) {
        let stopped: Vec<(ActualizerKey, RunningActualizer)> = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let keys: Vec<ActualizerKey> = running
                .keys()
                .filter(|key| key.app == *app && key.partition == partition)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| running.remove(&key).map(|r| (key, r)))
                .collect()
        };

        for (_, actualizer) in &stopped {
            actualizer.cancel.cancel();
        }
        for (key, actualizer) in stopped {
            if let Err(err) = actualizer.handle.await {
                warn!(projector = %key.projector, partition = %key.partition, error = %err, "actualizer task failed");
            }
        }
        info!(app = %app, partition = %partition, "actualizers undeployed");
    }

    pub fn is_running(&self, key: &ActualizerKey) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn running_count(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancel every actualizer and wait for all of them to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("actualizer supervisor stopped");
    }
}
