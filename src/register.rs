//! Builds the workflow registry from configuration.

use std::sync::Arc;

use tracing::{info, warn};

use flowchain_config::{Config, StoreBackend};
use flowchain_core::{ChainExecutor, ExecutionStore, MemoryExecutionStore, WorkflowRegistry};
use flowchain_store::FileExecutionStore;

use crate::demo;

/// Executor with the configured store and step timeout, plus the demo workflows.
pub(crate) async fn build_registry(config: &Config) -> Result<WorkflowRegistry, Box<dyn std::error::Error>> {
    let mut executor = ChainExecutor::new();
    if let Some(timeout) = config.engine.default_step_timeout() {
        executor = executor.with_default_step_timeout(timeout);
    }

    if config.engine.persist {
        executor = executor.with_store(create_store(config).await?);
    } else {
        warn!("Persistence disabled; suspended executions cannot be resumed by id");
    }

    let registry = WorkflowRegistry::new(executor);
    for workflow in demo::workflows()? {
        registry.register(workflow);
    }
    info!("Registered {} workflows", registry.workflows().len());
    Ok(registry)
}

async fn create_store(config: &Config) -> Result<Arc<dyn ExecutionStore>, Box<dyn std::error::Error>> {
    match config.store.backend() {
        Some(StoreBackend::File) => {
            let store = FileExecutionStore::new(&config.store.path)
                .await?
                .with_retention(config.store.max_records_per_workflow);
            info!("Using file execution store at {:?}", config.store.path);
            Ok(Arc::new(store))
        }
        Some(StoreBackend::Memory) => {
            info!("Using in-memory execution store");
            Ok(Arc::new(MemoryExecutionStore::new()))
        }
        None => Err(format!("unknown store backend '{}'", config.store.backend).into()),
    }
}
