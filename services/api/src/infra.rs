use metrics_exporter_prometheus::PrometheusHandle;
use scholarship_allocation::allocation::{
    AllocationEngine, AllocationNotice, InMemoryAllocationStore, NotificationError,
    NotificationSink, SeedCatalog,
};
use scholarship_allocation::config::AllocationConfig;
use scholarship_allocation::error::AppError;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type ServiceEngine =
    AllocationEngine<InMemoryAllocationStore, InMemoryAllocationStore, TracingNotificationSink>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Emits allocation notices as structured log events for the notification relay to pick up.
#[derive(Default, Clone, Copy)]
pub(crate) struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn publish(&self, notice: AllocationNotice) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(&notice)
            .map_err(|err| NotificationError::Transport(err.to_string()))?;
        info!(template = notice.template(), %payload, "allocation notice");
        Ok(())
    }
}

/// In-memory store, preloaded from the configured seed catalog when one is set.
pub(crate) fn build_store(
    config: &AllocationConfig,
) -> Result<Arc<InMemoryAllocationStore>, AppError> {
    let store = Arc::new(InMemoryAllocationStore::new());
    if let Some(path) = &config.seed_path {
        let catalog = SeedCatalog::from_path(path)?;
        catalog.load_into(&store)?;
    }
    Ok(store)
}

pub(crate) fn build_engine(config: &AllocationConfig) -> Result<Arc<ServiceEngine>, AppError> {
    let store = build_store(config)?;
    Ok(Arc::new(AllocationEngine::new(
        store.clone(),
        store,
        Arc::new(TracingNotificationSink),
        config,
    )))
}
