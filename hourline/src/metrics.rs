use prometheus::Registry;

use crate::engine::{reconciler, worker};
use crate::Result;
use crate::{publish, rollup, store};

#[tracing::instrument(level = "trace")]
pub fn register_metrics(registry: &Registry) -> Result<()> {
    registry.register(Box::new(reconciler::RECONCILE_PASSES.clone()))?;
    registry.register(Box::new(reconciler::RECONCILE_RUNNING_WORKERS.clone()))?;
    registry.register(Box::new(reconciler::RECONCILE_ERRORS.clone()))?;

    registry.register(Box::new(worker::WORKER_OUTCOMES.clone()))?;
    registry.register(Box::new(worker::WORKER_ERRORS.clone()))?;

    registry.register(Box::new(rollup::AGGREGATE_TIME.clone()))?;
    registry.register(Box::new(rollup::AGGREGATE_ROWS.clone()))?;

    registry.register(Box::new(store::STORE_QUERY_TIME.clone()))?;
    registry.register(Box::new(store::STORE_ERRORS.clone()))?;

    registry.register(Box::new(publish::PUBLISH_ERRORS.clone()))?;

    Ok(())
}
