use std::future::Future;
use std::sync::Arc;

use stratus_broker::InstanceBroker;
use stratus_domain::HarvestMode;
use stratus_store::{retry_ticker, MachineStore};
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use crate::auth::AuthenticationProvider;
use crate::config::ProvisionerConfig;
use crate::error::ProvisionerError;
use crate::registry::Registry;
use crate::tools::ToolsFinder;
use crate::zones::ZoneTracker;

/// Await `fut`, giving up as soon as the dying signal fires. Every blocking
/// wait in the core goes through here so shutdown is never stuck behind a
/// slow provider or store.
pub(crate) async fn with_cancel<T>(
    dying: &watch::Receiver<bool>,
    fut: impl Future<Output = T>,
) -> Result<T, ProvisionerError> {
    let mut dying = dying.clone();
    if *dying.borrow() {
        return Err(ProvisionerError::Cancelled);
    }
    tokio::select! {
        out = fut => Ok(out),
        _ = dying.changed() => Err(ProvisionerError::Cancelled),
    }
}

/// The provisioning control loop.
///
/// One provisioner owns one scope: it watches the store for machine changes,
/// reconciles them against the broker's instances, and converges the two.
/// Per cycle, instance stops strictly precede instance starts; pending
/// machines start in parallel workers joined before the cycle ends.
pub struct Provisioner {
    pub(crate) store: Arc<dyn MachineStore>,
    pub(crate) broker: Arc<dyn InstanceBroker>,
    pub(crate) tools_finder: Arc<dyn ToolsFinder>,
    pub(crate) auth: Arc<dyn AuthenticationProvider>,
    pub(crate) config: ProvisionerConfig,
    pub(crate) harvest_mode: HarvestMode,
    pub(crate) registry: Registry,
    /// Present only when the broker exposes availability zones.
    pub(crate) zones: Option<Arc<RwLock<ZoneTracker>>>,
}

impl Provisioner {
    pub fn new(
        store: Arc<dyn MachineStore>,
        broker: Arc<dyn InstanceBroker>,
        tools_finder: Arc<dyn ToolsFinder>,
        auth: Arc<dyn AuthenticationProvider>,
        config: ProvisionerConfig,
    ) -> Self {
        let zones = broker
            .zoned()
            .is_some()
            .then(|| Arc::new(RwLock::new(ZoneTracker::new())));
        Self {
            store,
            broker,
            tools_finder,
            auth,
            config,
            harvest_mode: HarvestMode::default(),
            registry: Registry::default(),
            zones,
        }
    }

    /// Run until the dying signal fires or a fatal error occurs.
    ///
    /// Fatal: a closed watcher, a failed store bulk read, a failed stop call.
    /// A failed instance listing only skips the cycle; per-machine failures
    /// only mark that machine.
    pub async fn run(
        mut self,
        mut dying: watch::Receiver<bool>,
    ) -> Result<(), ProvisionerError> {
        let mut machine_watcher = self.store.watch_machines().await?;
        let mut harvest_watcher = self.store.watch_harvest_mode().await?;
        let mut retry_watcher = retry_ticker(self.config.retry_tick);

        // The first harvest delivery is the current mode; take it before any
        // machine batch so the first cycle already honors policy.
        self.harvest_mode = harvest_watcher
            .changes()
            .await
            .ok_or(ProvisionerError::WatcherClosed("harvest-mode"))?;
        info!(mode = %self.harvest_mode, "provisioner started");

        loop {
            tokio::select! {
                res = dying.changed() => {
                    if res.is_err() || *dying.borrow() {
                        info!("provisioner shutting down");
                        return Ok(());
                    }
                }
                batch = machine_watcher.changes() => {
                    let ids = batch.ok_or(ProvisionerError::WatcherClosed("machines"))?;
                    match self.process_machines(ids, &dying).await {
                        Ok(()) => {}
                        Err(ProvisionerError::AllInstances(err)) => {
                            warn!(error = %err, "listing instances failed; waiting for the next change");
                        }
                        Err(ProvisionerError::Cancelled) => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }
                mode = harvest_watcher.changes() => {
                    let mode = mode.ok_or(ProvisionerError::WatcherClosed("harvest-mode"))?;
                    if mode != self.harvest_mode {
                        info!(mode = %mode, "harvest mode changed");
                    }
                    self.harvest_mode = mode;
                }
                tick = retry_watcher.changes() => {
                    tick.ok_or(ProvisionerError::WatcherClosed("retry"))?;
                    match self.retry_transient_errors(&dying).await {
                        Ok(()) => {}
                        Err(ProvisionerError::Cancelled) => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }
}
