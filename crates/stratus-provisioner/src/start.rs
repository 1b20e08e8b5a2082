use std::sync::Arc;

use async_trait::async_trait;
use stratus_broker::{
    InstanceBroker, InstanceConfig, StartInstanceParams, StartInstanceResult, StatusReporter,
};
use stratus_domain::{InstanceId, InstanceStatus, MachineId, ZoneName};
use stratus_store::{InstanceInfo, MachineState, MachineStore};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AuthenticationProvider;
use crate::config::ProvisionerConfig;
use crate::error::ProvisionerError;
use crate::retry::RetryState;
use crate::task::with_cancel;
use crate::tools::{ToolsError, ToolsFinder};
use crate::zones::ZoneTracker;

/// Mint the witness nonce for one provisioning: the controller tag and a
/// fresh v4 UUID, colon-separated. Both halves must be present.
pub fn machine_nonce(controller_tag: &str) -> Result<String, ProvisionerError> {
    if controller_tag.is_empty() {
        return Err(ProvisionerError::Internal("controller tag is empty".into()));
    }
    Ok(format!("{}:{}", controller_tag, Uuid::new_v4()))
}

/// Reports interim instance status into the store; failures are logged and
/// swallowed so status reporting never fails a start.
struct StoreStatusReporter {
    store: Arc<dyn MachineStore>,
    machine_id: MachineId,
}

#[async_trait]
impl StatusReporter for StoreStatusReporter {
    async fn report(&self, status: InstanceStatus, message: &str) {
        if let Err(err) = self
            .store
            .set_instance_status(&self.machine_id, status, message, false)
            .await
        {
            warn!(
                machine_id = %self.machine_id,
                error = %err,
                "reporting instance status failed"
            );
        }
    }
}

/// One pending machine's start task. Spawned per machine per cycle; the
/// supervisory task joins all workers before the cycle ends.
pub(crate) struct StartWorker {
    pub(crate) store: Arc<dyn MachineStore>,
    pub(crate) broker: Arc<dyn InstanceBroker>,
    pub(crate) tools_finder: Arc<dyn ToolsFinder>,
    pub(crate) auth: Arc<dyn AuthenticationProvider>,
    pub(crate) zones: Option<Arc<RwLock<ZoneTracker>>>,
    pub(crate) config: ProvisionerConfig,
    pub(crate) machine: MachineState,
    /// Zone chosen by the distribution pass; absent for machines with an
    /// explicit placement or when no failure-free zone existed.
    pub(crate) assigned_zone: Option<ZoneName>,
    pub(crate) zone_count: usize,
    pub(crate) group: Vec<MachineId>,
    pub(crate) group_instances: Vec<InstanceId>,
    pub(crate) dying: watch::Receiver<bool>,
}

impl StartWorker {
    pub(crate) async fn run(mut self) -> (MachineId, Result<(), ProvisionerError>) {
        let id = self.machine.machine.id.clone();
        let result = self.provision().await;
        if let Err(err) = &result {
            if !matches!(err, ProvisionerError::Cancelled) {
                let transient = matches!(
                    err,
                    ProvisionerError::Broker(broker_err) if broker_err.is_retryable()
                );
                if let Err(status_err) = self
                    .store
                    .set_instance_status(
                        &id,
                        InstanceStatus::ProvisioningError,
                        &err.to_string(),
                        transient,
                    )
                    .await
                {
                    warn!(
                        machine_id = %id,
                        error = %status_err,
                        "recording provisioning error failed"
                    );
                }
            }
        }
        (id, result)
    }

    fn placement(&self) -> Option<String> {
        match (&self.machine.machine.placement, &self.assigned_zone) {
            // An explicit placement always wins and passes through verbatim.
            (Some(placement), _) => Some(placement.to_string()),
            (None, Some(zone)) => Some(format!("zone={}", zone)),
            (None, None) => None,
        }
    }

    async fn provision(&mut self) -> Result<(), ProvisionerError> {
        let machine = self.machine.clone();
        let id = machine.machine.id.clone();

        let reporter = Arc::new(StoreStatusReporter {
            store: self.store.clone(),
            machine_id: id.clone(),
        });
        reporter.report(InstanceStatus::Provisioning, "starting instance").await;

        let credentials =
            with_cancel(&self.dying, self.auth.setup_authentication(&machine)).await??;
        let arch = machine.machine.constraints.arch.clone();
        let tools = with_cancel(
            &self.dying,
            self.tools_finder.find_tools(
                &self.config.agent_version,
                &machine.machine.series,
                arch.as_deref(),
            ),
        )
        .await??;
        let selected = tools.first().cloned().ok_or_else(|| ToolsError::NoMatch {
            version: self.config.agent_version.clone(),
            series: machine.machine.series.clone(),
            arch: arch.clone(),
        })?;

        let nonce = machine_nonce(&self.config.controller_tag)?;
        let instance_config = InstanceConfig::new(
            id.clone(),
            nonce.clone(),
            machine.machine.series.clone(),
            machine.machine.jobs.clone(),
            selected,
            credentials.store_info,
            credentials.api_info,
            self.config.controller_config.clone(),
        )?;

        let mut retry =
            RetryState::new(self.config.retry_count, self.zone_count, self.config.retry_delay);
        loop {
            let placement = self.placement();
            let peers = self.group_instances.clone();
            let params = StartInstanceParams {
                controller_tag: self.config.controller_tag.clone(),
                machine_id: id.clone(),
                constraints: machine.machine.constraints.clone(),
                tools: tools.clone(),
                instance_config: instance_config.clone(),
                placement: placement.clone(),
                distribution_group: Some(Arc::new(move || peers.clone())),
                volumes: machine.machine.volumes.clone(),
                volume_attachments: machine.machine.volume_attachments.clone(),
                subnets_to_zones: machine.machine.subnets_to_zones.clone(),
                endpoint_bindings: machine.machine.endpoint_bindings.clone(),
                image_metadata: self.config.image_metadata.clone(),
                status_reporter: Some(reporter.clone()),
            };

            match with_cancel(&self.dying, self.broker.start_instance(params)).await? {
                Ok(result) => {
                    return self.record_started(&id, result, &nonce, reporter.as_ref()).await
                }
                Err(err) => {
                    warn!(
                        machine_id = %id,
                        attempt = retry.attempt(),
                        placement = placement.as_deref().unwrap_or(""),
                        error = %err,
                        "start instance attempt failed"
                    );
                    let failed_zone = self.assigned_zone.clone();
                    retry.record_failure(err.to_string(), failed_zone.clone());
                    if !err.is_retryable() || retry.exhausted() {
                        return Err(err.into());
                    }
                    if let (Some(zone), false) = (failed_zone, err.is_zone_independent()) {
                        if let Some(tracker) = &self.zones {
                            let mut tracker = tracker.write().await;
                            match tracker.retry_zone(&id, &zone, &self.group) {
                                Some(next_zone) => {
                                    debug!(
                                        machine_id = %id,
                                        zone = %next_zone,
                                        "rotating to a new availability zone"
                                    );
                                    self.assigned_zone = Some(next_zone);
                                }
                                None => {
                                    // No failure-free zone remains; fold into
                                    // the ordinary terminal start failure.
                                    warn!(
                                        machine_id = %id,
                                        "no availability zone alternative remains"
                                    );
                                    return Err(err.into());
                                }
                            }
                        }
                    }
                    retry.wait(&mut self.dying).await?;
                }
            }
        }
    }

    async fn record_started(
        &self,
        id: &MachineId,
        result: StartInstanceResult,
        nonce: &str,
        reporter: &dyn StatusReporter,
    ) -> Result<(), ProvisionerError> {
        let hardware = result.hardware.clone().or_else(|| result.instance.hardware.clone());
        let info = InstanceInfo {
            instance_id: result.instance.id.clone(),
            nonce: nonce.to_string(),
            hardware,
            network_config: result.network_info,
            volumes: result.volumes,
            volume_attachments: result.volume_attachments,
        };
        if let Err(err) = self.store.set_instance_info(id, &info).await {
            warn!(
                machine_id = %id,
                instance_id = %info.instance_id,
                error = %err,
                "recording instance info failed; stopping the instance"
            );
            // Best-effort stop; the instance is unrecorded and would leak.
            if let Err(stop_err) = self.broker.stop_instances(&[info.instance_id.clone()]).await {
                warn!(
                    instance_id = %info.instance_id,
                    error = %stop_err,
                    "stopping unrecorded instance failed"
                );
            }
            return Err(err.into());
        }
        reporter.report(InstanceStatus::Running, "").await;
        info!(
            machine_id = %id,
            instance_id = %info.instance_id,
            "machine provisioned"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_has_tag_and_uuid_halves() {
        let nonce = machine_nonce("controller-7").unwrap();
        let (tag, uuid) = nonce.split_once(':').unwrap();
        assert_eq!(tag, "controller-7");
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid.matches('-').count(), 4);
    }

    #[test]
    fn nonces_are_unique() {
        let a = machine_nonce("controller-0").unwrap();
        let b = machine_nonce("controller-0").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_controller_tag_is_rejected() {
        assert!(machine_nonce("").is_err());
    }
}
