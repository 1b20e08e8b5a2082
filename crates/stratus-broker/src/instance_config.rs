use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratus_domain::{AgentTools, MachineId, MachineJob};

use crate::error::BrokerError;

/// Connection details for the authoritative state backend, minted per
/// machine by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConnectInfo {
    pub addrs: Vec<String>,
    pub ca_cert: String,
    pub tag: String,
    pub password: String,
}

/// Connection details for the controller API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConnectInfo {
    pub addrs: Vec<String>,
    pub ca_cert: String,
    pub tag: String,
    pub password: String,
}

/// The boot payload handed to the provider for a new instance: everything the
/// machine agent needs to come up and authenticate itself exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub machine_id: MachineId,
    /// Witness string of the form `<controller-tag>:<uuid>`. The same value
    /// is written back to the machine record so the agent's first connection
    /// can be matched to this provisioning.
    pub nonce: String,
    pub series: String,
    pub jobs: Vec<MachineJob>,
    pub tools: AgentTools,
    pub store_info: StoreConnectInfo,
    pub api_info: ApiConnectInfo,
    pub controller_config: HashMap<String, Value>,
}

impl InstanceConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine_id: MachineId,
        nonce: String,
        series: String,
        jobs: Vec<MachineJob>,
        tools: AgentTools,
        store_info: StoreConnectInfo,
        api_info: ApiConnectInfo,
        controller_config: HashMap<String, Value>,
    ) -> Result<Self, BrokerError> {
        // Both halves of the nonce must be present.
        match nonce.split_once(':') {
            Some((tag, uuid)) if !tag.is_empty() && !uuid.is_empty() => {}
            _ => {
                return Err(BrokerError::InvalidInstanceConfig(format!(
                    "malformed nonce {:?} for machine {}",
                    nonce, machine_id
                )))
            }
        }
        if series.is_empty() {
            return Err(BrokerError::InvalidInstanceConfig(format!(
                "empty series for machine {}",
                machine_id
            )));
        }
        Ok(Self {
            machine_id,
            nonce,
            series,
            jobs,
            tools,
            store_info,
            api_info,
            controller_config,
        })
    }
}
