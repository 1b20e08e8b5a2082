use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use stratus_domain::{AgentVersion, ImageMetadata};

/// Static configuration for one provisioner.
///
/// The retry budget per machine is `retry_count × max(1, zones)` attempts
/// with `retry_delay` between them.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Tag identifying this controller; the first half of every nonce.
    pub controller_tag: String,
    /// Agent binary version to look up for new instances.
    pub agent_version: AgentVersion,
    /// Start attempts per availability zone (or in total, without zones).
    pub retry_count: u32,
    /// Pause between start attempts.
    pub retry_delay: Duration,
    /// Period of the transient-error retry tick.
    pub retry_tick: Duration,
    /// Controller configuration snapshot embedded in each instance config.
    pub controller_config: HashMap<String, Value>,
    /// Model-wide image metadata passed through to the provider.
    pub image_metadata: Vec<ImageMetadata>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            controller_tag: "controller-0".to_string(),
            agent_version: AgentVersion::new(2, 9, 0),
            retry_count: 3,
            retry_delay: Duration::from_secs(10),
            retry_tick: Duration::from_secs(30),
            controller_config: HashMap::new(),
            image_metadata: Vec::new(),
        }
    }
}
