use async_trait::async_trait;
use stratus_broker::{ApiConnectInfo, StoreConnectInfo};
use stratus_domain::MachineId;
use stratus_store::MachineState;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("setting up authentication for machine {0}: {1}")]
    Setup(MachineId, String),
}

/// Per-machine credentials minted immediately before a start. The password
/// travels only inside the instance config; the store never sees it.
#[derive(Debug, Clone)]
pub struct MachineCredentials {
    pub store_info: StoreConnectInfo,
    pub api_info: ApiConnectInfo,
}

#[async_trait]
pub trait AuthenticationProvider: Send + Sync + 'static {
    async fn setup_authentication(
        &self,
        machine: &MachineState,
    ) -> Result<MachineCredentials, AuthError>;
}

/// Credential minting against fixed endpoints, with a fresh random password
/// per machine. Suitable for tests and the local stack.
#[derive(Debug, Clone)]
pub struct LocalAuthProvider {
    store_addrs: Vec<String>,
    api_addrs: Vec<String>,
    ca_cert: String,
}

impl LocalAuthProvider {
    pub fn new(store_addrs: Vec<String>, api_addrs: Vec<String>, ca_cert: String) -> Self {
        Self { store_addrs, api_addrs, ca_cert }
    }
}

#[async_trait]
impl AuthenticationProvider for LocalAuthProvider {
    async fn setup_authentication(
        &self,
        machine: &MachineState,
    ) -> Result<MachineCredentials, AuthError> {
        let tag = format!("machine-{}", machine.machine.id);
        let password = Uuid::new_v4().simple().to_string();
        Ok(MachineCredentials {
            store_info: StoreConnectInfo {
                addrs: self.store_addrs.clone(),
                ca_cert: self.ca_cert.clone(),
                tag: tag.clone(),
                password: password.clone(),
            },
            api_info: ApiConnectInfo {
                addrs: self.api_addrs.clone(),
                ca_cert: self.ca_cert.clone(),
                tag,
                password,
            },
        })
    }
}
