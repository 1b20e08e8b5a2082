pub mod auth;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod start;
pub mod task;
pub mod tools;
pub mod zones;

pub use auth::{AuthError, AuthenticationProvider, LocalAuthProvider, MachineCredentials};
pub use config::ProvisionerConfig;
pub use error::ProvisionerError;
pub use reconcile::{classify_machine, MachineClassification};
pub use registry::Registry;
pub use retry::RetryState;
pub use start::machine_nonce;
pub use task::Provisioner;
pub use tools::{StaticToolsFinder, ToolsError, ToolsFinder};
pub use zones::{ZoneRecord, ZoneTracker};
