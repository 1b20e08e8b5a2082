pub mod broker;
pub mod error;
pub mod instance_config;
pub mod local;

pub use broker::{
    DistributionGroupFn, InstanceBroker, InstanceHandle, MaintainInstanceParams,
    StartInstanceParams, StartInstanceResult, StatusReporter, ZoneAllocation, ZonedBroker,
};
pub use error::BrokerError;
pub use instance_config::{ApiConnectInfo, InstanceConfig, StoreConnectInfo};
pub use local::LocalBroker;
