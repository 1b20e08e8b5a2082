pub mod error;
pub mod memory;
pub mod state;
pub mod store;
pub mod watch;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use state::{
    InstanceInfo, InstanceStatusRecord, MachineState, MachineStatusRecord,
};
pub use store::MachineStore;
pub use watch::{retry_ticker, HarvestWatcher, MachineWatcher, RetryWatcher, Watcher};
