use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use stratus_broker::LocalBroker;
use stratus_domain::{AgentTools, AgentVersion, Machine, ZoneName};
use stratus_provisioner::{
    LocalAuthProvider, Provisioner, ProvisionerConfig, StaticToolsFinder,
};
use stratus_store::InMemoryStore;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Demo daemon: the whole provisioning loop against an in-memory store and a
/// simulated provider. Seeds one machine so a fresh run shows a convergence,
/// then keeps reconciling until ctrl-c.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let store = Arc::new(InMemoryStore::new());
    let broker = Arc::new(LocalBroker::with_zones(vec![
        ZoneName::new("zone-a"),
        ZoneName::new("zone-b"),
        ZoneName::new("zone-c"),
    ]));

    let config = ProvisionerConfig {
        controller_tag: "controller-local".to_string(),
        agent_version: AgentVersion::new(2, 9, 0),
        retry_count: 3,
        retry_delay: Duration::from_secs(2),
        retry_tick: Duration::from_secs(10),
        ..Default::default()
    };
    let tools_finder = Arc::new(StaticToolsFinder::new(vec![AgentTools {
        version: config.agent_version.clone(),
        series: "jammy".to_string(),
        arch: "amd64".to_string(),
        url: "https://tools.local/agent-2.9.0-jammy-amd64.tgz".to_string(),
        sha256: "0c8f1581a5a82f9a737e2c0a704ebbdb5b371128d3c261fee04be79e0a1c04a5".to_string(),
        size: 43_685_888,
    }]));
    let auth = Arc::new(LocalAuthProvider::new(
        vec!["127.0.0.1:37017".to_string()],
        vec!["127.0.0.1:17070".to_string()],
        "local-ca-cert".to_string(),
    ));

    store.add_machine(Machine::bare("0", "jammy")).await;

    let provisioner = Provisioner::new(store.clone(), broker, tools_finder, auth, config);
    let (shutdown, dying) = watch::channel(false);
    let loop_handle = tokio::spawn(provisioner.run(dying));

    info!("stratusd running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    shutdown.send(true)?;
    loop_handle.await??;

    Ok(())
}
