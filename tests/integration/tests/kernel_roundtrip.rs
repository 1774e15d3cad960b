//! Real-kernel round trip: create a namespace, hand its descriptor off over
//! the control socket, enter it on a pinned worker, and compare what the
//! worker sees with the recorded configuration result.
//!
//! Requires root (CAP_SYS_ADMIN + CAP_NET_ADMIN); skips otherwise.

use netward_broker::{AccessBroker, BrokerClient, NetnsConsumer};
use netward_core::config::{BrokerConfig, ConsumerConfig};
use netward_core::{ConfigResult, LifecycleState};
use netward_integration_tests::{init_tracing, unique_id, MockPlugin, Trace};
use netward_lifecycle::{LifecycleManager, PluginOptions};
use netward_netns::{iface, HostNetns};
use std::sync::Arc;

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[tokio::test]
async fn test_enter_namespace_and_list_interfaces() {
    if !is_root() {
        eprintln!("skipping: requires root");
        return;
    }
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let trace: Trace = Default::default();

    // A fresh namespace contains exactly the loopback interface the
    // provider brought up; record that as the expected configuration.
    let plugin = MockPlugin::with_result(
        trace.clone(),
        ConfigResult {
            interfaces: vec!["lo".into()],
            addresses: Vec::new(),
            routes: Vec::new(),
        },
    );
    let manager = Arc::new(LifecycleManager::new(
        Arc::new(HostNetns::new(dir.path().join("netns"))),
        Arc::new(plugin),
        Default::default(),
    ));

    let config = BrokerConfig {
        socket_path: dir.path().join("broker.sock"),
        handoff_timeout_ms: 2_000,
    };
    let consumer = NetnsConsumer::new(
        BrokerClient::from_config(&config),
        &ConsumerConfig::default(),
    );

    let broker = AccessBroker::new(manager.registry(), config);
    let listener = broker.bind().unwrap();
    broker.watch_lifecycle(manager.subscribe());
    tokio::spawn(broker.serve(listener));

    let id = unique_id("kernel");
    manager.create(&id).await.unwrap();
    let recorded = manager
        .configure(&id, PluginOptions::default())
        .await
        .unwrap();
    assert_eq!(manager.get_state(&id).unwrap().state, LifecycleState::Active);

    // Namespace view from inside, via handoff + pinned worker.
    let seen = {
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            consumer.with_namespace(&id, "list-interfaces", iface::interface_names)
        })
        .await
        .unwrap()
        .unwrap()
        .unwrap()
    };
    assert_eq!(seen, recorded.interfaces);

    // The worker restored its original namespace: the host still has more
    // than just loopback (or at least an unchanged view).
    let host_view = iface::interface_names().unwrap();
    assert!(host_view.contains(&"lo".to_string()));

    manager.ack_workloads_stopped(&id).unwrap();
    manager.teardown(&id, PluginOptions::default()).await.unwrap();
    assert!(!dir.path().join("netns").join(id.as_str()).exists());
}
