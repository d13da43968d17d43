//! End-to-end batches through the agent against in-memory backends.

use cfgtxn_agent::tables::LINK_STATE_NOTIFY_EVENT;
use cfgtxn_agent::{
    Agent, AgentConfig, DerivedRead, Platform, PlatformPort, SwitchBackends, Topology,
};
use cfgtxn_backend::{
    AttrCapability, Datastore, DbId, FieldValues, HardwareApi, MemoryCluster, MemoryDatastore,
    MemoryHardware, MemoryStore,
    StoreWrite, TopologyFiles,
};
use cfgtxn_core::{Batch, BatchPhase, BatchReport, Change, TxnError, TxnResult};
use cfgtxn_types::DataPath;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    agent: Arc<Agent>,
    store: Arc<MemoryStore>,
    cluster: Arc<MemoryCluster>,
    datastore: Arc<MemoryDatastore>,
}

fn platform() -> Platform {
    Platform::new(vec![
        PlatformPort {
            port: 1,
            first_lane: 1,
            lane_num: 4,
            speed: 100_000,
            alias_prefix: "Eth1".to_string(),
            index: 1,
        },
        PlatformPort {
            port: 5,
            first_lane: 5,
            lane_num: 4,
            speed: 100_000,
            alias_prefix: "Eth2".to_string(),
            index: 5,
        },
    ])
}

fn initial_files() -> TopologyFiles {
    Topology::compute(&platform(), &BTreeMap::new())
        .unwrap()
        .render(&TopologyFiles::new())
}

fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.counters.settle_secs = 0;
    config.readiness.max_attempts = 5;
    config.readiness.interval_ms = 1;
    config.tasks.poll_interval_ms = 5;
    config
}

async fn harness(cluster: MemoryCluster) -> Harness {
    let store = Arc::new(MemoryStore::new());
    for name in ["Ethernet1_1", "Ethernet2_1"] {
        store.seed(
            DbId::ConfigDb,
            &format!("PORT|{}", name),
            &[
                ("admin_status", "down"),
                ("mtu", "9100"),
                ("fec", "none"),
                ("speed", "100000"),
            ],
        );
    }
    let datastore = Arc::new(
        MemoryDatastore::from_json(json!({
            "interfaces": {"interface": [
                {"name": "Ethernet1_1", "ipv4": {"mtu": "9100"}},
                {"name": "Ethernet2_1", "ipv4": {"mtu": "9100"}}
            ]}
        }))
        .unwrap(),
    );
    let cluster = Arc::new(cluster);
    let agent = Agent::switch(
        SwitchBackends {
            store: store.clone(),
            cluster: cluster.clone(),
            datastore: datastore.clone(),
            platform: Arc::new(platform()),
        },
        &test_config(),
    );
    agent.start().await.unwrap();
    store.clear_writes();

    Harness {
        agent: Arc::new(agent),
        store,
        cluster,
        datastore,
    }
}

/// Delivers pre-commit then commit, and records the edit in the running
/// configuration the way the datastore would.
async fn commit(h: &Harness, id: u64, changes: Vec<Change>) -> TxnResult<BatchReport> {
    let batch = Batch::new(id, BatchPhase::PreCommit, changes);
    h.agent.handle_batch(&batch).await?;
    let report = h.agent.handle_batch(&batch.with_phase(BatchPhase::Commit)).await?;
    for change in &batch.changes {
        if change.is_delete() {
            h.datastore.delete_node(&change.path).unwrap();
        } else {
            h.datastore
                .set_node(&change.path, change.new_value.as_deref())
                .unwrap();
        }
    }
    Ok(report)
}

fn leaf(ifname: &str, leaf: &str) -> DataPath {
    DataPath::parse(&format!("/interfaces/interface[name='{}']/{}", ifname, leaf)).unwrap()
}

fn port(h: &Harness, ifname: &str) -> FieldValues {
    h.store.table(DbId::ConfigDb, &format!("PORT|{}", ifname))
}

fn mtu_writes(h: &Harness) -> Vec<String> {
    h.store
        .writes()
        .into_iter()
        .filter_map(|w| match w {
            StoreWrite::Set { field, value, .. } if field == "mtu" => Some(value),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_out_of_range_then_valid_then_reverted() {
    let h = harness(MemoryCluster::new(initial_files())).await;

    let mtu = leaf("Ethernet1_1", "ipv4/mtu");
    let err = commit(&h, 1, vec![Change::modified(mtu.clone(), "9100", "20000")])
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), TxnError::ConstraintViolation { .. }));
    assert!(h.store.writes().is_empty());

    let report = commit(&h, 2, vec![Change::modified(mtu, "9100", "1500")])
        .await
        .unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(h.store.writes().len(), 1);
    assert_eq!(port(&h, "Ethernet1_1")["mtu"], "1500");

    h.store.clear_writes();
    h.store.fail_writes("PORT|Ethernet2_1", Some("admin_status"));
    let err = commit(
        &h,
        3,
        vec![
            Change::modified(leaf("Ethernet1_1", "ipv4/mtu"), "1500", "9000"),
            Change::modified(leaf("Ethernet2_1", "admin-status"), "down", "up"),
        ],
    )
    .await
    .unwrap_err();

    match &err {
        TxnError::Rejected { index, handler, .. } => {
            assert_eq!(*index, 1);
            assert_eq!(handler, "admin-status");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(matches!(err.root_cause(), TxnError::ApplyFailure { .. }));
    assert_eq!(mtu_writes(&h), vec!["9000".to_string(), "1500".to_string()]);
    assert_eq!(port(&h, "Ethernet1_1")["mtu"], "1500");
    assert_eq!(port(&h, "Ethernet2_1")["admin_status"], "down");
    assert_eq!(h.agent.coordinator().prepared_count(), 0);
}

#[tokio::test]
async fn test_validation_failure_blocks_every_apply() {
    let h = harness(MemoryCluster::new(initial_files())).await;

    let batch = Batch::new(
        1,
        BatchPhase::PreCommit,
        vec![
            Change::modified(leaf("Ethernet1_1", "ipv4/mtu"), "9100", "1500"),
            Change::modified(leaf("Ethernet1_1", "fec"), "none", "bogus"),
        ],
    );
    let err = h.agent.handle_batch(&batch).await.unwrap_err();
    assert!(matches!(err, TxnError::Rejected { index: 1, .. }));
    assert!(err.is_validation());

    let unknown = Batch::new(
        2,
        BatchPhase::PreCommit,
        vec![Change::modified(leaf("Ethernet9_1", "ipv4/mtu"), "9100", "1500")],
    );
    let err = h.agent.handle_batch(&unknown).await.unwrap_err();
    assert!(matches!(err.root_cause(), TxnError::InvalidTarget { .. }));

    assert!(h.store.writes().is_empty());
    assert_eq!(h.agent.coordinator().prepared_count(), 0);
}

#[tokio::test]
async fn test_paired_breakout_fields_restart_once() {
    let h = harness(MemoryCluster::new(initial_files()).with_startup_polls(2)).await;

    commit(&h, 1, vec![Change::created(leaf("Ethernet1_1", "breakout/num-channels"), "4")])
        .await
        .unwrap();
    assert!(h.agent.queue().is_empty());
    assert_eq!(h.cluster.restarts(), 0);
    assert!(h.store.writes().is_empty());

    commit(
        &h,
        2,
        vec![Change::created(leaf("Ethernet1_1", "breakout/channel-speed"), "SPEED_25GB")],
    )
    .await
    .unwrap();
    assert_eq!(h.agent.queue().len(), 1);
    h.agent.queue().drain().await.unwrap();

    assert_eq!(h.cluster.restarts(), 1);
    assert!(!h.agent.state().is_rebooting());
    assert_eq!(port(&h, "Ethernet1_4")["lanes"], "4");
    assert_eq!(port(&h, "Ethernet1_1")["speed"], "25000");

    let DerivedRead::Ready(node) = h.agent.read(&leaf("Ethernet1_1", "breakout")).await.unwrap()
    else {
        panic!("derived state unavailable after restart");
    };
    assert_eq!(node["num-channels"], 4);
    assert_eq!(node["channel-speed"], "SPEED_25GB");

    // Both fields together: still a single cycle.
    commit(
        &h,
        3,
        vec![
            Change::created(leaf("Ethernet2_1", "breakout/num-channels"), "2"),
            Change::created(leaf("Ethernet2_1", "breakout/channel-speed"), "SPEED_50GB"),
        ],
    )
    .await
    .unwrap();
    assert_eq!(h.agent.queue().len(), 1);
    h.agent.queue().drain().await.unwrap();
    assert_eq!(h.cluster.restarts(), 2);
    assert_eq!(port(&h, "Ethernet2_2")["lanes"], "7,8");
}

#[tokio::test]
async fn test_reconcile_twice_is_idempotent() {
    let h = harness(MemoryCluster::new(initial_files())).await;
    let vlan = "/vlan/VLAN/VLAN_LIST[name='Vlan100']";
    commit(
        &h,
        1,
        vec![
            Change::created_node(DataPath::parse(vlan).unwrap()),
            Change::created(DataPath::parse(&format!("{}/vlanid", vlan)).unwrap(), "100"),
            Change::created(
                DataPath::parse(&format!("{}/members[.='Ethernet1_1']", vlan)).unwrap(),
                "Ethernet1_1",
            ),
        ],
    )
    .await
    .unwrap();
    assert_eq!(h.store.table(DbId::ConfigDb, "VLAN|Vlan100")["members@"], "Ethernet1_1");

    let first = h.agent.reconcile().await.unwrap();
    assert_eq!(first.vlans, 1);
    let backend = h.store.dump();
    let interfaces = h.datastore.operational_tree("interfaces").await.unwrap();
    let vlans = h.datastore.operational_tree("vlan").await.unwrap();

    h.store.clear_writes();
    let second = h.agent.reconcile().await.unwrap();
    assert_eq!(second.backend_writes, 0);
    assert!(h.store.writes().is_empty());
    assert_eq!(h.store.dump(), backend);
    assert_eq!(h.datastore.operational_tree("interfaces").await.unwrap(), interfaces);
    assert_eq!(h.datastore.operational_tree("vlan").await.unwrap(), vlans);
    assert_eq!(vlans["VLAN"]["VLAN_LIST"][0]["members"], json!(["Ethernet1_1"]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_are_serialized() {
    let h = harness(MemoryCluster::new(initial_files())).await;

    let tasks: Vec<_> = (0..8u64)
        .map(|i| {
            let agent = h.agent.clone();
            tokio::spawn(async move {
                let mtu = (1500 + i * 100).to_string();
                let batch = Batch::new(
                    100 + i,
                    BatchPhase::PreCommit,
                    vec![Change::modified(leaf("Ethernet1_1", "ipv4/mtu"), "9100", mtu)],
                );
                agent.handle_batch(&batch).await?;
                agent.handle_batch(&batch.with_phase(BatchPhase::Commit)).await
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().applied, 1);
    }

    assert_eq!(mtu_writes(&h).len(), 8);
    let last = mtu_writes(&h).pop().unwrap();
    assert_eq!(port(&h, "Ethernet1_1")["mtu"], last);
    assert_eq!(h.agent.coordinator().prepared_count(), 0);
    assert!(!h.datastore.is_locked("interfaces"));
    assert!(!h.datastore.is_locked("vlan"));
}

#[tokio::test]
async fn test_readiness_timeout_leaves_rebooting() {
    let h = harness(MemoryCluster::new(initial_files()).never_ready()).await;

    commit(
        &h,
        1,
        vec![
            Change::created(leaf("Ethernet1_1", "breakout/num-channels"), "4"),
            Change::created(leaf("Ethernet1_1", "breakout/channel-speed"), "SPEED_25GB"),
        ],
    )
    .await
    .unwrap();
    let err = h.agent.queue().drain().await.unwrap_err();
    assert!(matches!(err, TxnError::BackendUnreachable { .. }));
    assert_eq!(h.cluster.restarts(), 1);
    assert!(h.agent.state().is_rebooting());
    assert_eq!(
        h.agent.read(&leaf("Ethernet1_1", "ipv4/mtu")).await.unwrap(),
        DerivedRead::Unavailable
    );

    // Edits are still validated while the dataplane is down.
    let batch = Batch::new(
        2,
        BatchPhase::PreCommit,
        vec![Change::modified(leaf("Ethernet1_1", "ipv4/mtu"), "9100", "1500")],
    );
    h.agent.handle_batch(&batch).await.unwrap();
}

#[tokio::test]
async fn test_hardware_agent_end_to_end() {
    let hw = Arc::new(MemoryHardware::new());
    hw.add_object("Ethernet1_1", &[("tx-dis", "true"), ("fec-type", "none"), ("mtu", "1500")]);
    hw.set_capability("mtu", AttrCapability::range(1500.0, 9216.0));
    hw.set_capability(
        "fec-type",
        AttrCapability::enumerated(["none", "rs"]).with_default("none"),
    );
    let datastore = Arc::new(
        MemoryDatastore::from_json(json!({
            "interfaces": {"interface": [{"name": "Ethernet1_1", "ipv4": {"mtu": "9000"}}]}
        }))
        .unwrap(),
    );
    let agent = Agent::hardware(hw.clone(), datastore.clone(), &test_config());

    let report = agent.start().await.unwrap();
    assert_eq!(report.interfaces, 1);
    assert_eq!(hw.value("Ethernet1_1", "mtu"), Some("9000".to_string()));

    let batch = Batch::new(
        1,
        BatchPhase::PreCommit,
        vec![
            Change::modified(leaf("Ethernet1_1", "admin-status"), "down", "up"),
            Change::modified(leaf("Ethernet1_1", "fec"), "none", "RS"),
        ],
    );
    agent.handle_batch(&batch).await.unwrap();
    let report = agent.handle_batch(&batch.with_phase(BatchPhase::Commit)).await.unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(hw.value("Ethernet1_1", "tx-dis"), Some("false".to_string()));
    assert_eq!(hw.value("Ethernet1_1", "fec-type"), Some("rs".to_string()));

    let mtu = Batch::new(
        2,
        BatchPhase::PreCommit,
        vec![Change::modified(leaf("Ethernet1_1", "ipv4/mtu"), "9000", "9999")],
    );
    let err = agent.handle_batch(&mtu).await.unwrap_err();
    assert!(matches!(err.root_cause(), TxnError::ConstraintViolation { .. }));

    let vlan = Batch::new(
        3,
        BatchPhase::PreCommit,
        vec![Change::created_node(
            DataPath::parse("/vlan/VLAN/VLAN_LIST[name='Vlan100']").unwrap(),
        )],
    );
    let err = agent.handle_batch(&vlan).await.unwrap_err();
    assert!(matches!(err.root_cause(), TxnError::UnknownSubtree { .. }));
}

#[tokio::test]
async fn test_hardware_alarms_become_link_notifications() {
    let hw = Arc::new(MemoryHardware::new());
    for name in ["Ethernet1_1", "Ethernet2_1"] {
        hw.add_object(name, &[("mtu", "1500"), ("alarm-notification", "{}")]);
    }
    let datastore = Arc::new(MemoryDatastore::new());
    let mut config = test_config();
    config.hardware.drain_interval_ms = 5;
    let agent = Agent::hardware(hw.clone(), datastore.clone(), &config);
    agent.start().await.unwrap();

    let shutdown = CancellationToken::new();
    let tasks = agent.spawn_alarm_monitors(&shutdown).await.unwrap().unwrap();
    assert_eq!(tasks.monitors(), 2);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let ready = json!({"pcs-status": ["ready", "rx-block-lock"]}).to_string();
    hw.set("Ethernet2_1", "alarm-notification", &ready).await.unwrap();
    let fault = json!({"pcs-status": ["ready", "rx-remote-fault"]}).to_string();
    hw.set("Ethernet2_1", "alarm-notification", &fault).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        datastore.notifications(),
        vec![
            (
                LINK_STATE_NOTIFY_EVENT.to_string(),
                json!({"if-name": "Ethernet2_1", "oper-status": "up"})
            ),
            (
                LINK_STATE_NOTIFY_EVENT.to_string(),
                json!({"if-name": "Ethernet2_1", "oper-status": "down"})
            ),
        ]
    );

    // Cancelled monitors hold on until their objects are gone.
    shutdown.cancel();
    let join = tokio::spawn(tasks.join());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!join.is_finished());
    hw.remove_object("Ethernet1_1");
    hw.remove_object("Ethernet2_1");
    assert_eq!(join.await.unwrap(), 2);
}
