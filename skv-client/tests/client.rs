use std::thread;
use std::time::Duration;

use skv_client::{Client, PoolStats, Role, SentinelOptions, SkvError};
use skv_testkit::{init_tracing, unused_addr, FakeNode, FakeSentinel};

const GROUP: &str = "mymaster";

struct Cluster {
    sentinel: FakeSentinel,
    master: FakeNode,
    replicas: Vec<FakeNode>,
}

impl Cluster {
    fn start(replicas: usize) -> Cluster {
        let master = FakeNode::start(Role::Master).expect("master");
        let replicas: Vec<FakeNode> = (0..replicas)
            .map(|_| FakeNode::start(Role::Replica).expect("replica"))
            .collect();
        let replica_addrs: Vec<&str> = replicas.iter().map(FakeNode::addr).collect();
        let sentinel =
            FakeSentinel::with_topology(GROUP, master.addr(), &replica_addrs).expect("sentinel");
        Cluster {
            sentinel,
            master,
            replicas,
        }
    }

    fn options(&self) -> SentinelOptions {
        SentinelOptions {
            addresses: vec![self.sentinel.addr().to_string()],
            master_name: GROUP.to_string(),
            ..Default::default()
        }
    }

    fn client(&self) -> Client {
        Client::sentinel(self.options()).expect("client")
    }
}

#[test]
fn reads_hit_replica_and_writes_hit_master() {
    init_tracing();
    let cluster = Cluster::start(1);
    let replica = &cluster.replicas[0];
    let client = cluster.client();

    assert!(client.set(b"k", b"v").expect("set"));
    // Fakes do not replicate, so the replica has never seen the key.
    assert_eq!(client.get(b"k").expect("get"), None);
    assert!(!client.exists(&[b"k".as_slice()]).expect("exists"));
    client.hscan(b"h", 0, b"*").expect("hscan");
    client.ping().expect("ping");

    assert_eq!(cluster.master.command_count("SET"), 1);
    assert_eq!(cluster.master.command_count("GET"), 0);
    assert_eq!(cluster.master.command_count("HSCAN"), 1);
    assert_eq!(cluster.master.command_count("PING"), 1);
    assert_eq!(replica.command_count("GET"), 1);
    assert_eq!(replica.command_count("EXISTS"), 1);
    assert_eq!(replica.command_count("SET"), 0);
}

#[test]
fn reads_fall_back_to_master_without_replicas() {
    init_tracing();
    let cluster = Cluster::start(0);
    let client = cluster.client();

    client.set(b"k", b"v").expect("set");
    assert_eq!(client.get(b"k").expect("get"), Some(b"v".to_vec()));
    assert_eq!(cluster.master.command_count("GET"), 1);
}

#[test]
fn writes_follow_failover() {
    init_tracing();
    let cluster = Cluster::start(1);
    let old_master = &cluster.master;
    let new_master = &cluster.replicas[0];
    let client = cluster.client();

    client.set(b"k", b"before").expect("set before failover");
    assert_eq!(old_master.stored(0, b"k"), Some(b"before".to_vec()));

    old_master.set_role(Role::Replica);
    new_master.set_role(Role::Master);
    cluster.sentinel.set_master(Some(new_master.addr()));
    cluster.sentinel.set_replicas(&[old_master.addr()]);

    client.set(b"k", b"after").expect("set after failover");
    assert_eq!(new_master.stored(0, b"k"), Some(b"after".to_vec()));
    assert_eq!(old_master.stored(0, b"k"), Some(b"before".to_vec()));
    // The stale write connection was checked once, then discarded.
    assert_eq!(old_master.command_count("ROLE"), 1);
    assert_eq!(old_master.command_count("SET"), 1);
}

#[test]
fn read_pool_never_checks_role() {
    init_tracing();
    let cluster = Cluster::start(1);
    let client = cluster.client();

    for _ in 0..3 {
        client.get(b"k").expect("get");
    }
    let replica = &cluster.replicas[0];
    assert_eq!(replica.command_count("ROLE"), 0);
    assert_eq!(replica.command_count("PING"), 0);
    assert_eq!(replica.connections_accepted(), 1);
}

#[test]
fn write_role_check_runs_even_within_validation_period() {
    init_tracing();
    let cluster = Cluster::start(0);
    let client = cluster.client();

    for _ in 0..3 {
        client.set(b"k", b"v").expect("set");
    }
    assert_eq!(cluster.master.command_count("ROLE"), 2);
    assert_eq!(cluster.master.command_count("PING"), 0);
}

#[test]
fn zero_validation_period_probes_reads() {
    init_tracing();
    let cluster = Cluster::start(1);
    let client = Client::sentinel(SentinelOptions {
        validation_period: Duration::ZERO,
        ..cluster.options()
    })
    .expect("client");

    client.get(b"k").expect("first read");
    client.get(b"k").expect("second read");
    assert_eq!(cluster.replicas[0].command_count("PING"), 1);
}

#[test]
fn dead_replica_is_replaced_after_failed_probe() {
    init_tracing();
    let mut cluster = Cluster::start(2);
    cluster.sentinel.set_replicas(&[cluster.replicas[0].addr()]);
    let client = Client::sentinel(SentinelOptions {
        validation_period: Duration::ZERO,
        ..cluster.options()
    })
    .expect("client");

    client.get(b"k").expect("read before outage");
    assert_eq!(cluster.replicas[0].command_count("GET"), 1);

    cluster.replicas[0].shutdown();
    cluster.sentinel.set_replicas(&[cluster.replicas[1].addr()]);

    client.get(b"k").expect("read after outage");
    assert_eq!(cluster.replicas[1].command_count("GET"), 1);
    assert_eq!(client.read_pool().stats(), PoolStats { idle: 1, active: 1 });
}

#[test]
fn close_shuts_both_pools() {
    init_tracing();
    let cluster = Cluster::start(1);
    let client = cluster.client();

    let first = client.write_connection().expect("write 1");
    let second = client.write_connection().expect("write 2");
    let read = client.read_connection().expect("read");
    drop(first);
    drop(second);
    drop(read);
    assert_eq!(client.write_pool().stats(), PoolStats { idle: 2, active: 2 });
    assert_eq!(client.read_pool().stats(), PoolStats { idle: 1, active: 1 });

    client.close().expect("close");
    assert_eq!(client.write_pool().stats(), PoolStats { idle: 0, active: 0 });
    assert_eq!(client.read_pool().stats(), PoolStats { idle: 0, active: 0 });

    assert!(matches!(client.write_connection(), Err(SkvError::PoolClosed)));
    assert!(matches!(client.read_connection(), Err(SkvError::PoolClosed)));
    assert!(matches!(client.get(b"k"), Err(SkvError::PoolClosed)));
    assert!(matches!(client.set(b"k", b"v"), Err(SkvError::PoolClosed)));

    client.close().expect("second close");
}

#[test]
fn close_reports_write_error_and_still_closes_read_pool() {
    init_tracing();
    let mut cluster = Cluster::start(1);
    cluster.master.reset_on_shutdown();
    let client = cluster.client();

    drop(client.write_connection().expect("write"));
    drop(client.read_connection().expect("read"));
    assert_eq!(client.write_pool().stats(), PoolStats { idle: 1, active: 1 });
    assert_eq!(client.read_pool().stats(), PoolStats { idle: 1, active: 1 });

    // The reset leaves the idle write connection unable to shut down cleanly.
    cluster.master.shutdown();
    thread::sleep(Duration::from_millis(50));

    assert!(matches!(client.close(), Err(SkvError::Io(_))));
    assert_eq!(client.write_pool().stats(), PoolStats { idle: 0, active: 0 });
    assert_eq!(client.read_pool().stats(), PoolStats { idle: 0, active: 0 });
    assert!(matches!(client.read_connection(), Err(SkvError::PoolClosed)));
    client.close().expect("second close");
}

#[test]
fn clones_share_pools() {
    init_tracing();
    let cluster = Cluster::start(0);
    let client = cluster.client();
    let other = client.clone();

    other.close().expect("close");
    assert!(matches!(client.ping(), Err(SkvError::PoolClosed)));
}

#[test]
fn discovery_failure_surfaces_on_first_use() {
    init_tracing();
    let dead = unused_addr().expect("addr");
    let client = Client::sentinel(SentinelOptions {
        addresses: vec![dead],
        master_name: GROUP.to_string(),
        connect_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .expect("construction does not dial");

    assert!(matches!(
        client.set(b"k", b"v"),
        Err(SkvError::DiscoveryUnavailable { .. })
    ));
    assert!(matches!(
        client.get(b"k"),
        Err(SkvError::DiscoveryUnavailable { .. })
    ));
    assert_eq!(client.write_pool().stats(), PoolStats { idle: 0, active: 0 });
    assert_eq!(client.read_pool().stats(), PoolStats { idle: 0, active: 0 });
}

#[test]
fn unreachable_master_reports_connect_failed() {
    init_tracing();
    let dead = unused_addr().expect("addr");
    let sentinel = FakeSentinel::with_topology(GROUP, &dead, &[]).expect("sentinel");
    let client = Client::sentinel(SentinelOptions {
        addresses: vec![sentinel.addr().to_string()],
        master_name: GROUP.to_string(),
        connect_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .expect("client");

    match client.set(b"k", b"v") {
        Err(SkvError::ConnectFailed { addr, .. }) => assert_eq!(addr, dead),
        other => panic!("expected ConnectFailed, got {:?}", other),
    }
}

#[test]
fn credentials_and_database_apply_to_data_connections() {
    init_tracing();
    let master = FakeNode::start_with_password(Role::Master, "secret").expect("master");
    let sentinel = FakeSentinel::with_topology(GROUP, master.addr(), &[]).expect("sentinel");
    let client = Client::sentinel(SentinelOptions {
        addresses: vec![sentinel.addr().to_string()],
        master_name: GROUP.to_string(),
        password: Some("secret".to_string()),
        database: 3,
        ..Default::default()
    })
    .expect("client");

    client.set(b"k", b"v").expect("set");
    assert_eq!(master.stored(3, b"k"), Some(b"v".to_vec()));
    assert_eq!(master.command_count("AUTH"), 1);
    assert_eq!(master.command_count("SELECT"), 1);
}

#[test]
fn wrong_password_fails_the_dial() {
    init_tracing();
    let master = FakeNode::start_with_password(Role::Master, "secret").expect("master");
    let sentinel = FakeSentinel::with_topology(GROUP, master.addr(), &[]).expect("sentinel");
    let client = Client::sentinel(SentinelOptions {
        addresses: vec![sentinel.addr().to_string()],
        master_name: GROUP.to_string(),
        password: Some("wrong".to_string()),
        ..Default::default()
    })
    .expect("client");

    assert!(matches!(
        client.set(b"k", b"v"),
        Err(SkvError::ConnectFailed { .. })
    ));
    assert_eq!(client.write_pool().stats(), PoolStats { idle: 0, active: 0 });
}

#[test]
fn write_pool_fails_fast_at_capacity() {
    init_tracing();
    let cluster = Cluster::start(0);
    let client = Client::sentinel(SentinelOptions {
        max_active: 1,
        ..cluster.options()
    })
    .expect("client");

    let held = client.write_connection().expect("held");
    assert!(matches!(client.set(b"k", b"v"), Err(SkvError::PoolExhausted)));
    drop(held);
    client.set(b"k", b"v").expect("set after release");
}
