//! VR -- simulated cluster scenarios.
//!
//! Every test drives real replicas and clients over the deterministic
//! simulated transport; fault injection goes through message filters.

use super::*;
use crate::core::{
    data_of, ClusterConfig, Data, GenericClient, InvokeCallback, MockApp,
    ReplicaId,
};
use crate::server::{Block, Entry};
use crate::transport::SimulatedTransport;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Cluster {
    transport: SimulatedTransport,
    apps: Vec<Rc<RefCell<MockApp>>>,
    replicas: Vec<Rc<RefCell<VrReplica<SimulatedTransport>>>>,
}

fn setup_cluster(n_fault: usize, n_replica: usize) -> Cluster {
    let addresses =
        (0..n_replica).map(|i| format!("replica-{}", i)).collect();
    let mut transport =
        SimulatedTransport::new(ClusterConfig::new(n_fault, addresses));
    let mut apps = vec![];
    let mut replicas = vec![];
    for id in 0..n_replica {
        let app = Rc::new(RefCell::new(MockApp::new()));
        let replica = VrReplica::new_and_setup(
            &mut transport,
            id as ReplicaId,
            ReplicaConfigVr::default(),
            ListLog::new(app.clone()),
        )
        .unwrap();
        apps.push(app);
        replicas.push(replica);
    }
    Cluster {
        transport,
        apps,
        replicas,
    }
}

/// Drops every message where the given replica is source or destination.
fn partition_replica(cluster: &mut Cluster, filter_id: u32, address: &'static str) {
    cluster
        .transport
        .add_filter(filter_id, move |source, dest, _| {
            source != address && dest != address
        });
}

/// Callback chain driving one client closed-loop with empty ops. Counts
/// completions into `n_done`; terminates the run at `limit` if given.
fn closed_loop(
    client: Rc<RefCell<Client<SimulatedTransport>>>,
    n_done: Rc<Cell<u64>>,
    limit: Option<u64>,
) -> InvokeCallback<SimulatedTransport> {
    Box::new(move |transport, _result| {
        n_done.set(n_done.get() + 1);
        if let Some(limit) = limit {
            if n_done.get() >= limit {
                transport.terminate();
                return;
            }
        }
        let callback = closed_loop(client.clone(), n_done.clone(), limit);
        client.borrow_mut().invoke(transport, Data::new(), callback);
    })
}

/// Asserts the universal log properties: executed prefixes agree across
/// replicas, and every committed block is prepared with identical contents
/// on at least `f + 1` replicas.
fn check_consistency(cluster: &Cluster) {
    for a in &cluster.apps {
        for b in &cluster.apps {
            let (a, b) = (a.borrow(), b.borrow());
            let n = a.op_list.len().min(b.op_list.len());
            assert_eq!(a.op_list[..n], b.op_list[..n]);
        }
    }

    let f = cluster.transport.config().n_fault;
    for replica in &cluster.replicas {
        let replica = replica.borrow();
        let log = replica.log();
        for index in 1..=log.commit_number() {
            let block = log.block_at(index).unwrap();
            let n_prepared = cluster
                .replicas
                .iter()
                .filter(|r| r.borrow().log().block_at(index) == Some(block))
                .count();
            assert!(
                n_prepared >= f + 1,
                "block {} committed with only {} copies prepared",
                index,
                n_prepared
            );
        }
    }
}

// scenario: three replicas, one request
#[test]
fn three_replicas_one_request() {
    let mut cluster = setup_cluster(1, 3);
    let client = Client::new_and_setup(&mut cluster.transport);

    let result = Rc::new(RefCell::new(None));
    let result_ref = result.clone();
    client.borrow_mut().invoke(
        &mut cluster.transport,
        data_of(b"One request"),
        Box::new(move |transport, r| {
            *result_ref.borrow_mut() = Some(r);
            transport.terminate();
        }),
    );
    cluster.transport.run();

    assert_eq!(*result.borrow(), Some(data_of(b"Re: One request")));
    assert_eq!(cluster.apps[0].borrow().op_list.len(), 1);
    check_consistency(&cluster);
}

// scenario: ten requests closed-loop
#[test]
fn ten_requests_closed_loop() {
    let mut cluster = setup_cluster(1, 3);
    let client = Client::new_and_setup(&mut cluster.transport);

    let n_done = Rc::new(Cell::new(0));
    let callback = closed_loop(client.clone(), n_done.clone(), Some(10));
    client
        .borrow_mut()
        .invoke(&mut cluster.transport, Data::new(), callback);
    cluster.transport.run();

    assert_eq!(n_done.get(), 10);
    assert_eq!(cluster.apps[0].borrow().op_list.len(), 10);
    check_consistency(&cluster);
}

// scenario: eventually all replicas commit (idle commit broadcast)
#[test]
fn eventually_all_commit() {
    let mut cluster = setup_cluster(1, 3);
    let client = Client::new_and_setup(&mut cluster.transport);

    client.borrow_mut().invoke(
        &mut cluster.transport,
        Data::new(),
        Box::new(|_, _| {}),
    );
    // one idle-commit period (200ms) plus a little slack
    cluster.transport.schedule(
        Duration::from_millis(210),
        Box::new(|transport| transport.terminate()),
    );
    cluster.transport.run();

    for app in &cluster.apps {
        assert_eq!(app.borrow().op_list.len(), 1);
    }
    check_consistency(&cluster);
}

// scenario: view change after partitioning the primary away
#[test]
fn view_change() {
    let mut cluster = setup_cluster(1, 3);
    partition_replica(&mut cluster, 1, "replica-0");
    let client = Client::new_and_setup(&mut cluster.transport);

    let fired = Rc::new(Cell::new(false));
    let fired_ref = fired.clone();
    client.borrow_mut().invoke(
        &mut cluster.transport,
        Data::new(),
        Box::new(move |transport, _| {
            fired_ref.set(true);
            transport.terminate();
        }),
    );
    cluster.transport.run();

    assert!(fired.get());
    assert!(client.borrow().view_number() >= 1);
    let new_primary = cluster.replicas[1].borrow();
    assert!(new_primary.is_normal());
    assert_eq!(new_primary.view_number(), 1);
    assert_eq!(new_primary.commit_number(), 1);
    drop(new_primary);
    check_consistency(&cluster);
}

// scenario: the second request after a view change needs no resend
#[test]
fn no_resend_after_view_change() {
    let mut cluster = setup_cluster(1, 3);
    partition_replica(&mut cluster, 1, "replica-0");
    let client = Client::new_and_setup(&mut cluster.transport);

    let second_done = Rc::new(Cell::new(false));
    let second_done_ref = second_done.clone();
    let client_ref = client.clone();
    client.borrow_mut().invoke(
        &mut cluster.transport,
        Data::new(),
        Box::new(move |transport, _| {
            // invoke again right away: the new primary is now known, so
            // this one goes straight to replica-1
            let second_done_ref = second_done_ref.clone();
            client_ref.borrow_mut().invoke(
                transport,
                Data::new(),
                Box::new(move |_, _| second_done_ref.set(true)),
            );
        }),
    );
    cluster.transport.schedule(
        Duration::from_millis(1020),
        Box::new(|transport| transport.terminate()),
    );
    cluster.transport.run();

    assert!(second_done.get());
    // only the first request escalated; the second hit the primary directly
    assert_eq!(client.borrow().n_resend(), 1);
    check_consistency(&cluster);
}

// scenario: double view change with two partitioned replicas
#[test]
fn double_view_change() {
    let mut cluster = setup_cluster(2, 5);
    partition_replica(&mut cluster, 1, "replica-0");
    partition_replica(&mut cluster, 2, "replica-1");
    let client = Client::new_and_setup(&mut cluster.transport);

    let fired = Rc::new(Cell::new(false));
    let fired_ref = fired.clone();
    client.borrow_mut().invoke(
        &mut cluster.transport,
        Data::new(),
        Box::new(move |transport, _| {
            fired_ref.set(true);
            transport.terminate();
        }),
    );
    cluster.transport.run();

    assert!(fired.get());
    let new_primary = cluster.replicas[2].borrow();
    assert!(new_primary.is_normal());
    assert_eq!(new_primary.view_number(), 2);
    drop(new_primary);
    check_consistency(&cluster);
}

// scenario: commit pipeline latency bounds closed-loop throughput
#[test]
fn throughput_floor() {
    let mut cluster = setup_cluster(2, 5);
    // 20ms base delay everywhere; up to 6.65ms seeded jitter on traffic
    // not originating at the view-0 primary
    let mut rng = StdRng::seed_from_u64(0x517e);
    cluster.transport.add_filter(1, move |source, _, delay| {
        *delay += Duration::from_millis(20);
        if source != "replica-0" {
            *delay += Duration::from_micros(rng.gen_range(0..6650));
        }
        true
    });

    let n_done = Rc::new(Cell::new(0));
    let clients: Vec<_> = (0..10)
        .map(|_| Client::new_and_setup(&mut cluster.transport))
        .collect();
    for client in &clients {
        let callback = closed_loop(client.clone(), n_done.clone(), None);
        client
            .borrow_mut()
            .invoke(&mut cluster.transport, Data::new(), callback);
    }
    cluster.transport.schedule(
        Duration::from_millis(1000),
        Box::new(|transport| transport.terminate()),
    );
    cluster.transport.run();

    // each closed-loop round takes at most 4 hops of <= 27ms each
    let floor = (10.0 * 1000.0 / (27.0 * 4.0)) as u64;
    assert!(
        n_done.get() >= floor,
        "only {} invocations completed, expected at least {}",
        n_done.get(),
        floor
    );
    check_consistency(&cluster);
}

// a duplicated request must answer from the reply cache, not re-execute
#[test]
fn duplicate_request_not_reexecuted() {
    let mut cluster = setup_cluster(1, 3);
    let client = Client::new_and_setup(&mut cluster.transport);

    client.borrow_mut().invoke(
        &mut cluster.transport,
        data_of(b"once"),
        Box::new(|transport, _| transport.terminate()),
    );
    cluster.transport.run();
    assert_eq!(cluster.apps[0].borrow().op_list.len(), 1);

    let request = ReplicaMessage::Request(crate::client::RequestMessage {
        client_id: client.borrow().client_id(),
        request_number: 1,
        op: data_of(b"once"),
    });
    let address = client.borrow().address().clone();
    cluster
        .transport
        .send_message(&address, &"replica-0".into(), |buffer| {
            wire_encode(buffer, &request).unwrap()
        });
    cluster.transport.schedule(
        Duration::from_millis(10),
        Box::new(|transport| transport.terminate()),
    );
    cluster.transport.run();

    assert_eq!(cluster.apps[0].borrow().op_list.len(), 1);
}

// a Prepare skipping ahead of the backup's tail has no state transfer path
#[test]
#[should_panic(expected = "op number gap")]
fn backup_op_gap_is_fatal() {
    let mut cluster = setup_cluster(1, 3);
    let prepare = ReplicaMessage::Prepare(PrepareMessage {
        view_number: 0,
        op_number: 5,
        block: Block::of_entry(Entry {
            client_id: 1,
            request_number: 1,
            op: Data::new(),
        }),
        commit_number: 0,
    });
    cluster
        .transport
        .send_message(&"replica-0".into(), &"replica-1".into(), |buffer| {
            wire_encode(buffer, &prepare).unwrap()
        });
    cluster.transport.run();
}

// view numbers never regress, across a full partition-and-recover cycle
#[test]
fn view_monotonic_over_partition() {
    let mut cluster = setup_cluster(1, 3);
    partition_replica(&mut cluster, 1, "replica-0");
    let client = Client::new_and_setup(&mut cluster.transport);

    let views = Rc::new(RefCell::new(vec![0; 3]));
    let fired = Rc::new(Cell::new(false));
    let fired_ref = fired.clone();
    client.borrow_mut().invoke(
        &mut cluster.transport,
        Data::new(),
        Box::new(move |_, _| fired_ref.set(true)),
    );
    // sample views every 100ms and check monotonicity at each step
    for step in 1..=15u64 {
        let views_ref = views.clone();
        let replicas: Vec<_> = cluster.replicas.clone();
        cluster.transport.schedule(
            Duration::from_millis(step * 100),
            Box::new(move |transport| {
                for (i, replica) in replicas.iter().enumerate() {
                    let view = replica.borrow().view_number();
                    assert!(view >= views_ref.borrow()[i]);
                    views_ref.borrow_mut()[i] = view;
                }
                if step == 15 {
                    transport.terminate();
                }
            }),
        );
    }
    cluster.transport.run();
    assert!(fired.get());
}
