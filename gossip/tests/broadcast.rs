use std::{collections::HashMap, time::Duration};

use gossip::broadcast::{self, BroadcastPayload, SyncConfig, state::LogicalClock};
use maelstrom_node::{Error, Result, sim::Cluster};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

const FAST_SYNC: SyncConfig = SyncConfig {
    interval: Duration::from_millis(20),
    timeout: Duration::from_millis(200),
};

const CONVERGENCE_DEADLINE: Duration = Duration::from_secs(3);

async fn cluster(topology: Value) -> Result<Cluster> {
    let topology: HashMap<String, Vec<String>> =
        serde_json::from_value(topology).map_err(Error::malformed)?;
    let mut ids: Vec<_> = topology.keys().cloned().collect();
    ids.sort();

    let mut cluster = Cluster::new();
    for id in &ids {
        cluster.add_node(id, |node| {
            broadcast::register(node, FAST_SYNC);
        });
    }
    cluster.start().await?;

    for id in &ids {
        cluster
            .request(
                id,
                &BroadcastPayload::Topology {
                    topology: topology.clone(),
                },
            )
            .await?;
    }
    Ok(cluster)
}

async fn broadcast_to(cluster: &Cluster, id: &str, value: i64) -> Result<()> {
    let reply = cluster
        .request(id, &BroadcastPayload::Broadcast { message: value })
        .await?;
    assert_eq!(reply.body.payload::<BroadcastPayload>()?, BroadcastPayload::BroadcastOk);
    Ok(())
}

async fn read(cluster: &Cluster, id: &str) -> Result<Vec<i64>> {
    let reply = cluster.request(id, &BroadcastPayload::Read).await?;
    match reply.body.payload()? {
        BroadcastPayload::ReadOk { mut messages } => {
            messages.sort();
            Ok(messages)
        }
        other => panic!("expected read_ok, got {other:?}"),
    }
}

/// Polls `id` until it reads exactly `expected` or the deadline passes.
async fn eventually_reads(cluster: &Cluster, id: &str, expected: &[i64]) -> Result<bool> {
    let deadline = Instant::now() + CONVERGENCE_DEADLINE;
    while Instant::now() < deadline {
        if read(cluster, id).await? == expected {
            return Ok(true);
        }
        sleep(Duration::from_millis(20)).await;
    }
    Ok(false)
}

#[tokio::test]
async fn two_nodes_converge_on_a_single_broadcast() -> Result<()> {
    let cluster = cluster(json!({"n1": ["n2"], "n2": ["n1"]})).await?;

    broadcast_to(&cluster, "n1", 7).await?;

    assert!(eventually_reads(&cluster, "n2", &[7]).await?);
    assert_eq!(read(&cluster, "n1").await?, vec![7]);
    Ok(())
}

#[tokio::test]
async fn repeated_broadcast_is_stored_once() -> Result<()> {
    let cluster = cluster(json!({"n1": []})).await?;

    broadcast_to(&cluster, "n1", 3).await?;
    broadcast_to(&cluster, "n1", 3).await?;

    assert_eq!(read(&cluster, "n1").await?, vec![3]);
    Ok(())
}

#[tokio::test]
async fn disconnected_nodes_never_share() -> Result<()> {
    let cluster = cluster(json!({"n1": [], "n2": []})).await?;

    broadcast_to(&cluster, "n1", 5).await?;
    sleep(FAST_SYNC.interval * 10).await;

    assert!(read(&cluster, "n2").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn ring_converges_with_writes_at_every_node() -> Result<()> {
    let cluster = cluster(json!({
        "n1": ["n5", "n2"],
        "n2": ["n1", "n3"],
        "n3": ["n2", "n4"],
        "n4": ["n3", "n5"],
        "n5": ["n4", "n1"],
    }))
    .await?;

    let mut expected = Vec::new();
    for (index, id) in ["n1", "n2", "n3", "n4", "n5"].into_iter().enumerate() {
        let value = (index as i64 + 1) * 11;
        broadcast_to(&cluster, id, value).await?;
        expected.push(value);
    }

    for id in ["n1", "n2", "n3", "n4", "n5"] {
        assert!(eventually_reads(&cluster, id, &expected).await?, "{id} did not converge");
    }
    Ok(())
}

#[tokio::test]
async fn partitioned_neighbour_catches_up_after_heal() -> Result<()> {
    let cluster = cluster(json!({
        "n1": ["n2"],
        "n2": ["n1", "n3"],
        "n3": ["n2"],
    }))
    .await?;
    cluster.partition("n2", "n3");

    broadcast_to(&cluster, "n1", 1).await?;
    broadcast_to(&cluster, "n1", 2).await?;
    assert!(eventually_reads(&cluster, "n2", &[1, 2]).await?);
    assert!(read(&cluster, "n3").await?.is_empty());

    cluster.heal();
    assert!(eventually_reads(&cluster, "n3", &[1, 2]).await?);
    Ok(())
}

#[tokio::test]
async fn sync_requests_are_answered_on_the_wire() -> Result<()> {
    let cluster = cluster(json!({"n1": []})).await?;
    broadcast_to(&cluster, "n1", 42).await?;

    let reply = cluster
        .request("n1", &BroadcastPayload::sync(LogicalClock::default()))
        .await?;
    assert_eq!(reply.body.kind, "sync_ok");
    assert_eq!(reply.body.fields["ok"], json!(true));
    assert_eq!(reply.body.fields["messages"], json!([42]));
    assert_eq!(
        reply.body.fields["counters"]["n1"],
        json!({"time": 1, "lastIndex": 1})
    );

    let caught_up = cluster
        .request("n1", &BroadcastPayload::sync(LogicalClock::new(0, 1)))
        .await?;
    assert_eq!(caught_up.body.fields["ok"], json!(false));
    assert!(!caught_up.body.fields.contains_key("messages"));
    Ok(())
}

#[tokio::test]
async fn malformed_requests_are_rejected_with_code_12() -> Result<()> {
    let cluster = cluster(json!({"n1": []})).await?;

    let bad_broadcast = cluster
        .request("n1", &json!({"type": "broadcast", "message": "seven"}))
        .await;
    let bad_sync = cluster
        .request("n1", &json!({"type": "sync", "time": -1, "lastIndex": 0}))
        .await;

    for result in [bad_broadcast, bad_sync] {
        match result {
            Err(error @ Error::MalformedRequest(_)) => assert_eq!(error.code(), 12),
            other => panic!("expected malformed-request, got {other:?}"),
        }
    }
    assert!(read(&cluster, "n1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn registered_state_reflects_pulled_clocks() -> Result<()> {
    let mut cluster = Cluster::new();
    cluster.add_node("n1", |node| {
        broadcast::register(node, FAST_SYNC);
    });
    let mut n2_state = None;
    cluster.add_node("n2", |node| {
        n2_state = Some(broadcast::register(node, FAST_SYNC));
    });
    cluster.start().await?;
    let n2_state = n2_state.expect("n2 registered");

    let topology = HashMap::from([
        ("n1".to_string(), vec!["n2".to_string()]),
        ("n2".to_string(), vec!["n1".to_string()]),
    ]);
    for id in ["n1", "n2"] {
        cluster
            .request(
                id,
                &BroadcastPayload::Topology {
                    topology: topology.clone(),
                },
            )
            .await?;
    }

    broadcast_to(&cluster, "n1", 7).await?;
    assert!(eventually_reads(&cluster, "n2", &[7]).await?);

    let state = n2_state.read().await;
    assert_eq!(state.belief_of("n1").last_index, 1);
    assert_eq!(state.clock().last_index, 1);
    Ok(())
}
