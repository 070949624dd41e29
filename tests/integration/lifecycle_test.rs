// tests/integration/lifecycle_test.rs

//! Connection limits, notice formats, timeouts and graceful shutdown.

use super::test_helpers::*;
use futures::SinkExt;
use pairlink::core::PeerState;
use std::time::Duration;

#[tokio::test]
async fn test_graceful_shutdown_notifies_clients() {
    let server = start_server(test_config()).await;
    let (mut a, mut b) = connect_pair(&server).await;
    let mut c = connect_expecting(&server, WAITING).await;

    server.shutdown().await;

    for client in [&mut a, &mut b, &mut c] {
        assert_eq!(recv_text(client).await, SHUTTING_DOWN);
        assert_closed(client).await;
    }
}

#[tokio::test]
async fn test_no_connections_after_shutdown() {
    let server = start_server(test_config()).await;
    let addr = server.local_addr();
    server.shutdown().await;

    let res = tokio_tungstenite::connect_async(format!("ws://{addr}")).await;
    assert!(res.is_err());
}

#[tokio::test]
async fn test_max_clients_rejects_excess_connections() {
    let mut config = test_config();
    config.max_clients = 2;
    let server = start_server(config).await;
    let (mut a, _b) = connect_pair(&server).await;

    assert!(try_connect(&server).await.is_err());
    assert_eq!(server.state().stats.get_rejected_connections(), 1);

    // Freeing a slot lets the next client in.
    a.close(None).await.unwrap();
    let mut c = eventually(|| try_connect(&server)).await;
    assert_eq!(recv_text(&mut c).await, PAIRED);
    server.shutdown().await;
}

#[tokio::test]
async fn test_json_notice_format() {
    let mut config = test_config();
    config.notice_format = pairlink::core::NoticeFormat::Json;
    let server = start_server(config).await;

    let mut a = connect(&server).await;
    let notice: serde_json::Value = serde_json::from_str(&recv_text(&mut a).await).unwrap();
    assert_eq!(notice, serde_json::json!({"type": "status", "status": "waiting"}));

    let mut b = connect(&server).await;
    let notice: serde_json::Value = serde_json::from_str(&recv_text(&mut b).await).unwrap();
    assert_eq!(notice["status"], "paired");
    recv_text(&mut a).await;

    b.close(None).await.unwrap();
    let notice: serde_json::Value = serde_json::from_str(&recv_text(&mut a).await).unwrap();
    assert_eq!(notice["status"], "pair_disconnected");

    server.shutdown().await;
    let notice: serde_json::Value = serde_json::from_str(&recv_text(&mut a).await).unwrap();
    assert_eq!(notice["status"], "shutting_down");
}

#[tokio::test]
async fn test_wait_timeout_closes_lonely_client() {
    let mut config = test_config();
    config.pairing.wait_timeout = Some(Duration::from_millis(300));
    config.pairing.sweep_interval = Duration::from_millis(50);
    let server = start_server(config).await;

    let mut a = connect_expecting(&server, WAITING).await;
    assert_eq!(recv_text(&mut a).await, "Timed out waiting for a pair");
    assert_closed(&mut a).await;

    // The expired client no longer occupies the waiting slot.
    let _b = connect_expecting(&server, WAITING).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_table_empties_when_clients_leave() {
    let server = start_server(test_config()).await;
    let (mut a, mut b) = connect_pair(&server).await;
    let c = connect_expecting(&server, WAITING).await;

    a.close(None).await.unwrap();
    // b is re-paired with c after a leaves.
    assert_eq!(recv_text(&mut b).await, PAIR_DISCONNECTED);
    assert_eq!(recv_text(&mut b).await, PAIRED);
    let snapshot = server.state().relay.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|(_, s)| matches!(s, PeerState::Paired(_))));

    drop(b);
    drop(c);
    let mut empty = false;
    for _ in 0..50 {
        if server.state().relay.snapshot().await.unwrap().is_empty() {
            empty = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(empty, "pairing table should drain once every client left");
    server.shutdown().await;
}

#[tokio::test]
async fn test_stats_track_open_and_total_connections() {
    let server = start_server(test_config()).await;
    let (mut a, _b) = connect_pair(&server).await;
    let stats = &server.state().stats;
    assert_eq!(stats.get_connected_clients(), 2);
    assert_eq!(stats.get_total_connections(), 2);

    a.close(None).await.unwrap();
    eventually(move || async move {
        match stats.get_connected_clients() {
            1 => Ok(()),
            n => Err(n),
        }
    })
    .await;
    // Closed connections still count towards the total.
    assert_eq!(stats.get_total_connections(), 2);

    // b went back to waiting and is paired with the newcomer.
    let _c = connect_expecting(&server, PAIRED).await;
    assert_eq!(stats.get_connected_clients(), 2);
    assert_eq!(stats.get_total_connections(), 3);
    server.shutdown().await;
}
