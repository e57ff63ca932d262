use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Duration;

use racket_motion_rs::parser::{format_tagged, TaggedGroups};
use racket_motion_rs::{
    notification_channel, pipeline, Listener, Notification, SensorPacket, ServerConfig,
    ServerStatus, StateKind, Vector3,
};
use tokio::sync::watch;

fn free_port() -> u16 {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    socket.local_addr().unwrap().port()
}

fn packet(i: usize) -> SensorPacket {
    let t = i as f64 * 0.01;
    SensorPacket::new(
        90_594.0 + t,
        Vector3::new((t * 3.0).sin(), 0.1, 9.81),
        Vector3::new(0.0, 0.01 * i as f64, 0.0),
        Vector3::new(16.2, 12.6, -34.5),
    )
}

#[test]
fn test_window_of_latest_packets_is_fitted() {
    let config = ServerConfig {
        buffer_capacity: 100,
        window_len: 100,
        ..ServerConfig::default()
    };
    let (sink, stream) = notification_channel(16);
    let status = ServerStatus::shared();
    let (mut ingest, worker) = pipeline(&config, sink, status.clone());

    for i in 0..150 {
        let text = format_tagged(&packet(i), TaggedGroups::ALL);
        ingest.ingest(text.as_bytes()).unwrap();
    }
    assert_eq!(ingest.raw_buffer().lock().unwrap().len(), 100);

    let cycle = worker.run_cycle().unwrap();
    assert_eq!(cycle.raw.len(), 100);
    assert_eq!(cycle.fit.fitted.len(), 100);
    for (raw, fit) in cycle.raw.iter().zip(cycle.fit.fitted.as_slice()) {
        assert_eq!(raw.timestamp, fit.timestamp);
    }
    // Newest packet is the last one sent
    assert!((cycle.raw[99].timestamp - packet(149).timestamp).abs() < 1e-4);

    assert!(matches!(stream.try_next(), Some(Notification::Data(_))));
    let s = status.lock().unwrap();
    assert_eq!(s.packets_accepted, 150);
    assert_eq!(s.packets_evicted, 50);
    assert_eq!(s.fit_cycles, 1);
}

#[tokio::test]
async fn test_udp_round_trip_with_rebind() {
    let config = ServerConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        window_len: 10,
        buffer_capacity: 50,
        ..ServerConfig::default()
    };
    let (sink, stream) = notification_channel(256);
    let status = ServerStatus::shared();
    let (ingest, worker) = pipeline(&config, sink.clone(), status.clone());
    let (mut listener, handle) = Listener::new(&config, ingest, sink, status.clone());

    let first = free_port();
    listener.bind(first).await.unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    let worker_task = tokio::spawn(worker.run(stop_rx));
    let listener_task = tokio::spawn(listener.run());

    let second = free_port();
    assert_eq!(handle.rebind(second).await.unwrap(), second);
    assert!(handle.rebind_str("not-a-port").await.is_err());

    let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    for i in 0..20 {
        let text = format_tagged(&packet(i), TaggedGroups::ALL);
        client.send_to(text.as_bytes(), (Ipv4Addr::LOCALHOST, second)).unwrap();
    }

    let mut states = Vec::new();
    let mut data = None;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        for n in stream.drain() {
            match n {
                Notification::State(e) => states.push(e.kind),
                Notification::Data(e) => data = Some(e),
            }
        }
        if status.lock().unwrap().packets_accepted == 20 && data.is_some() {
            break;
        }
    }

    let data = data.expect("no data event received");
    assert!(!data.raw.is_empty() && data.raw.len() <= 10);
    assert_eq!(data.raw.len(), data.fitted.len());
    assert_eq!(status.lock().unwrap().port, Some(second));
    assert_eq!(states, vec![StateKind::Listening, StateKind::Listening]);

    handle.shutdown().await;
    tokio::time::timeout(Duration::from_secs(2), listener_task)
        .await
        .unwrap()
        .unwrap();
    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), worker_task)
        .await
        .unwrap()
        .unwrap();

    let stopped: Vec<StateKind> = stream
        .drain()
        .into_iter()
        .filter_map(|n| match n {
            Notification::State(e) => Some(e.kind),
            Notification::Data(_) => None,
        })
        .collect();
    assert!(stopped.contains(&StateKind::Stopped));
}
