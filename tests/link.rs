//! Socket engine integration tests, end to end on the simulated network.
//!
//! Every test carves out its own subnet and port range; the simulated
//! switchboard is shared by the whole test binary.

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use dslink::config::LinkConfig;
use dslink::net::sim::{SimTcpListener, SimTcpStream, SimUdpSocket};
use dslink::net::{TcpListener, TcpStream, UdpSocket};
use dslink::scan::Sweep;
use dslink::{LinkEvent, SocketKind, SocketLink};

const SHORT: Duration = Duration::from_millis(50);

fn spawn_sim(config: LinkConfig) -> (SocketLink, tokio::sync::mpsc::Receiver<LinkEvent>) {
    SocketLink::spawn_with::<SimUdpSocket, SimTcpStream, SimTcpListener>(config)
}

async fn bind(addr: &str) -> SimUdpSocket {
    SimUdpSocket::bind(addr.parse().unwrap()).await.unwrap()
}

async fn recv(socket: &SimUdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 256];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a datagram")
        .unwrap();
    buf[..len].to_vec()
}

async fn assert_silent(socket: &SimUdpSocket) {
    let mut buf = [0u8; 256];
    assert!(
        timeout(SHORT, socket.recv_from(&mut buf)).await.is_err(),
        "unexpected datagram"
    );
}

/// Scenario: three candidates, two pool slots. The first fan-out probes the
/// first window, the rotation rebinds the pool, an answer from the third
/// candidate locks the engine onto it, and from then on sends are unicast.
#[test_log::test(tokio::test)]
async fn fresh_scan_discovers_and_locks() {
    let config = LinkConfig::builder()
        .robot_input_port(6150)
        .robot_output_port(6110)
        .custom_socket_count(2)
        .sweep(Sweep::Disabled)
        .build();
    let (link, mut events) = spawn_sim(config);

    let first = bind("10.81.1.1:6110").await;
    let second = bind("10.81.1.2:6110").await;
    let robot = bind("10.81.1.3:6110").await;

    link.set_address_list(vec![
        Ipv4Addr::new(10, 81, 1, 1),
        Ipv4Addr::new(10, 81, 1, 2),
        Ipv4Addr::new(10, 81, 1, 3),
    ])
    .await
    .unwrap();

    // First fan-out probes the first window only
    link.send_to_robot(Bytes::from_static(b"X")).await.unwrap();
    assert_eq!(recv(&first).await, b"X");
    assert_eq!(recv(&second).await, b"X");
    assert_silent(&robot).await;

    // The rotation has moved the window; pool slot 0 now listens on the
    // third candidate. Keep knocking until the rebind lands.
    let discovered = loop {
        robot
            .send_to(b"status", "10.81.1.3:6150".parse().unwrap())
            .await
            .unwrap();
        match timeout(SHORT, events.recv()).await {
            Ok(Some(event)) => break event,
            _ => continue,
        }
    };
    assert_eq!(
        discovered,
        LinkEvent::RobotDiscovered(Ipv4Addr::new(10, 81, 1, 3))
    );
    assert_eq!(
        events.recv().await.unwrap(),
        LinkEvent::RobotPacket(Bytes::from_static(b"status"))
    );

    // Locked: the next send is a single unicast to the discovered peer
    link.send_to_robot(Bytes::from_static(b"Y")).await.unwrap();
    assert_eq!(recv(&robot).await, b"Y");
    assert_silent(&first).await;
    assert_silent(&second).await;

    link.shutdown().await.unwrap();
}

/// The locked address never drifts on its own: packets from other hosts do
/// not re-assign it.
#[test_log::test(tokio::test)]
async fn lock_survives_traffic_from_other_hosts() {
    let config = LinkConfig::builder()
        .robot_input_port(6250)
        .robot_output_port(6210)
        .custom_socket_count(2)
        .sweep(Sweep::Disabled)
        .build();
    let (link, mut events) = spawn_sim(config);

    let robot = bind("10.81.2.1:6210").await;
    let impostor = bind("10.81.2.99:0").await;

    link.set_address_list(vec![Ipv4Addr::new(10, 81, 2, 1)])
        .await
        .unwrap();
    link.send_to_robot(Bytes::from_static(b"probe"))
        .await
        .unwrap();

    let target = "10.81.2.1:6250".parse().unwrap();
    loop {
        robot.send_to(b"hello", target).await.unwrap();
        if let Ok(Some(event)) = timeout(SHORT, events.recv()).await {
            assert_eq!(
                event,
                LinkEvent::RobotDiscovered(Ipv4Addr::new(10, 81, 2, 1))
            );
            break;
        }
    }
    // A third party lands a datagram on the still-bound receiver; the
    // packet is surfaced like any other robot packet
    impostor.send_to(b"mallory", target).await.unwrap();
    loop {
        match events.recv().await.unwrap() {
            LinkEvent::RobotPacket(data) if data.as_ref() == b"mallory" => break,
            LinkEvent::RobotPacket(data) => assert_eq!(data.as_ref(), b"hello"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    // but the peer did not change
    link.send_to_robot(Bytes::from_static(b"Z")).await.unwrap();
    assert_eq!(recv(&robot).await, b"Z");

    link.shutdown().await.unwrap();
}

/// A manually assigned robot address halts the fan-out immediately.
#[test_log::test(tokio::test)]
async fn manual_lock_forces_unicast() {
    let config = LinkConfig::builder()
        .robot_input_port(6350)
        .robot_output_port(6310)
        .sweep(Sweep::Disabled)
        .build();
    let (link, _events) = spawn_sim(config);

    let candidate = bind("10.81.3.1:6310").await;
    let pinned = bind("10.81.3.9:6310").await;

    link.set_address_list(vec![Ipv4Addr::new(10, 81, 3, 1)])
        .await
        .unwrap();
    link.set_robot_address(Some(Ipv4Addr::new(10, 81, 3, 9)))
        .await
        .unwrap();

    link.send_to_robot(Bytes::from_static(b"direct"))
        .await
        .unwrap();
    assert_eq!(recv(&pinned).await, b"direct");
    assert_silent(&candidate).await;

    // Unlocking resumes the scan
    link.set_robot_address(None).await.unwrap();
    link.send_to_robot(Bytes::from_static(b"probe"))
        .await
        .unwrap();
    assert_eq!(recv(&candidate).await, b"probe");

    link.shutdown().await.unwrap();
}

/// An empty candidate list with no peer is a total no-op, and a disabled
/// output port suppresses sends even with candidates available.
#[test_log::test(tokio::test)]
async fn scan_noops_without_candidates_or_port() {
    let (link, _events) = spawn_sim(
        LinkConfig::builder()
            .robot_input_port(6450)
            .robot_output_port(6410)
            .sweep(Sweep::Disabled)
            .build(),
    );
    // No address list at all
    link.send_to_robot(Bytes::from_static(b"into the void"))
        .await
        .unwrap();

    let (link2, _events2) = spawn_sim(
        LinkConfig::builder()
            .robot_input_port(6451)
            .sweep(Sweep::Disabled)
            .build(),
    );
    let candidate = bind("10.81.4.1:6411").await;
    link2
        .set_address_list(vec![Ipv4Addr::new(10, 81, 4, 1)])
        .await
        .unwrap();
    link2
        .send_to_robot(Bytes::from_static(b"nope"))
        .await
        .unwrap();
    assert_silent(&candidate).await;

    link.shutdown().await.unwrap();
    link2.shutdown().await.unwrap();
}

/// FMS traffic flows both ways once its ports are enabled.
#[test_log::test(tokio::test)]
async fn fms_channel_round_trip() {
    let config = LinkConfig::builder()
        .fms_input_port(6520)
        .fms_output_port(6560)
        .sweep(Sweep::Disabled)
        .build();
    let (link, mut events) = spawn_sim(config);

    // Outbound goes to the any-address on the output port
    let fms = bind("0.0.0.0:6560").await;
    link.send_to_fms(Bytes::from_static(b"heartbeat"))
        .await
        .unwrap();
    assert_eq!(recv(&fms).await, b"heartbeat");

    // Inbound lands on the wildcard-bound receiver
    fms.send_to(b"field", "10.81.5.5:6520".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(
        timeout(Duration::from_secs(2), events.recv()).await.unwrap(),
        Some(LinkEvent::FmsPacket(Bytes::from_static(b"field")))
    );

    link.shutdown().await.unwrap();
}

/// The radio channel follows its configured address.
#[test_log::test(tokio::test)]
async fn radio_channel_follows_address() {
    let config = LinkConfig::builder()
        .radio_input_port(6640)
        .radio_output_port(6641)
        .sweep(Sweep::Disabled)
        .build();
    let (link, mut events) = spawn_sim(config);

    // No address yet: sends are silently dropped
    link.send_to_radio(Bytes::from_static(b"early")).await.unwrap();

    let radio_ip = Ipv4Addr::new(10, 81, 6, 1);
    let radio = bind("10.81.6.1:6641").await;
    link.set_radio_address(Some(radio_ip)).await.unwrap();

    link.send_to_radio(Bytes::from_static(b"ping")).await.unwrap();
    assert_eq!(recv(&radio).await, b"ping");

    // The receiver rebound onto the radio address
    radio
        .send_to(b"pong", "10.81.6.1:6640".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(
        timeout(Duration::from_secs(2), events.recv()).await.unwrap(),
        Some(LinkEvent::RadioPacket(Bytes::from_static(b"pong")))
    );

    link.shutdown().await.unwrap();
}

/// Changing the robot input port is store-only; the pool only picks it up
/// at the next rotation.
#[test_log::test(tokio::test)]
async fn robot_input_port_applies_on_next_rotation() {
    let config = LinkConfig::builder()
        .robot_input_port(6750)
        .robot_output_port(6710)
        .custom_socket_count(2)
        .sweep(Sweep::Disabled)
        .build();
    let (link, mut events) = spawn_sim(config);

    let candidate = Ipv4Addr::new(10, 81, 7, 1);
    let probe_sink = bind("10.81.7.1:6710").await;
    link.set_address_list(vec![candidate]).await.unwrap();

    // First rotation binds the pool on the old port
    link.send_to_robot(Bytes::from_static(b"p1")).await.unwrap();
    let _ = recv(&probe_sink).await;

    link.set_robot_input_port(Some(6751)).await.unwrap();

    // Nothing listens on the new port yet
    let robot = bind("10.81.7.9:0").await;
    robot
        .send_to(b"too-early", "10.81.7.1:6751".parse().unwrap())
        .await
        .unwrap();
    assert!(timeout(SHORT, events.recv()).await.is_err());

    // The next fan-out rotates and rebinds on the new port
    link.send_to_robot(Bytes::from_static(b"p2")).await.unwrap();
    let _ = recv(&probe_sink).await;
    loop {
        robot
            .send_to(b"on-time", "10.81.7.1:6751".parse().unwrap())
            .await
            .unwrap();
        if let Ok(Some(event)) = timeout(SHORT, events.recv()).await {
            assert!(matches!(event, LinkEvent::RobotDiscovered(_)));
            break;
        }
    }

    link.shutdown().await.unwrap();
}

/// A TCP robot sender connects eagerly when the address arrives and writes
/// packets down the stream.
#[test_log::test(tokio::test)]
async fn tcp_robot_sender_connects_eagerly() {
    let config = LinkConfig::builder()
        .robot_output_port(6810)
        .sweep(Sweep::Disabled)
        .build();
    let (link, _events) = spawn_sim(config);

    let listener = SimTcpListener::bind("10.81.8.2:6810".parse().unwrap())
        .await
        .unwrap();

    link.set_robot_socket_kind(SocketKind::Tcp).await.unwrap();
    link.set_robot_address(Some(Ipv4Addr::new(10, 81, 8, 2)))
        .await
        .unwrap();

    let (mut stream, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("no eager connect")
        .unwrap();

    link.send_to_robot(Bytes::from_static(b"over tcp"))
        .await
        .unwrap();
    let mut buf = [0u8; 32];
    let len = timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], b"over tcp");

    link.shutdown().await.unwrap();
}

/// Port setters reject 0 up front.
#[test_log::test(tokio::test)]
async fn port_zero_is_rejected() {
    let (link, _events) = spawn_sim(LinkConfig::builder().sweep(Sweep::Disabled).build());
    assert!(link.set_fms_input_port(Some(0)).await.is_err());
    assert!(link.set_robot_output_port(Some(0)).await.is_err());
    assert!(link.set_robot_input_port(None).await.is_ok());
    link.shutdown().await.unwrap();
}
