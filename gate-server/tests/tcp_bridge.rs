//! TCP bridge: framing, fan-out and a full gate flow over a socket

use gate_server::message::{MessageBus, TcpTransport};
use gate_server::utils::ManualClock;
use gate_server::{Config, ServerState};
use rust_decimal::Decimal;
use shared::message::{
    BusMessage, GateCommandPayload, OccupancyPayload, ScanLocation, TagScanPayload, topics,
};
use shared::request::RegisterCredential;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

async fn serve(bus: &MessageBus) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let bus = bus.clone();
    let handle = tokio::spawn(async move {
        bus.serve(listener).await.unwrap();
    });
    (addr, handle)
}

async fn wait_for_clients(bus: &MessageBus, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.get_connected_clients().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client never registered");
}

async fn read(client: &TcpTransport) -> BusMessage {
    tokio::time::timeout(Duration::from_secs(5), client.read_message())
        .await
        .expect("no frame within 5s")
        .unwrap()
}

#[tokio::test]
async fn test_client_frames_reach_server() {
    let bus = MessageBus::new();
    let mut inbound = bus.subscribe_to_clients();
    let (addr, _server) = serve(&bus).await;

    let client = TcpTransport::connect(&addr).await.unwrap();
    wait_for_clients(&bus, 1).await;

    let scan = BusMessage::tag_scan(&TagScanPayload {
        tag_id: "T1".into(),
        location: ScanLocation::Entry,
        timestamp: 1,
    })
    .unwrap();
    client.write_message(&scan).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.topic, topics::TAG_SCAN);
    assert_eq!(received.payload, scan.payload);
    assert!(received.source.is_some());

    bus.shutdown();
}

#[tokio::test]
async fn test_server_broadcast_reaches_every_client() {
    let bus = MessageBus::new();
    let (addr, _server) = serve(&bus).await;

    let gate = TcpTransport::connect(&addr).await.unwrap();
    let display = TcpTransport::connect(&addr).await.unwrap();
    wait_for_clients(&bus, 2).await;

    let cmd = GateCommandPayload::open("Entry granted for T1", 7);
    bus.publish(BusMessage::gate_command(&cmd).unwrap()).unwrap();

    for client in [&gate, &display] {
        let msg = read(client).await;
        assert_eq!(msg.topic, topics::GATE_COMMAND);
        assert_eq!(msg.parse_payload::<GateCommandPayload>().unwrap(), cmd);
    }

    bus.shutdown();
}

#[tokio::test]
async fn test_client_cannot_publish_gate_commands() {
    let bus = MessageBus::new();
    let mut inbound = bus.subscribe_to_clients();
    let (addr, _server) = serve(&bus).await;

    let client = TcpTransport::connect(&addr).await.unwrap();
    wait_for_clients(&bus, 1).await;

    let forged = BusMessage::gate_command(&GateCommandPayload::open("forged", 1)).unwrap();
    client.write_message(&forged).await.unwrap();
    let status = BusMessage::new(
        topics::GATE_STATUS,
        br#"{"gateStatus":"closed","timestamp":2}"#.to_vec(),
    );
    client.write_message(&status).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.topic, topics::GATE_STATUS);

    bus.shutdown();
}

#[tokio::test]
async fn test_disconnect_removes_client() {
    let bus = MessageBus::new();
    let (addr, _server) = serve(&bus).await;

    let client = TcpTransport::connect(&addr).await.unwrap();
    wait_for_clients(&bus, 1).await;
    client.close().await.unwrap();
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !bus.get_connected_clients().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client never removed");

    bus.shutdown();
}

#[tokio::test]
async fn test_shutdown_stops_accept_loop() {
    let bus = MessageBus::new();
    let (_addr, server) = serve(&bus).await;

    bus.shutdown();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_gate_flow_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_work_dir(dir.path().to_string_lossy().to_string());
    config.availability_refresh_ms = 0;
    let clock = Arc::new(ManualClock::new(1_736_931_600_000));
    let state = ServerState::initialize_with_clock(&config, clock.clone()).unwrap();
    state
        .manager
        .register_credential(&RegisterCredential {
            tag_id: "T1".into(),
            name: "Asha".into(),
            vehicle_no: "KA01".into(),
            contact: None,
            email: None,
            initial_balance: Decimal::from(100),
        })
        .unwrap();

    let tasks = state.start_background_tasks(false);
    let (addr, _server) = serve(&state.bus).await;

    let camera = TcpTransport::connect(&addr).await.unwrap();
    let reader = TcpTransport::connect(&addr).await.unwrap();
    wait_for_clients(&state.bus, 2).await;

    camera
        .write_message(
            &BusMessage::occupancy(&OccupancyPayload {
                slot_id: "A1".into(),
                camera_id: "CAM_01".into(),
                occupied: false,
                confidence: None,
                timestamp: 1,
            })
            .unwrap(),
        )
        .await
        .unwrap();

    // The camera's report is applied before the scan arrives
    loop {
        let msg = read(&reader).await;
        if msg.topic == topics::AVAILABILITY_SUMMARY {
            break;
        }
    }

    reader
        .write_message(
            &BusMessage::tag_scan(&TagScanPayload {
                tag_id: "T1".into(),
                location: ScanLocation::Entry,
                timestamp: 2,
            })
            .unwrap(),
        )
        .await
        .unwrap();

    let cmd = loop {
        let msg = read(&reader).await;
        if msg.topic == topics::GATE_COMMAND {
            break msg.parse_payload::<GateCommandPayload>().unwrap();
        }
    };
    assert!(cmd.is_open());
    assert_eq!(cmd.reason, "Entry granted for T1");

    state.bus.shutdown();
    tasks.shutdown(Duration::from_secs(2)).await;
}
