mod support;

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use neuroplay_pro::{
    DeviceEvent, DeviceId, FilterSettings, GrabKind, HubClient, HubConfig, HubEvent, HubState,
    NeuroplayError,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout};

use support::mock_hub::{MockConnection, MockHubServer, STEP_TIMEOUT};

const CAPABILITY_COMMANDS: [&str; 5] = [
    "version",
    "getfavoritedevicename",
    "getfilters",
    "getdatastoragetime",
    "currentdeviceinfo",
];

async fn start_server_or_skip(test_name: &str) -> Option<MockHubServer> {
    match MockHubServer::start().await {
        Ok(server) => Some(server),
        Err(err) => {
            eprintln!("Skipping {test_name}: unable to start mock server: {err}");
            None
        }
    }
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<HubEvent>,
    matches: impl Fn(&HubEvent) -> bool,
) -> HubEvent {
    timeout(STEP_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => {}
                Err(err) => panic!("event channel failed: {err}"),
            }
        }
    })
    .await
    .expect("timed out waiting for hub event")
}

/// Poll `check` until it holds.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + STEP_TIMEOUT;
    while !check().await {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Open the client and answer the `help` handshake.
async fn open_and_handshake(
    server: &mut MockHubServer,
    client: &HubClient,
    events: &mut broadcast::Receiver<HubEvent>,
) -> MockConnection {
    client.open().await.unwrap();
    let mut connection = server.accept_connection().await;

    connection.expect_command("help").await;
    connection
        .send_json(json!({
            "command": "help",
            "commands": [
                {"command": "help", "description": "this list"},
                {"command": "listdevices", "description": "connected devices"}
            ]
        }))
        .await;
    for command in CAPABILITY_COMMANDS {
        connection.expect_command(command).await;
    }
    wait_for_event(events, |e| *e == HubEvent::Connected).await;
    connection
}

/// Report a running device so its session starts without discovery.
async fn report_running_device(
    connection: &mut MockConnection,
    events: &mut broadcast::Receiver<HubEvent>,
) -> DeviceId {
    connection
        .send_json(json!({
            "command": "currentdeviceinfo",
            "result": true,
            "device": {"name": "EEG-01", "serialNumber": "SN1", "maxChannels": 8}
        }))
        .await;
    connection.expect_command("spectrumfrequencies").await;
    match wait_for_event(events, |e| matches!(e, HubEvent::DeviceReady(_))).await {
        HubEvent::DeviceReady(id) => id,
        other => unreachable!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn handshake_requests_capabilities_and_records_replies() {
    let Some(mut server) =
        start_server_or_skip("handshake_requests_capabilities_and_records_replies").await
    else {
        return;
    };
    let client = HubClient::spawn(HubConfig::new(server.ws_url()));
    let mut events = client.subscribe();
    let mut connection = open_and_handshake(&mut server, &client, &mut events).await;

    assert_eq!(client.state().await.unwrap(), HubState::Searching);
    assert_eq!(
        client.with(|hub| hub.commands().len()).await.unwrap(),
        2
    );

    connection
        .send_json(json!({"command": "version", "result": true, "version": "1.2.3"}))
        .await;
    connection
        .send_json(json!({"command": "getfilters", "LPF": 0.5, "HPF": 30, "BSF": 50}))
        .await;
    connection
        .send_json(json!({"command": "getdatastoragetime", "storagetime": 30}))
        .await;

    eventually(|| async { client.with(|hub| hub.data_storage_time()).await.unwrap() == 30 }).await;
    assert_eq!(client.version().await.unwrap(), "1.2.3");
    assert_eq!(
        client.filters().await.unwrap(),
        FilterSettings {
            low_pass: 0.5,
            high_pass: 30.0,
            band_stop: 50.0
        }
    );
}

#[tokio::test]
async fn discovery_announces_each_device_once() {
    let Some(mut server) = start_server_or_skip("discovery_announces_each_device_once").await else {
        return;
    };
    let client = HubClient::spawn(HubConfig::new(server.ws_url()));
    let mut events = client.subscribe();
    let mut connection = open_and_handshake(&mut server, &client, &mut events).await;

    connection
        .send_json(json!({"command": "currentdeviceinfo", "result": false}))
        .await;
    connection.expect_command("startsearch").await;
    connection
        .send_json(json!({"command": "startsearch", "result": true}))
        .await;
    connection.expect_command("listdevices").await;

    let listing = json!({
        "command": "listdevices",
        "devices": [{"name": "EEG-01", "serialNumber": "SN1"}]
    });
    connection.send_json(listing.clone()).await;
    let event = wait_for_event(&mut events, |e| {
        matches!(e, HubEvent::DeviceDiscovered { .. })
    })
    .await;
    assert!(matches!(
        event,
        HubEvent::DeviceDiscovered { id: DeviceId(0), ref info } if info.name == "EEG-01"
    ));

    connection.send_json(listing).await;
    eventually(|| async {
        client
            .devices()
            .await
            .unwrap()
            .iter()
            .all(|device| device.connected)
    })
    .await;

    let devices = client.devices().await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, DeviceId(0));
    assert_eq!(client.find_device("EEG-01").await.unwrap(), Some(DeviceId(0)));

    client.start_device(DeviceId(0), Some(4)).await.unwrap();
    let frame = connection
        .expect_command_skipping("startdevice", &["listdevices"])
        .await;
    assert_eq!(
        frame.json(),
        json!({"command": "startdevice", "sn": "SN1", "channels": 4})
    );
}

#[tokio::test]
async fn running_device_streams_grabbed_data() {
    let Some(mut server) = start_server_or_skip("running_device_streams_grabbed_data").await else {
        return;
    };
    let client = HubClient::spawn(HubConfig::new(server.ws_url()));
    let mut events = client.subscribe();
    let mut connection = open_and_handshake(&mut server, &client, &mut events).await;
    let id = report_running_device(&mut connection, &mut events).await;

    let current = client.current_device().await.unwrap().unwrap();
    assert!(current.started);
    assert_eq!(current.info.name, "EEG-01");

    client.set_grab(id, GrabKind::RawData, true).await.unwrap();
    connection.expect_command("enabledatagrabmode").await;
    connection
        .send_json(json!({"command": "enabledatagrabmode", "result": true}))
        .await;

    connection.expect_command("grabrawdata").await;
    connection
        .send_json(json!({"command": "grabrawdata", "data": [[1, 2, 3], [4, 5, 6]]}))
        .await;

    eventually(|| async {
        client
            .with(move |hub| hub.session(id).map(|s| s.buffered(GrabKind::RawData)))
            .await
            .unwrap()
            == Some(3)
    })
    .await;
    let data = client.read_raw_data_history(id).await.unwrap();
    assert_eq!(data, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    assert!(client.read_raw_data_history(id).await.unwrap().is_empty());

    client.set_grab(id, GrabKind::RawData, false).await.unwrap();
    connection
        .expect_command_skipping("disabledatagrabmode", &["grabrawdata"])
        .await;
}

#[tokio::test]
async fn device_events_carry_only_that_device() {
    let Some(mut server) = start_server_or_skip("device_events_carry_only_that_device").await else {
        return;
    };
    let client = HubClient::spawn(HubConfig::new(server.ws_url()));
    let mut events = client.subscribe();
    let mut connection = open_and_handshake(&mut server, &client, &mut events).await;
    let id = report_running_device(&mut connection, &mut events).await;

    let mut device_events = client.device_events(id);
    let mut other_events = client.device_events(DeviceId(id.0 + 1));

    connection
        .send_json(json!({"command": "meditation", "meditation": 33}))
        .await;

    let event = timeout(STEP_TIMEOUT, device_events.next())
        .await
        .expect("timed out waiting for device event");
    assert_eq!(event, Some(DeviceEvent::MeditationReady(33.0)));
    assert!(
        timeout(Duration::from_millis(100), other_events.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn setters_send_expected_frames() {
    let Some(mut server) = start_server_or_skip("setters_send_expected_frames").await else {
        return;
    };
    let client = HubClient::spawn(HubConfig::new(server.ws_url()));
    let mut events = client.subscribe();
    let mut connection = open_and_handshake(&mut server, &client, &mut events).await;

    client.set_data_storage_time(5).await.unwrap();
    let frame = connection.recv_frame().await;
    assert_eq!(frame.raw, r#"{"command":"setdatastoragetime","value":"5"}"#);

    client
        .set_filters(FilterSettings {
            low_pass: 1.0,
            high_pass: 30.0,
            band_stop: 50.0,
        })
        .await
        .unwrap();
    assert_eq!(connection.expect_command("setLPF").await.json()["value"], 1.0);
    assert_eq!(connection.expect_command("setHPF").await.json()["value"], 30.0);
    assert_eq!(connection.expect_command("setBSF").await.json()["value"], 50.0);

    client.send_raw("listdevices").await.unwrap();
    assert_eq!(connection.recv_frame().await.raw, "listdevices");
}

#[tokio::test]
async fn malformed_frames_do_not_break_the_session() {
    let Some(mut server) = start_server_or_skip("malformed_frames_do_not_break_the_session").await
    else {
        return;
    };
    let client = HubClient::spawn(HubConfig::new(server.ws_url()));
    let mut events = client.subscribe();
    let connection = open_and_handshake(&mut server, &client, &mut events).await;

    connection.send_text("not json at all").await;
    connection.send_text("[1, 2, 3]").await;
    connection
        .send_json(json!({"command": "grabrawdata", "data": [[1, 2], [3]]}))
        .await;
    connection
        .send_json(json!({"command": "getfilters", "LPF": 2, "HPF": 20, "BSF": 0}))
        .await;

    eventually(|| async { client.filters().await.unwrap().low_pass == 2.0 }).await;
    assert!(client.state().await.unwrap() >= HubState::Connected);
}

#[tokio::test]
async fn server_close_disconnects_and_refuses_commands() {
    let Some(mut server) = start_server_or_skip("server_close_disconnects_and_refuses_commands").await
    else {
        return;
    };
    let client = HubClient::spawn(HubConfig::new(server.ws_url()));
    let mut events = client.subscribe();
    let mut connection = open_and_handshake(&mut server, &client, &mut events).await;
    let id = report_running_device(&mut connection, &mut events).await;

    connection.force_close().await;
    wait_for_event(&mut events, |e| *e == HubEvent::Disconnected).await;

    assert_eq!(client.state().await.unwrap(), HubState::Disconnected);
    assert!(matches!(
        client.start_search().await,
        Err(NeuroplayError::NotConnected)
    ));
    assert!(matches!(
        client.set_grab(id, GrabKind::FilteredData, true).await,
        Err(NeuroplayError::NotConnected)
    ));
    // Sessions survive the disconnect.
    assert_eq!(client.find_device("EEG-01").await.unwrap(), Some(id));
}

#[tokio::test]
async fn close_stops_devices_before_disconnecting() {
    let Some(mut server) = start_server_or_skip("close_stops_devices_before_disconnecting").await
    else {
        return;
    };
    let client = HubClient::spawn(HubConfig::new(server.ws_url()));
    let mut events = client.subscribe();
    let mut connection = open_and_handshake(&mut server, &client, &mut events).await;
    report_running_device(&mut connection, &mut events).await;

    client.close().await.unwrap();
    connection.expect_command("stopdevice").await;
    wait_for_event(&mut events, |e| *e == HubEvent::Disconnected).await;

    assert!(client.devices().await.unwrap().is_empty());
    assert_eq!(client.state().await.unwrap(), HubState::Disconnected);
}

#[tokio::test]
async fn unknown_device_is_reported() {
    let Some(mut server) = start_server_or_skip("unknown_device_is_reported").await else {
        return;
    };
    let client = HubClient::spawn(HubConfig::new(server.ws_url()));
    let mut events = client.subscribe();
    let _connection = open_and_handshake(&mut server, &client, &mut events).await;

    let err = client.stop_device(DeviceId(9)).await.unwrap_err();
    assert!(matches!(err, NeuroplayError::UnknownDevice { id: 9 }));
}

#[tokio::test]
async fn open_fails_when_hub_is_unreachable() {
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("Skipping open_fails_when_hub_is_unreachable: {err}");
            return;
        }
    };
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = HubConfig::new(format!("ws://{addr}"));
    config.connection.connect_timeout_secs = 1;
    let client = HubClient::spawn(config);

    let err = client.open().await.unwrap_err();
    assert!(
        matches!(
            err,
            NeuroplayError::ConnectionFailed { .. } | NeuroplayError::Timeout { .. }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(client.state().await.unwrap(), HubState::Disconnected);
}
