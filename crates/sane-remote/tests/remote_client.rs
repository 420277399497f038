//! Integration tests for the remote client against an in-process daemon.

mod common;

use std::time::{Duration, Instant};

use common::{FakeDaemon, Script, Stats};
use sane_remote::{ChannelBrowser, Client, ClientConfig, DiscoveryEvent, NetError, ReadStatus, Session};
use sane_wire::{Action, ByteOrder, Frame, Info, OptionValue, Parameters, Status};

fn config_for(daemon: &FakeDaemon) -> ClientConfig {
    ClientConfig {
        port: daemon.port(),
        connect_timeout: Some(Duration::from_secs(5)),
        username: Some("alice".into()),
        hosts: Vec::new(),
    }
}

fn foreign_order() -> ByteOrder {
    match ByteOrder::native() {
        ByteOrder::LittleEndian => ByteOrder::BigEndian,
        ByteOrder::BigEndian => ByteOrder::LittleEndian,
    }
}

fn samples() -> Vec<u16> {
    (0..40u16).map(|i| i * 0x0101 + 1).collect()
}

fn sample_bytes(order: ByteOrder) -> Vec<u8> {
    samples()
        .into_iter()
        .flat_map(|s| match order {
            ByteOrder::BigEndian => s.to_be_bytes(),
            ByteOrder::LittleEndian => s.to_le_bytes(),
        })
        .collect()
}

fn sixteen_bit_script(order: ByteOrder) -> Script {
    Script {
        params: Parameters {
            format: Frame::Gray,
            last_frame: true,
            bytes_per_line: 16,
            pixels_per_line: 8,
            lines: 5,
            depth: 16,
        },
        byte_order: order,
        data: sample_bytes(order),
        record_len: 7,
        ..Script::default()
    }
}

async fn read_all(session: &mut Session, chunk: usize) -> Result<Vec<u8>, NetError> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        match session.read(&mut buf).await? {
            ReadStatus::Data(len) => out.extend_from_slice(&buf[..len]),
            ReadStatus::Eof => return Ok(out),
        }
    }
}

#[tokio::test]
async fn hosts_from_every_source_are_registered_once() {
    common::init_tracing();
    let daemon = FakeDaemon::spawn(Script::default()).await;
    let mut config = config_for(&daemon);
    config.apply_config_text("# lab scanners\n127.0.0.1\n").unwrap();
    config.apply_env_values(Some("127.0.0.1:[127.0.0.1]"), None).unwrap();
    assert_eq!(config.hosts.len(), 3);

    let mut client = Client::init(config, None).await;
    assert_eq!(client.registry().len(), 1);

    let (tx, browser) = ChannelBrowser::new(4);
    client.start_discovery(Box::new(browser));
    tx.send(DiscoveryEvent::Found {
        host_name: "127.0.0.1".into(),
        address: None,
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.registry().len(), 1);

    let devices = client.get_devices(false).await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "127.0.0.1:pixma");
    assert_eq!(devices[0].vendor, "Canon");
    assert_eq!(Stats::count(&daemon.stats.get_devices), 1);
    assert_eq!(Stats::count(&daemon.stats.connections), 1);
    assert_eq!(
        daemon.stats.usernames.lock().unwrap().as_slice(),
        &[Some("alice".to_string())]
    );

    client.shutdown().await;
    assert!(Stats::wait_for(&daemon.stats.exits, 1).await);
}

#[tokio::test]
async fn local_only_listing_is_empty() {
    let daemon = FakeDaemon::spawn(Script::default()).await;
    let mut config = config_for(&daemon);
    config.hosts.push("127.0.0.1".into());
    let client = Client::init(config, None).await;
    assert!(client.get_devices(true).await.is_empty());
    assert_eq!(Stats::count(&daemon.stats.get_devices), 0);
}

#[tokio::test]
async fn open_rejects_bad_names() {
    let daemon = FakeDaemon::spawn(Script::default()).await;
    let client = Client::init(config_for(&daemon), None).await;

    let err = client.open(":pixma").await.unwrap_err();
    assert!(matches!(err, NetError::Invalid(_)), "{err:?}");

    let err = client.open("127.0.0.1:no-such-scanner").await.unwrap_err();
    assert!(matches!(err, NetError::Invalid(_)), "{err:?}");
    // The unknown host was registered on the way.
    assert_eq!(client.registry().len(), 1);
}

#[tokio::test]
async fn empty_device_name_opens_first_device() {
    let daemon = FakeDaemon::spawn(Script::default()).await;
    let client = Client::init(config_for(&daemon), None).await;
    let session = client.open("127.0.0.1").await.unwrap();
    assert_eq!(session.host_name(), "127.0.0.1");
    assert_eq!(session.device_name(), "");
    assert_eq!(session.handle(), 1);
    session.close().await.unwrap();
    assert_eq!(Stats::count(&daemon.stats.closes), 1);
}

#[tokio::test]
async fn options_round_trip_through_the_daemon() {
    let daemon = FakeDaemon::spawn(Script::default()).await;
    let client = Client::init(config_for(&daemon), None).await;
    let mut session = client.open("127.0.0.1:pixma").await.unwrap();

    let count = session.option_descriptors().await.unwrap().len();
    assert_eq!(count, 4);
    assert_eq!(session.option_descriptor(1).await.unwrap().name, "resolution");

    let update = session
        .control_option(1, Action::GetValue, OptionValue::None)
        .await
        .unwrap();
    assert_eq!(update.value, OptionValue::Int(vec![150]));

    let update = session
        .control_option(2, Action::SetValue, OptionValue::String("Gray".into()))
        .await
        .unwrap();
    assert_eq!(update.value, OptionValue::String("Gray".into()));

    let update = session
        .control_option(3, Action::SetAuto, OptionValue::None)
        .await
        .unwrap();
    assert!(update.info.contains(Info::RELOAD_PARAMS));

    let err = session
        .control_option(9, Action::GetValue, OptionValue::None)
        .await
        .unwrap_err();
    assert!(matches!(err, NetError::Invalid(_)));
    // Only the open fetched descriptors.
    assert_eq!(Stats::count(&daemon.stats.option_fetches), 1);
    session.close().await.unwrap();
}

#[tokio::test]
async fn reload_options_blocks_control_until_refetched() {
    let daemon = FakeDaemon::spawn(Script {
        reload_on_set: true,
        ..Script::default()
    })
    .await;
    let client = Client::init(config_for(&daemon), None).await;
    let mut session = client.open("127.0.0.1:pixma").await.unwrap();

    let update = session
        .control_option(1, Action::SetValue, OptionValue::Int(vec![300]))
        .await
        .unwrap();
    assert!(update.info.contains(Info::RELOAD_OPTIONS));

    let err = session
        .control_option(1, Action::GetValue, OptionValue::None)
        .await
        .unwrap_err();
    assert!(matches!(err, NetError::Invalid(_)), "{err:?}");

    session.option_descriptors().await.unwrap();
    assert_eq!(Stats::count(&daemon.stats.option_fetches), 2);
    let update = session
        .control_option(1, Action::GetValue, OptionValue::None)
        .await
        .unwrap();
    assert_eq!(update.value, OptionValue::Int(vec![300]));
}

#[tokio::test]
async fn sixteen_bit_scan_from_foreign_peer_is_swapped() {
    common::init_tracing();
    let daemon = FakeDaemon::spawn(sixteen_bit_script(foreign_order())).await;
    let client = Client::init(config_for(&daemon), None).await;
    let mut session = client.open("127.0.0.1:pixma").await.unwrap();

    let params = session.get_parameters().await.unwrap();
    assert_eq!(params.depth, 16);
    session.start().await.unwrap();
    assert!(session.is_scanning());
    assert_eq!(session.peer_byte_order(), Some(foreign_order()));

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, NetError::Invalid(_)));

    let data = read_all(&mut session, 5).await.unwrap();
    assert_eq!(data, sample_bytes(ByteOrder::native()));
    assert!(!session.is_scanning());
    session.close().await.unwrap();
}

#[tokio::test]
async fn sixteen_bit_scan_from_same_order_peer_is_untouched() {
    let daemon = FakeDaemon::spawn(sixteen_bit_script(ByteOrder::native())).await;
    let client = Client::init(config_for(&daemon), None).await;
    let mut session = client.open("127.0.0.1:pixma").await.unwrap();
    session.start().await.unwrap();
    let data = read_all(&mut session, 3).await.unwrap();
    assert_eq!(data, sample_bytes(ByteOrder::native()));
}

#[tokio::test]
async fn eight_bit_scan_spans_records() {
    let daemon = FakeDaemon::spawn(Script::default()).await;
    let client = Client::init(config_for(&daemon), None).await;
    let mut session = client.open("127.0.0.1:pixma").await.unwrap();
    session.start().await.unwrap();
    let data = read_all(&mut session, 4096).await.unwrap();
    assert_eq!(data, (0..32u8).collect::<Vec<_>>());

    // A second frame on the same session.
    session.start().await.unwrap();
    let data = read_all(&mut session, 10).await.unwrap();
    assert_eq!(data.len(), 32);
}

#[tokio::test]
async fn error_status_ends_the_stream() {
    let daemon = FakeDaemon::spawn(Script {
        final_status: Status::Jammed,
        ..Script::default()
    })
    .await;
    let client = Client::init(config_for(&daemon), None).await;
    let mut session = client.open("127.0.0.1:pixma").await.unwrap();
    session.start().await.unwrap();

    let err = read_all(&mut session, 64).await.unwrap_err();
    assert_eq!(err.status(), Status::Jammed);
    let mut buf = [0u8; 8];
    assert!(matches!(session.read(&mut buf).await, Err(NetError::Cancelled)));
}

#[tokio::test]
async fn cancel_tears_down_the_data_link() {
    let daemon = FakeDaemon::spawn(Script::default()).await;
    let client = Client::init(config_for(&daemon), None).await;
    let mut session = client.open("127.0.0.1:pixma").await.unwrap();
    session.start().await.unwrap();

    let mut buf = [0u8; 3];
    assert!(matches!(session.read(&mut buf).await, Ok(ReadStatus::Data(_))));
    session.cancel().await.unwrap();
    assert_eq!(Stats::count(&daemon.stats.cancels), 1);
    assert!(!session.is_scanning());
    assert!(matches!(session.read(&mut buf).await, Err(NetError::Cancelled)));
    assert!(matches!(session.set_io_mode(true), Err(NetError::Invalid(_))));
}

#[tokio::test]
async fn unanswered_cancel_gives_up_and_reconnects() {
    common::init_tracing();
    let daemon = FakeDaemon::spawn(Script {
        silent_cancel: true,
        ..Script::default()
    })
    .await;
    let mut config = config_for(&daemon);
    config.connect_timeout = Some(Duration::from_millis(300));
    let client = Client::init(config, None).await;
    let mut session = client.open("127.0.0.1:pixma").await.unwrap();
    session.start().await.unwrap();

    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(3), session.cancel())
        .await
        .expect("cancel waited for the acknowledgement");
    assert!(matches!(result, Err(NetError::Cancelled)), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(Stats::count(&daemon.stats.cancels), 1);

    // The data link went away regardless.
    assert!(!session.is_scanning());
    let mut buf = [0u8; 4];
    assert!(matches!(session.read(&mut buf).await, Err(NetError::Cancelled)));

    // The stale control link is replaced on next use.
    let devices = client.get_devices(false).await;
    assert_eq!(devices.len(), 1);
    assert_eq!(Stats::count(&daemon.stats.connections), 2);
}

#[tokio::test]
async fn non_blocking_reads_never_wait() {
    let daemon = FakeDaemon::spawn(Script::default()).await;
    let client = Client::init(config_for(&daemon), None).await;
    let mut session = client.open("127.0.0.1:pixma").await.unwrap();
    assert!(matches!(session.set_io_mode(true), Err(NetError::Invalid(_))));
    session.start().await.unwrap();
    session.set_io_mode(true).unwrap();

    let mut out = Vec::new();
    let mut buf = [0u8; 16];
    loop {
        session.readable().await.unwrap();
        match session.read(&mut buf).await.unwrap() {
            ReadStatus::Data(len) => out.extend_from_slice(&buf[..len]),
            ReadStatus::Eof => break,
        }
    }
    assert_eq!(out, (0..32u8).collect::<Vec<_>>());
}

#[tokio::test]
async fn shutdown_sends_exit_on_every_link() {
    let first = FakeDaemon::spawn(Script::default()).await;
    let client = Client::init(config_for(&first), None).await;
    client.open("127.0.0.1:pixma").await.unwrap();
    client.shutdown().await;
    assert!(Stats::wait_for(&first.stats.exits, 1).await);
}
