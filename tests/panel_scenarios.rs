// MIT License - Copyright (c) 2026 Peter Wright
// End-to-end scenarios against an in-process mock panel

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{FramedRead, FramedWrite};

use satel_integra::{
    AlarmState, Command, ErrorKind, EventReceiver, Frame, FrameCodec, PanelConfig, PanelEvent,
    PartitionStateKind, ResultCode, SatelError, SatelPanel, StatusKind,
};

const KEY: &str = "secret";
const WAIT: Duration = Duration::from_secs(3);

enum Control {
    Push(Frame),
    Raw(Vec<u8>),
    Drop,
}

/// Accepts client connections, records every request and answers with
/// whatever the responder returns.
struct MockPanel {
    port: u16,
    control: mpsc::UnboundedSender<Control>,
    requests: mpsc::UnboundedReceiver<(u8, Command)>,
    _server: JoinHandle<()>,
}

impl MockPanel {
    async fn start<F>(responder: F) -> Self
    where
        F: Fn(u8, &Command) -> Vec<Frame> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (control, mut control_rx) = mpsc::unbounded_channel();
        let (request_tx, requests) = mpsc::unbounded_channel();

        let server = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let (r, w) = socket.into_split();
                let mut frames = FramedRead::new(r, FrameCodec::new(KEY));
                let mut sink = FramedWrite::new(w, FrameCodec::new(KEY));
                loop {
                    tokio::select! {
                        item = frames.next() => match item {
                            Some(Ok(Ok(Frame::Request { correlation_id, command }))) => {
                                let replies = responder(correlation_id, &command);
                                let _ = request_tx.send((correlation_id, command));
                                for reply in replies {
                                    let _ = sink.send(reply).await;
                                }
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        ctl = control_rx.recv() => match ctl {
                            Some(Control::Push(frame)) => {
                                let _ = sink.send(frame).await;
                            }
                            Some(Control::Raw(bytes)) => {
                                let _ = sink.get_mut().write_all(&bytes).await;
                            }
                            Some(Control::Drop) | None => break,
                        },
                    }
                }
            }
        });

        Self {
            port,
            control,
            requests,
            _server: server,
        }
    }

    fn push(&self, frame: Frame) {
        self.control.send(Control::Push(frame)).unwrap();
    }

    fn push_status(&self, kind: StatusKind, ids: &[u32]) {
        self.push(Frame::Status {
            kind,
            ids: ids.iter().copied().collect(),
        });
    }

    fn drop_connection(&self) {
        self.control.send(Control::Drop).unwrap();
    }

    /// Next request other than the monitoring subscription and keep-alives.
    async fn next_command(&mut self) -> (u8, Command) {
        timeout(WAIT, async {
            loop {
                let (corr, command) = self.requests.recv().await.unwrap();
                if !matches!(
                    command,
                    Command::StartMonitoring { .. } | Command::KeepAlive
                ) {
                    return (corr, command);
                }
            }
        })
        .await
        .expect("no command reached the panel")
    }

    /// Wait for a monitoring subscription (sent after every connect).
    async fn next_subscription(&mut self) {
        timeout(WAIT, async {
            loop {
                let (_, command) = self.requests.recv().await.unwrap();
                if matches!(command, Command::StartMonitoring { .. }) {
                    return;
                }
            }
        })
        .await
        .expect("no monitoring subscription");
    }
}

fn ok_to_everything(corr: u8, _: &Command) -> Vec<Frame> {
    vec![Frame::response(corr, ResultCode::Ok)]
}

fn config(port: u16) -> PanelConfig {
    PanelConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .integration_key(KEY)
        .partitions([1, 2])
        .temperature_sensors([5, 6])
        .command_timeout_ms(2000)
        .temperature_timeout_ms(300)
        .connect_timeout_ms(1000)
        .reconnect_delay_ms(50)
        .max_reconnect_delay_ms(200)
        .max_connect_retries(0)
        .keep_alive_interval_ms(0)
        .build()
}

async fn next_state_change(events: &mut EventReceiver) -> Option<StatusKind> {
    timeout(WAIT, async {
        loop {
            if let PanelEvent::StateChanged { kind } = events.recv().await.unwrap() {
                return kind;
            }
        }
    })
    .await
    .expect("no state change event")
}

async fn wait_for(events: &mut EventReceiver, wanted: PanelEvent) {
    timeout(WAIT, async {
        while events.recv().await.unwrap() != wanted {}
    })
    .await
    .expect("event not seen");
}

#[tokio::test]
async fn test_armed_mode0_maps_to_armed_away() {
    let mut mock = MockPanel::start(ok_to_everything).await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();
    let mut events = panel.subscribe();
    mock.next_subscription().await;

    mock.push_status(StatusKind::ArmedMode0, &[1]);
    assert_eq!(next_state_change(&mut events).await, Some(StatusKind::ArmedMode0));

    let states = panel.partition_states().await;
    assert_eq!(states[&PartitionStateKind::ArmedMode0], [1].into_iter().collect());
    assert_eq!(states[&PartitionStateKind::Disarmed], [2].into_iter().collect());
    assert_eq!(panel.alarm_state(1).await, Some(AlarmState::ArmedAway));
    assert_eq!(panel.alarm_state(2).await, Some(AlarmState::Disarmed));

    panel.disconnect().await;
    assert_eq!(panel.alarm_state(1).await, None);
}

#[tokio::test]
async fn test_disarm_then_clear_alarm() {
    let mut mock = MockPanel::start(ok_to_everything).await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();
    let mut events = panel.subscribe();
    mock.next_subscription().await;

    mock.push_status(StatusKind::Triggered, &[1]);
    next_state_change(&mut events).await;
    assert_eq!(panel.alarm_state(1).await, Some(AlarmState::Triggered));

    panel.disarm("1234", &[1]).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    panel.clear_alarm("1234", &[1]).await.unwrap();

    let (first_corr, first) = mock.next_command().await;
    let (second_corr, second) = mock.next_command().await;
    assert!(matches!(first, Command::Disarm { ref partitions, .. } if partitions.contains(&1)));
    assert!(matches!(second, Command::ClearAlarm { ref partitions, .. } if partitions.contains(&1)));
    assert_ne!(first_corr, second_corr);
}

#[tokio::test]
async fn test_disconnect_fails_pending_commands() {
    // Arm commands are never answered
    let mut mock = MockPanel::start(|corr, command| match command {
        Command::Arm { .. } => Vec::new(),
        _ => ok_to_everything(corr, command),
    })
    .await;
    let panel = Arc::new(SatelPanel::connect(config(mock.port)).await.unwrap());
    let mut events = panel.subscribe();
    mock.next_subscription().await;

    let p1 = panel.clone();
    let first = tokio::spawn(async move { p1.arm("1234", &[1], None).await });
    let p2 = panel.clone();
    let second = tokio::spawn(async move { p2.arm("1234", &[2], None).await });
    mock.next_command().await;
    mock.next_command().await;

    mock.drop_connection();
    let first = timeout(WAIT, first).await.unwrap().unwrap();
    let second = timeout(WAIT, second).await.unwrap().unwrap();
    assert!(matches!(first, Err(SatelError::ConnectionLost)));
    assert!(matches!(second, Err(SatelError::ConnectionLost)));

    // The client comes back on its own and subscribes again
    wait_for(&mut events, PanelEvent::Connected).await;
    mock.next_subscription().await;
    assert!(panel.is_connected());
}

#[tokio::test]
async fn test_temperature_timeout_leaves_no_waiter() {
    let mock = MockPanel::start(ok_to_everything).await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();

    let err = panel.read_temp_and_wait(5).await.unwrap_err();
    assert!(matches!(err, SatelError::TemperatureTimeout { sensor: 5 }));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(panel.pending_temperature_reads(5), 0);
}

#[tokio::test]
async fn test_temperature_reading() {
    let mock = MockPanel::start(|corr, command| {
        let mut replies = vec![Frame::response(corr, ResultCode::Ok)];
        if let Command::ReadTemperature { sensor } = command {
            let value = if *sensor == 6 { None } else { Some(21.5) };
            replies.push(Frame::Temperature {
                sensor: *sensor,
                value,
            });
        }
        replies
    })
    .await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();

    assert_eq!(panel.read_temp_and_wait(5).await.unwrap(), 21.5);
    assert_eq!(panel.temperature(5).await.unwrap().value, 21.5);

    let all = panel.read_all_temperatures().await;
    assert_eq!(*all[&5].as_ref().unwrap(), 21.5);
    assert!(matches!(all[&6], Err(SatelError::TemperatureUnavailable { sensor: 6 })));
    assert_eq!(panel.pending_temperature_reads(5), 0);
    assert_eq!(panel.pending_temperature_reads(6), 0);
}

#[tokio::test]
async fn test_concurrent_temperature_reads_share_one_poll() {
    let mut mock = MockPanel::start(ok_to_everything).await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();
    mock.next_subscription().await;

    let reads = async { tokio::join!(panel.read_temp_and_wait(5), panel.read_temp_and_wait(5)) };
    let push = async {
        let (_, command) = mock.next_command().await;
        assert!(matches!(command, Command::ReadTemperature { sensor: 5 }));
        mock.push(Frame::Temperature {
            sensor: 5,
            value: Some(19.0),
        });
    };
    let ((a, b), ()) = tokio::join!(reads, push);
    assert_eq!(a.unwrap(), 19.0);
    assert_eq!(b.unwrap(), 19.0);

    sleep(Duration::from_millis(50)).await;
    assert!(mock.requests.try_recv().is_err(), "second poll was sent");
}

#[tokio::test]
async fn test_rejected_poll_fails_every_reader() {
    let mock = MockPanel::start(|corr, command| match command {
        Command::ReadTemperature { .. } => vec![Frame::response(corr, ResultCode::OtherError)],
        _ => ok_to_everything(corr, command),
    })
    .await;
    let mut config = config(mock.port);
    config.temperature_timeout_ms = 5000;
    let panel = SatelPanel::connect(config).await.unwrap();

    let (a, b) = timeout(Duration::from_secs(1), async {
        tokio::join!(panel.read_temp_and_wait(5), panel.read_temp_and_wait(5))
    })
    .await
    .expect("readers waited out the temperature timeout");
    assert!(matches!(a, Err(SatelError::Rejected(ResultCode::OtherError))));
    assert!(matches!(b, Err(SatelError::Rejected(ResultCode::OtherError))));
    assert_eq!(panel.pending_temperature_reads(5), 0);
}

#[tokio::test]
async fn test_duplicate_status_notifies_once() {
    let mut mock = MockPanel::start(ok_to_everything).await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();
    let mut events = panel.subscribe();
    mock.next_subscription().await;

    mock.push_status(StatusKind::ArmedMode0, &[1]);
    mock.push_status(StatusKind::ArmedMode0, &[1]);
    mock.push_status(StatusKind::EntryTime, &[1]);

    assert_eq!(next_state_change(&mut events).await, Some(StatusKind::ArmedMode0));
    assert_eq!(next_state_change(&mut events).await, Some(StatusKind::EntryTime));
    assert_eq!(panel.alarm_state(1).await, Some(AlarmState::Pending));
}

#[tokio::test]
async fn test_arming_push_moves_partition_between_modes() {
    let mut mock = MockPanel::start(ok_to_everything).await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();
    let mut events = panel.subscribe();
    mock.next_subscription().await;

    mock.push_status(StatusKind::ArmedMode0, &[1, 2]);
    next_state_change(&mut events).await;
    mock.push_status(StatusKind::ArmedMode1, &[2]);
    next_state_change(&mut events).await;

    let states = panel.partition_states().await;
    assert_eq!(states[&PartitionStateKind::ArmedMode0], [1].into_iter().collect());
    assert_eq!(states[&PartitionStateKind::ArmedMode1], [2].into_iter().collect());
    assert_eq!(panel.alarm_state(2).await, Some(AlarmState::ArmedHome));
}

#[tokio::test]
async fn test_wrong_code_is_auth_error() {
    let mock = MockPanel::start(|corr, command| match command {
        Command::Arm { .. } => vec![Frame::response(corr, ResultCode::WrongCode)],
        _ => ok_to_everything(corr, command),
    })
    .await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();

    let err = panel.arm("9999", &[1], None).await.unwrap_err();
    assert!(matches!(err, SatelError::Auth(ResultCode::WrongCode)));
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(panel.is_connected());
}

#[tokio::test]
async fn test_cannot_arm_is_rejected() {
    let mock = MockPanel::start(|corr, command| match command {
        Command::Arm { .. } => vec![Frame::response(corr, ResultCode::CannotArm)],
        _ => ok_to_everything(corr, command),
    })
    .await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();

    let err = panel.arm_home("1234", &[1]).await.unwrap_err();
    assert!(matches!(err, SatelError::Rejected(ResultCode::CannotArm)));
}

#[tokio::test]
async fn test_unknown_result_code_is_protocol_error() {
    let mock = MockPanel::start(|corr, command| match command {
        Command::Disarm { .. } => vec![Frame::Response {
            correlation_id: corr,
            result: 0x42,
        }],
        _ => ok_to_everything(corr, command),
    })
    .await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();

    let err = panel.disarm("1234", &[1]).await.unwrap_err();
    assert!(matches!(err, SatelError::UnknownResultCode(0x42)));
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn test_out_of_order_responses() {
    // Output commands are answered by hand below
    let mut mock = MockPanel::start(|corr, command| match command {
        Command::SetOutputs { .. } => Vec::new(),
        _ => ok_to_everything(corr, command),
    })
    .await;
    let panel = Arc::new(SatelPanel::connect(config(mock.port)).await.unwrap());
    mock.next_subscription().await;

    let p1 = panel.clone();
    let first = tokio::spawn(async move { p1.set_output("1234", 1, true).await });
    let p2 = panel.clone();
    let second = tokio::spawn(async move { p2.set_output("1234", 2, false).await });

    let mut corr_by_output = std::collections::HashMap::new();
    for _ in 0..2 {
        let (corr, command) = mock.next_command().await;
        if let Command::SetOutputs { outputs, .. } = command {
            corr_by_output.insert(*outputs.iter().next().unwrap(), corr);
        }
    }

    // Answer the later request first
    mock.push(Frame::response(corr_by_output[&2], ResultCode::Ok));
    mock.push(Frame::response(corr_by_output[&1], ResultCode::OtherError));

    let first = timeout(WAIT, first).await.unwrap().unwrap();
    let second = timeout(WAIT, second).await.unwrap().unwrap();
    assert!(matches!(first, Err(SatelError::Rejected(ResultCode::OtherError))));
    assert!(second.is_ok());
}

#[tokio::test]
async fn test_empty_code_never_reaches_panel() {
    let mut mock = MockPanel::start(ok_to_everything).await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();
    mock.next_subscription().await;

    let err = panel.arm("", &[1], None).await.unwrap_err();
    assert!(matches!(err, SatelError::EmptyCode));
    assert_eq!(err.kind(), ErrorKind::Auth);
    let err = panel.disarm("  ", &[1]).await.unwrap_err();
    assert!(matches!(err, SatelError::EmptyCode));

    sleep(Duration::from_millis(50)).await;
    assert!(mock.requests.try_recv().is_err());
}

#[tokio::test]
async fn test_corrupt_frame_is_dropped_and_connection_kept() {
    let mut mock = MockPanel::start(ok_to_everything).await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();
    let mut events = panel.subscribe();
    mock.next_subscription().await;

    // Valid start marker, garbage body, bad checksum
    mock.control
        .send(Control::Raw(vec![0xFE, 0xFE, 0x03, 0x00, 0x01, 0x13, 0xAA, 0xBB, 0xFE, 0x0D]))
        .unwrap();
    mock.push_status(StatusKind::Triggered, &[2]);

    assert_eq!(next_state_change(&mut events).await, Some(StatusKind::Triggered));
    assert!(panel.is_connected());
    assert_eq!(panel.alarm_state(2).await, Some(AlarmState::Triggered));
}

#[tokio::test]
async fn test_subscribe_with_callback() {
    let mut mock = MockPanel::start(ok_to_everything).await;
    let panel = SatelPanel::connect(config(mock.port)).await.unwrap();
    mock.next_subscription().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = panel.subscribe_with(move |event| {
        let _ = tx.send(event);
    });

    mock.push_status(StatusKind::TriggeredFire, &[1]);
    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        PanelEvent::StateChanged {
            kind: Some(StatusKind::TriggeredFire)
        }
    );

    subscription.unsubscribe();
    sleep(Duration::from_millis(20)).await;
    mock.push_status(StatusKind::TriggeredFire, &[]);
    sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_connect_refused_is_connection_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = SatelPanel::connect(config(port)).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = PanelConfig::builder().partitions([0]).build();
    let err = SatelPanel::connect(config).await.err().unwrap();
    assert!(matches!(err, SatelError::InvalidDeviceId { id: 0, .. }));
}
