//! `ScrcpyClient` against an in-process fake companion server.
//!
//! The mock tool runner stands in for `adb`.  When the client asks for
//! `adb forward tcp:<port> ...`, the responder binds a listener on that port
//! and a thread plays the server side: dummy byte, metadata, packets, then
//! it records whatever arrives on the control socket.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use devfarm_core::protocol::control::{INJECT_KEYCODE_SIZE, INJECT_TOUCH_SIZE, KEYCODE_HOME};
use devfarm_core::{
    ControlMessage, DeviceIdentity, FrameHeader, FrameKind, KeyAction, TouchAction, VideoMetadata,
};
use devfarm_engine::domain::config::ScrcpyConfig;
use devfarm_engine::infrastructure::adb::Adb;
use devfarm_engine::infrastructure::scrcpy::ScrcpyClient;
use devfarm_engine::infrastructure::tools::mock::{ok, MockToolRunner};
use devfarm_engine::{DeviceStream, EngineError};

const SERIAL: &str = "emulator-5554";

/// How the fake server behaves after accepting the video socket.
#[derive(Clone, Copy)]
enum Behaviour {
    /// Full session: handshake, stream, then accept control.
    Normal,
    /// Close the video socket without the handshake byte.
    NoHandshake,
    /// Stream video but refuse the control connection.
    NoControl,
    /// Stream video, then exit and close both sockets.
    ExitAfterStream,
    /// Refuse the first control attempts, then listen again and accept.
    LateControl,
}

fn server_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8];
    bytes.extend_from_slice(
        &VideoMetadata {
            codec_id: *b"h264",
            width: 1080,
            height: 2400,
        }
        .encode(),
    );
    let packets: [(u64, bool, bool, &[u8]); 2] = [
        (0, true, false, &[0, 0, 0, 1]),
        (1000, false, true, &[9, 8, 7, 6, 5]),
    ];
    for (pts, is_config, is_keyframe, payload) in packets {
        let header = FrameHeader {
            pts,
            is_config,
            is_keyframe,
            payload_len: payload.len() as u32,
        };
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(payload);
    }
    bytes
}

fn play_server(listener: TcpListener, behaviour: Behaviour, control_tx: mpsc::Sender<Vec<u8>>) {
    let Ok((mut video, _)) = listener.accept() else { return };
    match behaviour {
        Behaviour::NoHandshake => {
            drop(video);
        }
        Behaviour::NoControl => {
            drop(listener);
            let _ = video.write_all(&server_bytes());
            // Hold the socket open until the client hangs up.
            let _ = video.read(&mut [0u8; 1]);
        }
        Behaviour::ExitAfterStream => {
            let _ = video.write_all(&server_bytes());
            let control = listener.accept();
            drop(control);
            drop(video);
        }
        Behaviour::Normal => {
            let _ = video.write_all(&server_bytes());
            record_control(&listener, &control_tx);
        }
        Behaviour::LateControl => {
            let Ok(addr) = listener.local_addr() else { return };
            drop(listener);
            let _ = video.write_all(&server_bytes());
            thread::sleep(Duration::from_millis(30));
            let Ok(listener) = TcpListener::bind(addr) else { return };
            record_control(&listener, &control_tx);
        }
    }
}

fn record_control(listener: &TcpListener, control_tx: &mpsc::Sender<Vec<u8>>) {
    let Ok((mut control, _)) = listener.accept() else { return };
    let mut received = Vec::new();
    let _ = control.read_to_end(&mut received);
    let _ = control_tx.send(received);
}

struct Harness {
    runner: Arc<MockToolRunner>,
    control_rx: mpsc::Receiver<Vec<u8>>,
    config: ScrcpyConfig,
    _server_jar: tempfile::NamedTempFile,
}

fn harness(behaviour: Behaviour) -> Harness {
    let (control_tx, control_rx) = mpsc::channel();
    let control_tx = Mutex::new(control_tx);
    let runner = MockToolRunner::new(move |_, args| {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["-s", _, "shell", "wm", "size"] => ok("Physical size: 720x1280\n"),
            ["-s", _, "forward", local, _] if local.starts_with("tcp:") => {
                let port: u16 = local.trim_start_matches("tcp:").parse().unwrap();
                let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
                let tx = control_tx.lock().unwrap().clone();
                thread::spawn(move || play_server(listener, behaviour, tx));
                ok("")
            }
            _ => ok(""),
        }
    })
    .with_process_stderr("java.lang.IllegalStateException: boom\n");

    let jar = tempfile::NamedTempFile::new().unwrap();
    let config = ScrcpyConfig {
        server_path: Some(jar.path().to_path_buf()),
        launch_grace_ms: 0,
        connect_backoff_ms: 20,
        handshake_timeout_ms: 1000,
        ..ScrcpyConfig::default()
    };
    Harness {
        runner: Arc::new(runner),
        control_rx,
        config,
        _server_jar: jar,
    }
}

async fn launch(h: &Harness) -> Result<ScrcpyClient, EngineError> {
    ScrcpyClient::launch(
        Adb::new(h.runner.clone()),
        DeviceIdentity::android("Pixel_7"),
        SERIAL,
        &h.config,
    )
    .await
}

#[tokio::test]
async fn test_session_streams_frames_and_injects_input() {
    // Arrange
    let h = harness(Behaviour::Normal);
    let client = launch(&h).await.unwrap();
    assert_eq!(client.metrics().pixel_size(), (720, 1280), "seeded from wm size");

    // Act: read both packets
    let config = client.next_frame().await.unwrap().unwrap();
    let keyframe = client.next_frame().await.unwrap().unwrap();

    // Assert: metadata replaced the seed size, packets kept their flags
    assert_eq!(client.metrics().pixel_size(), (1080, 2400));
    assert_eq!(
        config.kind,
        FrameKind::Packet {
            pts: 0,
            config: true,
            keyframe: false
        }
    );
    assert_eq!(config.payload, vec![0, 0, 0, 1]);
    assert_eq!(
        keyframe.kind,
        FrameKind::Packet {
            pts: 1000,
            config: false,
            keyframe: true
        }
    );
    assert_eq!(keyframe.len(), 5);

    // Act: inject, then tear down so the server sees EOF on control
    assert!(client.has_control().await);
    client.inject_touch(TouchAction::Up, 540, 1200).await;
    client.go_home().await;
    client.shutdown().await;

    // Assert: exactly one touch and two key messages arrived
    let received = h.control_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(received.len(), INJECT_TOUCH_SIZE + 2 * INJECT_KEYCODE_SIZE);
    assert_eq!(
        ControlMessage::decode(&received).unwrap(),
        ControlMessage::touch(TouchAction::Up, 540, 1200, 1080, 2400)
    );
    let down = &received[INJECT_TOUCH_SIZE..];
    assert_eq!(
        ControlMessage::decode(down).unwrap(),
        ControlMessage::key(KeyAction::Down, KEYCODE_HOME)
    );
    assert_eq!(
        ControlMessage::decode(&down[INJECT_KEYCODE_SIZE..]).unwrap(),
        ControlMessage::key(KeyAction::Up, KEYCODE_HOME)
    );
}

#[tokio::test]
async fn test_launch_pushes_server_and_starts_app_process() {
    let h = harness(Behaviour::Normal);
    let client = launch(&h).await.unwrap();

    assert_eq!(h.runner.calls_matching("push"), 1);
    assert_eq!(h.runner.calls_matching("/data/local/tmp/scrcpy-server.jar"), 1);
    let spawns = h.runner.spawns.lock().unwrap().clone();
    assert_eq!(spawns.len(), 1);
    let line = spawns[0].command_line();
    assert!(line.starts_with(concat!(
        "adb -s emulator-5554 shell CLASSPATH=/data/local/tmp/scrcpy-server.jar ",
        "app_process / com.genymobile.scrcpy.Server 2.7",
    )));
    assert!(line.contains("tunnel_forward=true"));
    assert!(line.contains("audio=false"));

    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_everything_once() {
    let h = harness(Behaviour::Normal);
    let client = launch(&h).await.unwrap();

    client.shutdown().await;
    client.shutdown().await;

    assert!(!client.is_alive());
    assert_eq!(h.runner.calls_matching("forward --remove"), 1);
    assert_eq!(h.runner.running_processes(), 0);
    assert_eq!(client.next_frame().await.unwrap(), None);
}

#[tokio::test]
async fn test_missing_handshake_fails_and_releases_resources() {
    // Arrange
    let h = harness(Behaviour::NoHandshake);

    // Act
    let err = launch(&h).await.err().unwrap();

    // Assert
    assert!(matches!(err, EngineError::HandshakeFailed(_)), "got {err:?}");
    assert_eq!(h.runner.running_processes(), 0, "server process terminated");
    assert_eq!(h.runner.calls_matching("forward --remove"), 1, "forward removed");
}

#[tokio::test]
async fn test_missing_control_socket_degrades_to_video_only() {
    let h = harness(Behaviour::NoControl);
    let client = launch(&h).await.unwrap();

    assert!(!client.has_control().await);
    client.inject_touch(TouchAction::Down, 1, 1).await;
    client.go_home().await;
    let frame = client.next_frame().await.unwrap();

    assert!(frame.is_some(), "video still flows");
    client.shutdown().await;
}

#[tokio::test]
async fn test_control_connect_is_retried_before_giving_up() {
    // Arrange: the control listener only comes back after the first refusal
    let h = harness(Behaviour::LateControl);

    // Act
    let client = launch(&h).await.unwrap();
    let attached = client.has_control().await;
    client.inject_key(KeyAction::Down, 4).await;
    client.shutdown().await;

    // Assert
    assert!(attached, "control attached on a later attempt");
    let received = h.control_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(received.len(), INJECT_KEYCODE_SIZE);
}

#[tokio::test]
async fn test_server_exit_ends_stream() {
    // Arrange
    let h = harness(Behaviour::ExitAfterStream);
    let client = launch(&h).await.unwrap();

    // Act: two packets, then the socket closes
    assert!(client.next_frame().await.unwrap().is_some());
    assert!(client.next_frame().await.unwrap().is_some());
    let end = client.next_frame().await.unwrap();

    // Assert: end of stream, not an error
    assert_eq!(end, None);
    assert!(!client.is_alive());
    client.shutdown().await;
}

#[tokio::test]
async fn test_missing_server_jar_is_missing_dependency() {
    let mut h = harness(Behaviour::Normal);
    h.config.server_path = Some("/definitely/not/here/scrcpy-server".into());

    let err = launch(&h).await.err().unwrap();

    assert!(matches!(err, EngineError::MissingDependency { .. }));
    assert_eq!(h.runner.spawn_count(), 0);
}
