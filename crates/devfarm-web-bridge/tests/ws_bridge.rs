//! End-to-end routing through a real WebSocket listener, with host tools
//! scripted by `MockToolRunner`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devfarm_engine::domain::config::EngineConfig;
use devfarm_engine::infrastructure::tools::mock::{ok, MockToolRunner};
use devfarm_engine::infrastructure::tools::ToolOutput;
use devfarm_engine::StreamingEngine;
use devfarm_web_bridge::infrastructure::serve;
use futures_util::{Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

struct Bridge {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

async fn start_bridge(runner: MockToolRunner) -> Bridge {
    let engine = Arc::new(StreamingEngine::new(Arc::new(runner), EngineConfig::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    let task = tokio::spawn(serve(listener, engine, Arc::clone(&running)));
    Bridge { addr, running, task }
}

/// An adb that reports one running emulator for `Pixel_7`.
fn one_emulator(_: &str, args: &[String]) -> ToolOutput {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["devices"] => ok("List of devices attached\nemulator-5554\tdevice\n"),
        ["-s", "emulator-5554", "emu", "avd", "name"] => ok("Pixel_7\nOK\n"),
        _ => ok(""),
    }
}

/// Reads messages until a text one arrives.
async fn next_text<S>(ws: &mut S) -> String
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended before a text message")
            .expect("read error");
        if let Message::Text(text) = msg {
            return text;
        }
    }
}

/// Reads until the server closes the connection.
async fn expect_closed<S>(ws: &mut S)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("server did not close the connection")
        {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(other)) => panic!("unexpected message before close: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_unknown_route_gets_error_then_close() {
    // Arrange
    let bridge = start_bridge(MockToolRunner::new(|_, _| ok(""))).await;

    // Act
    let (mut ws, _) = connect_async(format!("ws://{}/video/android/x", bridge.addr))
        .await
        .unwrap();
    let text = next_text(&mut ws).await;

    // Assert
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["error"], "unknown route: /video/android/x");
    expect_closed(&mut ws).await;

    bridge.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_ios_stream_without_xcrun_reports_one_error() {
    // Arrange
    let bridge = start_bridge(MockToolRunner::new(|_, _| ok("")).without_tool("xcrun")).await;

    // Act
    let (mut ws, _) = connect_async(format!("ws://{}/stream/ios/SIM-1", bridge.addr))
        .await
        .unwrap();
    let text = next_text(&mut ws).await;

    // Assert
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["error"], "required tool not found: xcrun");
    expect_closed(&mut ws).await;

    bridge.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_log_route_forwards_device_lines() {
    // Arrange
    let runner =
        MockToolRunner::new(one_emulator).with_process_lines(&["I/ActivityManager: Start proc"]);
    let bridge = start_bridge(runner).await;

    // Act
    let (mut ws, _) = connect_async(format!("ws://{}/logs/android/Pixel_7", bridge.addr))
        .await
        .unwrap();

    // Assert
    assert_eq!(next_text(&mut ws).await, "I/ActivityManager: Start proc");

    ws.close(None).await.ok();
    bridge.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_log_route_for_stopped_emulator_reports_error() {
    let bridge = start_bridge(MockToolRunner::new(|_, _| ok("List of devices attached\n"))).await;

    let (mut ws, _) = connect_async(format!("ws://{}/logs/android/Pixel_7", bridge.addr))
        .await
        .unwrap();
    let text = next_text(&mut ws).await;

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    let reason = value["error"].as_str().unwrap();
    assert!(reason.starts_with("device unavailable"), "got {reason}");
    expect_closed(&mut ws).await;

    bridge.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_clearing_running_flag_stops_accept_loop() {
    // Arrange
    let bridge = start_bridge(MockToolRunner::new(|_, _| ok(""))).await;

    // Act
    bridge.running.store(false, Ordering::Relaxed);

    // Assert: the loop notices within one poll interval
    tokio::time::timeout(Duration::from_secs(2), bridge.task)
        .await
        .expect("accept loop kept running")
        .unwrap();
}
