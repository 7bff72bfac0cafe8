//! Emulator lifecycle and attach behaviour through the public engine API,
//! with every host tool scripted by `MockToolRunner`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use devfarm_core::DeviceIdentity;
use devfarm_engine::application::android_manager::AndroidDeviceManager;
use devfarm_engine::application::mock::{RecordingSink, ScriptedInput};
use devfarm_engine::domain::config::{AndroidConfig, EngineConfig, ScrcpyConfig};
use devfarm_engine::infrastructure::tools::mock::{fail, ok, MockToolRunner};
use devfarm_engine::infrastructure::tools::ToolOutput;
use devfarm_engine::{ConnectionOutcome, EngineError, StreamingEngine};

fn fast_android() -> AndroidConfig {
    AndroidConfig {
        start_poll_attempts: 20,
        boot_poll_attempts: 3,
        poll_interval_ms: 10,
        ..AndroidConfig::default()
    }
}

/// `adb` that lists `emulator-5554` as `Pixel_7` once `running` is set.
fn emulator_adb(
    running: Arc<AtomicBool>,
    booted: bool,
) -> impl Fn(&str, &[String]) -> ToolOutput {
    move |_, args| {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let up = running.load(Ordering::SeqCst);
        match args.as_slice() {
            ["devices"] if up => ok("List of devices attached\nemulator-5554\tdevice\n"),
            ["devices"] => ok("List of devices attached\n"),
            ["-s", "emulator-5554", "emu", "avd", "name"] if up => ok("Pixel_7\nOK\n"),
            ["-s", _, "emu", "avd", "name"] => fail("error: device offline"),
            ["-s", _, "shell", "getprop", "sys.boot_completed"] if booted => ok("1\n"),
            ["-s", _, "shell", "getprop", "sys.boot_completed"] => ok("0\n"),
            _ => ok(""),
        }
    }
}

#[tokio::test]
async fn test_concurrent_starts_spawn_one_emulator() {
    // Arrange: the emulator appears in `adb devices` once spawned
    let running = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&running);
    let runner = Arc::new(
        MockToolRunner::new(emulator_adb(Arc::clone(&running), true))
            .with_spawn_hook(move |_, _| flag.store(true, Ordering::SeqCst))
            .with_run_delay(Duration::from_millis(2)),
    );
    let manager = Arc::new(AndroidDeviceManager::new(
        runner.clone(),
        fast_android(),
        ScrcpyConfig::default(),
    ));

    // Act: four callers race for the same AVD
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start_emulator("Pixel_7").await })
        })
        .collect();
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    // Assert: one spawn, every caller sees the same serial
    assert_eq!(runner.spawn_count(), 1);
    assert!(handles.iter().all(|h| h.serial == "emulator-5554"));
    assert_eq!(handles.iter().filter(|h| !h.reused).count(), 1);
    assert_eq!(handles[0].console_port, Some(5554));
}

#[tokio::test]
async fn test_attach_fails_within_boot_bound() {
    // Arrange: emulator is registered but never finishes booting
    let running = Arc::new(AtomicBool::new(true));
    let runner = Arc::new(MockToolRunner::new(emulator_adb(running, false)));
    let config = EngineConfig {
        android: fast_android(),
        ..EngineConfig::default()
    };
    let engine = StreamingEngine::new(runner.clone(), config);
    let sink = Arc::new(RecordingSink::new());
    let started = Instant::now();

    // Act
    let outcome = engine
        .attach_connection(
            &DeviceIdentity::android("Pixel_7"),
            sink.clone(),
            Box::new(ScriptedInput::hanging(vec![])),
        )
        .await;

    // Assert
    assert!(started.elapsed() < Duration::from_secs(5));
    match outcome {
        ConnectionOutcome::Error { reason } => {
            assert!(reason.contains("timed out after 3 polls"), "{reason}")
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(sink.errors().len(), 1);
    assert!(sink.is_closed());
    assert_eq!(runner.calls_matching("emu kill"), 0, "device left running");
    assert_eq!(runner.spawn_count(), 0, "no server launched");
    assert!(engine.session(&DeviceIdentity::android("Pixel_7")).is_none());
}

#[tokio::test]
async fn test_start_reports_ambiguous_avd() {
    let runner = Arc::new(MockToolRunner::new(|_, args| {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["devices"] => ok(concat!(
                "List of devices attached\n",
                "emulator-5554\tdevice\n",
                "emulator-5556\tdevice\n",
            )),
            ["-s", _, "emu", "avd", "name"] => ok("Pixel_7\nOK\n"),
            _ => ok("1\n"),
        }
    }));
    let engine = StreamingEngine::new(runner, EngineConfig::default());

    let err = engine.start(&DeviceIdentity::android("Pixel_7")).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::AmbiguousDevice { ref serials, .. } if serials.len() == 2
    ));
}

#[tokio::test]
async fn test_log_stream_is_shared_between_viewers() {
    let runner = Arc::new(
        MockToolRunner::new(emulator_adb(Arc::new(AtomicBool::new(true)), true))
            .with_process_lines(&["I/ActivityManager: Start proc"]),
    );
    let engine = StreamingEngine::new(runner.clone(), EngineConfig::default());
    let id = DeviceIdentity::android("Pixel_7");

    let mut first = engine.open_log_stream(&id).await.unwrap();
    let _second = engine.open_log_stream(&id).await.unwrap();

    assert_eq!(runner.spawn_count(), 1);
    let line = tokio::time::timeout(Duration::from_secs(2), first.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line, "I/ActivityManager: Start proc");
    let spawns = runner.spawns.lock().unwrap().clone();
    assert_eq!(spawns[0].command_line(), "adb -s emulator-5554 logcat -v time -T 0");

    engine.stop_all().await;
    assert!(!engine.stop_log_stream(&id).await);
}
