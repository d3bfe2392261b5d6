//! Command surface tests against an in-memory device.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use dezero_config::{Config, PolicyMode};
use dezero_kernel::{Kernel, KernelParts, Opcode, Request, Response};
use dezero_payload::{PayloadStatus, ResponseCode};
use dezero_store::MemoryStore;
use dezero_test::{
    ManifestBuilder, RecordingNotifier, ScriptedBleRadio, ScriptedWifiRadio, SettableMemory,
    test_access_point,
};

struct Device {
    kernel: Arc<Kernel>,
    notifier: RecordingNotifier,
}

async fn device(config: Config) -> Device {
    let notifier = RecordingNotifier::new();
    let parts = KernelParts {
        store: Arc::new(MemoryStore::new(64 * 1024)),
        memory: Arc::new(SettableMemory::new(32 * 1024)),
        wifi: Arc::new(ScriptedWifiRadio::new(vec![
            test_access_point("lab", -40, 6),
            test_access_point("guest", -70, 11),
        ])),
        ble: Arc::new(ScriptedBleRadio::default()),
        notifier: Arc::new(notifier.clone()),
    };
    let kernel = Kernel::assemble(&config, parts).await.unwrap();
    Device {
        kernel: Arc::new(kernel),
        notifier,
    }
}

fn upload(builder: ManifestBuilder, artifact: &[u8]) -> Request {
    let package = builder.clone().package(artifact);
    let id = builder.to_value()["id"].as_str().unwrap().to_string();
    Request::new(Opcode::Upload)
        .with_id(id)
        .with_package(&package.manifest, &package.artifact)
}

async fn send(device: &Device, request: Request) -> Response {
    device.kernel.handle(&request).await
}

#[tokio::test]
async fn test_ping_and_unknown_commands() {
    let dev = device(Config::default()).await;

    let pong = dev.kernel.handle_json(r#"{"cmd":"ping"}"#).await;
    assert!(pong.is_ok());
    assert_eq!(pong.body["pong"], true);

    let unknown = dev.kernel.handle_json(r#"{"cmd":66}"#).await;
    assert_eq!(unknown.code, ResponseCode::InvalidCommand);

    let malformed = dev.kernel.handle_json("not json").await;
    assert_eq!(malformed.code, ResponseCode::InvalidParams);
}

#[tokio::test]
async fn test_get_info() {
    let dev = device(Config::default()).await;
    let info = send(&dev, Request::new(Opcode::GetInfo)).await;

    assert!(info.is_ok());
    assert_eq!(info.body["free_memory"], 32 * 1024);
    assert_eq!(info.body["storage"]["total"], 64 * 1024);
    assert_eq!(info.body["payloads"], 0);
    let builtins = info.body["builtins"].as_array().unwrap();
    assert!(builtins.contains(&json!("wifi_scan")));
    assert!(builtins.contains(&json!("ble_scan")));
}

#[tokio::test(start_paused = true)]
async fn test_upload_list_execute_builtin() {
    let dev = device(Config::default()).await;
    let scanner = ManifestBuilder::new("wifi_scanner")
        .payload_type("builtin")
        .entry("wifi_scan")
        .memory_kb(1)
        .permissions(&["wifi_scan"]);

    let uploaded = send(&dev, upload(scanner, b"")).await;
    assert!(uploaded.is_ok(), "{uploaded:?}");
    assert_eq!(uploaded.body["id"], "wifi_scanner");

    let list = send(&dev, Request::new(Opcode::List)).await;
    let entries = list.body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["type"], "builtin");
    assert_eq!(entries[0]["status"], "idle");
    assert_eq!(entries[0]["permissions"], json!(["wifi_scan"]));

    let run = send(&dev, Request::new(Opcode::Execute).with_id("wifi_scanner")).await;
    assert!(run.is_ok(), "{run:?}");
    assert_eq!(run.body["status"], "completed");

    let results = dev.notifier.last_json().unwrap();
    assert_eq!(results[0]["ssid"], "lab");
    assert_eq!(results.as_array().unwrap().len(), 2);

    let status = send(&dev, Request::new(Opcode::GetStatus).with_id("wifi_scanner")).await;
    assert_eq!(status.body["status"], "completed");
}

#[tokio::test]
async fn test_script_payload_run_and_stop() {
    let dev = device(Config::default()).await;
    send(&dev, upload(ManifestBuilder::new("blink"), b"print('hi')")).await;

    let run = send(&dev, Request::new(Opcode::Execute).with_id("blink")).await;
    assert_eq!(run.body["status"], "running");

    let again = send(&dev, Request::new(Opcode::Execute).with_id("blink")).await;
    assert_eq!(again.code, ResponseCode::AlreadyRunning);

    let running = send(&dev, Request::new(Opcode::GetStatus)).await;
    assert_eq!(running.body["running"], json!(["blink"]));

    let stopped = send(&dev, Request::new(Opcode::Stop).with_id("blink")).await;
    assert_eq!(stopped.body["status"], "completed");
}

#[tokio::test]
async fn test_error_codes() {
    let dev = device(Config::default()).await;

    let missing = send(&dev, Request::new(Opcode::Execute).with_id("ghost")).await;
    assert_eq!(missing.code, ResponseCode::NotFound);

    let no_id = send(&dev, Request::new(Opcode::Delete)).await;
    assert_eq!(no_id.code, ResponseCode::InvalidParams);

    let mut bad_checksum = upload(ManifestBuilder::new("tampered"), b"x = 1");
    bad_checksum.data = Some("eCA9IDI=".into());
    assert_eq!(send(&dev, bad_checksum).await.code, ResponseCode::InvalidParams);

    let no_manifest = Request::new(Opcode::Upload).with_id("bare");
    assert_eq!(send(&dev, no_manifest).await.code, ResponseCode::InvalidParams);

    send(
        &dev,
        upload(
            ManifestBuilder::new("jammer").permissions(&["wifi_inject"]),
            b"x = 1",
        ),
    )
    .await;
    let denied = send(&dev, Request::new(Opcode::Execute).with_id("jammer")).await;
    assert_eq!(denied.code, ResponseCode::PermissionDenied);

    send(&dev, upload(ManifestBuilder::new("hog").memory_kb(64), b"x = 1")).await;
    let oom = send(&dev, Request::new(Opcode::Execute).with_id("hog")).await;
    assert_eq!(oom.code, ResponseCode::OutOfMemory);

    send(&dev, upload(ManifestBuilder::new("bulky").storage_kb(128), b"x = 1")).await;
    let full = send(&dev, Request::new(Opcode::Execute).with_id("bulky")).await;
    assert_eq!(full.code, ResponseCode::StorageFull);

    let ota = send(&dev, Request::new(Opcode::OtaBegin)).await;
    assert_eq!(ota.code, ResponseCode::Error);
}

#[tokio::test]
async fn test_allow_all_policy() {
    let mut config = Config::default();
    config.policy.mode = PolicyMode::AllowAll;
    let dev = device(config).await;
    send(
        &dev,
        upload(
            ManifestBuilder::new("jammer").permissions(&["wifi_inject"]),
            b"x = 1",
        ),
    )
    .await;

    let run = send(&dev, Request::new(Opcode::Execute).with_id("jammer")).await;
    assert!(run.is_ok(), "{run:?}");
}

#[tokio::test]
async fn test_delete() {
    let dev = device(Config::default()).await;
    send(&dev, upload(ManifestBuilder::new("blink"), b"print(1)")).await;

    assert!(send(&dev, Request::new(Opcode::Delete).with_id("blink")).await.is_ok());
    let list = send(&dev, Request::new(Opcode::List)).await;
    assert_eq!(list.body, json!([]));

    let status = send(&dev, Request::new(Opcode::GetStatus).with_id("blink")).await;
    assert_eq!(status.code, ResponseCode::NotFound);
}

#[tokio::test]
async fn test_get_logs() {
    let dev = device(Config::default()).await;
    send(&dev, upload(ManifestBuilder::new("blink"), b"print(1)")).await;
    send(&dev, Request::new(Opcode::Execute).with_id("blink")).await;

    let logs = send(&dev, Request::new(Opcode::GetLogs)).await;
    let events: Vec<&str> = logs.body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap())
        .collect();
    assert_eq!(events, vec!["scanned", "installed", "started"]);

    let last = send(&dev, Request::new(Opcode::GetLogs).with_param("limit", 1)).await;
    assert_eq!(last.body["entries"].as_array().unwrap().len(), 1);
    assert_eq!(last.body["entries"][0]["payload_id"], "blink");
}

#[tokio::test]
async fn test_reboot_stops_runs_and_cancels() {
    let dev = device(Config::default()).await;
    send(&dev, upload(ManifestBuilder::new("blink"), b"print(1)")).await;
    send(&dev, Request::new(Opcode::Execute).with_id("blink")).await;

    let token = dev.kernel.shutdown_token();
    let reboot = send(&dev, Request::new(Opcode::Reboot)).await;
    assert!(reboot.is_ok());
    assert!(token.is_cancelled());
    assert_eq!(
        dev.kernel.manager().status("blink").await,
        PayloadStatus::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_enforces_time_budget() {
    let mut config = Config::default();
    config.runtime.tick_interval_ms = 1000;
    config.runtime.cpu_time_limit_ms = 2000;
    let dev = device(config).await;
    send(&dev, upload(ManifestBuilder::new("spin"), b"while true do end")).await;
    send(&dev, Request::new(Opcode::Execute).with_id("spin")).await;

    let supervisor = dev.kernel.spawn_supervisor();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        dev.kernel.manager().status("spin").await,
        PayloadStatus::Running
    );

    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(
        dev.kernel.manager().status("spin").await,
        PayloadStatus::Completed
    );

    let logs = send(&dev, Request::new(Opcode::GetLogs)).await;
    let exceeded: Vec<&Value> = logs.body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["event"] == "budget_exceeded")
        .collect();
    assert_eq!(exceeded.len(), 1);

    dev.kernel.shutdown();
    supervisor.await.unwrap();
}

#[tokio::test]
async fn test_installed_payloads_survive_reboot() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.root = dir.path().to_path_buf();

    let first = Kernel::boot(&config).await.unwrap();
    let uploaded = first
        .handle(&upload(ManifestBuilder::new("blink"), b"print(1)"))
        .await;
    assert!(uploaded.is_ok(), "{uploaded:?}");
    drop(first);

    let second = Kernel::boot(&config).await.unwrap();
    let list = second.handle(&Request::new(Opcode::List)).await;
    assert_eq!(list.body[0]["id"], "blink");
    assert_eq!(list.body[0]["status"], "idle");
}
