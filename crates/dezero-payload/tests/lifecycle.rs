//! End-to-end payload lifecycle through the manager.

use std::sync::Arc;
use std::time::Duration;

use dezero_payload::builtin::{BLE_SCAN_WINDOW, MAX_BLE_SCAN_WINDOW};
use dezero_payload::{
    GrantListPolicy, ManagerSettings, PayloadError, PayloadEvent, PayloadParams, PayloadStatus,
    Permission, PermissionSet,
};
use dezero_store::BackingStore;
use dezero_test::{
    ManifestBuilder, ScriptedBleRadio, ScriptedWifiRadio, TestBed, test_access_point,
    test_ble_device, test_builtin_package, test_lua_package,
};

fn params() -> PayloadParams {
    PayloadParams::new()
}

#[tokio::test]
async fn test_execute_is_single_flight() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install("blink", &test_lua_package("blink"))
        .await
        .unwrap();

    manager.execute("blink", &params()).await.unwrap();
    assert_eq!(manager.status("blink").await, PayloadStatus::Running);

    let err = manager.execute("blink", &params()).await.unwrap_err();
    assert!(matches!(err, PayloadError::AlreadyRunning(_)));
    assert_eq!(bed.backend.loads(), vec!["blink"]);
    assert_eq!(manager.running().await, vec!["blink".to_string()]);
}

#[tokio::test]
async fn test_stop_then_fresh_execute() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install("blink", &test_lua_package("blink"))
        .await
        .unwrap();

    manager.execute("blink", &params()).await.unwrap();
    manager.stop("blink").await.unwrap();
    assert_eq!(manager.status("blink").await, PayloadStatus::Completed);
    assert_eq!(bed.backend.stops(), vec!["blink"]);

    // Stopping a finished run is a no-op.
    manager.stop("blink").await.unwrap();
    assert_eq!(bed.backend.stops().len(), 1);

    let mut p = params();
    p.insert("speed".into(), "fast".into());
    manager.execute("blink", &p).await.unwrap();
    assert_eq!(manager.status("blink").await, PayloadStatus::Running);
    assert_eq!(
        bed.backend.last_params().unwrap().get("speed").map(String::as_str),
        Some("fast")
    );
}

#[tokio::test]
async fn test_unknown_payload() {
    let bed = TestBed::new();
    let manager = bed.manager();
    assert!(matches!(
        manager.execute("ghost", &params()).await,
        Err(PayloadError::NotFound(_))
    ));
    assert!(matches!(
        manager.stop("ghost").await,
        Err(PayloadError::NotFound(_))
    ));
    assert!(matches!(
        manager.uninstall("ghost").await,
        Err(PayloadError::NotFound(_))
    ));
    assert_eq!(manager.status("ghost").await, PayloadStatus::Idle);
    assert!(manager.context("ghost").await.is_none());
}

#[tokio::test]
async fn test_resource_gate_leaves_no_context() {
    let bed = TestBed::new();
    let manager = bed.manager();
    let pkg = ManifestBuilder::new("hog").memory_kb(64).package(b"x = 1");
    manager.install("hog", &pkg).await.unwrap();

    bed.memory.set(63 * 1024);
    let err = manager.execute("hog", &params()).await.unwrap_err();
    assert!(matches!(err, PayloadError::InsufficientMemory { .. }));
    assert!(manager.context("hog").await.is_none());
    assert!(bed.backend.loads().is_empty());

    bed.memory.set(64 * 1024);
    manager.execute("hog", &params()).await.unwrap();
}

#[tokio::test]
async fn test_storage_gate() {
    let bed = TestBed::new();
    let manager = bed.manager();
    let pkg = ManifestBuilder::new("bulky").storage_kb(10_000).package(b"x = 1");
    manager.install("bulky", &pkg).await.unwrap();

    let err = manager.execute("bulky", &params()).await.unwrap_err();
    assert!(matches!(err, PayloadError::InsufficientStorage { .. }));
    assert_eq!(manager.status("bulky").await, PayloadStatus::Idle);
}

#[tokio::test]
async fn test_permission_gate_defaults_to_deny() {
    let bed = TestBed::new();
    let manager = bed
        .builder()
        .permission_policy(Arc::new(GrantListPolicy::new(PermissionSet::from(
            Permission::GpioRead,
        ))))
        .build();
    let pkg = ManifestBuilder::new("jammer")
        .permissions(&["gpio_read", "wifi_inject"])
        .package(b"x = 1");
    manager.install("jammer", &pkg).await.unwrap();

    let err = manager.execute("jammer", &params()).await.unwrap_err();
    match err {
        PayloadError::PermissionDenied { denied, .. } => {
            assert_eq!(denied, PermissionSet::from(Permission::WifiInject));
        },
        other => panic!("unexpected: {other}"),
    }
    assert!(manager.context("jammer").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_sweep_boundary() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install("loop", &test_lua_package("loop"))
        .await
        .unwrap();
    manager.execute("loop", &params()).await.unwrap();

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(manager.tick().await.is_empty());
    assert_eq!(manager.status("loop").await, PayloadStatus::Running);

    tokio::time::advance(Duration::from_millis(1)).await;
    let violations = manager.tick().await;
    assert_eq!(violations.len(), 1);
    assert_eq!(manager.status("loop").await, PayloadStatus::Completed);
    assert_eq!(bed.backend.stops(), vec!["loop"]);
}

#[tokio::test(start_paused = true)]
async fn test_overrun_is_bounded_by_one_tick() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install("loop", &test_lua_package("loop"))
        .await
        .unwrap();

    // Start half-way between ticks.
    tokio::time::advance(Duration::from_millis(500)).await;
    manager.execute("loop", &params()).await.unwrap();
    let started = tokio::time::Instant::now();

    let tick = Duration::from_secs(1);
    let mut stopped_after = None;
    for _ in 0..20 {
        tokio::time::advance(tick).await;
        if !manager.tick().await.is_empty() {
            stopped_after = Some(started.elapsed());
            break;
        }
    }
    let stopped_after = stopped_after.unwrap();
    let limit = Duration::from_secs(10);
    assert!(stopped_after > limit);
    assert!(stopped_after <= limit + tick);
}

#[tokio::test(start_paused = true)]
async fn test_memory_sweep() {
    let bed = TestBed::new();
    let manager = bed.manager();
    let pkg = ManifestBuilder::new("leaky").memory_kb(4).package(b"t = {}");
    manager.install("leaky", &pkg).await.unwrap();
    manager.execute("leaky", &params()).await.unwrap();

    bed.backend.set_memory_in_use(4 * 1024);
    assert!(manager.tick().await.is_empty());

    bed.backend.set_memory_in_use(4 * 1024 + 1);
    let violations = manager.tick().await;
    assert_eq!(violations.len(), 1);
    assert_eq!(manager.status("leaky").await, PayloadStatus::Completed);
}

#[tokio::test]
async fn test_install_rollback_on_artifact_write_failure() {
    let bed = TestBed::new();
    let manager = bed.manager();
    bed.store.fail_writes_to("/payload");

    let err = manager
        .install("broken", &test_lua_package("broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, PayloadError::Storage(_)));
    assert!(!bed.store.exists("payloads/broken").await.unwrap());

    manager.scan().await.unwrap();
    assert!(manager.manifest("broken").await.is_none());
}

#[tokio::test]
async fn test_failed_reinstall_keeps_working_install() {
    let bed = TestBed::new();
    let manager = bed.manager();
    let original = test_lua_package("blink");
    manager.install("blink", &original).await.unwrap();

    bed.store.fail_writes_to("/payload");
    let upgrade = ManifestBuilder::new("blink")
        .version("2.0.0")
        .package(b"print('v2')");
    let err = manager.install("blink", &upgrade).await.unwrap_err();
    assert!(matches!(err, PayloadError::Storage(_)));

    assert!(bed.store.exists("payloads/blink").await.unwrap());
    assert_eq!(
        bed.store.read("payloads/blink/payload").await.unwrap(),
        original.artifact
    );
    assert_eq!(
        bed.store.read("payloads/blink/manifest.json").await.unwrap(),
        original.manifest
    );
    assert_eq!(
        manager.manifest("blink").await.unwrap().version,
        ManifestBuilder::new("blink").parse().version
    );

    manager.execute("blink", &params()).await.unwrap();
    assert_eq!(manager.status("blink").await, PayloadStatus::Running);
}

#[tokio::test]
async fn test_scan_is_idempotent() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager.install("a", &test_lua_package("a")).await.unwrap();
    manager.install("b", &test_lua_package("b")).await.unwrap();

    manager.scan().await.unwrap();
    let first = manager.available().await;
    manager.scan().await.unwrap();
    let second = manager.available().await;

    let mut first_ids: Vec<_> = first.iter().map(|m| m.id.clone()).collect();
    let mut second_ids: Vec<_> = second.iter().map(|m| m.id.clone()).collect();
    first_ids.sort();
    second_ids.sort();
    assert_eq!(first_ids, vec!["a", "b"]);
    assert_eq!(first_ids, second_ids);
    for m in &first {
        assert_eq!(second.iter().find(|s| s.id == m.id), Some(m));
    }
}

#[tokio::test(start_paused = true)]
async fn test_builtin_wifi_scan_end_to_end() {
    let rssi = [-40, -45, -50, -55, -60, -65, -70, -75];
    let mut networks: Vec<_> = rssi
        .iter()
        .zip(1_u8..)
        .map(|(&rssi, ch)| test_access_point(&format!("net{ch}"), rssi, ch))
        .collect();
    // Weakest first, so the scanner has to sort.
    networks.reverse();
    let wifi = ScriptedWifiRadio::new(networks);
    let bed = TestBed::new().with_wifi(wifi);
    let manager = bed.manager();
    let pkg = ManifestBuilder::new("wifi_scanner")
        .payload_type("builtin")
        .entry("wifi_scan")
        .memory_kb(1)
        .permissions(&["wifi_scan"]);
    manager
        .install("wifi_scanner", &pkg.package(b""))
        .await
        .unwrap();

    manager.execute("wifi_scanner", &params()).await.unwrap();
    assert_eq!(manager.status("wifi_scanner").await, PayloadStatus::Completed);
    assert_eq!(bed.wifi.scans(), 1);

    let results = bed.notifier.last_json().unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0]["ssid"], "net1");
    assert_eq!(results[0]["ch"], 1);
    assert_eq!(results[4]["rssi"], -60);
}

#[tokio::test(start_paused = true)]
async fn test_builtin_failure_sets_error() {
    let bed = TestBed::new().with_wifi(ScriptedWifiRadio::unavailable());
    let manager = bed.manager();
    manager
        .install(
            "wifi_scanner",
            &test_builtin_package("wifi_scanner", "wifi_scan", "wifi_scan"),
        )
        .await
        .unwrap();

    let err = manager.execute("wifi_scanner", &params()).await.unwrap_err();
    assert!(matches!(err, PayloadError::Builtin { .. }));
    assert_eq!(manager.status("wifi_scanner").await, PayloadStatus::Error);
    assert!(bed.notifier.blobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_builtin_ble_scan_with_duration() {
    let ble = ScriptedBleRadio::new(vec![
        test_ble_device("tag", 1, -70),
        test_ble_device("watch", 2, -40),
    ]);
    let bed = TestBed::new().with_ble(ble);
    let manager = bed.manager();
    manager
        .install(
            "ble_scanner",
            &test_builtin_package("ble_scanner", "ble_scan", "ble_scan"),
        )
        .await
        .unwrap();

    let mut p = params();
    p.insert("duration_ms".into(), "2000".into());
    manager.execute("ble_scanner", &p).await.unwrap();

    assert_eq!(bed.ble.windows(), vec![Duration::from_millis(2000)]);
    assert_eq!(bed.ble.stops(), 1);
    let results = bed.notifier.last_json().unwrap();
    assert_eq!(results[0]["name"], "watch");
    assert_eq!(results[0]["addr"], "24:0a:c4:00:00:02");
}

#[tokio::test(start_paused = true)]
async fn test_builtin_ble_scan_windows() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install(
            "ble_scanner",
            &test_builtin_package("ble_scanner", "ble_scan", "ble_scan"),
        )
        .await
        .unwrap();

    manager.execute("ble_scanner", &params()).await.unwrap();
    let mut long = params();
    long.insert("duration_ms".into(), "600000".into());
    manager.execute("ble_scanner", &long).await.unwrap();

    assert_eq!(bed.ble.windows(), vec![BLE_SCAN_WINDOW, MAX_BLE_SCAN_WINDOW]);
}

#[tokio::test]
async fn test_builtin_requires_declared_permission() {
    let bed = TestBed::new();
    let manager = bed.manager();
    // Declares ble_scan but runs the Wi-Fi scanner.
    manager
        .install(
            "sneaky",
            &test_builtin_package("sneaky", "wifi_scan", "ble_scan"),
        )
        .await
        .unwrap();

    let err = manager.execute("sneaky", &params()).await.unwrap_err();
    assert!(matches!(err, PayloadError::PermissionDenied { .. }));
    assert_eq!(manager.status("sneaky").await, PayloadStatus::Idle);
}

#[tokio::test]
async fn test_unknown_builtin_module() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install(
            "mystery",
            &test_builtin_package("mystery", "teleport", "network"),
        )
        .await
        .unwrap();
    assert!(matches!(
        manager.execute("mystery", &params()).await,
        Err(PayloadError::UnknownBuiltin(_))
    ));
}

#[tokio::test]
async fn test_backend_failure_then_retry() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install("flaky", &test_lua_package("flaky"))
        .await
        .unwrap();

    bed.backend.fail_next_load("vm out of arena");
    let err = manager.execute("flaky", &params()).await.unwrap_err();
    assert!(matches!(err, PayloadError::BackendLoad { .. }));
    assert_eq!(manager.status("flaky").await, PayloadStatus::Error);

    // Stop on an errored run keeps the error visible.
    manager.stop("flaky").await.unwrap();
    assert_eq!(manager.status("flaky").await, PayloadStatus::Error);

    manager.execute("flaky", &params()).await.unwrap();
    assert_eq!(manager.status("flaky").await, PayloadStatus::Running);
}

#[tokio::test]
async fn test_uninstall_stops_running_payload() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install("blink", &test_lua_package("blink"))
        .await
        .unwrap();
    manager.execute("blink", &params()).await.unwrap();

    manager.uninstall("blink").await.unwrap();
    assert_eq!(bed.backend.stops(), vec!["blink"]);
    assert!(manager.manifest("blink").await.is_none());
    assert_eq!(manager.status("blink").await, PayloadStatus::Idle);
    assert!(!bed.store.exists("payloads/blink").await.unwrap());
}

#[tokio::test]
async fn test_uninstall_delete_failure_keeps_registration() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install("stuck", &test_lua_package("stuck"))
        .await
        .unwrap();

    bed.store.fail_deletes(true);
    let err = manager.uninstall("stuck").await.unwrap_err();
    assert!(matches!(err, PayloadError::Storage(_)));
    assert!(manager.manifest("stuck").await.is_some());

    bed.store.fail_deletes(false);
    manager.uninstall("stuck").await.unwrap();
    assert!(manager.manifest("stuck").await.is_none());
}

#[tokio::test]
async fn test_install_over_running_payload_rejected() {
    let bed = TestBed::new();
    let manager = bed.manager();
    manager
        .install("blink", &test_lua_package("blink"))
        .await
        .unwrap();
    manager.execute("blink", &params()).await.unwrap();

    let upgrade = ManifestBuilder::new("blink").version("2.0.0").package(b"x = 2");
    assert!(matches!(
        manager.install("blink", &upgrade).await,
        Err(PayloadError::AlreadyRunning(_))
    ));

    manager.stop("blink").await.unwrap();
    let m = manager.install("blink", &upgrade).await.unwrap();
    assert_eq!(m.version, "2.0.0");
    // The finished context from the old version is discarded.
    assert_eq!(manager.status("blink").await, PayloadStatus::Idle);
}

#[tokio::test]
async fn test_events_published() {
    let bed = TestBed::new();
    let manager = bed.manager();
    let mut events = manager.subscribe();

    manager
        .install("blink", &test_lua_package("blink"))
        .await
        .unwrap();
    manager.execute("blink", &params()).await.unwrap();
    manager.stop("blink").await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen[0], PayloadEvent::Installed { .. }));
    assert!(matches!(seen[1], PayloadEvent::Started { .. }));
    assert!(matches!(seen[2], PayloadEvent::Stopped { .. }));
}

#[tokio::test]
async fn test_strict_manifests_reject_unknown_permissions() {
    let bed = TestBed::new();
    let manager = bed
        .builder()
        .settings(ManagerSettings {
            strict_manifests: true,
            ..ManagerSettings::default()
        })
        .build();
    let pkg = ManifestBuilder::new("odd")
        .permissions(&["wifi_scan", "mind_control"])
        .package(b"x = 1");
    assert!(matches!(
        manager.install("odd", &pkg).await,
        Err(PayloadError::Parse(_))
    ));

    let lenient = bed.manager();
    let installed = lenient.install("odd", &pkg).await.unwrap();
    assert_eq!(installed.unknown_permissions, vec!["mind_control".to_string()]);
}

#[tokio::test]
async fn test_native_backend_through_manager() {
    let bed = TestBed::new();
    let manager = bed.manager();
    let pkg = ManifestBuilder::new("fw_tool")
        .payload_type("native")
        .entry("tool_main")
        .package(&[0xE9, 0x03, 0x02, 0x20]);
    manager.install("fw_tool", &pkg).await.unwrap();
    manager.execute("fw_tool", &params()).await.unwrap();

    let snap = manager.context("fw_tool").await.unwrap();
    assert_eq!(snap.status, PayloadStatus::Running);
    assert_eq!(snap.memory_allocated, 4);
    assert!(snap.has_runtime);

    manager.stop("fw_tool").await.unwrap();
    let snap = manager.context("fw_tool").await.unwrap();
    assert_eq!(snap.status, PayloadStatus::Completed);
    assert!(!snap.has_runtime);
    assert_eq!(snap.memory_allocated, 0);
}
