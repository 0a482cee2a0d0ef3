use chrono::{Duration as ChronoDuration, Utc};
use parksentry_daemon_protocol::{
    EventEnvelope, EventType, Method, MotionKind, Request, Response, PROTOCOL_VERSION,
};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_parksentry-daemon"))
        .env("HOME", home)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn parksentry-daemon")
}

fn write_config(home: &Path) {
    let config_dir = home.join(".parksentry").join("daemon");
    std::fs::create_dir_all(&config_dir).expect("create config dir");
    std::fs::write(
        config_dir.join("config.toml"),
        r#"
[location]
fix_command = ["/bin/echo", "51.5014", "-0.1419"]

[notify]
command = ["/bin/true"]
"#,
    )
    .expect("write config");
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".parksentry").join("daemon.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn send_event(socket: &Path, event: EventEnvelope) {
    let response = send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::Event,
            id: Some(event.event_id.clone()),
            params: Some(serde_json::to_value(event).expect("Failed to serialize event")),
        },
    );
    assert!(response.ok, "event response was not ok: {:?}", response.error);
}

fn fetch_status(socket: &Path) -> serde_json::Value {
    let response = send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetStatus,
            id: Some("status-check".to_string()),
            params: None,
        },
    );
    assert!(response.ok, "status response was not ok");
    response.data.expect("status payload")
}

fn event(event_type: EventType, event_id: &str, offset_secs: i64) -> EventEnvelope {
    let base = Utc::now();
    EventEnvelope {
        event_id: event_id.to_string(),
        recorded_at: (base + ChronoDuration::seconds(offset_secs)).to_rfc3339(),
        event_type,
        region_id: match event_type {
            EventType::GeofenceEnter | EventType::GeofenceExit => Some("parking".to_string()),
            _ => None,
        },
        motion_kind: None,
        confidence_pct: None,
        zone: None,
        source: Some("ipc-smoke".to_string()),
    }
}

fn motion_event(event_id: &str, offset_secs: i64, confidence_pct: u8) -> EventEnvelope {
    let mut envelope = event(EventType::MotionReport, event_id, offset_secs);
    envelope.motion_kind = Some(MotionKind::InVehicle);
    envelope.confidence_pct = Some(confidence_pct);
    envelope
}

#[test]
fn daemon_ipc_reminder_cycle_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(home.path());
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let _guard = DaemonGuard { child };

    wait_for_socket(&socket, Duration::from_secs(2));

    let health = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health-check".to_string()),
            params: None,
        },
    );
    assert!(health.ok, "health response was not ok");
    let status = health
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(|value| value.as_str())
        .unwrap_or("missing");
    assert_eq!(status, "ok");

    // Park: the fix helper answers, the geofence is registered.
    send_event(&socket, event(EventType::SessionStarted, "evt-start", 0));
    let status = fetch_status(&socket);
    assert_eq!(status["session_active"], serde_json::json!(true));
    let latitude = status["parking"]["latitude"].as_f64().expect("latitude");
    assert!((latitude - 51.5014).abs() < 1e-9);
    assert_eq!(status["tracking"]["inside_geofence"], serde_json::json!(true));
    assert_eq!(
        status["tracking"]["initial_enter_consumed"],
        serde_json::json!(false)
    );

    // Confirmation ENTER is swallowed; walking away does not arm.
    send_event(&socket, event(EventType::GeofenceEnter, "evt-enter-1", 1));
    send_event(&socket, event(EventType::GeofenceExit, "evt-exit-1", 120));
    let status = fetch_status(&socket);
    assert_eq!(
        status["tracking"]["initial_enter_consumed"],
        serde_json::json!(true)
    );
    assert_eq!(status["tracking"]["armed"], serde_json::json!(false));

    // Genuine return arms; leaving again without driving keeps it armed.
    send_event(&socket, event(EventType::GeofenceEnter, "evt-enter-2", 600));
    send_event(&socket, event(EventType::GeofenceExit, "evt-exit-2", 660));
    let status = fetch_status(&socket);
    assert_eq!(status["tracking"]["armed"], serde_json::json!(true));
    assert_eq!(status["motion_active"], serde_json::json!(true));
    assert!(status["last_reminder_at"].is_null());

    // Driving detected outside: the reminder fires once.
    send_event(&socket, motion_event("evt-motion-1", 690, 85));
    let status = fetch_status(&socket);
    assert_eq!(status["tracking"]["armed"], serde_json::json!(false));
    assert_eq!(status["motion_active"], serde_json::json!(false));
    assert!(!status["last_reminder_at"].is_null());
    let first_reminder_at = status["last_reminder_at"].clone();

    // Duplicate report moments later changes nothing.
    send_event(&socket, motion_event("evt-motion-2", 695, 90));
    let status = fetch_status(&socket);
    assert_eq!(status["last_reminder_at"], first_reminder_at);

    // Session end resets everything durable and in-memory.
    send_event(&socket, event(EventType::SessionEnded, "evt-end", 700));
    let status = fetch_status(&socket);
    assert_eq!(status["session_active"], serde_json::json!(false));
    assert_eq!(status["tracking"]["armed"], serde_json::json!(false));
    assert_eq!(
        status["tracking"]["initial_enter_consumed"],
        serde_json::json!(false)
    );

    // Malformed events are rejected without touching state.
    let bad = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::Event,
            id: Some("evt-bad".to_string()),
            params: Some(serde_json::json!({
                "event_id": "evt-bad",
                "recorded_at": "not-a-time",
                "event_type": "geofence_enter",
                "region_id": "parking",
            })),
        },
    );
    assert!(!bad.ok, "malformed event must be rejected");
}
