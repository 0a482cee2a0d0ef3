//! Client helper for sending platform events to the parksentry daemon.
//!
//! The daemon is the only writer. Failures are surfaced to the caller; a
//! single short retry covers a daemon that is mid-restart.

use chrono::Utc;
use parksentry_daemon_protocol::{
    EventEnvelope, EventType, Method, MotionKind, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};
use rand::RngCore;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const ENABLE_ENV: &str = "PARKSENTRY_DAEMON_ENABLED";
const SOCKET_ENV: &str = "PARKSENTRY_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 600;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;
const SOURCE: &str = "parksentry-hook";

pub fn send_session_event(event_type: EventType, zone: Option<String>) -> Result<(), String> {
    let envelope = EventEnvelope {
        event_id: make_event_id(),
        recorded_at: Utc::now().to_rfc3339(),
        event_type,
        region_id: None,
        motion_kind: None,
        confidence_pct: None,
        zone,
        source: Some(SOURCE.to_string()),
    };
    send(envelope, "session event")
}

pub fn send_geofence_event(event_type: EventType, region_id: &str) -> Result<(), String> {
    let envelope = EventEnvelope {
        event_id: make_event_id(),
        recorded_at: Utc::now().to_rfc3339(),
        event_type,
        region_id: Some(region_id.to_string()),
        motion_kind: None,
        confidence_pct: None,
        zone: None,
        source: Some(SOURCE.to_string()),
    };
    send(envelope, "geofence event")
}

pub fn send_motion_event(kind: MotionKind, confidence_pct: u8) -> Result<(), String> {
    let envelope = EventEnvelope {
        event_id: make_event_id(),
        recorded_at: Utc::now().to_rfc3339(),
        event_type: EventType::MotionReport,
        region_id: None,
        motion_kind: Some(kind),
        confidence_pct: Some(confidence_pct),
        zone: None,
        source: Some(SOURCE.to_string()),
    };
    send(envelope, "motion report")
}

fn send(envelope: EventEnvelope, label: &str) -> Result<(), String> {
    if !daemon_enabled() {
        return Err("Daemon disabled".to_string());
    }
    envelope
        .validate()
        .map_err(|err| format!("{}: {}", err.code, err.message))?;
    send_event_with_retry(&envelope, label)
}

pub fn daemon_enabled() -> bool {
    match env::var(ENABLE_ENV) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => true,
    }
}

fn socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".parksentry").join(SOCKET_NAME))
}

fn send_event(envelope: &EventEnvelope) -> Result<(), String> {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::Event,
        id: Some(envelope.event_id.clone()),
        params: Some(
            serde_json::to_value(envelope)
                .map_err(|err| format!("Failed to serialize event: {}", err))?,
        ),
    };

    let response = send_request(request)?;
    if response.ok {
        Ok(())
    } else {
        let message = response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string());
        Err(message)
    }
}

fn send_event_with_retry(envelope: &EventEnvelope, label: &str) -> Result<(), String> {
    match send_event(envelope) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to send {} to daemon", label);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_event(envelope).map_err(|retry_err| {
                tracing::warn!(
                    error = %retry_err,
                    "Retry failed sending {} to daemon",
                    label
                );
                retry_err
            })
        }
    }
}

fn send_request(request: Request) -> Result<Response, String> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

fn make_event_id() -> String {
    let mut random = rand::thread_rng();
    let rand = random.next_u64();
    format!(
        "evt-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        rand
    )
}
