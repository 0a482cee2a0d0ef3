//! Session-signal matching over posted notifications.
//!
//! Pay-by-phone parking apps have no API surface here; their notifications
//! are the signal. The receiver forwards every posted notification as JSON
//! and this module decides whether it announces a session start or end.

use regex::Regex;
use serde::Deserialize;
use std::io::{self, Read};

use crate::daemon_client;
use parksentry_daemon_protocol::EventType;

/// App package fragments worth listening to.
const WATCHED_PACKAGES: &[&str] = &["ringgo", "parkmobile", "paybyphone", "justpark"];

#[derive(Debug, Clone, Deserialize)]
pub struct PostedNotification {
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Started { zone: Option<String> },
    Ended,
}

pub fn run() -> Result<(), String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|err| format!("Failed to read stdin: {}", err))?;

    if input.trim().is_empty() {
        return Ok(());
    }

    let posted: PostedNotification = serde_json::from_str(&input)
        .map_err(|err| format!("Failed to parse notification JSON: {}", err))?;
    let zone_re = zone_pattern()?;

    match match_session_signal(&posted, &zone_re) {
        Some(SessionSignal::Started { zone }) => {
            tracing::info!(package = %posted.package, zone = ?zone, "Parking session start detected");
            daemon_client::send_session_event(EventType::SessionStarted, zone)
        }
        Some(SessionSignal::Ended) => {
            tracing::info!(package = %posted.package, "Parking session end detected");
            daemon_client::send_session_event(EventType::SessionEnded, None)
        }
        None => {
            tracing::debug!(package = %posted.package, "Notification did not match a session signal");
            Ok(())
        }
    }
}

pub fn zone_pattern() -> Result<Regex, String> {
    Regex::new(r"(?i)\bzone\s+([A-Za-z0-9-]+)")
        .map_err(|err| format!("Failed to compile zone pattern: {}", err))
}

pub fn match_session_signal(
    posted: &PostedNotification,
    zone_re: &Regex,
) -> Option<SessionSignal> {
    let package = posted.package.to_ascii_lowercase();
    if !WATCHED_PACKAGES
        .iter()
        .any(|candidate| package.contains(candidate))
    {
        return None;
    }

    let title = posted.title.to_ascii_lowercase();
    let text = posted.text.to_ascii_lowercase();

    // End patterns win: "your session in Zone 12345 has ended" would
    // otherwise read as a fresh start.
    if title.contains("ended") || text.contains("session ended") {
        return Some(SessionSignal::Ended);
    }

    let zone = capture_zone(zone_re, &posted.title).or_else(|| capture_zone(zone_re, &posted.text));

    if title.contains("parked") || zone.is_some() {
        return Some(SessionSignal::Started { zone });
    }

    None
}

fn capture_zone(zone_re: &Regex, haystack: &str) -> Option<String> {
    zone_re
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|capture| capture.as_str().to_string())
}
