//! Platform collaborator ports and their helper-command adapters.
//!
//! The core only ever talks to the platform through these traits, so tests
//! can inject fakes and the daemon can run on any machine that provides a
//! handful of helper commands. All calls are single attempts: outcomes are
//! logged by the caller and never retried.

use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::RuntimeConfig;
use crate::notify::Reminder;
use crate::parking::GeofenceRegion;

/// Exit code a fix helper uses to report missing location permission
/// (EX_NOPERM from sysexits).
const EXIT_PERMISSION_DENIED: i32 = 77;
/// Bounded wait for non-location helpers.
const HELPER_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("no location fix available")]
    LocationUnavailable,

    #[error("registration rejected: {0}")]
    Registration(String),

    #[error("helper command failed: {command}: {details}")]
    Command { command: String, details: String },

    #[error("helper command timed out: {command}")]
    Timeout { command: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

pub trait LocationSource {
    fn current_fix(&self) -> Result<Fix, PlatformError>;
    fn last_known_fix(&self) -> Result<Fix, PlatformError>;
}

pub trait GeofenceControl {
    /// Replaces any existing registration under the same id.
    fn register(&self, region: &GeofenceRegion) -> Result<(), PlatformError>;
    fn deregister(&self, region_id: &str) -> Result<(), PlatformError>;
}

pub trait MotionControl {
    /// Idempotent: starting an already-running subscription is a no-op.
    fn start(&self, interval_ms: u64) -> Result<(), PlatformError>;
    /// Idempotent: safe to call when not currently running.
    fn stop(&self) -> Result<(), PlatformError>;
}

pub trait NotificationSink {
    /// Fire-and-forget, at most one alert per call.
    fn show(&self, reminder: &Reminder) -> Result<(), PlatformError>;
}

pub struct Platform {
    pub location: Box<dyn LocationSource + Send + Sync>,
    pub geofence: Box<dyn GeofenceControl + Send + Sync>,
    pub motion: Box<dyn MotionControl + Send + Sync>,
    pub notifier: Box<dyn NotificationSink + Send + Sync>,
}

impl Platform {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            location: Box::new(CommandLocationSource {
                command: config.location.fix_command.clone(),
                timeout: Duration::from_millis(config.location.fix_timeout_ms),
                last_fix_file: config.location.last_fix_file.clone(),
            }),
            geofence: Box::new(CommandGeofence {
                command: config.geofence.command.clone(),
            }),
            motion: Box::new(CommandMotion {
                command: config.motion.command.clone(),
            }),
            notifier: Box::new(CommandNotifier {
                command: config.notify.command.clone(),
            }),
        }
    }
}

/// Fix helper: prints `<lat> <lng>` on stdout; exit 77 means the platform
/// refused for lack of location permission.
pub struct CommandLocationSource {
    command: Option<Vec<String>>,
    timeout: Duration,
    last_fix_file: Option<std::path::PathBuf>,
}

impl LocationSource for CommandLocationSource {
    fn current_fix(&self) -> Result<Fix, PlatformError> {
        let command = self
            .command
            .as_deref()
            .ok_or(PlatformError::LocationUnavailable)?;
        let output = run_helper(command, &[], self.timeout)?;

        if !output.status.success() {
            if output.status.code() == Some(EXIT_PERMISSION_DENIED) {
                return Err(PlatformError::PermissionDenied);
            }
            return Err(PlatformError::LocationUnavailable);
        }

        parse_fix(&String::from_utf8_lossy(&output.stdout))
            .ok_or(PlatformError::LocationUnavailable)
    }

    fn last_known_fix(&self) -> Result<Fix, PlatformError> {
        let path = self
            .last_fix_file
            .as_ref()
            .ok_or(PlatformError::LocationUnavailable)?;
        let content =
            fs_err::read_to_string(path).map_err(|_| PlatformError::LocationUnavailable)?;
        parse_fix(&content).ok_or(PlatformError::LocationUnavailable)
    }
}

pub struct CommandGeofence {
    command: Option<Vec<String>>,
}

impl GeofenceControl for CommandGeofence {
    fn register(&self, region: &GeofenceRegion) -> Result<(), PlatformError> {
        let Some(command) = self.command.as_deref() else {
            debug!("No geofence helper configured; registration skipped");
            return Ok(());
        };
        run_capability(
            command,
            &[
                "register".to_string(),
                region.id.to_string(),
                region.latitude.to_string(),
                region.longitude.to_string(),
                region.radius_meters.to_string(),
            ],
        )
    }

    fn deregister(&self, region_id: &str) -> Result<(), PlatformError> {
        let Some(command) = self.command.as_deref() else {
            debug!("No geofence helper configured; deregistration skipped");
            return Ok(());
        };
        run_capability(command, &["deregister".to_string(), region_id.to_string()])
    }
}

pub struct CommandMotion {
    command: Option<Vec<String>>,
}

impl MotionControl for CommandMotion {
    fn start(&self, interval_ms: u64) -> Result<(), PlatformError> {
        let Some(command) = self.command.as_deref() else {
            debug!("No motion helper configured; classifier start skipped");
            return Ok(());
        };
        run_capability(command, &["start".to_string(), interval_ms.to_string()])
    }

    fn stop(&self) -> Result<(), PlatformError> {
        let Some(command) = self.command.as_deref() else {
            debug!("No motion helper configured; classifier stop skipped");
            return Ok(());
        };
        run_capability(command, &["stop".to_string()])
    }
}

/// Notifier helper in the `notify-send` argument convention.
pub struct CommandNotifier {
    command: Vec<String>,
}

impl NotificationSink for CommandNotifier {
    fn show(&self, reminder: &Reminder) -> Result<(), PlatformError> {
        run_capability(
            &self.command,
            &[
                "-u".to_string(),
                reminder.urgency.as_str().to_string(),
                reminder.title.clone(),
                reminder.body.clone(),
            ],
        )
    }
}

fn run_capability(command: &[String], extra_args: &[String]) -> Result<(), PlatformError> {
    let output = run_helper(
        command,
        extra_args,
        Duration::from_millis(HELPER_TIMEOUT_MS),
    )?;
    if output.status.success() {
        Ok(())
    } else {
        Err(PlatformError::Registration(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

fn run_helper(
    command: &[String],
    extra_args: &[String],
    timeout: Duration,
) -> Result<Output, PlatformError> {
    let (program, base_args) = command.split_first().ok_or(PlatformError::Command {
        command: String::new(),
        details: "empty helper command".to_string(),
    })?;

    let mut child = Command::new(program)
        .args(base_args)
        .args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| PlatformError::Command {
            command: program.clone(),
            details: err.to_string(),
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PlatformError::Timeout {
                        command: program.clone(),
                    });
                }
                thread::sleep(Duration::from_millis(25));
            }
            Err(err) => {
                return Err(PlatformError::Command {
                    command: program.clone(),
                    details: err.to_string(),
                })
            }
        }
    }

    child.wait_with_output().map_err(|err| PlatformError::Command {
        command: program.clone(),
        details: err.to_string(),
    })
}

fn parse_fix(raw: &str) -> Option<Fix> {
    let mut parts = raw.split_whitespace();
    let latitude: f64 = parts.next()?.parse().ok()?;
    let longitude: f64 = parts.next()?.parse().ok()?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some(Fix {
        latitude,
        longitude,
    })
}
