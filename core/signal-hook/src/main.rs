//! parksentry-hook: CLI shim feeding platform events to the daemon.
//!
//! The daemon owns all reminder state; this binary is the thin edge the
//! platform receivers call:
//!
//! - `notification`: session-signal matching over a posted notification
//!   (JSON on stdin) from a pay-by-phone parking app
//! - `geofence`: forwards an enter/exit transition for a region
//! - `motion`: forwards an activity-classifier report

mod daemon_client;
mod logging;
mod matcher;

use clap::{Parser, Subcommand, ValueEnum};
use parksentry_daemon_protocol::{EventType, MotionKind};

#[derive(Parser)]
#[command(name = "parksentry-hook")]
#[command(about = "parksentry platform event forwarder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a posted notification against session patterns (reads JSON from stdin)
    Notification,

    /// Forward a geofence transition
    Geofence {
        #[arg(value_enum)]
        transition: Transition,

        /// Logical geofence id the transition fired for
        #[arg(long, default_value = "parking")]
        region_id: String,
    },

    /// Forward a motion classification report
    Motion {
        /// Classifier label (e.g. in_vehicle, walking, still)
        kind: String,

        /// Confidence percentage 0..=100
        confidence: u8,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Transition {
    Enter,
    Exit,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Notification => matcher::run(),
        Commands::Geofence {
            transition,
            region_id,
        } => {
            let event_type = match transition {
                Transition::Enter => EventType::GeofenceEnter,
                Transition::Exit => EventType::GeofenceExit,
            };
            daemon_client::send_geofence_event(event_type, &region_id)
        }
        Commands::Motion { kind, confidence } => {
            daemon_client::send_motion_event(parse_motion_kind(&kind), confidence)
        }
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "parksentry-hook failed");
        std::process::exit(1);
    }
}

fn parse_motion_kind(raw: &str) -> MotionKind {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
        .unwrap_or(MotionKind::Unknown)
}
