//! Reminder formatting.
//!
//! One notification channel, one alert shape. The throttle that keeps
//! repeats apart lives with the serialization point; this module only builds
//! what the user sees.

use chrono::{DateTime, Utc};

use crate::parking::ParkingLocation;
use crate::reducer::ReminderTrigger;

pub const REMINDER_CHANNEL: &str = "parking_reminders";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub channel: &'static str,
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
}

pub fn build_reminder(
    parked: Option<&ParkingLocation>,
    trigger: ReminderTrigger,
    now: DateTime<Utc>,
) -> Reminder {
    let lead = match trigger {
        ReminderTrigger::ExitWhileDriving => "You just drove out of your parking spot.",
        ReminderTrigger::DrivingOutside => "You look to be driving away.",
    };

    let parked_note = parked
        .map(|location| now.timestamp_millis() - location.captured_at_ms)
        .filter(|elapsed_ms| *elapsed_ms >= 0)
        .map(|elapsed_ms| format!(" You parked {}.", format_elapsed(elapsed_ms)));

    let body = format!(
        "{}{} Your pay-by-phone session is still running — cancel it to stop the charges.",
        lead,
        parked_note.unwrap_or_default(),
    );

    Reminder {
        channel: REMINDER_CHANNEL,
        title: "Still paying for parking?".to_string(),
        body,
        urgency: Urgency::Critical,
    }
}

fn format_elapsed(elapsed_ms: i64) -> String {
    let minutes = elapsed_ms / 60_000;
    if minutes < 1 {
        "moments ago".to_string()
    } else if minutes < 60 {
        format!("{} min ago", minutes)
    } else {
        format!("{}h {}m ago", minutes / 60, minutes % 60)
    }
}
