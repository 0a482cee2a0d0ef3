//! In-memory state managed by the daemon.
//!
//! Every inbound event is processed to completion under one lock: read the
//! tracking flags, run the reducer, write the flags and the durable store.
//! Platform side effects are issued only after the lock is released so slow
//! helper I/O never blocks the serialization point.

use chrono::{DateTime, Utc};
use parksentry_daemon_protocol::{EventEnvelope, EventType};
use serde::Serialize;
use std::sync::Mutex;

use crate::notify;
use crate::parking::{self, GeofenceRegion, ParkingLocation};
use crate::platform::Platform;
use crate::reducer::{reduce_tracking, Effect, TrackingEvent, TrackingState};
use crate::store::Store;

pub struct SharedState {
    store: Store,
    platform: Platform,
    motion_interval_ms: u64,
    cell: Mutex<TrackingCell>,
}

/// Everything mutable behind the serialization point. `last_reminder_at`
/// sits outside [`TrackingState`] on purpose: the throttle must survive the
/// session-end reset.
#[derive(Debug, Default)]
struct TrackingCell {
    tracking: TrackingState,
    motion_active: bool,
    last_reminder_at: Option<DateTime<Utc>>,
}

impl SharedState {
    pub fn new(store: Store, platform: Platform, motion_interval_ms: u64) -> Self {
        match store.session_active() {
            Ok(true) => {
                // Accepted gap: a re-entry observed just before a restart is
                // forgotten; only the durable session and location survive.
                tracing::info!("Resuming active parking session; tracking flags reset");
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read persisted session flag");
            }
        }

        Self {
            store,
            platform,
            motion_interval_ms,
            cell: Mutex::new(TrackingCell::default()),
        }
    }

    pub fn update_from_event(&self, event: &EventEnvelope) {
        let Some(recorded_at) = parse_rfc3339(&event.recorded_at) else {
            tracing::warn!(event_id = %event.event_id, "Dropping event with unparseable timestamp");
            return;
        };

        match event.event_type {
            EventType::SessionStarted => self.start_session(event, recorded_at),
            EventType::SessionEnded => self.apply(TrackingEvent::SessionEnded),
            EventType::GeofenceEnter | EventType::GeofenceExit => {
                let region_id = event.region_id.as_deref().unwrap_or_default();
                if region_id != parking::GEOFENCE_ID {
                    tracing::warn!(
                        region_id = %region_id,
                        "Dropping transition for unknown geofence region"
                    );
                    return;
                }
                if !self.session_active_or_false() {
                    tracing::debug!(
                        event_type = ?event.event_type,
                        "Ignoring geofence transition with no active session"
                    );
                    return;
                }
                let tracking_event = if event.event_type == EventType::GeofenceEnter {
                    TrackingEvent::Enter { at: recorded_at }
                } else {
                    TrackingEvent::Exit { at: recorded_at }
                };
                self.apply(tracking_event);
            }
            EventType::MotionReport => {
                let (Some(kind), Some(confidence_pct)) =
                    (event.motion_kind, event.confidence_pct)
                else {
                    tracing::warn!(event_id = %event.event_id, "Dropping malformed motion report");
                    return;
                };
                self.apply(TrackingEvent::Motion {
                    kind,
                    confidence_pct,
                    at: recorded_at,
                });
            }
        }
    }

    /// Session start: capture a fix, persist it, register the region. Any
    /// failure is logged and leaves the machine idle; there is no retry
    /// until the next session start.
    fn start_session(&self, event: &EventEnvelope, recorded_at: DateTime<Utc>) {
        let fix = match parking::acquire_parking_fix(self.platform.location.as_ref()) {
            Ok(fix) => fix,
            Err(err) => {
                tracing::warn!(error = %err, "Session start without a usable fix; tracking not started");
                return;
            }
        };

        let location = ParkingLocation {
            latitude: fix.latitude,
            longitude: fix.longitude,
            captured_at_ms: recorded_at.timestamp_millis(),
        };

        let stale_classifier;
        {
            let mut cell = match self.cell.lock() {
                Ok(cell) => cell,
                Err(_) => {
                    tracing::error!("Tracking state lock poisoned; dropping session start");
                    return;
                }
            };
            if let Err(err) = self.store.save_parking(&location) {
                tracing::warn!(error = %err, "Failed to persist parking location; tracking not started");
                return;
            }
            if let Err(err) = self.store.set_session_active(true) {
                tracing::warn!(error = %err, "Failed to persist session flag; tracking not started");
                return;
            }
            stale_classifier = cell.motion_active;
            cell.tracking = TrackingState::just_parked();
            cell.motion_active = false;
        }

        if stale_classifier {
            // Interrupted previous cycle left the classifier running.
            if let Err(err) = self.platform.motion.stop() {
                tracing::warn!(error = %err, "Failed to stop stale motion classification");
            }
        }

        let region = GeofenceRegion::around(&location);
        match self.platform.geofence.register(&region) {
            Ok(()) => tracing::info!(
                latitude = location.latitude,
                longitude = location.longitude,
                zone = ?event.zone,
                "Geofence registered at parked location"
            ),
            Err(err) => tracing::warn!(
                error = %err,
                "Geofence registration failed; no tracking until next session start"
            ),
        }
    }

    fn apply(&self, event: TrackingEvent) {
        let session_active = self.session_active_or_false();

        let mut cell = match self.cell.lock() {
            Ok(cell) => cell,
            Err(_) => {
                tracing::error!("Tracking state lock poisoned; dropping event");
                return;
            }
        };

        let transition =
            reduce_tracking(&cell.tracking, session_active, cell.last_reminder_at, &event);

        if transition.next != cell.tracking {
            tracing::info!(
                inside_geofence = transition.next.inside_geofence,
                initial_enter_consumed = transition.next.initial_enter_consumed,
                armed = transition.next.armed,
                "Tracking state updated"
            );
        }
        cell.tracking = transition.next;

        let mut platform_effects = Vec::with_capacity(transition.effects.len());
        for effect in transition.effects {
            match effect {
                Effect::FireReminder { at, .. } => {
                    cell.last_reminder_at = Some(at);
                    platform_effects.push(effect);
                }
                Effect::StartMotionUpdates => {
                    cell.motion_active = true;
                    platform_effects.push(effect);
                }
                Effect::StopMotionUpdates => {
                    cell.motion_active = false;
                    platform_effects.push(effect);
                }
                Effect::DeregisterGeofence => platform_effects.push(effect),
                Effect::ClearSession => {
                    if let Err(err) = self.store.set_session_active(false) {
                        tracing::warn!(error = %err, "Failed to clear session flag");
                    }
                }
            }
        }

        drop(cell);

        for effect in platform_effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&self, effect: Effect) {
        match effect {
            Effect::FireReminder { trigger, at } => {
                let parked = self.store.load_parking().ok().flatten();
                let reminder = notify::build_reminder(parked.as_ref(), trigger, at);
                match self.platform.notifier.show(&reminder) {
                    Ok(()) => tracing::info!(?trigger, "Reminder notification delivered"),
                    Err(err) => tracing::warn!(error = %err, "Reminder notification failed"),
                }
            }
            Effect::StartMotionUpdates => {
                match self.platform.motion.start(self.motion_interval_ms) {
                    Ok(()) => tracing::debug!(
                        interval_ms = self.motion_interval_ms,
                        "Motion classification started"
                    ),
                    Err(err) => tracing::warn!(error = %err, "Motion classification start failed"),
                }
            }
            Effect::StopMotionUpdates => match self.platform.motion.stop() {
                Ok(()) => tracing::debug!("Motion classification stopped"),
                Err(err) => tracing::warn!(error = %err, "Motion classification stop failed"),
            },
            Effect::DeregisterGeofence => {
                match self.platform.geofence.deregister(parking::GEOFENCE_ID) {
                    Ok(()) => tracing::debug!("Geofence deregistered"),
                    Err(err) => tracing::warn!(error = %err, "Geofence deregistration failed"),
                }
            }
            // Applied under the lock with the rest of the durable state.
            Effect::ClearSession => {}
        }
    }

    pub fn status_snapshot(&self) -> Result<StatusSnapshot, String> {
        let session_active = self.store.session_active()?;
        let parking = self.store.load_parking()?;
        let cell = self
            .cell
            .lock()
            .map_err(|_| "Tracking state lock poisoned".to_string())?;

        Ok(StatusSnapshot {
            session_active,
            parking,
            tracking: cell.tracking.clone(),
            motion_active: cell.motion_active,
            last_reminder_at: cell.last_reminder_at,
        })
    }

    fn session_active_or_false(&self) -> bool {
        match self.store.session_active() {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read session flag; treating as inactive");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub session_active: bool,
    pub parking: Option<ParkingLocation>,
    pub tracking: TrackingState,
    pub motion_active: bool,
    pub last_reminder_at: Option<DateTime<Utc>>,
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
