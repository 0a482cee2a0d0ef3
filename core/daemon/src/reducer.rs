//! The reminder state machine.
//!
//! A pure reducer over the three inbound event streams (geofence
//! transitions, motion reports, session lifecycle). Each call takes the
//! current tracking flags plus the event and returns the next flags and the
//! side effects to issue; the serialization point in `state.rs` applies them.
//!
//! The flags jointly encode the states:
//!
//! ```text
//! inside=true,  consumed=false            just parked (confirmation ENTER pending)
//! inside=false, armed=false               away from the car, not yet returned
//! inside=true,  armed=true                genuine return observed, classifier running
//! inside=false, armed=true                left again after returning; a high-confidence
//!                                         in-vehicle report from here fires the reminder
//! ```

use chrono::{DateTime, Duration, Utc};
use parksentry_daemon_protocol::MotionKind;
use serde::Serialize;

/// Minimum classifier confidence for an in-vehicle report to count.
pub const IN_VEHICLE_MIN_CONFIDENCE: u8 = 70;
/// An exit counts as driving away only this soon after an in-vehicle report.
pub const DROVE_RECENTLY_WINDOW_MS: i64 = 90_000;
/// Minimum gap between two delivered reminders.
pub const REMINDER_THROTTLE_MS: i64 = 120_000;

/// In-memory tracking flags. Reset together; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackingState {
    pub inside_geofence: bool,
    pub initial_enter_consumed: bool,
    pub armed: bool,
    pub last_drive_at: Option<DateTime<Utc>>,
}

impl TrackingState {
    /// State right after a session start registered the geofence: the device
    /// is standing at the center, and the platform's confirmation ENTER has
    /// not been seen yet.
    pub fn just_parked() -> Self {
        Self {
            inside_geofence: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingEvent {
    Enter {
        at: DateTime<Utc>,
    },
    Exit {
        at: DateTime<Utc>,
    },
    Motion {
        kind: MotionKind,
        confidence_pct: u8,
        at: DateTime<Utc>,
    },
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderTrigger {
    /// Geofence exit while an in-vehicle report was recent.
    ExitWhileDriving,
    /// High-confidence in-vehicle report while armed and outside.
    DrivingOutside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    FireReminder {
        trigger: ReminderTrigger,
        at: DateTime<Utc>,
    },
    StartMotionUpdates,
    StopMotionUpdates,
    DeregisterGeofence,
    ClearSession,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: TrackingState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(current: &TrackingState) -> Self {
        Self {
            next: current.clone(),
            effects: Vec::new(),
        }
    }
}

/// One step of the state machine.
///
/// `last_reminder_at` is the throttle timestamp, kept outside
/// [`TrackingState`] so it survives the session-end reset. Timestamps come
/// from the event envelope, never from the wall clock, which keeps every
/// step deterministic.
pub fn reduce_tracking(
    current: &TrackingState,
    session_active: bool,
    last_reminder_at: Option<DateTime<Utc>>,
    event: &TrackingEvent,
) -> Transition {
    match *event {
        TrackingEvent::Enter { .. } => {
            let mut next = current.clone();
            next.inside_geofence = true;
            if !current.initial_enter_consumed {
                // The platform fires an ENTER as registration confirmation:
                // "device is at the point just registered", not a return.
                next.initial_enter_consumed = true;
                return Transition {
                    next,
                    effects: Vec::new(),
                };
            }
            // Genuine return to the parked car. Arming may re-assert an
            // already-armed state; the classifier start is idempotent.
            next.armed = true;
            Transition {
                next,
                effects: vec![Effect::StartMotionUpdates],
            }
        }
        TrackingEvent::Exit { at } => {
            let mut next = current.clone();
            next.inside_geofence = false;
            if current.armed
                && session_active
                && drove_recently(current.last_drive_at, at)
                && throttle_open(last_reminder_at, at)
            {
                next.armed = false;
                return Transition {
                    next,
                    effects: vec![
                        Effect::FireReminder {
                            trigger: ReminderTrigger::ExitWhileDriving,
                            at,
                        },
                        Effect::StopMotionUpdates,
                    ],
                };
            }
            // Not a drive-away (or throttled): stay armed if we were, and
            // keep the classifier running so a late report can still fire.
            Transition {
                next,
                effects: Vec::new(),
            }
        }
        TrackingEvent::Motion {
            kind,
            confidence_pct,
            at,
        } => {
            if !session_active {
                // Nothing left to remind about; shut the classifier down.
                return Transition {
                    next: current.clone(),
                    effects: vec![Effect::StopMotionUpdates],
                };
            }
            if kind != MotionKind::InVehicle || confidence_pct < IN_VEHICLE_MIN_CONFIDENCE {
                return Transition::unchanged(current);
            }
            let mut next = current.clone();
            next.last_drive_at = Some(at);
            if current.armed
                && !current.inside_geofence
                && throttle_open(last_reminder_at, at)
            {
                next.armed = false;
                return Transition {
                    next,
                    effects: vec![
                        Effect::FireReminder {
                            trigger: ReminderTrigger::DrivingOutside,
                            at,
                        },
                        Effect::StopMotionUpdates,
                    ],
                };
            }
            Transition {
                next,
                effects: Vec::new(),
            }
        }
        TrackingEvent::SessionEnded => Transition {
            next: TrackingState::default(),
            effects: vec![
                Effect::StopMotionUpdates,
                Effect::DeregisterGeofence,
                Effect::ClearSession,
            ],
        },
    }
}

fn drove_recently(last_drive_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_drive_at
        .map(|at| now.signed_duration_since(at) <= Duration::milliseconds(DROVE_RECENTLY_WINDOW_MS))
        .unwrap_or(false)
}

pub fn throttle_open(last_reminder_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_reminder_at
        .map(|at| now.signed_duration_since(at) >= Duration::milliseconds(REMINDER_THROTTLE_MS))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).expect("timestamp")
    }

    fn fired(transition: &Transition) -> Option<ReminderTrigger> {
        transition.effects.iter().find_map(|effect| match effect {
            Effect::FireReminder { trigger, .. } => Some(*trigger),
            _ => None,
        })
    }

    fn armed_outside(last_drive_at: Option<DateTime<Utc>>) -> TrackingState {
        TrackingState {
            inside_geofence: false,
            initial_enter_consumed: true,
            armed: true,
            last_drive_at,
        }
    }

    #[test]
    fn first_enter_after_registration_is_swallowed() {
        let state = TrackingState::just_parked();
        let transition = reduce_tracking(&state, true, None, &TrackingEvent::Enter { at: at(1) });

        assert!(transition.next.initial_enter_consumed);
        assert!(!transition.next.armed);
        assert!(transition.next.inside_geofence);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn first_enter_never_arms_even_from_outside() {
        // A coalesced delivery can make the confirmation ENTER arrive after
        // an exit was already observed; it still must not arm.
        let state = TrackingState {
            inside_geofence: false,
            ..TrackingState::default()
        };
        let transition = reduce_tracking(&state, true, None, &TrackingEvent::Enter { at: at(1) });
        assert!(!transition.next.armed);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn reentry_arms_and_starts_motion_updates() {
        let state = TrackingState {
            inside_geofence: false,
            initial_enter_consumed: true,
            ..TrackingState::default()
        };
        let transition = reduce_tracking(&state, true, None, &TrackingEvent::Enter { at: at(60) });

        assert!(transition.next.armed);
        assert!(transition.next.inside_geofence);
        assert_eq!(transition.effects, vec![Effect::StartMotionUpdates]);
    }

    #[test]
    fn exit_when_not_armed_never_fires() {
        let state = TrackingState {
            inside_geofence: true,
            initial_enter_consumed: true,
            armed: false,
            last_drive_at: Some(at(0)),
        };
        let transition = reduce_tracking(&state, true, None, &TrackingEvent::Exit { at: at(10) });

        assert!(!transition.next.inside_geofence);
        assert_eq!(fired(&transition), None);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn exit_without_recent_drive_keeps_armed_and_motion_running() {
        let state = TrackingState {
            inside_geofence: true,
            initial_enter_consumed: true,
            armed: true,
            last_drive_at: None,
        };
        let transition = reduce_tracking(&state, true, None, &TrackingEvent::Exit { at: at(10) });

        assert!(transition.next.armed);
        assert!(!transition.next.inside_geofence);
        assert_eq!(fired(&transition), None);
        assert!(!transition.effects.contains(&Effect::StopMotionUpdates));
    }

    #[test]
    fn exit_with_recent_drive_fires_and_disarms() {
        let state = TrackingState {
            inside_geofence: true,
            initial_enter_consumed: true,
            armed: true,
            last_drive_at: Some(at(0)),
        };
        let transition = reduce_tracking(&state, true, None, &TrackingEvent::Exit { at: at(30) });

        assert_eq!(fired(&transition), Some(ReminderTrigger::ExitWhileDriving));
        assert!(!transition.next.armed);
        assert!(transition.effects.contains(&Effect::StopMotionUpdates));
    }

    #[test]
    fn exit_fire_requires_active_session() {
        let state = TrackingState {
            inside_geofence: true,
            initial_enter_consumed: true,
            armed: true,
            last_drive_at: Some(at(0)),
        };
        let transition = reduce_tracking(&state, false, None, &TrackingEvent::Exit { at: at(30) });

        assert_eq!(fired(&transition), None);
        assert!(transition.next.armed);
    }

    #[test]
    fn drove_recently_window_boundary() {
        let state = TrackingState {
            inside_geofence: true,
            initial_enter_consumed: true,
            armed: true,
            last_drive_at: Some(at(0)),
        };

        let on_edge = reduce_tracking(&state, true, None, &TrackingEvent::Exit { at: at(90) });
        assert_eq!(fired(&on_edge), Some(ReminderTrigger::ExitWhileDriving));

        let past_edge = reduce_tracking(&state, true, None, &TrackingEvent::Exit { at: at(91) });
        assert_eq!(fired(&past_edge), None);
        assert!(past_edge.next.armed);
    }

    #[test]
    fn motion_while_armed_outside_fires_and_stops_classifier() {
        let state = armed_outside(None);
        let transition = reduce_tracking(
            &state,
            true,
            None,
            &TrackingEvent::Motion {
                kind: MotionKind::InVehicle,
                confidence_pct: 85,
                at: at(120),
            },
        );

        assert_eq!(fired(&transition), Some(ReminderTrigger::DrivingOutside));
        assert!(!transition.next.armed);
        assert_eq!(transition.next.last_drive_at, Some(at(120)));
        assert!(transition.effects.contains(&Effect::StopMotionUpdates));
    }

    #[test]
    fn motion_below_confidence_is_ignored_entirely() {
        let state = armed_outside(None);
        let transition = reduce_tracking(
            &state,
            true,
            None,
            &TrackingEvent::Motion {
                kind: MotionKind::InVehicle,
                confidence_pct: 69,
                at: at(120),
            },
        );

        assert_eq!(transition.next, state);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn motion_of_other_kind_is_ignored() {
        let state = armed_outside(None);
        let transition = reduce_tracking(
            &state,
            true,
            None,
            &TrackingEvent::Motion {
                kind: MotionKind::Walking,
                confidence_pct: 99,
                at: at(120),
            },
        );

        assert_eq!(transition.next, state);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn motion_inside_geofence_records_without_firing() {
        let state = TrackingState {
            inside_geofence: true,
            initial_enter_consumed: true,
            armed: true,
            last_drive_at: None,
        };
        let transition = reduce_tracking(
            &state,
            true,
            None,
            &TrackingEvent::Motion {
                kind: MotionKind::InVehicle,
                confidence_pct: 90,
                at: at(5),
            },
        );

        assert_eq!(fired(&transition), None);
        assert_eq!(transition.next.last_drive_at, Some(at(5)));
        assert!(transition.next.armed);
    }

    #[test]
    fn motion_without_session_stops_classifier_only() {
        let state = armed_outside(Some(at(0)));
        let transition = reduce_tracking(
            &state,
            false,
            None,
            &TrackingEvent::Motion {
                kind: MotionKind::InVehicle,
                confidence_pct: 95,
                at: at(10),
            },
        );

        assert_eq!(fired(&transition), None);
        assert_eq!(transition.effects, vec![Effect::StopMotionUpdates]);
        assert_eq!(transition.next, state);
    }

    #[test]
    fn throttled_fire_leaves_state_armed() {
        let state = armed_outside(None);
        let transition = reduce_tracking(
            &state,
            true,
            Some(at(60)),
            &TrackingEvent::Motion {
                kind: MotionKind::InVehicle,
                confidence_pct: 90,
                at: at(90),
            },
        );

        assert_eq!(fired(&transition), None);
        assert!(transition.next.armed);
        assert_eq!(transition.next.last_drive_at, Some(at(90)));
        assert!(!transition.effects.contains(&Effect::StopMotionUpdates));
    }

    #[test]
    fn throttle_window_boundary() {
        let state = armed_outside(None);
        let event = |secs| TrackingEvent::Motion {
            kind: MotionKind::InVehicle,
            confidence_pct: 90,
            at: at(secs),
        };

        let still_closed = reduce_tracking(&state, true, Some(at(0)), &event(119));
        assert_eq!(fired(&still_closed), None);

        let open = reduce_tracking(&state, true, Some(at(0)), &event(120));
        assert_eq!(fired(&open), Some(ReminderTrigger::DrivingOutside));
    }

    #[test]
    fn session_end_resets_everything() {
        let state = armed_outside(Some(at(100)));
        let transition = reduce_tracking(&state, true, None, &TrackingEvent::SessionEnded);

        assert_eq!(transition.next, TrackingState::default());
        assert_eq!(
            transition.effects,
            vec![
                Effect::StopMotionUpdates,
                Effect::DeregisterGeofence,
                Effect::ClearSession,
            ]
        );
    }

    // Scenario walkthroughs: park, leave, return, drive off.

    #[test]
    fn scenario_leave_without_returning_never_fires() {
        let mut state = TrackingState::just_parked();

        let enter = reduce_tracking(&state, true, None, &TrackingEvent::Enter { at: at(1) });
        assert!(enter.effects.is_empty());
        state = enter.next;

        let exit = reduce_tracking(&state, true, None, &TrackingEvent::Exit { at: at(300) });
        assert_eq!(fired(&exit), None);
        assert!(!exit.next.armed);
        assert!(!exit.next.inside_geofence);
    }

    #[test]
    fn scenario_return_and_drive_off_fires_exactly_once() {
        let mut state = TrackingState::just_parked();
        let mut last_reminder_at = None;
        let mut reminders = 0u32;

        let events = [
            TrackingEvent::Enter { at: at(1) },
            TrackingEvent::Exit { at: at(300) },
            // Genuine return two hours later.
            TrackingEvent::Enter { at: at(7_200) },
            // Walks out again pushing a trolley; no in-vehicle report yet.
            TrackingEvent::Exit { at: at(7_260) },
            // Now driving.
            TrackingEvent::Motion {
                kind: MotionKind::InVehicle,
                confidence_pct: 85,
                at: at(7_290),
            },
            // Second report five seconds later must be suppressed.
            TrackingEvent::Motion {
                kind: MotionKind::InVehicle,
                confidence_pct: 90,
                at: at(7_295),
            },
        ];

        for event in &events {
            let transition = reduce_tracking(&state, true, last_reminder_at, event);
            if let Some(Effect::FireReminder { at, .. }) = transition
                .effects
                .iter()
                .find(|effect| matches!(effect, Effect::FireReminder { .. }))
            {
                reminders += 1;
                last_reminder_at = Some(*at);
            }
            state = transition.next;
        }

        assert_eq!(reminders, 1);
        assert!(!state.armed);
        assert_eq!(state.last_drive_at, Some(at(7_295)));
    }

    #[test]
    fn scenario_exit_then_late_motion_still_fires_once() {
        // Exit arrives before any in-vehicle report (not droveRecently), so
        // the classifier keeps running and the report fires from outside.
        let mut state = TrackingState {
            inside_geofence: true,
            initial_enter_consumed: true,
            armed: true,
            last_drive_at: None,
        };

        let exit = reduce_tracking(&state, true, None, &TrackingEvent::Exit { at: at(10) });
        assert_eq!(fired(&exit), None);
        state = exit.next;

        let motion = reduce_tracking(
            &state,
            true,
            None,
            &TrackingEvent::Motion {
                kind: MotionKind::InVehicle,
                confidence_pct: 80,
                at: at(40),
            },
        );
        assert_eq!(fired(&motion), Some(ReminderTrigger::DrivingOutside));
        assert!(!motion.next.armed);
    }

    #[test]
    fn scenario_session_end_mid_armed_outside_resets_and_ignores_strays() {
        let state = armed_outside(Some(at(0)));

        let ended = reduce_tracking(&state, true, None, &TrackingEvent::SessionEnded);
        assert_eq!(fired(&ended), None);
        assert!(ended.effects.contains(&Effect::DeregisterGeofence));
        let state = ended.next;
        assert_eq!(state, TrackingState::default());

        // Stray report after the session ended: no reminder, no arming.
        let stray = reduce_tracking(
            &state,
            false,
            None,
            &TrackingEvent::Motion {
                kind: MotionKind::InVehicle,
                confidence_pct: 99,
                at: at(30),
            },
        );
        assert_eq!(fired(&stray), None);
        assert_eq!(stray.next, TrackingState::default());
    }
}
