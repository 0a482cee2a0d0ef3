//! Parked-location capture and geofence derivation.
//!
//! One circular region, one fixed logical id. Registering for a new session
//! replaces whatever was registered before under the same id.

use serde::Serialize;
use tracing::{debug, warn};

use crate::platform::{Fix, LocationSource, PlatformError};

pub const GEOFENCE_ID: &str = "parking";
pub const GEOFENCE_RADIUS_METERS: f64 = 100.0;

/// Where the car was left. Durable across restarts; overwritten on the next
/// session start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParkingLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceRegion {
    pub id: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
}

impl GeofenceRegion {
    pub fn around(location: &ParkingLocation) -> Self {
        Self {
            id: GEOFENCE_ID,
            latitude: location.latitude,
            longitude: location.longitude,
            radius_meters: GEOFENCE_RADIUS_METERS,
        }
    }
}

/// Best-effort fix for the spot the car was just left at.
///
/// One fresh attempt, one fall-back to the platform's cached fix, no retry
/// loop. A permission failure is final: the cached fix would be just as
/// unreadable.
pub fn acquire_parking_fix(source: &dyn LocationSource) -> Result<Fix, PlatformError> {
    match source.current_fix() {
        Ok(fix) => Ok(fix),
        Err(PlatformError::PermissionDenied) => Err(PlatformError::PermissionDenied),
        Err(err) => {
            debug!(error = %err, "Fresh fix unavailable; falling back to last known");
            source.last_known_fix().map_err(|fallback_err| {
                warn!(error = %fallback_err, "Last-known fix unavailable too");
                PlatformError::LocationUnavailable
            })
        }
    }
}
