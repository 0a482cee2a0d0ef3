//! SQLite persistence for parksentry-daemon.
//!
//! A single-writer key–value store mirroring the preference layout the
//! reminder engine relies on: the parked position as raw f64 bit patterns,
//! the capture time in epoch millis, and the session-active flag. Everything
//! else is in-memory and rebuilt from defaults on restart.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

use crate::parking::ParkingLocation;

const KEY_PARKING_LAT: &str = "parking_lat";
const KEY_PARKING_LNG: &str = "parking_lng";
const KEY_PARKING_TIME: &str = "parking_time";
const KEY_SESSION_ACTIVE: &str = "session_active";

pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create store directory: {}", err))?;
        }
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS prefs (\
                    key TEXT PRIMARY KEY,\
                    value INTEGER NOT NULL\
                 )",
                [],
            )
            .map_err(|err| format!("Failed to create prefs table: {}", err))?;
            Ok(())
        })
    }

    /// Persist the parked position in one transaction so a crash can never
    /// leave a partially written location behind.
    pub fn save_parking(&self, location: &ParkingLocation) -> Result<(), String> {
        let entries = [
            (KEY_PARKING_LAT, location.latitude.to_bits() as i64),
            (KEY_PARKING_LNG, location.longitude.to_bits() as i64),
            (KEY_PARKING_TIME, location.captured_at_ms),
        ];

        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to open transaction: {}", err))?;
            for (key, value) in entries {
                tx.execute(
                    "INSERT INTO prefs (key, value) VALUES (?1, ?2)\
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )
                .map_err(|err| format!("Failed to write {}: {}", key, err))?;
            }
            tx.commit()
                .map_err(|err| format!("Failed to commit parking location: {}", err))
        })
    }

    pub fn load_parking(&self) -> Result<Option<ParkingLocation>, String> {
        self.with_connection(|conn| {
            let lat = read_value(conn, KEY_PARKING_LAT)?;
            let lng = read_value(conn, KEY_PARKING_LNG)?;
            let time = read_value(conn, KEY_PARKING_TIME)?;

            match (lat, lng, time) {
                (Some(lat), Some(lng), Some(time)) => Ok(Some(ParkingLocation {
                    latitude: f64::from_bits(lat as u64),
                    longitude: f64::from_bits(lng as u64),
                    captured_at_ms: time,
                })),
                _ => Ok(None),
            }
        })
    }

    pub fn set_session_active(&self, active: bool) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO prefs (key, value) VALUES (?1, ?2)\
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![KEY_SESSION_ACTIVE, active as i64],
            )
            .map_err(|err| format!("Failed to write session flag: {}", err))?;
            Ok(())
        })
    }

    pub fn session_active(&self) -> Result<bool, String> {
        self.with_connection(|conn| Ok(read_value(conn, KEY_SESSION_ACTIVE)?.unwrap_or(0) != 0))
    }

    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = Connection::open(&self.path)
            .map_err(|err| format!("Failed to open store at {}: {}", self.path.display(), err))?;
        operation(&mut conn)
    }
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<i64>, String> {
    conn.query_row(
        "SELECT value FROM prefs WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(|err| format!("Failed to read {}: {}", key, err))
}
