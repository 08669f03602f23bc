//! SQLite-backed store. One handle owns the connection; everything the
//! handlers read or write goes through a method here, so the counter
//! operations that must be atomic live next to the schema that backs them.
//!
//! Timestamps are unix seconds written by SQLite itself
//! (`strftime('%s','now')`) and rendered to local `YYYY-MM-DD HH:MM:SS`
//! strings on the way out.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

use crate::auth::{AuthUser, Role};
use crate::route::RouteStop;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Bus {
    pub id: i64,
    pub name: String,
    pub stops_cleared: i64,
    pub current_rep: i64,
    pub total_rep: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Stop {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Admin-facing route entry row; `bus_name` only on the list-all query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RouteEntryDetail {
    pub id: i64,
    pub bus_id: i64,
    pub bus_stop_id: i64,
    pub stop_order: i64,
    pub time_from_start: f64,
    pub stop_name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus_name: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StartTime {
    pub id: i64,
    pub bus_id: i64,
    pub rep_no: i64,
    pub start_time: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BusLocation {
    pub id: i64,
    pub bus_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Latest known position of one bus, for the fleet map.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FleetBusLocation {
    pub id: i64,
    pub name: String,
    pub location: Coordinates,
    pub timestamp: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UserLocation {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UserLocationDetail {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub coordinates: Coordinates,
    pub timestamp: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UserPublic {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: String,
}

/// Full account row including the password digest. Never serialized.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DriverRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub bus_id: Option<i64>,
    pub bus_name: Option<String>,
}

/// Bus joined with its (first) assigned driver.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BusDriverRow {
    pub id: i64,
    pub name: String,
    pub current_rep: i64,
    pub driver_id: Option<i64>,
    pub driver_name: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Statistics {
    pub total_users: i64,
    pub active_users: i64,
    pub total_buses: i64,
    pub active_buses: i64,
    pub total_stops: i64,
    pub total_routes: i64,
    pub total_drivers: i64,
    pub recent_locations: i64,
}

/// Result of the atomic clear-stop advance.
#[derive(Debug)]
pub enum AdvanceOutcome {
    /// The stop is not part of the bus's route; nothing was changed.
    NotInRoute,
    Advanced {
        bus: Bus,
        /// True when the last stop was cleared and the counters wrapped into
        /// a new repetition.
        wrapped: bool,
    },
}

pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _)
        if e.code == rusqlite::ErrorCode::ConstraintViolation)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS buses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    stops_cleared INTEGER NOT NULL DEFAULT 0,
    current_rep INTEGER NOT NULL DEFAULT 1,
    total_rep INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS bus_stops (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS routes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bus_id INTEGER NOT NULL REFERENCES buses(id),
    bus_stop_id INTEGER NOT NULL REFERENCES bus_stops(id),
    stop_order INTEGER NOT NULL,
    time_from_start REAL NOT NULL DEFAULT 0,
    UNIQUE (bus_id, stop_order)
);

CREATE TABLE IF NOT EXISTS bus_start_time (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bus_id INTEGER NOT NULL REFERENCES buses(id),
    rep_no INTEGER NOT NULL,
    start_time TEXT NOT NULL,
    UNIQUE (bus_id, rep_no)
);

CREATE TABLE IF NOT EXISTS bus_drivers (
    user_id INTEGER NOT NULL REFERENCES users(id),
    bus_id INTEGER NOT NULL REFERENCES buses(id),
    UNIQUE (user_id, bus_id)
);

CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bus_id INTEGER NOT NULL REFERENCES buses(id),
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);
CREATE INDEX IF NOT EXISTS idx_locations_bus_time ON locations (bus_id, timestamp);

CREATE TABLE IF NOT EXISTS user_locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    timestamp INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);
"#;

impl SqliteStore {
    pub fn open(path: &str) -> SqlResult<SqliteStore> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> SqlResult<SqliteStore> {
        Self::open(":memory:")
    }

    // ---- buses ----

    pub fn buses_by_name(&self) -> SqlResult<Vec<Bus>> {
        self.bus_list("SELECT id, name, stops_cleared, current_rep, total_rep FROM buses ORDER BY name")
    }

    pub fn buses_by_id(&self) -> SqlResult<Vec<Bus>> {
        self.bus_list("SELECT id, name, stops_cleared, current_rep, total_rep FROM buses ORDER BY id")
    }

    fn bus_list(&self, sql: &str) -> SqlResult<Vec<Bus>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], map_bus)?;
        rows.collect()
    }

    pub fn bus(&self, id: i64) -> SqlResult<Option<Bus>> {
        let conn = self.conn.lock();
        bus_row(&conn, id).optional()
    }

    pub fn add_bus(&self, name: &str) -> SqlResult<Bus> {
        let conn = self.conn.lock();
        conn.execute("INSERT INTO buses (name) VALUES (?1)", params![name])?;
        let id = conn.last_insert_rowid();
        bus_row(&conn, id)
    }

    pub fn rename_bus(&self, id: i64, name: &str) -> SqlResult<Option<Bus>> {
        let conn = self.conn.lock();
        let n = conn.execute("UPDATE buses SET name = ?1 WHERE id = ?2", params![name, id])?;
        if n == 0 {
            return Ok(None);
        }
        bus_row(&conn, id).optional()
    }

    pub fn set_total_rep(&self, id: i64, total_rep: i64) -> SqlResult<Option<Bus>> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE buses SET total_rep = ?1 WHERE id = ?2",
            params![total_rep, id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        bus_row(&conn, id).optional()
    }

    pub fn delete_bus(&self, id: i64) -> SqlResult<bool> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM buses WHERE id = ?1", params![id])? > 0)
    }

    pub fn bus_with_driver(&self, id: i64) -> SqlResult<Option<BusDriverRow>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT b.id, b.name, b.current_rep, bd.user_id, u.username
             FROM buses b
             LEFT JOIN bus_drivers bd ON b.id = bd.bus_id
             LEFT JOIN users u ON bd.user_id = u.id
             WHERE b.id = ?1
             LIMIT 1",
            params![id],
            |row| {
                Ok(BusDriverRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    current_rep: row.get(2)?,
                    driver_id: row.get(3)?,
                    driver_name: row.get(4)?,
                })
            },
        )
        .optional()
    }

    pub fn bus_for_driver(&self, user_id: i64) -> SqlResult<Option<Bus>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT b.id, b.name, b.stops_cleared, b.current_rep, b.total_rep
             FROM buses b
             JOIN bus_drivers bd ON b.id = bd.bus_id
             WHERE bd.user_id = ?1
             LIMIT 1",
            params![user_id],
            map_bus,
        )
        .optional()
    }

    pub fn is_driver_assigned(&self, user_id: i64, bus_id: i64) -> SqlResult<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bus_drivers WHERE user_id = ?1 AND bus_id = ?2",
            params![user_id, bus_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// The atomic clear-stop advance: route membership check and counter
    /// update happen in one transaction, so concurrent clears serialize and
    /// none is lost.
    pub fn advance_stop(&self, bus_id: i64, stop_id: i64) -> SqlResult<AdvanceOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let order: Option<i64> = tx
            .query_row(
                "SELECT stop_order FROM routes
                 WHERE bus_id = ?1 AND bus_stop_id = ?2
                 ORDER BY stop_order LIMIT 1",
                params![bus_id, stop_id],
                |row| row.get(0),
            )
            .optional()?;
        let order = match order {
            Some(order) => order,
            None => return Ok(AdvanceOutcome::NotInRoute),
        };

        let total: i64 = tx.query_row(
            "SELECT COUNT(*) FROM routes WHERE bus_id = ?1",
            params![bus_id],
            |row| row.get(0),
        )?;

        let wrapped = order == total;
        if wrapped {
            tx.execute(
                "UPDATE buses SET stops_cleared = 0, current_rep = current_rep + 1 WHERE id = ?1",
                params![bus_id],
            )?;
        } else {
            tx.execute(
                "UPDATE buses SET stops_cleared = stops_cleared + 1 WHERE id = ?1",
                params![bus_id],
            )?;
        }

        let bus = bus_row(&tx, bus_id)?;
        tx.commit()?;
        Ok(AdvanceOutcome::Advanced { bus, wrapped })
    }

    /// Direct counter override for a driver starting mid-schedule. The
    /// cleared count is stored as given; readers normalize it.
    pub fn initialize_trip(
        &self,
        bus_id: i64,
        rep_no: i64,
        stops_cleared: i64,
    ) -> SqlResult<Option<Bus>> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE buses SET current_rep = ?1, stops_cleared = ?2 WHERE id = ?3",
            params![rep_no, stops_cleared, bus_id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        bus_row(&conn, bus_id).optional()
    }

    // ---- stops ----

    pub fn stops_by_name(&self) -> SqlResult<Vec<Stop>> {
        self.stop_list("SELECT id, name, latitude, longitude FROM bus_stops ORDER BY name")
    }

    pub fn stops_by_id(&self) -> SqlResult<Vec<Stop>> {
        self.stop_list("SELECT id, name, latitude, longitude FROM bus_stops ORDER BY id")
    }

    fn stop_list(&self, sql: &str) -> SqlResult<Vec<Stop>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], map_stop)?;
        rows.collect()
    }

    pub fn stop(&self, id: i64) -> SqlResult<Option<Stop>> {
        let conn = self.conn.lock();
        stop_row(&conn, id).optional()
    }

    pub fn add_stop(&self, name: &str, latitude: f64, longitude: f64) -> SqlResult<Stop> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bus_stops (name, latitude, longitude) VALUES (?1, ?2, ?3)",
            params![name, latitude, longitude],
        )?;
        let id = conn.last_insert_rowid();
        stop_row(&conn, id)
    }

    pub fn update_stop(
        &self,
        id: i64,
        name: &str,
        latitude: f64,
        longitude: f64,
    ) -> SqlResult<Option<Stop>> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE bus_stops SET name = ?1, latitude = ?2, longitude = ?3 WHERE id = ?4",
            params![name, latitude, longitude, id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        stop_row(&conn, id).optional()
    }

    pub fn stop_route_references(&self, id: i64) -> SqlResult<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM routes WHERE bus_stop_id = ?1",
            params![id],
            |row| row.get(0),
        )
    }

    pub fn delete_stop(&self, id: i64) -> SqlResult<bool> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM bus_stops WHERE id = ?1", params![id])? > 0)
    }

    // ---- route entries ----

    pub fn route_stops(&self, bus_id: i64) -> SqlResult<Vec<RouteStop>> {
        let conn = self.conn.lock();
        route_stops_on(&conn, bus_id)
    }

    pub fn all_route_entries(&self) -> SqlResult<Vec<RouteEntryDetail>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.bus_id, r.bus_stop_id, r.stop_order, r.time_from_start,
                    bs.name, bs.latitude, bs.longitude, b.name
             FROM routes r
             JOIN bus_stops bs ON r.bus_stop_id = bs.id
             JOIN buses b ON r.bus_id = b.id
             ORDER BY r.bus_id, r.stop_order",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RouteEntryDetail {
                id: row.get(0)?,
                bus_id: row.get(1)?,
                bus_stop_id: row.get(2)?,
                stop_order: row.get(3)?,
                time_from_start: row.get(4)?,
                stop_name: row.get(5)?,
                latitude: row.get(6)?,
                longitude: row.get(7)?,
                bus_name: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    pub fn route_entries_for_bus(&self, bus_id: i64) -> SqlResult<Vec<RouteEntryDetail>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.bus_id, r.bus_stop_id, r.stop_order, r.time_from_start,
                    bs.name, bs.latitude, bs.longitude
             FROM routes r
             JOIN bus_stops bs ON r.bus_stop_id = bs.id
             WHERE r.bus_id = ?1
             ORDER BY r.stop_order",
        )?;
        let rows = stmt.query_map(params![bus_id], |row| {
            Ok(RouteEntryDetail {
                id: row.get(0)?,
                bus_id: row.get(1)?,
                bus_stop_id: row.get(2)?,
                stop_order: row.get(3)?,
                time_from_start: row.get(4)?,
                stop_name: row.get(5)?,
                latitude: row.get(6)?,
                longitude: row.get(7)?,
                bus_name: None,
            })
        })?;
        rows.collect()
    }

    pub fn add_route_entry(
        &self,
        bus_id: i64,
        bus_stop_id: i64,
        stop_order: i64,
        time_from_start: f64,
    ) -> SqlResult<Option<RouteEntryDetail>> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO routes (bus_id, bus_stop_id, stop_order, time_from_start)
             VALUES (?1, ?2, ?3, ?4)",
            params![bus_id, bus_stop_id, stop_order, time_from_start],
        )?;
        let id = conn.last_insert_rowid();
        route_entry_on(&conn, id)
    }

    pub fn update_route_entry(
        &self,
        id: i64,
        bus_stop_id: Option<i64>,
        stop_order: Option<i64>,
        time_from_start: Option<f64>,
    ) -> SqlResult<Option<RouteEntryDetail>> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE routes SET
                 bus_stop_id = COALESCE(?1, bus_stop_id),
                 stop_order = COALESCE(?2, stop_order),
                 time_from_start = COALESCE(?3, time_from_start)
             WHERE id = ?4",
            params![bus_stop_id, stop_order, time_from_start, id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        route_entry_on(&conn, id)
    }

    pub fn delete_route_entry(&self, id: i64) -> SqlResult<bool> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM routes WHERE id = ?1", params![id])? > 0)
    }

    /// Buses whose route visits both stops, for the connection search.
    pub fn buses_serving_both(&self, from_stop: i64, to_stop: i64) -> SqlResult<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT r1.bus_id, b.name
             FROM routes r1
             JOIN routes r2 ON r1.bus_id = r2.bus_id
             JOIN buses b ON b.id = r1.bus_id
             WHERE r1.bus_stop_id = ?1 AND r2.bus_stop_id = ?2
             ORDER BY b.name",
        )?;
        let rows = stmt.query_map(params![from_stop, to_stop], |row| row.get(0))?;
        rows.collect()
    }

    // ---- scheduled start times ----

    pub fn start_times(&self, bus_id: i64) -> SqlResult<Vec<StartTime>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, bus_id, rep_no, start_time FROM bus_start_time
             WHERE bus_id = ?1 ORDER BY rep_no",
        )?;
        let rows = stmt.query_map(params![bus_id], map_start_time)?;
        rows.collect()
    }

    pub fn start_time_for(&self, bus_id: i64, rep_no: i64) -> SqlResult<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT start_time FROM bus_start_time WHERE bus_id = ?1 AND rep_no = ?2",
            params![bus_id, rep_no],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn has_start_time(&self, bus_id: i64, rep_no: i64) -> SqlResult<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bus_start_time WHERE bus_id = ?1 AND rep_no = ?2",
            params![bus_id, rep_no],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn add_start_time(
        &self,
        bus_id: i64,
        rep_no: i64,
        start_time: &str,
    ) -> SqlResult<StartTime> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bus_start_time (bus_id, rep_no, start_time) VALUES (?1, ?2, ?3)",
            params![bus_id, rep_no, start_time],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id, bus_id, rep_no, start_time FROM bus_start_time WHERE id = ?1",
            params![id],
            map_start_time,
        )
    }

    pub fn update_start_time(&self, id: i64, start_time: &str) -> SqlResult<Option<StartTime>> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE bus_start_time SET start_time = ?1 WHERE id = ?2",
            params![start_time, id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        conn.query_row(
            "SELECT id, bus_id, rep_no, start_time FROM bus_start_time WHERE id = ?1",
            params![id],
            map_start_time,
        )
        .optional()
    }

    pub fn delete_start_time(&self, id: i64) -> SqlResult<Option<StartTime>> {
        let conn = self.conn.lock();
        let existing = conn
            .query_row(
                "SELECT id, bus_id, rep_no, start_time FROM bus_start_time WHERE id = ?1",
                params![id],
                map_start_time,
            )
            .optional()?;
        if existing.is_some() {
            conn.execute("DELETE FROM bus_start_time WHERE id = ?1", params![id])?;
        }
        Ok(existing)
    }

    /// Repetition number whose scheduled start matches the given literal.
    pub fn rep_for_start_time(&self, bus_id: i64, start_time: &str) -> SqlResult<Option<i64>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT rep_no FROM bus_start_time WHERE bus_id = ?1 AND start_time = ?2",
            params![bus_id, start_time],
            |row| row.get(0),
        )
        .optional()
    }

    // ---- bus locations ----

    pub fn record_bus_location(
        &self,
        bus_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> SqlResult<BusLocation> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO locations (bus_id, latitude, longitude) VALUES (?1, ?2, ?3)",
            params![bus_id, latitude, longitude],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id, bus_id, latitude, longitude,
                    datetime(timestamp, 'unixepoch', 'localtime')
             FROM locations WHERE id = ?1",
            params![id],
            map_bus_location,
        )
    }

    pub fn latest_bus_location(&self, bus_id: i64) -> SqlResult<Option<BusLocation>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, bus_id, latitude, longitude,
                    datetime(timestamp, 'unixepoch', 'localtime')
             FROM locations WHERE bus_id = ?1
             ORDER BY timestamp DESC LIMIT 1",
            params![bus_id],
            map_bus_location,
        )
        .optional()
    }

    /// Latest position per bus, restricted to samples within the window.
    pub fn fleet_locations(&self, window_secs: i64) -> SqlResult<Vec<FleetBusLocation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT l.bus_id, b.name, l.latitude, l.longitude,
                    datetime(MAX(l.timestamp), 'unixepoch', 'localtime')
             FROM locations l
             JOIN buses b ON b.id = l.bus_id
             WHERE l.timestamp > strftime('%s','now') - ?1
             GROUP BY l.bus_id, b.name
             ORDER BY l.bus_id",
        )?;
        let rows = stmt.query_map(params![window_secs], |row| {
            Ok(FleetBusLocation {
                id: row.get(0)?,
                name: row.get(1)?,
                location: Coordinates {
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                },
                timestamp: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    /// Time-bounded retention delete; returns how many rows went away.
    pub fn delete_stale_locations(&self, retention_secs: i64) -> SqlResult<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM locations WHERE timestamp < strftime('%s','now') - ?1",
            params![retention_secs],
        )
    }

    // ---- user locations ----

    /// One live row per user: update in place, insert on first push.
    pub fn record_user_location(
        &self,
        user_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> SqlResult<UserLocation> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM user_locations WHERE user_id = ?1 LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE user_locations
                     SET latitude = ?2, longitude = ?3, timestamp = strftime('%s','now')
                     WHERE id = ?1",
                    params![id, latitude, longitude],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO user_locations (user_id, latitude, longitude)
                     VALUES (?1, ?2, ?3)",
                    params![user_id, latitude, longitude],
                )?;
                tx.last_insert_rowid()
            }
        };
        let row = tx.query_row(
            "SELECT id, latitude, longitude, datetime(timestamp, 'unixepoch', 'localtime')
             FROM user_locations WHERE id = ?1",
            params![id],
            map_user_location,
        )?;
        tx.commit()?;
        Ok(row)
    }

    pub fn latest_user_location(&self, user_id: i64) -> SqlResult<Option<UserLocation>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, latitude, longitude, datetime(timestamp, 'unixepoch', 'localtime')
             FROM user_locations WHERE user_id = ?1
             ORDER BY timestamp DESC LIMIT 1",
            params![user_id],
            map_user_location,
        )
        .optional()
    }

    pub fn all_user_locations(&self) -> SqlResult<Vec<UserLocationDetail>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ul.id, u.id, u.username, u.email, u.role, ul.latitude, ul.longitude,
                    datetime(ul.timestamp, 'unixepoch', 'localtime')
             FROM user_locations ul
             JOIN users u ON ul.user_id = u.id
             ORDER BY ul.timestamp DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserLocationDetail {
                id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                email: row.get(3)?,
                role: row.get(4)?,
                coordinates: Coordinates {
                    latitude: row.get(5)?,
                    longitude: row.get(6)?,
                },
                timestamp: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    // ---- users and sessions ----

    pub fn user_by_email(&self, email: &str) -> SqlResult<Option<UserAccount>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, email, password, role FROM users WHERE email = ?1",
            params![email],
            map_user_account,
        )
        .optional()
    }

    pub fn insert_user(
        &self,
        username: &str,
        email: &str,
        password_digest: &str,
        role: Role,
    ) -> SqlResult<UserPublic> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (username, email, password, role) VALUES (?1, ?2, ?3, ?4)",
            params![username, email, password_digest, role],
        )?;
        let id = conn.last_insert_rowid();
        user_public_row(&conn, id)
    }

    pub fn user_public(&self, id: i64) -> SqlResult<Option<UserPublic>> {
        let conn = self.conn.lock();
        user_public_row(&conn, id).optional()
    }

    pub fn all_users(&self) -> SqlResult<Vec<UserPublic>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, username, email, role, datetime(created_at, 'unixepoch', 'localtime')
             FROM users ORDER BY id",
        )?;
        let rows = stmt.query_map([], map_user_public)?;
        rows.collect()
    }

    pub fn update_user(
        &self,
        id: i64,
        username: &str,
        email: &str,
        role: Role,
        password_digest: Option<&str>,
    ) -> SqlResult<Option<UserPublic>> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE users SET username = ?1, email = ?2, role = ?3,
                 password = COALESCE(?4, password)
             WHERE id = ?5",
            params![username, email, role, password_digest, id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        user_public_row(&conn, id).optional()
    }

    pub fn update_profile(
        &self,
        id: i64,
        username: Option<&str>,
        email: Option<&str>,
    ) -> SqlResult<Option<UserPublic>> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE users SET username = COALESCE(?1, username), email = COALESCE(?2, email)
             WHERE id = ?3",
            params![username, email, id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        user_public_row(&conn, id).optional()
    }

    pub fn email_taken_by_other(&self, email: &str, user_id: i64) -> SqlResult<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE email = ?1 AND id != ?2",
            params![email, user_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn set_password(&self, id: i64, password_digest: &str) -> SqlResult<bool> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "UPDATE users SET password = ?1 WHERE id = ?2",
            params![password_digest, id],
        )? > 0)
    }

    pub fn user_role(&self, id: i64) -> SqlResult<Option<Role>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT role FROM users WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()
    }

    /// Deleting a user takes their location rows and bus assignments with
    /// them, in one transaction.
    pub fn delete_user_cascade(&self, id: i64) -> SqlResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM user_locations WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM bus_drivers WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![id])?;
        let n = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(n > 0)
    }

    pub fn admin_exists(&self, email: &str) -> SqlResult<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'admin' OR email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn insert_session(&self, token: &str, user_id: i64, ttl_secs: i64) -> SqlResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at)
             VALUES (?1, ?2, strftime('%s','now') + ?3)",
            params![token, user_id, ttl_secs],
        )?;
        Ok(())
    }

    /// Resolve a non-expired session to its user.
    pub fn session_user(&self, token: &str) -> SqlResult<Option<AuthUser>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT u.id, u.username, u.email, u.role
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > strftime('%s','now')",
            params![token],
            |row| {
                Ok(AuthUser {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    role: row.get(3)?,
                })
            },
        )
        .optional()
    }

    /// True only while the expired row is still in the table, before a sweep
    /// takes it.
    pub fn session_expired(&self, token: &str) -> SqlResult<bool> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions
             WHERE token = ?1 AND expires_at <= strftime('%s','now')",
            params![token],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn purge_expired_sessions(&self) -> SqlResult<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM sessions WHERE expires_at <= strftime('%s','now')",
            [],
        )
    }

    pub fn delete_session(&self, token: &str) -> SqlResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(())
    }

    // ---- drivers ----

    pub fn drivers_with_buses(&self) -> SqlResult<Vec<DriverRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT u.id, u.username, u.email, bd.bus_id, b.name
             FROM users u
             LEFT JOIN bus_drivers bd ON u.id = bd.user_id
             LEFT JOIN buses b ON bd.bus_id = b.id
             WHERE u.role = 'driver'
             ORDER BY u.id",
        )?;
        let rows = stmt.query_map([], map_driver)?;
        rows.collect()
    }

    /// User insert and bus assignment commit or roll back together.
    pub fn add_driver(
        &self,
        username: &str,
        email: &str,
        password_digest: &str,
        bus_id: Option<i64>,
    ) -> SqlResult<DriverRow> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO users (username, email, password, role) VALUES (?1, ?2, ?3, 'driver')",
            params![username, email, password_digest],
        )?;
        let user_id = tx.last_insert_rowid();
        if let Some(bus_id) = bus_id {
            tx.execute(
                "INSERT INTO bus_drivers (user_id, bus_id) VALUES (?1, ?2)",
                params![user_id, bus_id],
            )?;
        }
        let row = driver_row_on(&tx, user_id)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn update_driver(
        &self,
        id: i64,
        username: &str,
        email: &str,
        password_digest: Option<&str>,
        bus_id: Option<i64>,
    ) -> SqlResult<Option<DriverRow>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let n = tx.execute(
            "UPDATE users SET username = ?1, email = ?2, password = COALESCE(?3, password)
             WHERE id = ?4 AND role = 'driver'",
            params![username, email, password_digest, id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        tx.execute("DELETE FROM bus_drivers WHERE user_id = ?1", params![id])?;
        if let Some(bus_id) = bus_id {
            tx.execute(
                "INSERT INTO bus_drivers (user_id, bus_id) VALUES (?1, ?2)",
                params![id, bus_id],
            )?;
        }
        let row = driver_row_on(&tx, id).optional()?;
        tx.commit()?;
        Ok(row)
    }

    pub fn delete_driver(&self, id: i64) -> SqlResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM bus_drivers WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![id])?;
        let n = tx.execute(
            "DELETE FROM users WHERE id = ?1 AND role = 'driver'",
            params![id],
        )?;
        if n == 0 {
            return Ok(false);
        }
        tx.commit()?;
        Ok(true)
    }

    // ---- statistics ----

    pub fn statistics(&self, recent_window_secs: i64) -> SqlResult<Statistics> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> SqlResult<i64> { conn.query_row(sql, [], |row| row.get(0)) };
        Ok(Statistics {
            total_users: count("SELECT COUNT(*) FROM users WHERE role = 'user'")?,
            active_users: count(
                "SELECT COUNT(DISTINCT user_id) FROM user_locations
                 WHERE timestamp > strftime('%s','now') - 86400
                   AND user_id IN (SELECT id FROM users WHERE role = 'user')",
            )?,
            total_buses: count("SELECT COUNT(*) FROM buses")?,
            active_buses: count(
                "SELECT COUNT(DISTINCT bus_id) FROM locations
                 WHERE timestamp > strftime('%s','now') - 86400",
            )?,
            total_stops: count("SELECT COUNT(*) FROM bus_stops")?,
            total_routes: count("SELECT COUNT(DISTINCT bus_id) FROM routes")?,
            total_drivers: count("SELECT COUNT(*) FROM users WHERE role = 'driver'")?,
            recent_locations: conn.query_row(
                "SELECT COUNT(*) FROM locations WHERE timestamp > strftime('%s','now') - ?1",
                params![recent_window_secs],
                |row| row.get(0),
            )?,
        })
    }
}

fn map_bus(row: &rusqlite::Row<'_>) -> SqlResult<Bus> {
    Ok(Bus {
        id: row.get(0)?,
        name: row.get(1)?,
        stops_cleared: row.get(2)?,
        current_rep: row.get(3)?,
        total_rep: row.get(4)?,
    })
}

fn map_stop(row: &rusqlite::Row<'_>) -> SqlResult<Stop> {
    Ok(Stop {
        id: row.get(0)?,
        name: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
    })
}

fn map_start_time(row: &rusqlite::Row<'_>) -> SqlResult<StartTime> {
    Ok(StartTime {
        id: row.get(0)?,
        bus_id: row.get(1)?,
        rep_no: row.get(2)?,
        start_time: row.get(3)?,
    })
}

fn map_bus_location(row: &rusqlite::Row<'_>) -> SqlResult<BusLocation> {
    Ok(BusLocation {
        id: row.get(0)?,
        bus_id: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

fn map_user_location(row: &rusqlite::Row<'_>) -> SqlResult<UserLocation> {
    Ok(UserLocation {
        id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        timestamp: row.get(3)?,
    })
}

fn map_user_account(row: &rusqlite::Row<'_>) -> SqlResult<UserAccount> {
    Ok(UserAccount {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
    })
}

fn map_user_public(row: &rusqlite::Row<'_>) -> SqlResult<UserPublic> {
    Ok(UserPublic {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_driver(row: &rusqlite::Row<'_>) -> SqlResult<DriverRow> {
    Ok(DriverRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        bus_id: row.get(3)?,
        bus_name: row.get(4)?,
    })
}

fn bus_row(conn: &Connection, id: i64) -> SqlResult<Bus> {
    conn.query_row(
        "SELECT id, name, stops_cleared, current_rep, total_rep FROM buses WHERE id = ?1",
        params![id],
        map_bus,
    )
}

fn stop_row(conn: &Connection, id: i64) -> SqlResult<Stop> {
    conn.query_row(
        "SELECT id, name, latitude, longitude FROM bus_stops WHERE id = ?1",
        params![id],
        map_stop,
    )
}

fn user_public_row(conn: &Connection, id: i64) -> SqlResult<UserPublic> {
    conn.query_row(
        "SELECT id, username, email, role, datetime(created_at, 'unixepoch', 'localtime')
         FROM users WHERE id = ?1",
        params![id],
        map_user_public,
    )
}

fn route_stops_on(conn: &Connection, bus_id: i64) -> SqlResult<Vec<RouteStop>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.bus_id, r.bus_stop_id, bs.name, bs.latitude, bs.longitude,
                r.stop_order, r.time_from_start
         FROM routes r
         JOIN bus_stops bs ON r.bus_stop_id = bs.id
         WHERE r.bus_id = ?1
         ORDER BY r.stop_order",
    )?;
    let rows = stmt.query_map(params![bus_id], |row| {
        Ok(RouteStop {
            entry_id: row.get(0)?,
            bus_id: row.get(1)?,
            stop_id: row.get(2)?,
            name: row.get(3)?,
            latitude: row.get(4)?,
            longitude: row.get(5)?,
            stop_order: row.get(6)?,
            time_from_start: row.get(7)?,
        })
    })?;
    rows.collect()
}

fn route_entry_on(conn: &Connection, id: i64) -> SqlResult<Option<RouteEntryDetail>> {
    conn.query_row(
        "SELECT r.id, r.bus_id, r.bus_stop_id, r.stop_order, r.time_from_start,
                bs.name, bs.latitude, bs.longitude
         FROM routes r
         JOIN bus_stops bs ON r.bus_stop_id = bs.id
         WHERE r.id = ?1",
        params![id],
        |row| {
            Ok(RouteEntryDetail {
                id: row.get(0)?,
                bus_id: row.get(1)?,
                bus_stop_id: row.get(2)?,
                stop_order: row.get(3)?,
                time_from_start: row.get(4)?,
                stop_name: row.get(5)?,
                latitude: row.get(6)?,
                longitude: row.get(7)?,
                bus_name: None,
            })
        },
    )
    .optional()
}

fn driver_row_on(conn: &Connection, id: i64) -> SqlResult<DriverRow> {
    conn.query_row(
        "SELECT u.id, u.username, u.email, bd.bus_id, b.name
         FROM users u
         LEFT JOIN bus_drivers bd ON u.id = bd.user_id
         LEFT JOIN buses b ON bd.bus_id = b.id
         WHERE u.id = ?1 AND u.role = 'driver'",
        params![id],
        map_driver,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_route() -> SqliteStore {
        let store = SqliteStore::in_memory().expect("open in-memory store");
        let bus = store.add_bus("Campus Loop").unwrap();
        let a = store.add_stop("Main Gate", 22.3190, 87.3091).unwrap();
        let b = store.add_stop("Library", 22.3177, 87.3055).unwrap();
        let c = store.add_stop("Hijli Hostel", 22.3312, 87.3072).unwrap();
        store.add_route_entry(bus.id, a.id, 1, 0.0).unwrap();
        store.add_route_entry(bus.id, b.id, 2, 10.0).unwrap();
        store.add_route_entry(bus.id, c.id, 3, 20.0).unwrap();
        store
    }

    #[test]
    fn advance_increments_until_last_stop_wraps() {
        let store = store_with_route();
        let stops = store.route_stops(1).unwrap();
        assert_eq!(stops.len(), 3);

        match store.advance_stop(1, stops[0].stop_id).unwrap() {
            AdvanceOutcome::Advanced { bus, wrapped } => {
                assert!(!wrapped);
                assert_eq!(bus.stops_cleared, 1);
                assert_eq!(bus.current_rep, 1);
            }
            AdvanceOutcome::NotInRoute => panic!("stop is in the route"),
        }

        match store.advance_stop(1, stops[2].stop_id).unwrap() {
            AdvanceOutcome::Advanced { bus, wrapped } => {
                assert!(wrapped);
                assert_eq!(bus.stops_cleared, 0);
                assert_eq!(bus.current_rep, 2);
            }
            AdvanceOutcome::NotInRoute => panic!("stop is in the route"),
        }
    }

    #[test]
    fn advance_refuses_foreign_stop_without_mutation() {
        let store = store_with_route();
        let elsewhere = store.add_stop("Airport", 22.6531, 88.4449).unwrap();

        match store.advance_stop(1, elsewhere.id).unwrap() {
            AdvanceOutcome::NotInRoute => {}
            AdvanceOutcome::Advanced { .. } => panic!("stop is not in the route"),
        }
        let bus = store.bus(1).unwrap().unwrap();
        assert_eq!(bus.stops_cleared, 0);
        assert_eq!(bus.current_rep, 1);
    }

    #[test]
    fn initialize_trip_accepts_out_of_range_override() {
        let store = store_with_route();
        let bus = store.initialize_trip(1, 2, 7).unwrap().unwrap();
        assert_eq!(bus.current_rep, 2);
        assert_eq!(bus.stops_cleared, 7);
        assert!(store.initialize_trip(99, 1, 0).unwrap().is_none());
    }

    #[test]
    fn retention_delete_only_touches_old_samples() {
        let store = store_with_route();
        store.record_bus_location(1, 22.32, 87.31).unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO locations (bus_id, latitude, longitude, timestamp)
                 VALUES (1, 22.0, 87.0, strftime('%s','now') - 7200)",
                [],
            )
            .unwrap();
        }

        let deleted = store.delete_stale_locations(3600).unwrap();
        assert_eq!(deleted, 1);

        let latest = store.latest_bus_location(1).unwrap().unwrap();
        assert_eq!(latest.latitude, 22.32);
    }

    #[test]
    fn fleet_snapshot_reports_latest_per_bus() {
        let store = store_with_route();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO locations (bus_id, latitude, longitude, timestamp)
                 VALUES (1, 22.0, 87.0, strftime('%s','now') - 60)",
                [],
            )
            .unwrap();
        }
        store.record_bus_location(1, 22.5, 87.5).unwrap();

        let fleet = store.fleet_locations(3600).unwrap();
        assert_eq!(fleet.len(), 1);
        assert_eq!(fleet[0].location.latitude, 22.5);
        assert_eq!(fleet[0].name, "Campus Loop");
    }

    #[test]
    fn sessions_expire() {
        let store = store_with_route();
        let user = store
            .insert_user("asha", "asha@example.com", "salt$digest", Role::User)
            .unwrap();

        store.insert_session("token-live", user.id, 3600).unwrap();
        store.insert_session("token-dead", user.id, -10).unwrap();

        let live = store.session_user("token-live").unwrap().unwrap();
        assert_eq!(live.email, "asha@example.com");
        assert!(store.session_user("token-dead").unwrap().is_none());
        assert!(store.session_expired("token-dead").unwrap());
        assert!(!store.session_expired("token-live").unwrap());
        assert!(!store.session_expired("never-issued").unwrap());

        assert_eq!(store.purge_expired_sessions().unwrap(), 1);
        assert!(!store.session_expired("token-dead").unwrap());
        assert!(store.session_user("token-live").unwrap().is_some());

        store.delete_session("token-live").unwrap();
        assert!(store.session_user("token-live").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_a_unique_violation() {
        let store = store_with_route();
        store
            .insert_user("one", "same@example.com", "d", Role::User)
            .unwrap();
        let err = store
            .insert_user("two", "same@example.com", "d", Role::User)
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn driver_crud_keeps_user_and_assignment_together() {
        let store = store_with_route();
        let second = store.add_bus("East Loop").unwrap();

        let driver = store
            .add_driver("ravi", "ravi@example.com", "d", Some(1))
            .unwrap();
        assert_eq!(driver.bus_id, Some(1));
        assert_eq!(driver.bus_name.as_deref(), Some("Campus Loop"));

        let updated = store
            .update_driver(driver.id, "ravi", "ravi@example.com", None, Some(second.id))
            .unwrap()
            .unwrap();
        assert_eq!(updated.bus_id, Some(second.id));

        assert!(store
            .update_driver(9999, "x", "x@example.com", None, None)
            .unwrap()
            .is_none());

        assert!(store.delete_driver(driver.id).unwrap());
        assert!(!store.is_driver_assigned(driver.id, second.id).unwrap());
        assert!(!store.delete_driver(driver.id).unwrap());
    }

    #[test]
    fn user_location_push_keeps_one_live_row() {
        let store = store_with_route();
        let user = store
            .insert_user("asha", "asha@example.com", "d", Role::User)
            .unwrap();

        store.record_user_location(user.id, 22.1, 87.1).unwrap();
        store.record_user_location(user.id, 22.2, 87.2).unwrap();

        let all = store.all_user_locations().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].coordinates.latitude, 22.2);
    }

    #[test]
    fn start_time_lookup_by_literal() {
        let store = store_with_route();
        store.add_start_time(1, 1, "08:00:00").unwrap();
        store.add_start_time(1, 2, "12:30:00").unwrap();

        assert!(store.has_start_time(1, 2).unwrap());
        assert_eq!(store.rep_for_start_time(1, "12:30:00").unwrap(), Some(2));
        assert_eq!(store.rep_for_start_time(1, "23:00:00").unwrap(), None);
        assert_eq!(
            store.start_time_for(1, 1).unwrap().as_deref(),
            Some("08:00:00")
        );
    }

    #[test]
    fn stop_delete_refused_while_routed() {
        let store = store_with_route();
        assert_eq!(store.stop_route_references(1).unwrap(), 1);
        let free = store.add_stop("Unused", 22.0, 87.0).unwrap();
        assert_eq!(store.stop_route_references(free.id).unwrap(), 0);
        assert!(store.delete_stop(free.id).unwrap());
    }

    #[test]
    fn statistics_counts_by_role_and_window() {
        let store = store_with_route();
        store
            .insert_user("asha", "a@example.com", "d", Role::User)
            .unwrap();
        store
            .add_driver("ravi", "r@example.com", "d", Some(1))
            .unwrap();
        store.record_bus_location(1, 22.3, 87.3).unwrap();

        let stats = store.statistics(3600).unwrap();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.total_drivers, 1);
        assert_eq!(stats.total_buses, 1);
        assert_eq!(stats.total_stops, 3);
        assert_eq!(stats.total_routes, 1);
        assert_eq!(stats.active_buses, 1);
        assert_eq!(stats.recent_locations, 1);
    }
}
