// ── SQLite persistence ──
//
// Blocking store over one connection. Callers in async code go through
// `Registry`, which moves every call onto the blocking pool. JSON blobs
// are TEXT columns; `devices.mac` is a unique nullable secondary key.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc, Weekday};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::error::CoreError;
use crate::model::{
    ComfortRange, Device, DeviceKind, Group, KindSchedule, MacAddress, Room, TemperatureConfig,
    WeekdayDefault, normalize_id,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS devices (
    manufacturer    TEXT NOT NULL,
    id              TEXT NOT NULL,
    kind            TEXT NOT NULL,
    mac             TEXT UNIQUE,
    name            TEXT NOT NULL DEFAULT '',
    host            TEXT NOT NULL DEFAULT '',
    config_revision INTEGER NOT NULL DEFAULT 0,
    room_id         TEXT,
    info            TEXT NOT NULL DEFAULT 'null',
    config          TEXT NOT NULL DEFAULT 'null',
    status          TEXT NOT NULL DEFAULT 'null',
    last_seen       TEXT,
    PRIMARY KEY (manufacturer, id)
);
CREATE INDEX IF NOT EXISTS devices_name ON devices (name);
CREATE INDEX IF NOT EXISTS devices_host ON devices (host);

CREATE TABLE IF NOT EXISTS groups (
    id   TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS group_member (
    group_id  TEXT NOT NULL REFERENCES groups (id) ON DELETE CASCADE,
    device_id TEXT NOT NULL,
    PRIMARY KEY (group_id, device_id)
);

CREATE TABLE IF NOT EXISTS rooms (
    id   TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS temperature_configs (
    room_id TEXT PRIMARY KEY,
    name    TEXT NOT NULL DEFAULT '',
    comfort REAL NOT NULL,
    eco     REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS kind_schedules (
    kind     TEXT NOT NULL,
    position INTEGER NOT NULL,
    start    TEXT NOT NULL,
    end      TEXT NOT NULL,
    PRIMARY KEY (kind, position)
);

CREATE TABLE IF NOT EXISTS weekday_defaults (
    weekday INTEGER PRIMARY KEY,
    kind    TEXT NOT NULL
);
";

const DEVICE_COLUMNS: &str = "manufacturer, id, kind, mac, name, host, config_revision, \
                              room_id, info, config, status, last_seen";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(|e| CoreError::Storage {
            message: format!("cannot open {}: {e}", path.display()),
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, CoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// Insert or replace a device row. A MAC held by another row moves
    /// to this one in the same transaction.
    pub fn upsert(&self, device: &Device) -> Result<(), CoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mac = device.mac.as_ref().map(MacAddress::as_str);
        if let Some(mac) = mac {
            tx.execute(
                "UPDATE devices SET mac = NULL
                 WHERE mac = ?1 AND NOT (manufacturer = ?2 AND id = ?3)",
                params![mac, device.manufacturer, device.id],
            )?;
        }
        tx.execute(
            "INSERT INTO devices (manufacturer, id, kind, mac, name, host, config_revision,
                                  room_id, info, config, status, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (manufacturer, id) DO UPDATE SET
                kind = excluded.kind,
                mac = excluded.mac,
                name = excluded.name,
                host = excluded.host,
                config_revision = excluded.config_revision,
                room_id = excluded.room_id,
                info = excluded.info,
                config = excluded.config,
                status = excluded.status,
                last_seen = excluded.last_seen",
            params![
                device.manufacturer,
                device.id,
                device.kind.to_string(),
                mac,
                device.name,
                device.host,
                device.config_revision,
                device.room_id,
                device.info.to_string(),
                device.config.to_string(),
                device.status.to_string(),
                device.last_seen.map(|t| t.to_rfc3339()),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn query_one(&self, filter: &str, value: &str) -> Result<Option<Device>, CoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE {filter} LIMIT 1");
        let device = conn
            .query_row(&sql, params![value], row_to_device)
            .optional()?;
        Ok(device)
    }

    pub fn get_by_primary_key(
        &self,
        manufacturer: &str,
        id: &str,
    ) -> Result<Option<Device>, CoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE manufacturer = ?1 AND id = ?2");
        let device = conn
            .query_row(&sql, params![manufacturer, id], row_to_device)
            .optional()?;
        Ok(device)
    }

    /// Lookup by id alone; ids are unique across manufacturers in practice.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Device>, CoreError> {
        self.query_one("id = ?1", &normalize_id(id))
    }

    pub fn get_by_mac(&self, mac: &MacAddress) -> Result<Option<Device>, CoreError> {
        self.query_one("mac = ?1", mac.as_str())
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Device>, CoreError> {
        self.query_one("name = ?1 AND name != ''", name)
    }

    pub fn get_by_host(&self, host: &str) -> Result<Option<Device>, CoreError> {
        self.query_one("host = ?1 AND host != ''", host)
    }

    /// Match `token` against id, MAC, host and name, in that order.
    pub fn get_by_any(&self, token: &str) -> Result<Device, CoreError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CoreError::not_found("device", token));
        }
        if let Some(d) = self.get_by_id(token)? {
            return Ok(d);
        }
        if let Ok(mac) = MacAddress::parse(token) {
            if let Some(d) = self.get_by_mac(&mac)? {
                return Ok(d);
            }
        }
        if let Some(d) = self.get_by_host(token)? {
            return Ok(d);
        }
        self.get_by_name(token)?
            .ok_or_else(|| CoreError::not_found("device", token))
    }

    pub fn get_all(&self) -> Result<Vec<Device>, CoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_device)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Remove a device and its group memberships. Returns whether a row
    /// existed.
    pub fn delete(&self, manufacturer: &str, id: &str) -> Result<bool, CoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let n = tx.execute(
            "DELETE FROM devices WHERE manufacturer = ?1 AND id = ?2",
            params![manufacturer, id],
        )?;
        tx.execute("DELETE FROM group_member WHERE device_id = ?1", params![id])?;
        tx.commit()?;
        Ok(n > 0)
    }

    // ── Groups ───────────────────────────────────────────────────────

    pub fn list_groups(&self) -> Result<Vec<Group>, CoreError> {
        let ids: Vec<(String, String)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT id, name FROM groups ORDER BY id")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        ids.into_iter()
            .map(|(id, name)| {
                let members = self.group_members(&id)?;
                Ok(Group { id, name, members })
            })
            .collect()
    }

    pub fn get_group(&self, id: &str) -> Result<Group, CoreError> {
        let name: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row("SELECT name FROM groups WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?
        };
        let name = name.ok_or_else(|| CoreError::not_found("group", id))?;
        Ok(Group {
            id: id.to_owned(),
            name,
            members: self.group_members(id)?,
        })
    }

    pub fn create_group(&self, id: &str, name: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "INSERT OR IGNORE INTO groups (id, name) VALUES (?1, ?2)",
            params![id, name],
        )?;
        if n == 0 {
            return Err(CoreError::Duplicate {
                key: id.to_owned(),
                existing: "group".into(),
            });
        }
        Ok(())
    }

    pub fn delete_group(&self, id: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM group_member WHERE group_id = ?1", params![id])?;
        let n = conn.execute("DELETE FROM groups WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(CoreError::not_found("group", id));
        }
        Ok(())
    }

    pub fn add_to_group(&self, group_id: &str, device_id: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM groups WHERE id = ?1)",
            params![group_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(CoreError::not_found("group", group_id));
        }
        conn.execute(
            "INSERT OR IGNORE INTO group_member (group_id, device_id) VALUES (?1, ?2)",
            params![group_id, device_id],
        )?;
        Ok(())
    }

    pub fn remove_from_group(&self, group_id: &str, device_id: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM group_member WHERE group_id = ?1 AND device_id = ?2",
            params![group_id, device_id],
        )?;
        if n == 0 {
            return Err(CoreError::not_found("group member", format!("{group_id}/{device_id}")));
        }
        Ok(())
    }

    pub fn group_members(&self, group_id: &str) -> Result<Vec<String>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT device_id FROM group_member WHERE group_id = ?1 ORDER BY device_id",
        )?;
        let rows = stmt.query_map(params![group_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    // ── Rooms ────────────────────────────────────────────────────────

    pub fn list_rooms(&self) -> Result<Vec<Room>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name FROM rooms ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Room {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn create_room(&self, room: &Room) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "INSERT OR IGNORE INTO rooms (id, name) VALUES (?1, ?2)",
            params![room.id, room.name],
        )?;
        if n == 0 {
            return Err(CoreError::Duplicate {
                key: room.id.clone(),
                existing: "room".into(),
            });
        }
        Ok(())
    }

    /// Delete a room. Devices in it become unassigned.
    pub fn delete_room(&self, id: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let n = tx.execute("DELETE FROM rooms WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(CoreError::not_found("room", id));
        }
        tx.execute(
            "UPDATE devices SET room_id = NULL WHERE room_id = ?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn room_exists(&self, id: &str) -> Result<bool, CoreError> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM rooms WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?)
    }

    // ── Temperature ──────────────────────────────────────────────────

    pub fn list_temperature(&self) -> Result<Vec<TemperatureConfig>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT room_id, name, comfort, eco FROM temperature_configs ORDER BY room_id",
        )?;
        let rows = stmt.query_map([], row_to_temperature)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn get_temperature(&self, room_id: &str) -> Result<TemperatureConfig, CoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT room_id, name, comfort, eco FROM temperature_configs WHERE room_id = ?1",
            params![room_id],
            row_to_temperature,
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found("temperature config", room_id))
    }

    pub fn set_temperature(&self, cfg: &TemperatureConfig) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO temperature_configs (room_id, name, comfort, eco)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (room_id) DO UPDATE SET
                name = excluded.name, comfort = excluded.comfort, eco = excluded.eco",
            params![
                cfg.room_id,
                cfg.name,
                f64::from(cfg.comfort),
                f64::from(cfg.eco)
            ],
        )?;
        Ok(())
    }

    pub fn delete_temperature(&self, room_id: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM temperature_configs WHERE room_id = ?1",
            params![room_id],
        )?;
        if n == 0 {
            return Err(CoreError::not_found("temperature config", room_id));
        }
        Ok(())
    }

    pub fn kind_schedules(&self) -> Result<Vec<KindSchedule>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT kind, start, end FROM kind_schedules ORDER BY kind, position")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                ComfortRange {
                    start: row.get(1)?,
                    end: row.get(2)?,
                },
            ))
        })?;
        let mut schedules: Vec<KindSchedule> = Vec::new();
        for row in rows {
            let (kind, range) = row?;
            match schedules.last_mut() {
                Some(last) if last.kind == kind => last.ranges.push(range),
                _ => schedules.push(KindSchedule {
                    kind,
                    ranges: vec![range],
                }),
            }
        }
        Ok(schedules)
    }

    /// Replace the ranges of one day kind.
    pub fn set_kind_schedule(&self, schedule: &KindSchedule) -> Result<(), CoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM kind_schedules WHERE kind = ?1",
            params![schedule.kind],
        )?;
        for (position, range) in schedule.ranges.iter().enumerate() {
            tx.execute(
                "INSERT INTO kind_schedules (kind, position, start, end) VALUES (?1, ?2, ?3, ?4)",
                params![schedule.kind, position, range.start, range.end],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn weekday_defaults(&self) -> Result<Vec<WeekdayDefault>, CoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT weekday, kind FROM weekday_defaults ORDER BY weekday")?;
        let rows = stmt.query_map([], |row| {
            let day: u8 = row.get(0)?;
            let weekday = Weekday::try_from(day).map_err(|e| conversion_error(0, e))?;
            Ok(WeekdayDefault {
                weekday,
                kind: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn set_weekday_default(&self, default: &WeekdayDefault) -> Result<(), CoreError> {
        let conn = self.conn.lock();
        let day = u8::try_from(default.weekday.num_days_from_monday()).unwrap_or_default();
        conn.execute(
            "INSERT INTO weekday_defaults (weekday, kind) VALUES (?1, ?2)
             ON CONFLICT (weekday) DO UPDATE SET kind = excluded.kind",
            params![day, default.kind],
        )?;
        Ok(())
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn row_to_device(row: &Row<'_>) -> rusqlite::Result<Device> {
    let kind: String = row.get(2)?;
    let kind: DeviceKind = kind.parse().map_err(|e| conversion_error(2, e))?;
    let mac: Option<String> = row.get(3)?;
    let mac = mac
        .filter(|m| !m.is_empty())
        .map(|m| MacAddress::parse(&m))
        .transpose()
        .map_err(|e| conversion_error(3, e))?;
    let last_seen: Option<String> = row.get(11)?;
    let last_seen = last_seen
        .map(|t| DateTime::parse_from_rfc3339(&t).map(|t| t.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| conversion_error(11, e))?;

    Ok(Device {
        manufacturer: row.get(0)?,
        id: row.get(1)?,
        kind,
        mac,
        name: row.get(4)?,
        host: row.get(5)?,
        config_revision: row.get(6)?,
        room_id: row.get(7)?,
        info: json_column(row, 8)?,
        config: json_column(row, 9)?,
        status: json_column(row, 10)?,
        last_seen,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn row_to_temperature(row: &Row<'_>) -> rusqlite::Result<TemperatureConfig> {
    Ok(TemperatureConfig {
        room_id: row.get(0)?,
        name: row.get(1)?,
        comfort: row.get::<_, f64>(2)? as f32,
        eco: row.get::<_, f64>(3)? as f32,
    })
}
