use crate::infrastructure::error::InfraError;
use chrono::{NaiveDateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
pub const WALL_CLOCK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = open_connection(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub fn open_connection(path: &Path) -> Result<Connection, InfraError> {
    let connection = Connection::open(path)?;
    connection.pragma_update(None, "foreign_keys", "ON")?;
    Ok(connection)
}

pub fn format_wall_clock(value: NaiveDateTime) -> String {
    value.format(WALL_CLOCK_FORMAT).to_string()
}

pub fn parse_stored_wall_clock(value: &str, column: &str) -> Result<NaiveDateTime, InfraError> {
    crate::domain::matcher::parse_wall_clock(value)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid {column} '{value}': {error}")))
}
