//! Database schema definitions
//!
//! This module contains the SQL schema backing the SQLite store: one table of
//! plain values and one table of sorted-set members.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Plain key/value pairs (task bodies, dedup entries, last-crawl times)
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

-- Sorted-set members (ready queues)
CREATE TABLE IF NOT EXISTS zset_members (
    set_key TEXT NOT NULL,
    member TEXT NOT NULL,
    score INTEGER NOT NULL,
    PRIMARY KEY (set_key, member)
);

CREATE INDEX IF NOT EXISTS idx_zset_members_score ON zset_members(set_key, score, member);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", get_schema_version())?;
    Ok(())
}

/// Gets the current schema version
pub fn get_schema_version() -> u32 {
    1
}
