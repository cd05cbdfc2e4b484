use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::fetch::Announcement;

#[derive(Debug, Clone)]
pub struct NotifiedRow {
    pub link: String,
    pub title: String,
    pub notified_at: String,
}

pub fn connect(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("Failed to open state db {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS notified (
            link        TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            notified_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_notified_at ON notified(notified_at);
        ",
    )?;
    Ok(())
}

/// Exact, case-sensitive match on the link.
pub fn is_notified(conn: &Connection, link: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM notified WHERE link = ?1", [link], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Record an announcement. Returns false if the link was already present.
pub fn save_notified(conn: &Connection, announcement: &Announcement) -> Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO notified (link, title) VALUES (?1, ?2)",
        params![announcement.link, announcement.title],
    )?;
    Ok(n > 0)
}

/// Newest first.
pub fn fetch_notified(conn: &Connection, limit: Option<usize>) -> Result<Vec<NotifiedRow>> {
    let limit = limit.map(|n| n as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(
        "SELECT link, title, notified_at FROM notified
         ORDER BY notified_at DESC, rowid DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            Ok(NotifiedRow {
                link: row.get(0)?,
                title: row.get(1)?,
                notified_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn forget(conn: &Connection, link: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM notified WHERE link = ?1", [link])?;
    Ok(n > 0)
}

#[cfg(test)]
pub(crate) fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}
