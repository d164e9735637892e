use rem1nd_core::time::{format_timestamp, parse_timestamp};
use rusqlite::{params, types::Value, Connection};
use tracing::info;

use crate::error::Result;

/// Columns added after the first public schema, with their DDL type.
///
/// Databases created by older releases get them via `ALTER TABLE` so every
/// legacy row keeps working (all default to NULL, i.e. "fall back to
/// `trigger_time`, never claimed").
const LATE_REMINDER_COLUMNS: &[(&str, &str)] = &[
    ("repeat_type", "TEXT DEFAULT NULL"),
    ("repeat_interval", "INTEGER DEFAULT NULL"),
    ("next_trigger_time", "DATETIME"),
    ("last_sent_time", "DATETIME"),
    ("claim_token", "TEXT"),
    ("claimed_until", "DATETIME"),
];

/// Timestamp columns rewritten into the canonical layout on startup.
const TIMESTAMP_COLUMNS: &[&str] = &["trigger_time", "next_trigger_time", "last_sent_time"];

/// Initialise the reminder schema in `conn`.
///
/// Idempotent: creates `reminders` and `smtp_config` when absent, adds any
/// missing late column to an existing `reminders` table, normalises
/// empty-string anchors left behind by old front ends to NULL, and rewrites
/// readable but irregular timestamps into the layout the due scan compares.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS reminders (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            title             TEXT    NOT NULL,
            content           TEXT    NOT NULL,
            trigger_time      DATETIME NOT NULL,  -- ISO-8601 local, no offset
            recipient_email   TEXT    NOT NULL,
            sent              INTEGER DEFAULT 0,
            created_at        DATETIME DEFAULT CURRENT_TIMESTAMP,
            repeat_type       TEXT    DEFAULT NULL,
            repeat_interval   INTEGER DEFAULT NULL,
            next_trigger_time DATETIME,           -- NULL until first recurring delivery
            last_sent_time    DATETIME,
            claim_token       TEXT,               -- dispatch lease holder
            claimed_until     DATETIME
        );

        CREATE TABLE IF NOT EXISTS smtp_config (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            server       TEXT    NOT NULL,
            port         INTEGER NOT NULL,
            sender_email TEXT    NOT NULL,
            password     TEXT    NOT NULL,
            sender_name  TEXT    NOT NULL,
            created_at   DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at   DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        ",
    )?;

    let existing = reminder_columns(conn)?;
    for (name, ddl) in LATE_REMINDER_COLUMNS {
        if !existing.iter().any(|c| c == name) {
            conn.execute_batch(&format!("ALTER TABLE reminders ADD COLUMN {name} {ddl}"))?;
            info!(column = %name, "added missing reminders column");
        }
    }

    conn.execute_batch(
        "
        UPDATE reminders SET next_trigger_time = NULL WHERE next_trigger_time = '';
        UPDATE reminders SET last_sent_time = NULL WHERE last_sent_time = '';

        -- Due scan filters on sent first; most rows in a long-lived DB are sent.
        CREATE INDEX IF NOT EXISTS idx_reminders_sent ON reminders (sent);
        ",
    )?;
    canonicalise_timestamps(conn)?;
    Ok(())
}

/// Rewrite every timestamp the decoder accepts but SQLite's `julianday()`
/// may not (offsets, bare dates, unpadded fields, stray whitespace).
/// Unreadable text is left alone for the due scan to retire.
fn canonicalise_timestamps(conn: &Connection) -> Result<()> {
    let mut rewrites: Vec<(&str, String, i64)> = Vec::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, {} FROM reminders",
            TIMESTAMP_COLUMNS.join(", ")
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            for (i, column) in TIMESTAMP_COLUMNS.iter().enumerate() {
                let Value::Text(stored) = row.get::<_, Value>(i + 1)? else {
                    continue;
                };
                if let Ok(parsed) = parse_timestamp(&stored) {
                    let canonical = format_timestamp(parsed);
                    if canonical != stored {
                        rewrites.push((*column, canonical, id));
                    }
                }
            }
        }
    }

    for (column, canonical, id) in &rewrites {
        conn.execute(
            &format!("UPDATE reminders SET {column} = ?1 WHERE id = ?2"),
            params![canonical, id],
        )?;
    }
    if !rewrites.is_empty() {
        info!(count = rewrites.len(), "rewrote irregular timestamps");
    }
    Ok(())
}

fn reminder_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(reminders)")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}
