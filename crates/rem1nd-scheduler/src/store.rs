use std::path::Path;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use rem1nd_core::{
    time::{format_timestamp, parse_timestamp},
    NewReminder, Reminder, Rem1ndError, RepeatType, SmtpCredentials,
};
use rusqlite::{named_params, params, types::Value, Connection, OptionalExtension};
use tracing::{debug, info, instrument, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{DueEntry, Transition},
};

const REMINDER_COLUMNS: &str = "id, title, content, recipient_email, trigger_time, \
     next_trigger_time, last_sent_time, sent, repeat_type, repeat_interval, created_at";

/// Rows the engine must look at for instant `:now`.
///
/// The anchor is `next_trigger_time`, falling back to `trigger_time` for rows
/// that have never been re-armed (every one-shot, and recurring rows from
/// before recurrence existed). Comparison goes through `julianday()` so
/// `T`- and space-separated layouts compare correctly; a non-NULL anchor
/// SQLite cannot read at all is also selected so the engine can retire it.
const DUE_PREDICATE: &str = "sent = 0 AND (
        (next_trigger_time IS NOT NULL AND julianday(next_trigger_time) <= julianday(:now))
     OR (next_trigger_time IS NULL AND julianday(trigger_time) <= julianday(:now))
     OR julianday(COALESCE(next_trigger_time, trigger_time)) IS NULL)";

/// Persistence contract consumed by the dispatch engine and the CRUD front end.
///
/// The engine only uses `find_due`, `claim`, `commit` and `release`. Each of
/// those touches at most one row per call, so a crash between calls leaves
/// every reminder either fully processed or untouched.
pub trait ReminderStore: Send + Sync {
    /// Unsent reminders whose anchor is at or before `now`, earliest first.
    fn find_due(&self, now: NaiveDateTime) -> Result<Vec<DueEntry>>;

    /// Atomically take the dispatch lease on reminder `id` until `lease_until`.
    ///
    /// Succeeds only if the row is still due at `now`, unsent, and not
    /// leased by someone else; returns the row as it is right now.
    fn claim(
        &self,
        id: i64,
        token: &str,
        now: NaiveDateTime,
        lease_until: NaiveDateTime,
    ) -> Result<Option<DueEntry>>;

    /// Apply `transition` and drop the lease, if `token` still holds it.
    ///
    /// Returns `false` when the lease was lost (edited, deleted or expired).
    fn commit(&self, id: i64, token: &str, transition: &Transition) -> Result<bool>;

    /// Drop the lease without touching any schedule field.
    fn release(&self, id: i64, token: &str) -> Result<()>;

    fn create(&self, new: &NewReminder) -> Result<Reminder>;
    fn get(&self, id: i64) -> Result<Option<Reminder>>;
    /// All reminders ordered by `trigger_time`.
    fn list(&self) -> Result<Vec<Reminder>>;
    /// Replace the user-editable fields and re-arm from the new `trigger_time`.
    fn update(&self, id: i64, new: &NewReminder) -> Result<Reminder>;
    fn delete(&self, id: i64) -> Result<()>;
}

/// Where the engine gets the SMTP credential set for each delivery.
pub trait CredentialSource: Send + Sync {
    fn active_credentials(&self) -> Result<Option<SmtpCredentials>>;
}

/// SQLite-backed store for reminders and SMTP credentials.
///
/// Wraps a single connection in a `Mutex`; several processes may open the
/// same file, the claim lease keeps their ticks apart.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, running schema migrations first.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (creating if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::new(conn)
    }

    /// Store `credentials` as the active set, replacing any earlier one.
    #[instrument(skip(self, credentials), fields(server = %credentials.server, port = credentials.port))]
    pub fn save_credentials(&self, credentials: &SmtpCredentials) -> Result<()> {
        let db = self.db.lock().unwrap();
        let existing: Option<i64> = db
            .query_row("SELECT id FROM smtp_config ORDER BY id LIMIT 1", [], |r| {
                r.get(0)
            })
            .optional()?;
        match existing {
            Some(id) => {
                db.execute(
                    "UPDATE smtp_config
                     SET server = ?1, port = ?2, sender_email = ?3, password = ?4,
                         sender_name = ?5, updated_at = CURRENT_TIMESTAMP
                     WHERE id = ?6",
                    params![
                        credentials.server,
                        credentials.port,
                        credentials.sender_email,
                        credentials.password,
                        credentials.sender_name,
                        id
                    ],
                )?;
            }
            None => {
                db.execute(
                    "INSERT INTO smtp_config (server, port, sender_email, password, sender_name)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        credentials.server,
                        credentials.port,
                        credentials.sender_email,
                        credentials.password,
                        credentials.sender_name
                    ],
                )?;
            }
        }
        info!("SMTP credentials saved");
        Ok(())
    }

    fn fetch(db: &Connection, id: i64) -> Result<Option<RawReminder>> {
        let raw = db
            .query_row(
                &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
                [id],
                RawReminder::from_row,
            )
            .optional()?;
        Ok(raw)
    }
}

impl ReminderStore for SqliteStore {
    fn find_due(&self, now: NaiveDateTime) -> Result<Vec<DueEntry>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE {DUE_PREDICATE}
             ORDER BY julianday(COALESCE(next_trigger_time, trigger_time)), id"
        );
        let mut stmt = db.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(
                named_params! { ":now": format_timestamp(now) },
                RawReminder::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // SQL and the decoder can disagree on irregular text; the decoded
        // anchor has the final say.
        Ok(rows
            .into_iter()
            .map(RawReminder::into_due_entry)
            .filter(|entry| match entry {
                DueEntry::Ready(reminder) => reminder.is_due(now),
                DueEntry::Malformed { .. } => true,
            })
            .collect())
    }

    fn claim(
        &self,
        id: i64,
        token: &str,
        now: NaiveDateTime,
        lease_until: NaiveDateTime,
    ) -> Result<Option<DueEntry>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "UPDATE reminders SET claim_token = :token, claimed_until = :until
             WHERE id = :id
               AND COALESCE(julianday(claimed_until), 0) <= julianday(:now)
               AND {DUE_PREDICATE}"
        );
        let changed = db.execute(
            &sql,
            named_params! {
                ":token": token,
                ":until": format_timestamp(lease_until),
                ":id": id,
                ":now": format_timestamp(now),
            },
        )?;
        if changed == 0 {
            debug!(reminder_id = id, "claim refused");
            return Ok(None);
        }
        match Self::fetch(&db, id)?.map(RawReminder::into_due_entry) {
            Some(DueEntry::Ready(reminder)) if !reminder.is_due(now) => {
                db.execute(
                    "UPDATE reminders SET claim_token = NULL, claimed_until = NULL
                     WHERE id = ?1 AND claim_token = ?2",
                    params![id, token],
                )?;
                debug!(reminder_id = id, anchor = %reminder.anchor(), "claim dropped; anchor not reached");
                Ok(None)
            }
            entry => Ok(entry),
        }
    }

    fn commit(&self, id: i64, token: &str, transition: &Transition) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let changed = match transition {
            Transition::Complete => db.execute(
                "UPDATE reminders SET sent = 1, claim_token = NULL, claimed_until = NULL
                 WHERE id = ?1 AND claim_token = ?2",
                params![id, token],
            )?,
            Transition::Rearm {
                next_trigger_time,
                last_sent_time,
            } => db.execute(
                "UPDATE reminders
                 SET next_trigger_time = ?1, sent = 0,
                     last_sent_time = COALESCE(?2, last_sent_time),
                     claim_token = NULL, claimed_until = NULL
                 WHERE id = ?3 AND claim_token = ?4",
                params![
                    format_timestamp(*next_trigger_time),
                    last_sent_time.map(format_timestamp),
                    id,
                    token
                ],
            )?,
        };
        Ok(changed == 1)
    }

    fn release(&self, id: i64, token: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE reminders SET claim_token = NULL, claimed_until = NULL
             WHERE id = ?1 AND claim_token = ?2",
            params![id, token],
        )?;
        Ok(())
    }

    #[instrument(skip(self, new), fields(title = %new.title))]
    fn create(&self, new: &NewReminder) -> Result<Reminder> {
        new.validate()?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO reminders
             (title, content, trigger_time, recipient_email, repeat_type, repeat_interval)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.title,
                new.content,
                format_timestamp(new.trigger_time),
                new.recipient_email,
                new.repeat_type.as_str(),
                new.repeat_interval
            ],
        )?;
        let id = db.last_insert_rowid();
        info!(reminder_id = id, "reminder created");
        let raw = Self::fetch(&db, id)?.ok_or(SchedulerError::ReminderNotFound { id })?;
        raw.decode_stored()
    }

    #[instrument(skip(self))]
    fn get(&self, id: i64) -> Result<Option<Reminder>> {
        let db = self.db.lock().unwrap();
        match Self::fetch(&db, id)? {
            Some(raw) => Ok(Some(raw.decode_stored()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    fn list(&self) -> Result<Vec<Reminder>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders ORDER BY trigger_time, id"
        ))?;
        let reminders = stmt
            .query_map([], RawReminder::from_row)?
            .filter_map(|r| r.ok())
            .filter_map(|raw| {
                let id = raw.id;
                raw.decode()
                    .map_err(|e| warn!(reminder_id = id, "skipping unreadable reminder: {e}"))
                    .ok()
            })
            .collect();
        Ok(reminders)
    }

    #[instrument(skip(self, new), fields(title = %new.title))]
    fn update(&self, id: i64, new: &NewReminder) -> Result<Reminder> {
        new.validate()?;
        let db = self.db.lock().unwrap();
        // Clearing the lease makes an in-flight delivery's commit a no-op,
        // so the edit is never overwritten by a stale re-arm.
        let changed = db.execute(
            "UPDATE reminders
             SET title = ?1, content = ?2, trigger_time = ?3, recipient_email = ?4,
                 repeat_type = ?5, repeat_interval = ?6,
                 next_trigger_time = NULL, sent = 0,
                 claim_token = NULL, claimed_until = NULL
             WHERE id = ?7",
            params![
                new.title,
                new.content,
                format_timestamp(new.trigger_time),
                new.recipient_email,
                new.repeat_type.as_str(),
                new.repeat_interval,
                id
            ],
        )?;
        if changed == 0 {
            return Err(SchedulerError::ReminderNotFound { id });
        }
        info!(reminder_id = id, "reminder updated");
        let raw = Self::fetch(&db, id)?.ok_or(SchedulerError::ReminderNotFound { id })?;
        raw.decode_stored()
    }

    #[instrument(skip(self))]
    fn delete(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute("DELETE FROM reminders WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(SchedulerError::ReminderNotFound { id });
        }
        info!(reminder_id = id, "reminder deleted");
        Ok(())
    }
}

impl CredentialSource for SqliteStore {
    fn active_credentials(&self) -> Result<Option<SmtpCredentials>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT server, port, sender_email, password, sender_name
                 FROM smtp_config ORDER BY updated_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?, // server
                        row.get::<_, i64>(1)?,    // port
                        row.get::<_, String>(2)?, // sender_email
                        row.get::<_, String>(3)?, // password
                        row.get::<_, String>(4)?, // sender_name
                    ))
                },
            )
            .optional()?;

        let Some((server, port, sender_email, password, sender_name)) = row else {
            return Ok(None);
        };
        let port = u16::try_from(port)
            .map_err(|_| SchedulerError::InvalidCredentials(format!("port {port} out of range")))?;
        Ok(Some(SmtpCredentials {
            server,
            port,
            sender_email,
            password,
            sender_name,
        }))
    }
}

/// A reminder row as SQLite handed it over, before any timestamp parsing.
///
/// Old front ends wrote whatever they liked into the DATETIME and INTEGER
/// columns, so those are read as dynamic values.
struct RawReminder {
    id: i64,
    title: String,
    content: String,
    recipient_email: String,
    trigger_time: Option<String>,
    next_trigger_time: Option<String>,
    last_sent_time: Option<String>,
    sent: Value,
    repeat_type: Option<String>,
    repeat_interval: Value,
    created_at: Option<String>,
}

impl RawReminder {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            recipient_email: row.get(3)?,
            trigger_time: value_text(row.get(4)?),
            next_trigger_time: value_text(row.get(5)?),
            last_sent_time: value_text(row.get(6)?),
            sent: row.get(7)?,
            repeat_type: value_text(row.get(8)?),
            repeat_interval: row.get(9)?,
            created_at: value_text(row.get(10)?),
        })
    }

    fn decode(self) -> rem1nd_core::Result<Reminder> {
        let trigger_time = match self.trigger_time.as_deref() {
            Some(text) => parse_timestamp(text)?,
            None => {
                return Err(Rem1ndError::InvalidTimestamp {
                    value: "NULL trigger_time".to_string(),
                })
            }
        };
        let next_trigger_time = self
            .next_trigger_time
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        // Informational only; an unreadable value must not block delivery.
        let last_sent_time = self
            .last_sent_time
            .as_deref()
            .and_then(|text| parse_timestamp(text).ok());
        let repeat_interval = match self.repeat_interval {
            Value::Null => None,
            Value::Integer(n) => Some(n),
            Value::Real(f) => Some(f as i64),
            Value::Text(ref t) => Some(t.trim().parse::<i64>().map_err(|_| {
                Rem1ndError::InvalidRepeat(format!("repeat_interval {t:?} is not a number"))
            })?),
            Value::Blob(_) => {
                return Err(Rem1ndError::InvalidRepeat(
                    "repeat_interval is a blob".to_string(),
                ))
            }
        };

        Ok(Reminder {
            id: self.id,
            title: self.title,
            content: self.content,
            recipient_email: self.recipient_email,
            trigger_time,
            next_trigger_time,
            last_sent_time,
            sent: value_truthy(&self.sent),
            repeat_type: RepeatType::from_column(self.repeat_type.as_deref()),
            repeat_interval,
            created_at: self.created_at,
        })
    }

    /// Decode a row that is already in the table; failure means the stored
    /// data is unreadable, not that the caller passed bad input.
    fn decode_stored(self) -> Result<Reminder> {
        let id = self.id;
        self.decode().map_err(|e| SchedulerError::CorruptRow {
            id,
            reason: e.to_string(),
        })
    }

    fn into_due_entry(self) -> DueEntry {
        let id = self.id;
        match self.decode() {
            Ok(reminder) => DueEntry::Ready(reminder),
            Err(e) => DueEntry::Malformed {
                id,
                reason: e.to_string(),
            },
        }
    }
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(s) => Some(s),
        Value::Integer(n) => Some(n.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
    }
}

fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Integer(n) => *n != 0,
        Value::Real(f) => *f != 0.0,
        Value::Text(s) => !matches!(s.trim(), "" | "0" | "false"),
        Value::Null | Value::Blob(_) => false,
    }
}
