//! Attendance event log.
//!
//! Every accepted attendance event is appended here; the row id becomes the
//! `record_id` of the `Success` response. The log is also read back at
//! start-up to seed the dedup guard.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, PartialEq)]
pub struct AttendanceRecord {
    pub id: i64,
    pub subject_name: String,
    pub confidence: f64,
    pub recorded_at: SystemTime,
}

pub trait AttendanceLog: Send {
    /// Appends one accepted event and returns its record id.
    fn record(&mut self, subject_name: &str, confidence: f64, at: SystemTime) -> Result<i64>;

    /// Events recorded at or after `cutoff`, oldest first.
    fn since(&mut self, cutoff: SystemTime) -> Result<Vec<AttendanceRecord>>;
}

pub struct SqliteAttendanceLog {
    conn: Connection,
}

impl SqliteAttendanceLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut log = Self { conn };
        log.ensure_schema()?;
        Ok(log)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS attendance (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              subject_name TEXT NOT NULL,
              confidence REAL NOT NULL,
              recorded_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attendance_recorded ON attendance(recorded_at_ms);
            "#,
        )?;
        Ok(())
    }
}

impl AttendanceLog for SqliteAttendanceLog {
    fn record(&mut self, subject_name: &str, confidence: f64, at: SystemTime) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO attendance (subject_name, confidence, recorded_at_ms) VALUES (?1, ?2, ?3)",
            params![subject_name, confidence, epoch_ms(at)?],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn since(&mut self, cutoff: SystemTime) -> Result<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject_name, confidence, recorded_at_ms FROM attendance \
             WHERE recorded_at_ms >= ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![epoch_ms(cutoff)?])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let recorded_at_ms: i64 = row.get(3)?;
            out.push(AttendanceRecord {
                id: row.get(0)?,
                subject_name: row.get(1)?,
                confidence: row.get(2)?,
                recorded_at: from_epoch_ms(recorded_at_ms)?,
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAttendanceLog {
    records: Vec<AttendanceRecord>,
}

impl InMemoryAttendanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }
}

impl AttendanceLog for InMemoryAttendanceLog {
    fn record(&mut self, subject_name: &str, confidence: f64, at: SystemTime) -> Result<i64> {
        let id = self.records.len() as i64 + 1;
        self.records.push(AttendanceRecord {
            id,
            subject_name: subject_name.to_string(),
            confidence,
            recorded_at: at,
        });
        Ok(id)
    }

    fn since(&mut self, cutoff: SystemTime) -> Result<Vec<AttendanceRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|record| record.recorded_at >= cutoff)
            .cloned()
            .collect())
    }
}

fn epoch_ms(at: SystemTime) -> Result<i64> {
    let ms = at
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("timestamp before unix epoch"))?
        .as_millis();
    i64::try_from(ms).map_err(|_| anyhow!("timestamp exceeds i64 range"))
}

fn from_epoch_ms(ms: i64) -> Result<SystemTime> {
    let ms = u64::try_from(ms).map_err(|_| anyhow!("corrupt attendance row: negative timestamp"))?;
    Ok(UNIX_EPOCH + Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    #[test]
    fn sqlite_log_assigns_increasing_ids() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("attendance.db");
        let mut log = SqliteAttendanceLog::open(&path.to_string_lossy())?;

        let first = log.record("Ana", 0.71, t(0))?;
        let second = log.record("Ben", 0.55, t(10))?;
        assert!(second > first);

        let recent = log.since(t(5))?;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].subject_name, "Ben");
        assert_eq!(recent[0].recorded_at, t(10));
        Ok(())
    }

    #[test]
    fn sqlite_log_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("attendance.db");
        let path = path.to_string_lossy();
        {
            let mut log = SqliteAttendanceLog::open(&path)?;
            log.record("Ana", 0.9, t(0))?;
        }
        let mut log = SqliteAttendanceLog::open(&path)?;
        assert_eq!(log.since(t(0))?.len(), 1);
        Ok(())
    }

    #[test]
    fn in_memory_log_filters_by_cutoff() -> Result<()> {
        let mut log = InMemoryAttendanceLog::new();
        assert_eq!(log.record("Ana", 0.8, t(0))?, 1);
        assert_eq!(log.record("Ana", 0.8, t(400))?, 2);
        assert_eq!(log.since(t(300))?.len(), 1);
        assert_eq!(log.records().len(), 2);
        Ok(())
    }
}
