//! Event persistence boundary.
//!
//! The pipeline emits `Event` records to an `EventSink`. Persistence is
//! best-effort: a failing sink is logged and counted by the orchestrator
//! but never stops the loop. `SqliteEventStore` is the bundled sink;
//! `LogSink` serves hosts that only want the log stream.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detect::Detection;

/// A recognition event emitted by the pipeline after motion gating,
/// sampling, and de-duplication.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Sequence number of the frame that produced the event.
    pub frame_seq: u64,
    /// Primary (highest-confidence) label.
    pub label: String,
    pub confidence: f32,
    /// Full detection set for the frame.
    pub detections: Vec<Detection>,
    /// Optional text from the description collaborator.
    pub description: Option<String>,
    pub created_at_epoch_s: u64,
}

impl Event {
    pub fn epoch_seconds(at: SystemTime) -> u64 {
        at.duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

pub trait EventSink: Send {
    fn persist(&mut self, event: &Event) -> Result<()>;
}

/// Sink that only writes events to the log.
pub struct LogSink;

impl EventSink for LogSink {
    fn persist(&mut self, event: &Event) -> Result<()> {
        log::info!(
            "event: label={} conf={:.2} frame_seq={} description={:?}",
            event.label,
            event.confidence,
            event.frame_seq,
            event.description
        );
        Ok(())
    }
}

/// SQLite-backed event store.
pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              frame_seq INTEGER NOT NULL,
              label TEXT NOT NULL,
              confidence REAL NOT NULL,
              detections_json TEXT NOT NULL,
              description TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
            CREATE INDEX IF NOT EXISTS idx_events_label ON events(label);
            "#,
        )?;
        Ok(())
    }

    /// Most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT created_at, frame_seq, label, confidence, detections_json, description
             FROM events ORDER BY id DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let created_at: i64 = row.get(0)?;
            let frame_seq: i64 = row.get(1)?;
            let label: String = row.get(2)?;
            let confidence: f64 = row.get(3)?;
            let detections_json: String = row.get(4)?;
            let description: Option<String> = row.get(5)?;
            events.push(Event {
                frame_seq: frame_seq as u64,
                label,
                confidence: confidence as f32,
                detections: serde_json::from_str(&detections_json)?,
                description,
                created_at_epoch_s: created_at as u64,
            });
        }
        Ok(events)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl EventSink for SqliteEventStore {
    fn persist(&mut self, event: &Event) -> Result<()> {
        let detections_json = serde_json::to_string(&event.detections)?;
        self.conn.execute(
            r#"
            INSERT INTO events(created_at, frame_seq, label, confidence, detections_json, description)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.created_at_epoch_s as i64,
                event.frame_seq as i64,
                event.label,
                f64::from(event.confidence),
                detections_json,
                event.description,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(seq: u64, label: &str) -> Event {
        Event {
            frame_seq: seq,
            label: label.to_string(),
            confidence: 0.87,
            detections: vec![Detection::new(label, 0.87, [0.1, 0.2, 0.3, 0.4])],
            description: Some("observed: person".to_string()),
            created_at_epoch_s: 1_700_000_000 + seq,
        }
    }

    #[test]
    fn persisted_events_read_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("events.db");
        let mut store = SqliteEventStore::open(db_path.to_str().unwrap())?;

        store.persist(&sample_event(10, "person"))?;
        store.persist(&sample_event(20, "cat"))?;

        assert_eq!(store.count()?, 2);
        let events = store.recent(10)?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].label, "cat");
        assert_eq!(events[0].frame_seq, 20);
        assert_eq!(events[1].label, "person");
        assert_eq!(events[1].detections.len(), 1);
        assert_eq!(events[1].detections[0].bounding_box, [0.1, 0.2, 0.3, 0.4]);
        Ok(())
    }

    #[test]
    fn recent_respects_limit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("events.db");
        let mut store = SqliteEventStore::open(db_path.to_str().unwrap())?;

        for seq in 1..=5 {
            store.persist(&sample_event(seq, "person"))?;
        }
        assert_eq!(store.recent(3)?.len(), 3);
        Ok(())
    }
}
