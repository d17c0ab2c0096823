//! SQLite-based storage for checkpoints and upstream records

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::{CheckpointStore, RecordSink};
use crate::models::{
    EntityId, EntityRecord, EntityType, ItemError, RateLimitInfo, SyncCheckpoint, SyncMode,
    SyncStats, UpsertOutcome,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- One progress record per sync process
            CREATE TABLE sync_checkpoints (
                sync_id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                mode TEXT NOT NULL,                -- JSON-encoded SyncMode
                current_page INTEGER NOT NULL,
                total_pages_discovered INTEGER,
                items_processed INTEGER NOT NULL DEFAULT 0,
                sync_start_time TEXT NOT NULL,
                last_sync_time TEXT,
                rate_limit_info TEXT NOT NULL,     -- JSON-encoded RateLimitInfo
                stats_created INTEGER NOT NULL DEFAULT 0,
                stats_updated INTEGER NOT NULL DEFAULT 0,
                stats_failed INTEGER NOT NULL DEFAULT 0,
                stats_pages_completed INTEGER NOT NULL DEFAULT 0
            );

            -- Upstream records keyed by their numeric id
            CREATE TABLE entity_records (
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                payload TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (entity_type, entity_id)
            );
            "#,
        ),
        // Migration 2: Remember failed items for targeted repair
        M::up(
            r#"
            ALTER TABLE sync_checkpoints ADD COLUMN item_errors TEXT NOT NULL DEFAULT '[]';
            "#,
        ),
    ])
}

/// Columns of a checkpoint row before JSON/time decoding
struct CheckpointRow {
    sync_id: String,
    entity_type: String,
    mode: String,
    current_page: i64,
    total_pages_discovered: Option<i64>,
    items_processed: i64,
    sync_start_time: String,
    last_sync_time: Option<String>,
    rate_limit_info: String,
    stats_created: i64,
    stats_updated: i64,
    stats_failed: i64,
    stats_pages_completed: i64,
    item_errors: String,
}

impl CheckpointRow {
    const COLUMNS: &'static str = "sync_id, entity_type, mode, current_page, total_pages_discovered,
         items_processed, sync_start_time, last_sync_time, rate_limit_info,
         stats_created, stats_updated, stats_failed, stats_pages_completed, item_errors";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sync_id: row.get(0)?,
            entity_type: row.get(1)?,
            mode: row.get(2)?,
            current_page: row.get(3)?,
            total_pages_discovered: row.get(4)?,
            items_processed: row.get(5)?,
            sync_start_time: row.get(6)?,
            last_sync_time: row.get(7)?,
            rate_limit_info: row.get(8)?,
            stats_created: row.get(9)?,
            stats_updated: row.get(10)?,
            stats_failed: row.get(11)?,
            stats_pages_completed: row.get(12)?,
            item_errors: row.get(13)?,
        })
    }

    fn into_checkpoint(self) -> Result<SyncCheckpoint> {
        let mode: SyncMode = serde_json::from_str(&self.mode)
            .with_context(|| format!("Corrupt mode for checkpoint {}", self.sync_id))?;
        let rate_limit_info: RateLimitInfo = serde_json::from_str(&self.rate_limit_info)
            .with_context(|| format!("Corrupt rate_limit_info for checkpoint {}", self.sync_id))?;
        // Older rows or hand edits may hold garbage here; it is advisory only
        let item_errors: Vec<ItemError> =
            serde_json::from_str(&self.item_errors).unwrap_or_default();

        Ok(SyncCheckpoint {
            entity_type: EntityType::new(self.entity_type),
            mode,
            current_page: self.current_page as u32,
            total_pages_discovered: self.total_pages_discovered.map(|t| t as u32),
            items_processed: self.items_processed as u64,
            sync_start_time: parse_time(&self.sync_start_time)?,
            last_sync_time: self.last_sync_time.as_deref().map(parse_time).transpose()?,
            rate_limit_info,
            stats: SyncStats {
                created: self.stats_created as u64,
                updated: self.stats_updated as u64,
                failed: self.stats_failed as u64,
                pages_completed: self.stats_pages_completed as u64,
            },
            item_errors,
            sync_id: self.sync_id,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", s))
}

/// SQLite-backed checkpoint store and record sink
pub struct SqliteSyncStore {
    conn: Mutex<Connection>,
}

impl SqliteSyncStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets the status command read while a sync writes.
        // synchronous = FULL: a checkpoint save must survive power loss
        // before the engine requests the next page.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CheckpointStore for SqliteSyncStore {
    fn load(&self, sync_id: &str) -> Result<Option<SyncCheckpoint>> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sync_checkpoints WHERE sync_id = ?",
                    CheckpointRow::COLUMNS
                ),
                [sync_id],
                CheckpointRow::from_row,
            )
            .optional()?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let mode = serde_json::to_string(&checkpoint.mode)?;
        let rate_limit_info = serde_json::to_string(&checkpoint.rate_limit_info)?;
        let item_errors = serde_json::to_string(&checkpoint.item_errors)?;

        conn.execute(
            "INSERT INTO sync_checkpoints
             (sync_id, entity_type, mode, current_page, total_pages_discovered,
              items_processed, sync_start_time, last_sync_time, rate_limit_info,
              stats_created, stats_updated, stats_failed, stats_pages_completed, item_errors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(sync_id) DO UPDATE SET
                entity_type = excluded.entity_type,
                mode = excluded.mode,
                current_page = excluded.current_page,
                total_pages_discovered = excluded.total_pages_discovered,
                items_processed = excluded.items_processed,
                sync_start_time = excluded.sync_start_time,
                last_sync_time = excluded.last_sync_time,
                rate_limit_info = excluded.rate_limit_info,
                stats_created = excluded.stats_created,
                stats_updated = excluded.stats_updated,
                stats_failed = excluded.stats_failed,
                stats_pages_completed = excluded.stats_pages_completed,
                item_errors = excluded.item_errors",
            params![
                checkpoint.sync_id,
                checkpoint.entity_type.as_str(),
                mode,
                checkpoint.current_page as i64,
                checkpoint.total_pages_discovered.map(|t| t as i64),
                checkpoint.items_processed as i64,
                checkpoint.sync_start_time.to_rfc3339(),
                checkpoint.last_sync_time.map(|t| t.to_rfc3339()),
                rate_limit_info,
                checkpoint.stats.created as i64,
                checkpoint.stats.updated as i64,
                checkpoint.stats.failed as i64,
                checkpoint.stats.pages_completed as i64,
                item_errors,
            ],
        )?;

        Ok(())
    }

    fn delete(&self, sync_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sync_checkpoints WHERE sync_id = ?", [sync_id])?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<SyncCheckpoint>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sync_checkpoints ORDER BY sync_id",
            CheckpointRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map([], CheckpointRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(CheckpointRow::into_checkpoint).collect()
    }
}

impl RecordSink for SqliteSyncStore {
    fn upsert(&self, record: &EntityRecord) -> Result<UpsertOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existed = tx
            .query_row(
                "SELECT 1 FROM entity_records WHERE entity_type = ? AND entity_id = ?",
                params![record.entity_type.as_str(), record.id.get() as i64],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(&record.payload)?;
        tx.execute(
            "INSERT INTO entity_records (entity_type, entity_id, payload, first_seen_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![
                record.entity_type.as_str(),
                record.id.get() as i64,
                payload,
                now
            ],
        )?;
        tx.commit()?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    fn get(&self, entity_type: &EntityType, id: EntityId) -> Result<Option<EntityRecord>> {
        let conn = self.conn.lock().unwrap();

        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM entity_records WHERE entity_type = ? AND entity_id = ?",
                params![entity_type.as_str(), id.get() as i64],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| -> Result<EntityRecord> {
                let value = serde_json::from_str(&p)
                    .with_context(|| format!("Corrupt payload for {} {}", entity_type, id))?;
                Ok(EntityRecord::new(entity_type.clone(), id, value))
            })
            .transpose()
    }

    fn count(&self, entity_type: &EntityType) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity_records WHERE entity_type = ?",
            [entity_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
