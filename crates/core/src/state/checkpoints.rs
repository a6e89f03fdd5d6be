//! # Run Checkpoints
//!
//! One checkpoint is written after every completed stage, keyed by run id,
//! holding the full conversation at that point. Resuming a run starts from
//! the stage after the latest checkpoint.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::db::BeaconDb;
use crate::conversation::Conversation;
use crate::stages::StageId;

/// Conversation state after a completed stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: String,
    pub run_id: String,
    /// Stage that just completed
    pub stage: StageId,
    /// Position of that stage in the pipeline
    pub stage_index: usize,
    pub timestamp: DateTime<Utc>,
    pub conversation: Conversation,
}

impl Checkpoint {
    pub fn new(run_id: &str, stage: StageId, stage_index: usize, conversation: Conversation) -> Self {
        Self {
            id: format!("{}_{:02}_{}", run_id, stage_index, stage.as_str()),
            run_id: run_id.to_string(),
            stage,
            stage_index,
            timestamp: Utc::now(),
            conversation,
        }
    }
}

/// Where checkpoints go
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Checkpoints of a run, oldest first
    fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>>;

    fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.list(run_id)?.into_iter().last())
    }
}

/// Process-local store; the default when no database is configured
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<Vec<Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        checkpoints.retain(|c| c.id != checkpoint.id);
        checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        let checkpoints = self
            .checkpoints
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let mut found: Vec<Checkpoint> = checkpoints
            .iter()
            .filter(|c| c.run_id == run_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.stage_index);
        Ok(found)
    }
}

/// SQLite-backed store on the shared [`BeaconDb`]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteCheckpointStore {
    pub fn new(db: &BeaconDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn row_to_checkpoint(row: &rusqlite::Row) -> rusqlite::Result<(Checkpoint, bool)> {
        let id: String = row.get(0)?;
        let run_id: String = row.get(1)?;
        let stage_str: String = row.get(2)?;
        let stage_index: i64 = row.get(3)?;
        let timestamp_str: String = row.get(4)?;
        let conversation_json: String = row.get(5)?;

        let stage = stage_str.parse::<StageId>();
        let conversation = serde_json::from_str::<Conversation>(&conversation_json);
        let valid = stage.is_ok() && conversation.is_ok();

        Ok((
            Checkpoint {
                id,
                run_id,
                stage: stage.unwrap_or(StageId::Strategy),
                stage_index: stage_index.max(0) as usize,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                conversation: conversation.unwrap_or_default(),
            },
            valid,
        ))
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let conversation_json = serde_json::to_string(&checkpoint.conversation)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO checkpoints (id, run_id, stage, stage_index, timestamp, conversation)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                checkpoint.id,
                checkpoint.run_id,
                checkpoint.stage.as_str(),
                checkpoint.stage_index as i64,
                checkpoint.timestamp.to_rfc3339(),
                conversation_json,
            ],
        )
        .context("Failed to save checkpoint")?;

        tracing::info!(
            checkpoint_id = %checkpoint.id,
            stage = %checkpoint.stage,
            "Checkpoint saved"
        );
        Ok(())
    }

    fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, run_id, stage, stage_index, timestamp, conversation
            FROM checkpoints WHERE run_id = ?1 ORDER BY stage_index ASC
            "#,
        )?;

        let rows = stmt
            .query_map(params![run_id], Self::row_to_checkpoint)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read checkpoints")?;

        let mut checkpoints = Vec::with_capacity(rows.len());
        for (checkpoint, valid) in rows {
            if valid {
                checkpoints.push(checkpoint);
            } else {
                tracing::warn!(checkpoint_id = %checkpoint.id, "Skipping unreadable checkpoint");
            }
        }
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(run_id: &str, stage: StageId, index: usize) -> Checkpoint {
        let convo = Conversation::seed("topic").with_output(stage, format!("out {}", index));
        Checkpoint::new(run_id, stage, index, convo)
    }

    #[test]
    fn test_checkpoint_id() {
        let cp = sample("run-1", StageId::Copywriting, 1);
        assert_eq!(cp.id, "run-1_01_copywriting");
    }

    #[test]
    fn test_in_memory_latest() {
        let store = InMemoryCheckpointStore::new();
        store.save(&sample("a", StageId::Strategy, 0)).unwrap();
        store.save(&sample("a", StageId::Copywriting, 1)).unwrap();
        store.save(&sample("b", StageId::Strategy, 0)).unwrap();

        let latest = store.latest("a").unwrap().unwrap();
        assert_eq!(latest.stage, StageId::Copywriting);
        assert_eq!(store.list("b").unwrap().len(), 1);
        assert!(store.latest("missing").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_round_trip() {
        let db = BeaconDb::open_in_memory().unwrap();
        let store = SqliteCheckpointStore::new(&db);
        let first = sample("run", StageId::Strategy, 0);
        let second = sample("run", StageId::Copywriting, 1);
        store.save(&second).unwrap();
        store.save(&first).unwrap();

        let all = store.list("run").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].stage, StageId::Strategy);

        let latest = store.latest("run").unwrap().unwrap();
        assert_eq!(latest.conversation, second.conversation);
        assert_eq!(latest.stage_index, 1);
    }

    #[test]
    fn test_sqlite_save_overwrites_same_stage() {
        let db = BeaconDb::open_in_memory().unwrap();
        let store = SqliteCheckpointStore::new(&db);
        store.save(&sample("run", StageId::Strategy, 0)).unwrap();
        store.save(&sample("run", StageId::Strategy, 0)).unwrap();
        assert_eq!(store.list("run").unwrap().len(), 1);
    }
}
