//! libSQL-backed action queue storage

use std::path::Path;

use async_trait::async_trait;
use libsql::{params, Connection, Row, Value};
use tokio::sync::Mutex;

use super::Database;
use crate::adapters::PersistenceAdapter;
use crate::error::{Error, Result};
use crate::models::{ActionId, ActionStatus, SyncAction};

const SELECT_ACTIONS: &str = "SELECT id, entity_type, entity_id, action_type, payload, timestamp, status, retry_count, error
     FROM sync_actions
     ORDER BY timestamp ASC, id ASC";

/// Pending sync actions stored in a local libSQL database
pub struct LibSqlActionStore {
    db: Mutex<Database>,
}

impl LibSqlActionStore {
    /// Open (or create) the queue database at the given path
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(path).await?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory queue database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Parse an action from a database row
    fn parse_action(row: &Row) -> Result<SyncAction> {
        let id: String = row.get(0)?;
        let entity_type: String = row.get(1)?;
        let action_type: String = row.get(3)?;
        let status: String = row.get(6)?;
        let payload = optional_text(row, 4)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;

        Ok(SyncAction {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid action id '{id}'")))?,
            entity_type: entity_type.parse()?,
            entity_id: row.get(2)?,
            action_type: action_type.parse()?,
            payload,
            timestamp: row.get(5)?,
            status: status.parse()?,
            retry_count: u32::try_from(row.get::<i64>(7)?).unwrap_or(u32::MAX),
            error: optional_text(row, 8)?,
        })
    }

    async fn upsert(conn: &Connection, action: &SyncAction) -> Result<()> {
        let payload = action
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?
            .map_or(Value::Null, Value::Text);
        let error = action.error.clone().map_or(Value::Null, Value::Text);

        conn.execute(
            "INSERT INTO sync_actions (id, entity_type, entity_id, action_type, payload, timestamp, status, retry_count, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 payload = excluded.payload,
                 status = excluded.status,
                 retry_count = excluded.retry_count,
                 error = excluded.error",
            params![
                action.id.as_str(),
                action.entity_type.as_str(),
                action.entity_id.as_str(),
                action.action_type.as_str(),
                payload,
                action.timestamp,
                action.status.as_str(),
                i64::from(action.retry_count),
                error
            ],
        )
        .await?;
        Ok(())
    }
}

fn optional_text(row: &Row, index: i32) -> Result<Option<String>> {
    match row.get_value(index)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(Error::Database(format!(
            "expected TEXT or NULL in column {index}, found {other:?}"
        ))),
    }
}

#[async_trait]
impl PersistenceAdapter for LibSqlActionStore {
    async fn load_pending_actions(&self) -> Result<Vec<SyncAction>> {
        let db = self.db.lock().await;
        let mut rows = db.connection().query(SELECT_ACTIONS, ()).await?;

        let mut actions = Vec::new();
        while let Some(row) = rows.next().await? {
            actions.push(Self::parse_action(&row)?);
        }
        Ok(actions)
    }

    async fn save_pending_action(&self, action: &SyncAction) -> Result<()> {
        let db = self.db.lock().await;
        Self::upsert(db.connection(), action).await
    }

    async fn update_action_status(
        &self,
        id: &ActionId,
        status: ActionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let error = error.map_or(Value::Null, |message| Value::Text(message.to_string()));
        let rows = db
            .connection()
            .execute(
                "UPDATE sync_actions SET status = ?1, error = ?2 WHERE id = ?3",
                params![status.as_str(), error, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn remove_action(&self, id: &ActionId) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM sync_actions WHERE id = ?1", params![id.as_str()])
            .await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM sync_actions", ())
            .await?;
        Ok(())
    }
}
