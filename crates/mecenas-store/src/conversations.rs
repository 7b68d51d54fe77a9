use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mecenas_core::ids::ConversationId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub owner_id: String,
    pub title: String,
    pub created_at: String,
}

pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new conversation for an owner.
    #[instrument(skip(self), fields(owner_id))]
    pub fn create(&self, owner_id: &str, title: &str) -> Result<ConversationRow, StoreError> {
        let id = ConversationId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, owner_id, title, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), owner_id, title, now],
            )?;

            Ok(ConversationRow {
                id,
                owner_id: owner_id.to_string(),
                title: title.to_string(),
                created_at: now,
            })
        })
    }

    /// Get a conversation owned by the given user.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: &ConversationId, owner_id: &str) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, title, created_at
                 FROM conversations WHERE id = ?1 AND owner_id = ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![id.as_str(), owner_id])?;
            match rows.next()? {
                Some(row) => row_to_conversation(row),
                None => Err(StoreError::NotFound(format!("conversation {id}"))),
            }
        })
    }

    /// List an owner's conversations, newest first.
    #[instrument(skip(self), fields(owner_id))]
    pub fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, title, created_at
                 FROM conversations WHERE owner_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let mut rows = stmt.query([owner_id])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_conversation(row)?);
            }
            Ok(results)
        })
    }

    /// Delete a conversation and all its messages in one transaction.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn delete(&self, id: &ConversationId, owner_id: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            let result = (|| -> Result<(), StoreError> {
                conn.execute(
                    "DELETE FROM messages WHERE conversation_id = ?1",
                    [id.as_str()],
                )?;
                let deleted = conn.execute(
                    "DELETE FROM conversations WHERE id = ?1 AND owner_id = ?2",
                    rusqlite::params![id.as_str(), owner_id],
                )?;
                if deleted == 0 {
                    return Err(StoreError::NotFound(format!("conversation {id}")));
                }
                Ok(())
            })();

            match result {
                Ok(()) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(())
                }
                Err(e) => {
                    conn.execute_batch("ROLLBACK")?;
                    Err(e)
                }
            }
        })
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, StoreError> {
    let id: String = row_helpers::get(row, 0, "conversations", "id")?;
    Ok(ConversationRow {
        id: ConversationId::from_raw(id),
        owner_id: row_helpers::get(row, 1, "conversations", "owner_id")?,
        title: row_helpers::get(row, 2, "conversations", "title")?,
        created_at: row_helpers::get(row, 3, "conversations", "created_at")?,
    })
}
