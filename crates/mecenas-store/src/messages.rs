use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mecenas_core::ids::{ConversationId, MessageId};
use mecenas_core::messages::Role;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message to a conversation.
    ///
    /// The id is a UUIDv7, so insertion order and id order agree and
    /// `list` can sort by id alone.
    #[instrument(skip(self, content), fields(conversation_id = %conversation_id, role = %role))]
    pub fn append(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        let id = MessageId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.as_str(),
                    conversation_id.as_str(),
                    role.to_string(),
                    content,
                    now
                ],
            )?;

            Ok(MessageRow {
                id,
                conversation_id: conversation_id.clone(),
                role,
                content: content.to_string(),
                created_at: now,
            })
        })
    }

    /// List a conversation's messages in creation order.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, role, content, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([conversation_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn count(&self, conversation_id: &ConversationId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    let id: String = row_helpers::get(row, 0, "messages", "id")?;
    let conversation_id: String = row_helpers::get(row, 1, "messages", "conversation_id")?;
    let role: String = row_helpers::get(row, 2, "messages", "role")?;
    Ok(MessageRow {
        id: MessageId::from_raw(id),
        conversation_id: ConversationId::from_raw(conversation_id),
        role: row_helpers::parse_enum(&role, "messages", "role")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
        created_at: row_helpers::get(row, 4, "messages", "created_at")?,
    })
}
