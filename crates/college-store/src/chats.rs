//! CRUD operations for [`SavedChat`] transcripts and their [`ChatMessage`]s.
//!
//! Messages are never appended individually. Every save replaces the full
//! message list and reassigns `order_num` as a dense `1..=N` sequence.

use chrono::{DateTime, Utc};
use college_shared::{Citation, UserId};
use rusqlite::{params, Transaction};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ChatMessage, NewChatMessage, SavedChat};
use crate::row::{collect, ts, ts_at, uuid_at};

const CHAT_COLUMNS: &str = "id, dataset_id, title, created_by, user_id, created_at, updated_at";

impl Database {
    /// Insert a chat and its messages in one transaction.
    pub fn create_chat(&mut self, chat: &SavedChat, messages: &[NewChatMessage]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO saved_chats
                 (id, dataset_id, title, created_by, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chat.id.to_string(),
                chat.dataset_id.to_string(),
                chat.title,
                chat.created_by,
                chat.user_id.as_str(),
                ts(&chat.created_at),
                ts(&chat.updated_at),
            ],
        )?;
        write_messages_tx(&tx, chat.id, messages, &chat.created_at)?;
        tx.commit()?;

        tracing::debug!(
            chat_id = %chat.id,
            dataset_id = %chat.dataset_id,
            messages = messages.len(),
            "chat saved"
        );
        Ok(())
    }

    pub fn get_chat(&self, id: Uuid) -> Result<SavedChat> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM saved_chats WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_chat)?)
    }

    pub fn list_chats_for_dataset(
        &self,
        dataset_id: Uuid,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<SavedChat>, u64)> {
        let total: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM saved_chats WHERE dataset_id = ?1",
            params![dataset_id.to_string()],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {CHAT_COLUMNS} FROM saved_chats
             WHERE dataset_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![dataset_id.to_string(), limit, offset], row_to_chat)?;
        Ok((collect(rows)?, total))
    }

    /// Rename a chat and, when `messages` is given, replace its transcript.
    /// Both happen in one transaction.
    pub fn update_chat(
        &mut self,
        id: Uuid,
        title: Option<&str>,
        messages: Option<&[NewChatMessage]>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        let affected = match title {
            Some(title) => tx.execute(
                "UPDATE saved_chats SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, ts(&at), id.to_string()],
            )?,
            None => tx.execute(
                "UPDATE saved_chats SET updated_at = ?1 WHERE id = ?2",
                params![ts(&at), id.to_string()],
            )?,
        };
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        if let Some(messages) = messages {
            tx.execute(
                "DELETE FROM chat_messages WHERE chat_id = ?1",
                params![id.to_string()],
            )?;
            write_messages_tx(&tx, id, messages, &at)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete a chat; its messages cascade.
    pub fn delete_chat(&self, id: Uuid) -> Result<()> {
        let affected = self
            .conn()
            .execute("DELETE FROM saved_chats WHERE id = ?1", params![id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        tracing::debug!(chat_id = %id, "chat deleted");
        Ok(())
    }

    /// Messages of a chat in transcript order.
    pub fn messages_for_chat(&self, chat_id: Uuid) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, question, answer, citations, order_num, created_at
             FROM chat_messages
             WHERE chat_id = ?1
             ORDER BY order_num ASC",
        )?;
        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            let citations: String = row.get(4)?;
            Ok((
                ChatMessage {
                    id: uuid_at(row, 0)?,
                    chat_id: uuid_at(row, 1)?,
                    question: row.get(2)?,
                    answer: row.get(3)?,
                    citations: Vec::new(),
                    order_num: row.get(5)?,
                    created_at: ts_at(row, 6)?,
                },
                citations,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (mut msg, raw) = row?;
            msg.citations = serde_json::from_str::<Vec<Citation>>(&raw)?;
            out.push(msg);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_messages_tx(
    tx: &Transaction<'_>,
    chat_id: Uuid,
    messages: &[NewChatMessage],
    at: &DateTime<Utc>,
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO chat_messages (id, chat_id, question, answer, citations, order_num, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let stamp = ts(at);
    for (i, msg) in messages.iter().enumerate() {
        let citations = serde_json::to_string(&msg.citations)?;
        stmt.execute(params![
            Uuid::new_v4().to_string(),
            chat_id.to_string(),
            msg.question,
            msg.answer,
            citations,
            (i + 1) as u32,
            stamp,
        ])?;
    }
    Ok(())
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedChat> {
    Ok(SavedChat {
        id: uuid_at(row, 0)?,
        dataset_id: uuid_at(row, 1)?,
        title: row.get(2)?,
        created_by: row.get(3)?,
        user_id: UserId(row.get(4)?),
        created_at: ts_at(row, 5)?,
        updated_at: ts_at(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dataset_for, now};

    fn msg(q: &str) -> NewChatMessage {
        NewChatMessage {
            question: q.to_string(),
            answer: format!("answer to {q}"),
            citations: vec![Citation {
                chunk_id: 7,
                score: 0.5,
                original_score: Some(0.25),
                score_improvement: None,
            }],
        }
    }

    fn setup() -> (Database, SavedChat) {
        let db = Database::open_in_memory().unwrap();
        let ds = dataset_for("s1", "Essay");
        db.insert_dataset(&ds).unwrap();
        let now = now();
        let chat = SavedChat {
            id: Uuid::new_v4(),
            dataset_id: ds.id,
            title: "Review".into(),
            created_by: "Teacher One".into(),
            user_id: UserId::from("t1"),
            created_at: now,
            updated_at: now,
        };
        (db, chat)
    }

    #[test]
    fn create_and_read_back_in_order() {
        let (mut db, chat) = setup();
        db.create_chat(&chat, &[msg("a"), msg("b")]).unwrap();

        assert_eq!(db.get_chat(chat.id).unwrap(), chat);
        let messages = db.messages_for_chat(chat.id).unwrap();
        let orders: Vec<u32> = messages.iter().map(|m| m.order_num).collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(messages[0].question, "a");
        assert_eq!(messages[1].citations[0].original_score, Some(0.25));
    }

    #[test]
    fn save_replaces_rather_than_appends() {
        let (mut db, chat) = setup();
        db.create_chat(&chat, &[msg("m1"), msg("m2")]).unwrap();

        db.update_chat(chat.id, None, Some(&[msg("m3")][..]), now()).unwrap();

        let messages = db.messages_for_chat(chat.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].order_num, 1);
        assert_eq!(messages[0].question, "m3");
    }

    #[test]
    fn title_only_update_keeps_messages() {
        let (mut db, chat) = setup();
        db.create_chat(&chat, &[msg("a")]).unwrap();

        db.update_chat(chat.id, Some("Renamed"), None, now()).unwrap();
        assert_eq!(db.get_chat(chat.id).unwrap().title, "Renamed");
        assert_eq!(db.messages_for_chat(chat.id).unwrap().len(), 1);
    }

    #[test]
    fn update_missing_chat_is_not_found() {
        let (mut db, _) = setup();
        assert!(matches!(
            db.update_chat(Uuid::new_v4(), Some("x"), Some(&[msg("a")][..]), now()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn delete_cascades_messages() {
        let (mut db, chat) = setup();
        db.create_chat(&chat, &[msg("a"), msg("b")]).unwrap();

        db.delete_chat(chat.id).unwrap();
        assert!(matches!(db.get_chat(chat.id), Err(StoreError::NotFound)));
        assert!(db.messages_for_chat(chat.id).unwrap().is_empty());
        assert!(matches!(db.delete_chat(chat.id), Err(StoreError::NotFound)));
    }

    #[test]
    fn chats_listed_per_dataset() {
        let (mut db, chat) = setup();
        db.create_chat(&chat, &[]).unwrap();
        let other = SavedChat {
            id: Uuid::new_v4(),
            title: "Second".into(),
            ..chat.clone()
        };
        db.create_chat(&other, &[]).unwrap();

        let (items, total) = db.list_chats_for_dataset(chat.dataset_id, 0, 20).unwrap();
        assert_eq!(total, 2);
        assert_eq!(items.len(), 2);

        let (items, total) = db.list_chats_for_dataset(Uuid::new_v4(), 0, 20).unwrap();
        assert_eq!(total, 0);
        assert!(items.is_empty());
    }
}
