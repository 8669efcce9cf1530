//! CRUD operations for [`Topic`] and [`TopicAssignment`] records.

use college_shared::UserId;
use rusqlite::{params, Transaction};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{AssignedTopic, Topic, TopicAssignment};
use crate::row::{collect, ts, ts_at, uuid_at};

const TOPIC_COLUMNS: &str =
    "id, title, description, created_by_id, created_by, created_at, updated_at";
const ASSIGNMENT_COLUMNS: &str =
    "id, topic_id, student_id, student_name, assigned_by, assigned_by_id, assigned_at";

impl Database {
    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Insert a topic together with its initial roster in one transaction.
    /// Any failing assignment (including a duplicate student) rolls back
    /// the topic as well.
    pub fn create_topic(&mut self, topic: &Topic, assignments: &[TopicAssignment]) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO topics
                 (id, title, description, created_by_id, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                topic.id.to_string(),
                topic.title,
                topic.description,
                topic.created_by_id.as_str(),
                topic.created_by,
                ts(&topic.created_at),
                ts(&topic.updated_at),
            ],
        )?;
        insert_assignments_tx(&tx, assignments)?;
        tx.commit()?;

        tracing::debug!(
            topic_id = %topic.id,
            creator = %topic.created_by_id,
            students = assignments.len(),
            "topic created"
        );
        Ok(())
    }

    pub fn get_topic(&self, id: Uuid) -> Result<Topic> {
        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_topic)?)
    }

    pub fn list_topics_by_creator(
        &self,
        creator: &UserId,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<Topic>, u64)> {
        let total: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM topics WHERE created_by_id = ?1",
            params![creator.as_str()],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {TOPIC_COLUMNS} FROM topics
             WHERE created_by_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![creator.as_str(), limit, offset], row_to_topic)?;
        Ok((collect(rows)?, total))
    }

    pub fn list_topics(&self, offset: u32, limit: u32) -> Result<(Vec<Topic>, u64)> {
        let total: u64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM topics", [], |row| row.get(0))?;

        let sql = format!(
            "SELECT {TOPIC_COLUMNS} FROM topics
             ORDER BY created_at DESC
             LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![limit, offset], row_to_topic)?;
        Ok((collect(rows)?, total))
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    /// Insert a batch of assignments atomically. A duplicate
    /// `(topic_id, student_id)` pair fails the whole batch with
    /// [`StoreError::Conflict`].
    pub fn insert_assignments(&mut self, assignments: &[TopicAssignment]) -> Result<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let tx = self.conn_mut().transaction()?;
        insert_assignments_tx(&tx, assignments)?;
        tx.commit()?;

        tracing::debug!(
            topic_id = %assignments[0].topic_id,
            count = assignments.len(),
            "assignments created"
        );
        Ok(())
    }

    pub fn assignments_for_topic(&self, topic_id: Uuid) -> Result<Vec<TopicAssignment>> {
        let sql = format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM topic_assignments
             WHERE topic_id = ?1
             ORDER BY assigned_at DESC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![topic_id.to_string()], row_to_assignment)?;
        Ok(collect(rows)?)
    }

    pub fn get_assignment(&self, id: Uuid) -> Result<TopicAssignment> {
        let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM topic_assignments WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_assignment)?)
    }

    /// Delete a single assignment. Returns `true` if a row was deleted.
    pub fn remove_assignment(&self, topic_id: Uuid, student_id: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM topic_assignments WHERE topic_id = ?1 AND student_id = ?2",
            params![topic_id.to_string(), student_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// A student's assignments joined with their topics, flagging whether an
    /// active dataset already exists for each topic.
    pub fn assigned_topics_for_student(&self, student_id: &UserId) -> Result<Vec<AssignedTopic>> {
        let mut stmt = self.conn().prepare(
            "SELECT ta.id, ta.assigned_at,
                    t.id, t.title, t.description, t.created_by_id, t.created_by,
                    t.created_at, t.updated_at,
                    EXISTS(
                        SELECT 1 FROM datasets d
                        WHERE d.user_id = ta.student_id
                          AND d.topic_id = ta.topic_id
                          AND d.status = 'active'
                    ) AS has_dataset
             FROM topic_assignments ta
             INNER JOIN topics t ON t.id = ta.topic_id
             WHERE ta.student_id = ?1
             ORDER BY ta.assigned_at DESC",
        )?;

        let rows = stmt.query_map(params![student_id.as_str()], |row| {
            Ok(AssignedTopic {
                assignment_id: uuid_at(row, 0)?,
                assigned_at: ts_at(row, 1)?,
                topic: Topic {
                    id: uuid_at(row, 2)?,
                    title: row.get(3)?,
                    description: row.get(4)?,
                    created_by_id: UserId(row.get(5)?),
                    created_by: row.get(6)?,
                    created_at: ts_at(row, 7)?,
                    updated_at: ts_at(row, 8)?,
                },
                has_dataset: row.get(9)?,
            })
        })?;
        Ok(collect(rows)?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_assignments_tx(tx: &Transaction<'_>, assignments: &[TopicAssignment]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO topic_assignments
             (id, topic_id, student_id, student_name, assigned_by, assigned_by_id, assigned_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for a in assignments {
        stmt.execute(params![
            a.id.to_string(),
            a.topic_id.to_string(),
            a.student_id.as_str(),
            a.student_name,
            a.assigned_by,
            a.assigned_by_id.as_str(),
            ts(&a.assigned_at),
        ])
        .map_err(|e| {
            let err = StoreError::from(e);
            tracing::warn!(
                topic_id = %a.topic_id,
                student = %a.student_id,
                error = %err,
                "assignment insert failed"
            );
            err
        })?;
    }
    Ok(())
}

fn row_to_topic(row: &rusqlite::Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        created_by_id: UserId(row.get(3)?),
        created_by: row.get(4)?,
        created_at: ts_at(row, 5)?,
        updated_at: ts_at(row, 6)?,
    })
}

fn row_to_assignment(row: &rusqlite::Row<'_>) -> rusqlite::Result<TopicAssignment> {
    Ok(TopicAssignment {
        id: uuid_at(row, 0)?,
        topic_id: uuid_at(row, 1)?,
        student_id: UserId(row.get(2)?),
        student_name: row.get(3)?,
        assigned_by: row.get(4)?,
        assigned_by_id: UserId(row.get(5)?),
        assigned_at: ts_at(row, 6)?,
    })
}
