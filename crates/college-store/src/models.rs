//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer as a response body.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use college_shared::{Citation, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Whether a dataset is visible to readers.
///
/// Deleted datasets keep their row for audit but every read path filters
/// them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Active,
    Deleted,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Active => "active",
            Lifecycle::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Lifecycle::Active),
            "deleted" => Ok(Lifecycle::Deleted),
            other => Err(format!("unknown dataset status: {other}")),
        }
    }
}

/// A student-owned document plus its indexing status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dataset {
    pub id: Uuid,
    /// The creating student. Only this user may mutate the dataset.
    pub owner_id: UserId,
    /// Owner display name captured at creation.
    pub author: String,
    pub title: String,
    /// Location of the document bytes in the blob store.
    #[serde(skip_serializing)]
    pub blob_path: String,
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set only after the indexing service confirmed success.
    pub indexed_at: Option<DateTime<Utc>>,
    pub topic_id: Option<Uuid>,
    pub assignment_id: Option<Uuid>,
}

impl Dataset {
    pub fn is_indexed(&self) -> bool {
        self.indexed_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Topic + assignments
// ---------------------------------------------------------------------------

/// A teacher-authored subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub created_by_id: UserId,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// "This student was assigned this topic by this teacher."
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicAssignment {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub student_id: UserId,
    pub student_name: String,
    pub assigned_by: String,
    pub assigned_by_id: UserId,
    pub assigned_at: DateTime<Utc>,
}

/// A student's view of one of their assignments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignedTopic {
    pub assignment_id: Uuid,
    pub topic: Topic,
    pub assigned_at: DateTime<Utc>,
    /// Whether the student already has an active dataset for this topic.
    pub has_dataset: bool,
}

// ---------------------------------------------------------------------------
// Dataset permission
// ---------------------------------------------------------------------------

/// Grants a teacher access to one dataset's saved transcripts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetPermission {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub teacher_id: UserId,
    pub teacher_name: String,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Saved chats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedChat {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub title: String,
    /// Display name of the creator.
    pub created_by: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One question/answer pair inside a saved chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Dense 1..N position, reassigned on every save.
    pub order_num: u32,
    pub created_at: DateTime<Utc>,
}

/// Message content as supplied by a caller, before ids and ordering are
/// assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewChatMessage {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}
