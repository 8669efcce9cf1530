//! Fixture builders for the store's unit tests.

use chrono::{DateTime, SubsecRound, Utc};
use college_shared::UserId;
use uuid::Uuid;

use crate::models::{Dataset, Lifecycle, Topic, TopicAssignment};

/// `Utc::now()` truncated to the stored precision so round-trips compare
/// equal.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn dataset_for(owner: &str, title: &str) -> Dataset {
    let id = Uuid::new_v4();
    let now = now();
    Dataset {
        id,
        owner_id: UserId::from(owner),
        author: owner.to_string(),
        title: title.to_string(),
        blob_path: format!("students/{owner}/{id}/current.md"),
        lifecycle: Lifecycle::Active,
        created_at: now,
        updated_at: now,
        indexed_at: None,
        topic_id: None,
        assignment_id: None,
    }
}

pub(crate) fn topic_by(creator: &str, title: &str) -> Topic {
    let now = now();
    Topic {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: String::new(),
        created_by_id: UserId::from(creator),
        created_by: creator.to_string(),
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn assignment(topic: &Topic, student: &str) -> TopicAssignment {
    TopicAssignment {
        id: Uuid::new_v4(),
        topic_id: topic.id,
        student_id: UserId::from(student),
        student_name: student.to_string(),
        assigned_by: topic.created_by.clone(),
        assigned_by_id: topic.created_by_id.clone(),
        assigned_at: now(),
    }
}
