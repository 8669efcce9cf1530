//! Topic and assignment engine: topic creation, rosters, and the directory
//! lookups used to build them.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use college_shared::{
    AccessRequest, DirectoryUser, Identity, Page, PageRequest, TopicAction, UserId,
};
use college_store::{AssignedTopic, Topic, TopicAssignment};
use tracing::info;
use uuid::Uuid;

use crate::auth::{DirectoryKind, DirectoryPage, IdentityResolver};
use crate::error::{authorize, EngineError, NotFoundExt};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct NewTopic {
    pub title: String,
    pub description: String,
    pub students: Vec<DirectoryUser>,
}

#[derive(Clone)]
pub struct TopicEngine {
    store: Store,
    directory: Arc<dyn IdentityResolver>,
}

/// Build assignment rows for `students`, skipping repeats of the same id.
fn assignments_for(
    topic_id: Uuid,
    actor: &Identity,
    students: &[DirectoryUser],
) -> Vec<TopicAssignment> {
    let now = Utc::now();
    let mut seen = HashSet::new();
    students
        .iter()
        .filter(|s| seen.insert(s.id.clone()))
        .map(|s| TopicAssignment {
            id: Uuid::new_v4(),
            topic_id,
            student_id: s.id.clone(),
            student_name: s.username.clone(),
            assigned_by: actor.username.clone(),
            assigned_by_id: actor.id.clone(),
            assigned_at: now,
        })
        .collect()
}

impl TopicEngine {
    pub fn new(store: Store, directory: Arc<dyn IdentityResolver>) -> Self {
        Self { store, directory }
    }

    async fn load(&self, id: Uuid) -> Result<Topic, EngineError> {
        self.store
            .call(move |db| db.get_topic(id))
            .await
            .or_not_found("topic")
    }

    async fn load_authorized(
        &self,
        actor: &Identity,
        id: Uuid,
        action: TopicAction,
    ) -> Result<Topic, EngineError> {
        let topic = self.load(id).await?;
        authorize(
            actor,
            &AccessRequest::Topic {
                creator: &topic.created_by_id,
                action,
            },
        )?;
        Ok(topic)
    }

    /// Persist the topic and its initial roster atomically.
    pub async fn create_topic(
        &self,
        actor: &Identity,
        req: NewTopic,
    ) -> Result<Topic, EngineError> {
        authorize(actor, &AccessRequest::CreateTopic)?;

        let title = req.title.trim().to_string();
        if title.is_empty() {
            return Err(EngineError::ValidationFailed("title is required".to_string()));
        }

        let now = Utc::now();
        let topic = Topic {
            id: Uuid::new_v4(),
            title,
            description: req.description,
            created_by_id: actor.id.clone(),
            created_by: actor.username.clone(),
            created_at: now,
            updated_at: now,
        };
        let assignments = assignments_for(topic.id, actor, &req.students);
        let students = assignments.len();

        let row = topic.clone();
        self.store
            .call(move |db| db.create_topic(&row, &assignments))
            .await?;

        info!(topic_id = %topic.id, user = %actor.id, students, "topic created");
        Ok(topic)
    }

    /// Topics the caller created.
    pub async fn list_my_topics(
        &self,
        actor: &Identity,
        page: PageRequest,
    ) -> Result<Page<Topic>, EngineError> {
        let creator = actor.id.clone();
        let (offset, limit) = (page.offset(), page.limit);
        let (items, total) = self
            .store
            .call(move |db| db.list_topics_by_creator(&creator, offset, limit))
            .await?;
        Ok(Page::new(items, total, page))
    }

    pub async fn list_all_topics(
        &self,
        actor: &Identity,
        page: PageRequest,
    ) -> Result<Page<Topic>, EngineError> {
        authorize(actor, &AccessRequest::ListAllTopics)?;
        let (offset, limit) = (page.offset(), page.limit);
        let (items, total) = self
            .store
            .call(move |db| db.list_topics(offset, limit))
            .await?;
        Ok(Page::new(items, total, page))
    }

    /// The caller's own assignments. No gate: the query is scoped to the
    /// caller's id.
    pub async fn assigned_topics(
        &self,
        actor: &Identity,
    ) -> Result<Vec<AssignedTopic>, EngineError> {
        let student = actor.id.clone();
        self.store
            .call(move |db| db.assigned_topics_for_student(&student))
            .await
    }

    /// Assign additional students. Already-assigned ids are skipped; the call
    /// only fails when nothing new is left to insert.
    pub async fn add_students(
        &self,
        actor: &Identity,
        topic_id: Uuid,
        students: Vec<DirectoryUser>,
    ) -> Result<Vec<TopicAssignment>, EngineError> {
        self.load_authorized(actor, topic_id, TopicAction::AddStudents).await?;

        if students.is_empty() {
            return Err(EngineError::ValidationFailed(
                "student list cannot be empty".to_string(),
            ));
        }

        let existing: HashSet<UserId> = self
            .store
            .call(move |db| db.assignments_for_topic(topic_id))
            .await?
            .into_iter()
            .map(|a| a.student_id)
            .collect();

        let fresh: Vec<DirectoryUser> = students
            .into_iter()
            .filter(|s| !existing.contains(&s.id))
            .collect();
        let assignments = assignments_for(topic_id, actor, &fresh);
        if assignments.is_empty() {
            return Err(EngineError::PreconditionFailed(
                "all specified students are already assigned".to_string(),
            ));
        }

        let rows = assignments.clone();
        self.store
            .call(move |db| db.insert_assignments(&rows))
            .await?;

        info!(%topic_id, user = %actor.id, added = assignments.len(), "students assigned");
        Ok(assignments)
    }

    pub async fn remove_student(
        &self,
        actor: &Identity,
        topic_id: Uuid,
        student_id: UserId,
    ) -> Result<(), EngineError> {
        self.load_authorized(actor, topic_id, TopicAction::RemoveStudent).await?;

        let student = student_id.clone();
        let removed = self
            .store
            .call(move |db| db.remove_assignment(topic_id, &student))
            .await?;
        if !removed {
            return Err(EngineError::NotFound("student assignment not found".to_string()));
        }

        info!(%topic_id, student = %student_id, user = %actor.id, "student removed from topic");
        Ok(())
    }

    pub async fn topic_students(
        &self,
        actor: &Identity,
        topic_id: Uuid,
    ) -> Result<Vec<TopicAssignment>, EngineError> {
        self.load_authorized(actor, topic_id, TopicAction::ViewRoster).await?;
        self.store
            .call(move |db| db.assignments_for_topic(topic_id))
            .await
    }

    /// Forward a directory search to the identity service.
    pub async fn search(
        &self,
        actor: &Identity,
        kind: DirectoryKind,
        query: &str,
    ) -> Result<DirectoryPage, EngineError> {
        authorize(actor, &AccessRequest::SearchDirectory)?;
        self.directory.search(kind, query).await
    }
}
