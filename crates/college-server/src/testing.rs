//! In-memory collaborators and a wired-up engine harness for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use college_shared::{AskResponse, Citation, DirectoryUser, Identity, Role, UserId};
use college_store::{Database, Dataset, Lifecycle, Topic, TopicAssignment};
use uuid::Uuid;

use crate::auth::{DirectoryKind, DirectoryPage, IdentityResolver};
use crate::blob_store::BlobStore;
use crate::chats::ChatEngine;
use crate::datasets::{DatasetEngine, DatasetLimits};
use crate::error::EngineError;
use crate::indexer::Indexer;
use crate::permissions::PermissionEngine;
use crate::rag::IndexingService;
use crate::store::Store;
use crate::topics::TopicEngine;

pub fn user(id: &str) -> DirectoryUser {
    DirectoryUser {
        id: UserId::from(id),
        username: format!("{id}-name"),
    }
}

// ---------------------------------------------------------------------------
// Blob store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        path: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<(), EngineError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("blob upload failed".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::NotFound("blob not found".into()))
    }

    async fn delete(&self, path: &str) -> Result<(), EngineError> {
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, EngineError> {
        Ok(self.contains(path))
    }
}

// ---------------------------------------------------------------------------
// Indexing service
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeIndexing {
    fail: AtomicBool,
    indexed: Mutex<Vec<Uuid>>,
}

impl FakeIndexing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_indexing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Datasets successfully indexed so far, in call order.
    pub fn indexed_ids(&self) -> Vec<Uuid> {
        self.indexed.lock().unwrap().clone()
    }
}

#[async_trait]
impl IndexingService for FakeIndexing {
    async fn index(&self, dataset_id: Uuid, _title: &str, _text: &str) -> Result<u32, EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::UpstreamFailure("indexing service unavailable".into()));
        }
        self.indexed.lock().unwrap().push(dataset_id);
        Ok(3)
    }

    async fn ask(&self, _dataset_id: Uuid, question: &str) -> Result<AskResponse, EngineError> {
        Ok(AskResponse {
            answer: format!("answer: {question}"),
            citations: vec![Citation {
                chunk_id: 1,
                score: 0.9,
                original_score: None,
                score_improvement: None,
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// Identity service
// ---------------------------------------------------------------------------

/// Resolves tokens of the form `<role>:<id>` to an identity named
/// `<id>-name`. Anything else is rejected.
pub struct FakeIdentity {
    students: Vec<DirectoryUser>,
    teachers: Vec<DirectoryUser>,
}

impl FakeIdentity {
    pub fn new() -> Self {
        let entry = |id: &str, name: &str| DirectoryUser {
            id: UserId::from(id),
            username: name.to_string(),
        };
        Self {
            students: vec![entry("s1", "Samira"), entry("s2", "Omar")],
            teachers: vec![entry("t1", "Ms Sampson"), entry("t2", "Mr Kova")],
        }
    }
}

#[async_trait]
impl IdentityResolver for FakeIdentity {
    async fn validate_token(&self, token: &str) -> Result<Identity, EngineError> {
        let (role, id) = token
            .split_once(':')
            .ok_or_else(|| EngineError::Unauthorized("invalid token".into()))?;
        let role: Role = role
            .parse()
            .map_err(|_| EngineError::Unauthorized("invalid user role".into()))?;
        Ok(Identity::new(id, format!("{id}-name"), role))
    }

    async fn search(&self, kind: DirectoryKind, query: &str) -> Result<DirectoryPage, EngineError> {
        let pool = match kind {
            DirectoryKind::Students => &self.students,
            DirectoryKind::Teachers => &self.teachers,
        };
        let needle = query.to_lowercase();
        let users: Vec<DirectoryUser> = pool
            .iter()
            .filter(|u| u.username.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        Ok(DirectoryPage {
            total: users.len() as u64,
            users,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Insert an active, un-indexed dataset straight into the store.
pub async fn insert_dataset(store: &Store, owner: &str) -> Dataset {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let dataset = Dataset {
        id,
        owner_id: UserId::from(owner),
        author: format!("{owner}-name"),
        title: "Fixture".to_string(),
        blob_path: format!("students/{owner}/{id}/current.md"),
        lifecycle: Lifecycle::Active,
        created_at: now,
        updated_at: now,
        indexed_at: None,
        topic_id: None,
        assignment_id: None,
    };
    let row = dataset.clone();
    store.call(move |db| db.insert_dataset(&row)).await.unwrap();
    dataset
}

pub struct Harness {
    pub store: Store,
    pub blobs: Arc<MemoryBlobStore>,
    pub indexing: Arc<FakeIndexing>,
    pub identity: Arc<FakeIdentity>,
    pub indexer: Indexer,
    pub datasets: DatasetEngine,
    pub topics: TopicEngine,
    pub permissions: PermissionEngine,
    pub chats: ChatEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(DatasetLimits {
            max_datasets_per_user: 10,
            max_file_size: 1024 * 1024,
        })
    }

    pub fn with_limits(limits: DatasetLimits) -> Self {
        let store = Store::new(Database::open_in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let indexing = Arc::new(FakeIndexing::new());
        let identity = Arc::new(FakeIdentity::new());
        let indexer = Indexer::new(indexing.clone(), store.clone());

        let datasets = DatasetEngine::new(
            store.clone(),
            blobs.clone(),
            indexing.clone(),
            indexer.clone(),
            limits,
        );
        let topics = TopicEngine::new(store.clone(), identity.clone());
        let permissions = PermissionEngine::new(store.clone());
        let chats = ChatEngine::new(store.clone());

        Self {
            store,
            blobs,
            indexing,
            identity,
            indexer,
            datasets,
            topics,
            permissions,
            chats,
        }
    }

    pub fn student(&self, id: &str) -> Identity {
        Identity::new(id, format!("{id}-name"), Role::Student)
    }

    pub fn teacher(&self, id: &str) -> Identity {
        Identity::new(id, format!("{id}-name"), Role::Teacher)
    }

    pub fn admin(&self, id: &str) -> Identity {
        Identity::new(id, format!("{id}-name"), Role::Admin)
    }

    /// Create a fresh topic by `teacher` with `student` as its only assignee.
    pub async fn assign(&self, teacher: &str, student: &str) -> TopicAssignment {
        let now = Utc::now();
        let topic = Topic {
            id: Uuid::new_v4(),
            title: format!("Topic for {student}"),
            description: String::new(),
            created_by_id: UserId::from(teacher),
            created_by: format!("{teacher}-name"),
            created_at: now,
            updated_at: now,
        };
        let assignment = TopicAssignment {
            id: Uuid::new_v4(),
            topic_id: topic.id,
            student_id: UserId::from(student),
            student_name: format!("{student}-name"),
            assigned_by: topic.created_by.clone(),
            assigned_by_id: topic.created_by_id.clone(),
            assigned_at: now,
        };
        let rows = vec![assignment.clone()];
        self.store
            .call(move |db| db.create_topic(&topic, &rows))
            .await
            .unwrap();
        assignment
    }

    /// Create an active dataset owned by `student` through the engine and
    /// wait until the background indexing job has reported back.
    pub async fn settled_dataset(&self, student: &str) -> Dataset {
        let assignment = self.assign("t1", student).await;
        let mut events = self.indexer.subscribe();
        let ds = self
            .datasets
            .create(
                &self.student(student),
                crate::datasets::NewDataset {
                    title: format!("{student} essay"),
                    assignment_id: assignment.id,
                    content: b"# Essay".to_vec(),
                },
            )
            .await
            .unwrap();
        while events.recv().await.unwrap().dataset_id != ds.id {}
        ds
    }
}
