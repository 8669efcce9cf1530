//! Dataset lifecycle: create, read, list, update, soft-delete, ask, reindex.
//!
//! Every operation loads the dataset fresh, asks the evaluator, and only
//! then touches the blob store or the indexing service.

use std::sync::Arc;

use chrono::Utc;
use college_shared::constants::DATASET_CONTENT_TYPE;
use college_shared::{
    AccessRequest, AskResponse, DatasetAction, Identity, Page, PageRequest, UserId,
};
use college_store::{Dataset, Lifecycle};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::error::{authorize, EngineError, NotFoundExt};
use crate::indexer::{IndexJob, Indexer};
use crate::rag::IndexingService;
use crate::store::Store;

#[derive(Debug, Clone, Copy)]
pub struct DatasetLimits {
    pub max_datasets_per_user: u64,
    pub max_file_size: usize,
}

#[derive(Debug, Clone)]
pub struct NewDataset {
    pub title: String,
    pub assignment_id: Uuid,
    pub content: Vec<u8>,
}

/// A dataset together with its current document text.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetView {
    #[serde(flatten)]
    pub dataset: Dataset,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReindexReport {
    pub chunks: u32,
}

fn blob_path(owner: &UserId) -> String {
    format!("students/{}/{}/current.md", owner, Uuid::new_v4())
}

#[derive(Clone)]
pub struct DatasetEngine {
    store: Store,
    blobs: Arc<dyn BlobStore>,
    indexing: Arc<dyn IndexingService>,
    indexer: Indexer,
    limits: DatasetLimits,
}

impl DatasetEngine {
    pub fn new(
        store: Store,
        blobs: Arc<dyn BlobStore>,
        indexing: Arc<dyn IndexingService>,
        indexer: Indexer,
        limits: DatasetLimits,
    ) -> Self {
        Self {
            store,
            blobs,
            indexing,
            indexer,
            limits,
        }
    }

    async fn load(&self, id: Uuid) -> Result<Dataset, EngineError> {
        self.store
            .call(move |db| db.get_dataset(id))
            .await
            .or_not_found("dataset")
    }

    async fn load_authorized(
        &self,
        actor: &Identity,
        id: Uuid,
        action: DatasetAction,
    ) -> Result<Dataset, EngineError> {
        let dataset = self.load(id).await?;
        authorize(
            actor,
            &AccessRequest::Dataset {
                owner: &dataset.owner_id,
                action,
            },
        )?;
        Ok(dataset)
    }

    fn check_size(&self, len: usize) -> Result<(), EngineError> {
        if len > self.limits.max_file_size {
            return Err(EngineError::ValidationFailed(format!(
                "file size exceeds limit: {} > {} bytes",
                len, self.limits.max_file_size
            )));
        }
        Ok(())
    }

    /// Upload the document, persist the row, and hand the text to the
    /// background indexer. Returns before indexing finishes.
    pub async fn create(&self, actor: &Identity, req: NewDataset) -> Result<Dataset, EngineError> {
        let title = req.title.trim().to_string();
        if title.is_empty() {
            return Err(EngineError::ValidationFailed("title is required".to_string()));
        }

        let owner = actor.id.clone();
        let count = {
            let owner = owner.clone();
            self.store
                .call(move |db| db.count_datasets_for_owner(&owner))
                .await?
        };
        if count >= self.limits.max_datasets_per_user {
            return Err(EngineError::ValidationFailed(format!(
                "dataset limit exceeded: maximum {} datasets allowed",
                self.limits.max_datasets_per_user
            )));
        }

        self.check_size(req.content.len())?;
        let text = String::from_utf8(req.content).map_err(|_| {
            EngineError::ValidationFailed("file content must be valid UTF-8 text".to_string())
        })?;

        let assignment_id = req.assignment_id;
        let assignment = self
            .store
            .call(move |db| db.get_assignment(assignment_id))
            .await
            .or_not_found("assignment")?;
        if assignment.student_id != owner {
            return Err(EngineError::Forbidden(
                "assignment belongs to another student".to_string(),
            ));
        }

        let path = blob_path(&owner);
        self.blobs
            .upload(&path, text.as_bytes(), DATASET_CONTENT_TYPE)
            .await?;

        let now = Utc::now();
        let dataset = Dataset {
            id: Uuid::new_v4(),
            owner_id: owner,
            author: actor.username.clone(),
            title,
            blob_path: path,
            lifecycle: Lifecycle::Active,
            created_at: now,
            updated_at: now,
            indexed_at: None,
            topic_id: Some(assignment.topic_id),
            assignment_id: Some(assignment.id),
        };

        let row = dataset.clone();
        if let Err(e) = self.store.call(move |db| db.insert_dataset(&row)).await {
            // Compensate; a leftover blob is acceptable if this fails too.
            if let Err(cleanup) = self.blobs.delete(&dataset.blob_path).await {
                warn!(
                    path = %dataset.blob_path,
                    error = %cleanup,
                    "orphaned blob after failed insert"
                );
            }
            return Err(e);
        }

        info!(dataset_id = %dataset.id, user = %dataset.owner_id, "dataset created");

        self.indexer.submit(IndexJob {
            dataset_id: dataset.id,
            title: dataset.title.clone(),
            text,
        });

        Ok(dataset)
    }

    pub async fn get(&self, actor: &Identity, id: Uuid) -> Result<DatasetView, EngineError> {
        let dataset = self.load_authorized(actor, id, DatasetAction::Read).await?;
        let bytes = self.blobs.download(&dataset.blob_path).await?;
        Ok(DatasetView {
            dataset,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Staff see every active dataset; students only their own.
    pub async fn list(
        &self,
        actor: &Identity,
        page: PageRequest,
    ) -> Result<Page<Dataset>, EngineError> {
        let (offset, limit) = (page.offset(), page.limit);
        let (items, total) = if actor.role.is_staff() {
            self.store
                .call(move |db| db.list_datasets(offset, limit))
                .await?
        } else {
            let owner = actor.id.clone();
            self.store
                .call(move |db| db.list_datasets_for_owner(&owner, offset, limit))
                .await?
        };
        Ok(Page::new(items, total, page))
    }

    /// Replace the title and/or the document. Does not reindex.
    pub async fn update(
        &self,
        actor: &Identity,
        id: Uuid,
        title: Option<String>,
        content: Option<String>,
    ) -> Result<Dataset, EngineError> {
        let mut dataset = self.load_authorized(actor, id, DatasetAction::Edit).await?;

        if let Some(title) = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            dataset.title = title;
        }

        if let Some(content) = content.filter(|c| !c.is_empty()) {
            self.check_size(content.len())?;
            self.blobs
                .upload(&dataset.blob_path, content.as_bytes(), DATASET_CONTENT_TYPE)
                .await?;
        }

        dataset.updated_at = Utc::now();
        let row = dataset.clone();
        self.store
            .call(move |db| db.update_dataset(&row))
            .await
            .or_not_found("dataset")?;

        info!(dataset_id = %dataset.id, user = %actor.id, "dataset updated");
        Ok(dataset)
    }

    /// Soft delete. The blob and any remote index are left in place.
    pub async fn delete(&self, actor: &Identity, id: Uuid) -> Result<(), EngineError> {
        self.load_authorized(actor, id, DatasetAction::Delete).await?;

        let now = Utc::now();
        self.store
            .call(move |db| db.soft_delete_dataset(id, now))
            .await
            .or_not_found("dataset")?;

        info!(dataset_id = %id, user = %actor.id, "dataset soft deleted");
        Ok(())
    }

    pub async fn ask(
        &self,
        actor: &Identity,
        id: Uuid,
        question: &str,
    ) -> Result<AskResponse, EngineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(EngineError::ValidationFailed("question is required".to_string()));
        }

        let dataset = self.load_authorized(actor, id, DatasetAction::Ask).await?;
        if !dataset.is_indexed() {
            return Err(EngineError::PreconditionFailed(
                "dataset is not indexed yet, please wait".to_string(),
            ));
        }

        self.indexing.ask(dataset.id, question).await
    }

    /// Resubmit the current document synchronously.
    pub async fn reindex(&self, actor: &Identity, id: Uuid) -> Result<ReindexReport, EngineError> {
        let dataset = self.load_authorized(actor, id, DatasetAction::Reindex).await?;

        if !self.blobs.exists(&dataset.blob_path).await? {
            return Err(EngineError::NotFound("dataset content not found".to_string()));
        }
        let bytes = self.blobs.download(&dataset.blob_path).await?;
        let text = String::from_utf8_lossy(&bytes);
        let chunks = self.indexing.index(dataset.id, &dataset.title, &text).await?;

        let now = Utc::now();
        if let Err(e) = self
            .store
            .call(move |db| db.mark_dataset_indexed(id, now))
            .await
        {
            tracing::error!(dataset_id = %id, error = %e, "failed to record indexed_at");
        }

        info!(dataset_id = %id, chunks, "dataset reindexed");
        Ok(ReindexReport { chunks })
    }
}
