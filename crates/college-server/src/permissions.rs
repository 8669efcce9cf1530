//! Bookkeeping for per-dataset transcript grants.

use chrono::Utc;
use college_shared::{AccessRequest, Identity, Page, PageRequest, UserId};
use college_store::DatasetPermission;
use tracing::info;
use uuid::Uuid;

use crate::error::{authorize, EngineError, NotFoundExt};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct NewGrant {
    pub teacher_id: UserId,
    pub teacher_name: String,
}

#[derive(Clone)]
pub struct PermissionEngine {
    store: Store,
}

impl PermissionEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Gate on the admin check, then make sure the dataset is still active.
    async fn check(&self, actor: &Identity, dataset_id: Uuid) -> Result<(), EngineError> {
        authorize(actor, &AccessRequest::ManagePermissions)?;
        self.store
            .call(move |db| db.get_dataset(dataset_id))
            .await
            .or_not_found("dataset")?;
        Ok(())
    }

    pub async fn grant(
        &self,
        actor: &Identity,
        dataset_id: Uuid,
        req: NewGrant,
    ) -> Result<DatasetPermission, EngineError> {
        self.check(actor, dataset_id).await?;

        if req.teacher_id.as_str().trim().is_empty() {
            return Err(EngineError::ValidationFailed("teacher_id is required".to_string()));
        }

        let perm = DatasetPermission {
            id: Uuid::new_v4(),
            dataset_id,
            teacher_id: req.teacher_id,
            teacher_name: req.teacher_name,
            granted_by: actor.username.clone(),
            granted_at: Utc::now(),
        };

        let row = perm.clone();
        self.store
            .call(move |db| db.insert_permission(&row))
            .await
            .map_err(|e| match e {
                EngineError::PreconditionFailed(_) => {
                    EngineError::PreconditionFailed("permission already exists".to_string())
                }
                other => other,
            })?;

        info!(
            %dataset_id,
            teacher = %perm.teacher_id,
            granted_by = %actor.id,
            "permission granted"
        );
        Ok(perm)
    }

    pub async fn revoke(
        &self,
        actor: &Identity,
        dataset_id: Uuid,
        teacher_id: UserId,
    ) -> Result<(), EngineError> {
        self.check(actor, dataset_id).await?;

        let teacher = teacher_id.clone();
        let removed = self
            .store
            .call(move |db| db.revoke_permission(dataset_id, &teacher))
            .await?;
        if !removed {
            return Err(EngineError::NotFound("permission not found".to_string()));
        }

        info!(%dataset_id, teacher = %teacher_id, revoked_by = %actor.id, "permission revoked");
        Ok(())
    }

    pub async fn list_for_dataset(
        &self,
        actor: &Identity,
        dataset_id: Uuid,
    ) -> Result<Vec<DatasetPermission>, EngineError> {
        self.check(actor, dataset_id).await?;
        self.store
            .call(move |db| db.permissions_for_dataset(dataset_id))
            .await
    }

    pub async fn list_all(
        &self,
        actor: &Identity,
        page: PageRequest,
    ) -> Result<Page<DatasetPermission>, EngineError> {
        authorize(actor, &AccessRequest::ManagePermissions)?;
        let (offset, limit) = (page.offset(), page.limit);
        let (items, total) = self
            .store
            .call(move |db| db.list_permissions(offset, limit))
            .await?;
        Ok(Page::new(items, total, page))
    }
}
