//! Async access to the synchronous SQLite handle.
//!
//! Every call runs on the blocking pool so request tasks never hold the
//! connection across an `.await`.

use std::sync::{Arc, Mutex};

use college_store::{Database, StoreError};

use crate::error::EngineError;

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| EngineError::Internal("database lock poisoned".to_string()))?;
            f(&mut guard).map_err(EngineError::from)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("database task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_maps_store_errors() {
        let store = Store::new(Database::open_in_memory().unwrap());
        let err = store
            .call(|db| db.get_dataset(uuid::Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let count = store
            .call(|db| db.count_datasets_for_owner(&"s1".into()))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
