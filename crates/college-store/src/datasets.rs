//! CRUD operations for [`Dataset`] records.
//!
//! All readers filter on `status = 'active'`; soft-deleted rows stay in the
//! table but are never returned.

use chrono::{DateTime, Utc};
use college_shared::UserId;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Dataset, Lifecycle};
use crate::row::{collect, opt_ts_at, opt_uuid_at, ts, ts_at, uuid_at};

const DATASET_COLUMNS: &str = "id, user_id, author, title, file_path, status, created_at, \
                               updated_at, indexed_at, topic_id, assignment_id";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn insert_dataset(&self, dataset: &Dataset) -> Result<()> {
        self.conn().execute(
            "INSERT INTO datasets (id, user_id, author, title, file_path, status, created_at,
                                   updated_at, indexed_at, topic_id, assignment_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                dataset.id.to_string(),
                dataset.owner_id.as_str(),
                dataset.author,
                dataset.title,
                dataset.blob_path,
                dataset.lifecycle.as_str(),
                ts(&dataset.created_at),
                ts(&dataset.updated_at),
                dataset.indexed_at.as_ref().map(ts),
                dataset.topic_id.map(|id| id.to_string()),
                dataset.assignment_id.map(|id| id.to_string()),
            ],
        )?;
        tracing::debug!(
            dataset_id = %dataset.id,
            owner = %dataset.owner_id,
            "dataset row inserted"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch an active dataset. Soft-deleted rows report `NotFound`.
    pub fn get_dataset(&self, id: Uuid) -> Result<Dataset> {
        let sql = format!(
            "SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?1 AND status = 'active'"
        );
        Ok(self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_dataset)?)
    }

    /// Fetch a dataset row regardless of its lifecycle state.
    #[cfg(test)]
    pub(crate) fn get_dataset_including_deleted(&self, id: Uuid) -> Result<Dataset> {
        let sql = format!("SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id.to_string()], row_to_dataset)?)
    }

    /// All active datasets, newest first, with the unpaged total.
    pub fn list_datasets(&self, offset: u32, limit: u32) -> Result<(Vec<Dataset>, u64)> {
        let total: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM datasets WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {DATASET_COLUMNS} FROM datasets
             WHERE status = 'active'
             ORDER BY created_at DESC
             LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![limit, offset], row_to_dataset)?;
        Ok((collect(rows)?, total))
    }

    /// Active datasets owned by `owner`, newest first, with the unpaged total.
    pub fn list_datasets_for_owner(
        &self,
        owner: &UserId,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<Dataset>, u64)> {
        let total = self.count_datasets_for_owner(owner)?;

        let sql = format!(
            "SELECT {DATASET_COLUMNS} FROM datasets
             WHERE user_id = ?1 AND status = 'active'
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![owner.as_str(), limit, offset], row_to_dataset)?;
        Ok((collect(rows)?, total))
    }

    pub fn count_datasets_for_owner(&self, owner: &UserId) -> Result<u64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM datasets WHERE user_id = ?1 AND status = 'active'",
            params![owner.as_str()],
            |row| row.get(0),
        )?)
    }

    /// Whether `owner` has an active dataset attached to `topic_id`.
    pub fn dataset_exists_for_topic(&self, owner: &UserId, topic_id: Uuid) -> Result<bool> {
        Ok(self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM datasets
                 WHERE user_id = ?1 AND topic_id = ?2 AND status = 'active'
             )",
            params![owner.as_str(), topic_id.to_string()],
            |row| row.get(0),
        )?)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Persist the mutable metadata (title, blob path, updated_at) of an
    /// active dataset.
    pub fn update_dataset(&self, dataset: &Dataset) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE datasets SET title = ?1, file_path = ?2, updated_at = ?3
             WHERE id = ?4 AND status = 'active'",
            params![
                dataset.title,
                dataset.blob_path,
                ts(&dataset.updated_at),
                dataset.id.to_string(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Record a successful indexing run. Returns `false` if no row matched.
    pub fn mark_dataset_indexed(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let stamp = ts(&at);
        let affected = self.conn().execute(
            "UPDATE datasets SET indexed_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![stamp, id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Flip an active dataset to `Deleted` and bump its update timestamp.
    /// The row, its blob, and any remote index state are left in place.
    pub fn soft_delete_dataset(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE datasets SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'active'",
            params![Lifecycle::Deleted.as_str(), ts(&at), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_dataset(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dataset> {
    let status: String = row.get(5)?;
    let lifecycle = status.parse::<Lifecycle>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Dataset {
        id: uuid_at(row, 0)?,
        owner_id: UserId(row.get(1)?),
        author: row.get(2)?,
        title: row.get(3)?,
        blob_path: row.get(4)?,
        lifecycle,
        created_at: ts_at(row, 6)?,
        updated_at: ts_at(row, 7)?,
        indexed_at: opt_ts_at(row, 8)?,
        topic_id: opt_uuid_at(row, 9)?,
        assignment_id: opt_uuid_at(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::dataset_for;

    #[test]
    fn insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let ds = dataset_for("s1", "Essay");
        db.insert_dataset(&ds).unwrap();

        let loaded = db.get_dataset(ds.id).unwrap();
        assert_eq!(loaded, ds);
        assert!(!loaded.is_indexed());
    }

    #[test]
    fn soft_deleted_dataset_is_invisible_but_persists() {
        let db = Database::open_in_memory().unwrap();
        let ds = dataset_for("s1", "Essay");
        db.insert_dataset(&ds).unwrap();

        let later = ds.updated_at + chrono::Duration::seconds(1);
        db.soft_delete_dataset(ds.id, later).unwrap();

        assert!(matches!(db.get_dataset(ds.id), Err(StoreError::NotFound)));
        let row = db.get_dataset_including_deleted(ds.id).unwrap();
        assert_eq!(row.lifecycle, Lifecycle::Deleted);
        assert_eq!(row.updated_at, later);

        assert_eq!(db.count_datasets_for_owner(&ds.owner_id).unwrap(), 0);
        let (items, total) = db.list_datasets(0, 20).unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);

        // second delete finds nothing active
        assert!(matches!(
            db.soft_delete_dataset(ds.id, Utc::now()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_is_paged_and_scoped_to_owner() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..3 {
            db.insert_dataset(&dataset_for("s1", &format!("mine {i}"))).unwrap();
        }
        db.insert_dataset(&dataset_for("s2", "theirs")).unwrap();

        let (page, total) = db.list_datasets_for_owner(&UserId::from("s1"), 0, 2).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|d| d.owner_id.as_str() == "s1"));

        let (page, _) = db.list_datasets_for_owner(&UserId::from("s1"), 2, 2).unwrap();
        assert_eq!(page.len(), 1);

        let (all, total) = db.list_datasets(0, 100).unwrap();
        assert_eq!(total, 4);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn mark_indexed_sets_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let ds = dataset_for("s1", "Essay");
        db.insert_dataset(&ds).unwrap();

        let now = Utc::now();
        assert!(db.mark_dataset_indexed(ds.id, now).unwrap());
        assert!(db.get_dataset(ds.id).unwrap().is_indexed());
        assert!(!db.mark_dataset_indexed(Uuid::new_v4(), now).unwrap());
    }

    #[test]
    fn update_on_deleted_dataset_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let mut ds = dataset_for("s1", "Essay");
        db.insert_dataset(&ds).unwrap();
        db.soft_delete_dataset(ds.id, Utc::now()).unwrap();

        ds.title = "Renamed".into();
        assert!(matches!(db.update_dataset(&ds), Err(StoreError::NotFound)));
    }
}
