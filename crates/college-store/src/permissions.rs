//! CRUD operations for [`DatasetPermission`] grants.

use college_shared::UserId;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::DatasetPermission;
use crate::row::{collect, ts, ts_at, uuid_at};

const PERMISSION_COLUMNS: &str =
    "id, dataset_id, teacher_id, teacher_name, granted_by, granted_at";

impl Database {
    /// Insert a grant. A second grant for the same `(dataset, teacher)` pair
    /// fails with [`crate::StoreError::Conflict`].
    pub fn insert_permission(&self, perm: &DatasetPermission) -> Result<()> {
        self.conn().execute(
            "INSERT INTO dataset_permissions
                 (id, dataset_id, teacher_id, teacher_name, granted_by, granted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                perm.id.to_string(),
                perm.dataset_id.to_string(),
                perm.teacher_id.as_str(),
                perm.teacher_name,
                perm.granted_by,
                ts(&perm.granted_at),
            ],
        )?;
        tracing::debug!(
            dataset_id = %perm.dataset_id,
            teacher = %perm.teacher_id,
            "permission granted"
        );
        Ok(())
    }

    /// Remove a grant. Returns `true` if one existed.
    pub fn revoke_permission(&self, dataset_id: Uuid, teacher_id: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM dataset_permissions WHERE dataset_id = ?1 AND teacher_id = ?2",
            params![dataset_id.to_string(), teacher_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn has_permission(&self, dataset_id: Uuid, teacher_id: &UserId) -> Result<bool> {
        Ok(self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM dataset_permissions WHERE dataset_id = ?1 AND teacher_id = ?2
             )",
            params![dataset_id.to_string(), teacher_id.as_str()],
            |row| row.get(0),
        )?)
    }

    pub fn permissions_for_dataset(&self, dataset_id: Uuid) -> Result<Vec<DatasetPermission>> {
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM dataset_permissions
             WHERE dataset_id = ?1
             ORDER BY granted_at DESC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![dataset_id.to_string()], row_to_permission)?;
        Ok(collect(rows)?)
    }

    /// Every grant in the system, newest first, with the unpaged total.
    pub fn list_permissions(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<DatasetPermission>, u64)> {
        let total: u64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM dataset_permissions", [], |row| row.get(0))?;

        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM dataset_permissions
             ORDER BY granted_at DESC
             LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![limit, offset], row_to_permission)?;
        Ok((collect(rows)?, total))
    }
}

fn row_to_permission(row: &rusqlite::Row<'_>) -> rusqlite::Result<DatasetPermission> {
    Ok(DatasetPermission {
        id: uuid_at(row, 0)?,
        dataset_id: uuid_at(row, 1)?,
        teacher_id: UserId(row.get(2)?),
        teacher_name: row.get(3)?,
        granted_by: row.get(4)?,
        granted_at: ts_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::test_support::{dataset_for, now};

    fn grant(dataset_id: Uuid, teacher: &str) -> DatasetPermission {
        DatasetPermission {
            id: Uuid::new_v4(),
            dataset_id,
            teacher_id: UserId::from(teacher),
            teacher_name: teacher.to_string(),
            granted_by: "admin".into(),
            granted_at: now(),
        }
    }

    #[test]
    fn grant_check_revoke() {
        let db = Database::open_in_memory().unwrap();
        let ds = dataset_for("s1", "Essay");
        db.insert_dataset(&ds).unwrap();

        let t1 = UserId::from("t1");
        assert!(!db.has_permission(ds.id, &t1).unwrap());

        let perm = grant(ds.id, "t1");
        db.insert_permission(&perm).unwrap();
        assert!(db.has_permission(ds.id, &t1).unwrap());
        assert_eq!(db.permissions_for_dataset(ds.id).unwrap(), vec![perm]);

        assert!(db.revoke_permission(ds.id, &t1).unwrap());
        assert!(!db.has_permission(ds.id, &t1).unwrap());
        assert!(!db.revoke_permission(ds.id, &t1).unwrap());
    }

    #[test]
    fn duplicate_grant_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let ds = dataset_for("s1", "Essay");
        db.insert_dataset(&ds).unwrap();

        db.insert_permission(&grant(ds.id, "t1")).unwrap();
        assert!(matches!(
            db.insert_permission(&grant(ds.id, "t1")),
            Err(StoreError::Conflict)
        ));
    }

    #[test]
    fn list_all_is_paged() {
        let db = Database::open_in_memory().unwrap();
        let ds = dataset_for("s1", "Essay");
        db.insert_dataset(&ds).unwrap();
        for t in ["t1", "t2", "t3"] {
            db.insert_permission(&grant(ds.id, t)).unwrap();
        }

        let (page, total) = db.list_permissions(0, 2).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
    }
}
