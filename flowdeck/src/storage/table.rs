//! JSON-file backed record tables

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::filesys::file::File;

/// A row stored in a [`Table`]
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> Uuid;
}

/// In-memory rows mirrored to one JSON array file.
///
/// Reads never touch the disk. Every mutation rewrites the file atomically
/// while holding the write gate, so the file always reflects the latest
/// committed mutation.
pub struct Table<T: Record> {
    name: &'static str,
    file: File,
    rows: RwLock<BTreeMap<Uuid, T>>,
    write_gate: Mutex<()>,
}

impl<T: Record> Table<T> {
    /// Load the table from `file`, starting empty when it does not exist
    pub async fn open(name: &'static str, file: File) -> Result<Self, EngineError> {
        let rows: Vec<T> = file.read_json_or_default().await?;
        Ok(Self {
            name,
            file,
            rows: RwLock::new(rows.into_iter().map(|row| (row.id(), row)).collect()),
            write_gate: Mutex::new(()),
        })
    }

    pub fn get(&self, id: Uuid) -> Option<T> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.get(&id).cloned()
    }

    /// Get a row or fail with `NotFound`
    pub fn require(&self, id: Uuid) -> Result<T, EngineError> {
        self.get(id)
            .ok_or_else(|| EngineError::NotFound(format!("{} {}", self.name, id)))
    }

    pub fn list(&self) -> Vec<T> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.values().cloned().collect()
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<T>
    where
        P: Fn(&T) -> bool,
    {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.values().filter(|row| predicate(row)).cloned().collect()
    }

    pub fn find<P>(&self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.values().find(|row| predicate(row)).cloned()
    }

    /// Insert or replace a row
    pub async fn upsert(&self, row: T) -> Result<T, EngineError> {
        let _gate = self.write_gate.lock().await;
        {
            let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
            rows.insert(row.id(), row.clone());
        }
        self.persist().await?;
        Ok(row)
    }

    /// Apply `change` to a copy of the row and commit it only if `change` succeeds
    pub async fn update<F>(&self, id: Uuid, change: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut T) -> Result<(), EngineError>,
    {
        let _gate = self.write_gate.lock().await;
        let updated = {
            let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
            let row = rows
                .get(&id)
                .ok_or_else(|| EngineError::NotFound(format!("{} {}", self.name, id)))?;
            let mut updated = row.clone();
            change(&mut updated)?;
            rows.insert(id, updated.clone());
            updated
        };
        self.persist().await?;
        Ok(updated)
    }

    pub async fn remove(&self, id: Uuid) -> Result<Option<T>, EngineError> {
        let _gate = self.write_gate.lock().await;
        let removed = {
            let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
            rows.remove(&id)
        };
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn persist(&self) -> Result<(), EngineError> {
        let snapshot: Vec<T> = self.list();
        self.file.write_json(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: Uuid,
        value: u32,
    }

    impl Record for Row {
        fn id(&self) -> Uuid {
            self.id
        }
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        let row = Row { id: Uuid::new_v4(), value: 1 };

        let table = Table::<Row>::open("row", File::new(&path)).await.unwrap();
        table.upsert(row.clone()).await.unwrap();
        table.update(row.id, |r| { r.value = 2; Ok(()) }).await.unwrap();

        let reopened = Table::<Row>::open("row", File::new(&path)).await.unwrap();
        assert_eq!(reopened.get(row.id).unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_row_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::<Row>::open("row", File::new(dir.path().join("rows.json")))
            .await
            .unwrap();
        let row = table.upsert(Row { id: Uuid::new_v4(), value: 7 }).await.unwrap();

        let result = table
            .update(row.id, |r| {
                r.value = 99;
                Err(EngineError::ValidationError("nope".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(table.get(row.id).unwrap().value, 7);
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::<Row>::open("row", File::new(dir.path().join("rows.json")))
            .await
            .unwrap();
        let err = table.update(Uuid::new_v4(), |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
