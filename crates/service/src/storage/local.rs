use std::{collections::HashMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::RwLock};

use crate::errors::StoreError;

use super::{advance, fit_row, stale_reference, TabularBackend, FIRST_DATA_ROW};

/// One table: header row, data rows and id counters keyed by scope.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
struct TableData {
    #[serde(default)]
    header: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
    #[serde(default)]
    counters: HashMap<String, u64>,
}

impl TableData {
    fn slot(&self, position: usize) -> Option<usize> {
        position.checked_sub(FIRST_DATA_ROW).filter(|i| *i < self.rows.len())
    }

    /// Resolve `position` to a row index holding `expected_id`.
    fn checked_slot(&self, position: usize, expected_id: &str) -> Result<usize, StoreError> {
        let Some(i) = self.slot(position) else {
            return Err(stale_reference(position, expected_id, None));
        };
        let found = self.rows[i].first().map(String::as_str).unwrap_or_default();
        if found.trim() != expected_id.trim() {
            return Err(stale_reference(position, expected_id, Some(found)));
        }
        Ok(i)
    }
}

/// Local tabular backend.
///
/// Keeps every table in memory and, when opened with a path, persists the
/// whole document as one JSON file after each mutation. Mutations run under a
/// single write lock, so CAS checks and counter updates are atomic.
#[derive(Clone)]
pub struct LocalBackend {
    inner: Arc<RwLock<HashMap<String, TableData>>>,
    file_path: Option<PathBuf>,
}

impl LocalBackend {
    /// Volatile backend for tests and throwaway deployments.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self { inner: Arc::new(RwLock::new(HashMap::new())), file_path: None })
    }

    /// Open a file-backed document. Creates the file with no tables if missing.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Arc<Self>, StoreError> {
        let file_path = path.into();
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await.ok();
        }

        let tables: HashMap<String, TableData> = match fs::read(&file_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Backend(format!("corrupt document {}: {e}", file_path.display())))?,
            Err(_) => {
                let empty: HashMap<String, TableData> = HashMap::new();
                fs::write(&file_path, serde_json::to_vec(&empty)?)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                empty
            }
        };

        Ok(Arc::new(Self { inner: Arc::new(RwLock::new(tables)), file_path: Some(file_path) }))
    }

    async fn save(&self, tables: &HashMap<String, TableData>) -> Result<(), StoreError> {
        let Some(path) = &self.file_path else { return Ok(()) };
        let data = serde_json::to_vec(tables)?;
        fs::write(path, data).await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Apply a mutation to a copy of one table and persist while still
    /// holding the lock. The served state only changes once the save succeeds.
    async fn mutate<T, F>(&self, table: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut TableData) -> Result<T, StoreError>,
    {
        let mut tables = self.inner.write().await;
        let slot = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::Backend(format!("table '{table}' does not exist")))?;
        let mut next = slot.clone();
        let out = f(&mut next)?;
        let previous = std::mem::replace(slot, next);
        if let Err(e) = self.save(&tables).await {
            tables.insert(table.to_string(), previous);
            return Err(e);
        }
        Ok(out)
    }

    async fn read<T, F>(&self, table: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&TableData) -> T,
    {
        let tables = self.inner.read().await;
        tables
            .get(table)
            .map(f)
            .ok_or_else(|| StoreError::Backend(format!("table '{table}' does not exist")))
    }
}

#[async_trait]
impl TabularBackend for LocalBackend {
    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.write().await;
        if tables.contains_key(table) {
            return Ok(());
        }
        tables.insert(table.to_string(), TableData::default());
        if let Err(e) = self.save(&tables).await {
            tables.remove(table);
            return Err(e);
        }
        Ok(())
    }

    async fn read_header(&self, table: &str) -> Result<Vec<String>, StoreError> {
        self.read(table, |t| t.header.clone()).await
    }

    async fn write_header(&self, table: &str, header: &[String]) -> Result<(), StoreError> {
        self.mutate(table, |t| {
            t.header = header.to_vec();
            Ok(())
        })
        .await
    }

    async fn clear(&self, table: &str) -> Result<(), StoreError> {
        // 计数器保留：清表后也不复用已分配的 ID
        self.mutate(table, |t| {
            t.header.clear();
            t.rows.clear();
            Ok(())
        })
        .await
    }

    async fn read_rows(&self, table: &str, width: usize) -> Result<Vec<Vec<String>>, StoreError> {
        self.read(table, |t| t.rows.iter().map(|r| fit_row(r.clone(), width)).collect()).await
    }

    async fn append_row(&self, table: &str, row: Vec<String>) -> Result<(), StoreError> {
        self.mutate(table, |t| {
            t.rows.push(row);
            Ok(())
        })
        .await
    }

    async fn replace_row(&self, table: &str, position: usize, expected_id: &str, row: Vec<String>) -> Result<(), StoreError> {
        self.mutate(table, |t| {
            let i = t.checked_slot(position, expected_id)?;
            t.rows[i] = row;
            Ok(())
        })
        .await
    }

    async fn delete_row(&self, table: &str, position: usize, expected_id: &str) -> Result<(), StoreError> {
        self.mutate(table, |t| {
            let i = t.checked_slot(position, expected_id)?;
            t.rows.remove(i);
            Ok(())
        })
        .await
    }

    async fn advance_counter(&self, table: &str, scope: &str, candidate: u64) -> Result<u64, StoreError> {
        self.mutate(table, |t| {
            let next = advance(t.counters.get(scope).copied(), candidate)?;
            t.counters.insert(scope.to_string(), next);
            Ok(next)
        })
        .await
    }
}
