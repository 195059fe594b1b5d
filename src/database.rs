use serde::{de::DeserializeOwned, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{fs, sync::RwLock, time};
use tracing::{debug, error};

const SAVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Codec(String),
    #[error("Database error: {0}")]
    Custom(String),
}

#[derive(Debug)]
struct DatabaseInner<T> {
    data: T,
    path: PathBuf,
}

/// File-backed value of `T`, encoded with bincode and rewritten whole on every change.
///
/// Writers are serialized by the inner lock: a `transaction` holds it for its full
/// read-modify-write-save sequence, so concurrent commands and ticks never interleave.
#[derive(Clone, Debug)]
pub struct Database<T: Serialize + DeserializeOwned + Default + Send + Sync + Clone + 'static> {
    inner: Arc<RwLock<DatabaseInner<T>>>,
}

impl<T: Serialize + DeserializeOwned + Default + Send + Sync + Clone + 'static> Database<T> {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    error!("Failed to create database directory: {}", e);
                    DbError::Io(e)
                })?;
            }
        }

        let data = match fs::read(&path).await {
            Ok(bytes) => match bincode::deserialize(&bytes) {
                Ok(data) => data,
                Err(e) => {
                    error!("Failed to deserialize database {}: {}", path.display(), e);
                    T::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No database at {}, starting empty", path.display());
                T::default()
            }
            Err(e) => {
                error!("Failed to read database {}: {}", path.display(), e);
                T::default()
            }
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(DatabaseInner { data, path })),
        })
    }

    async fn save(path: &Path, data: &T) -> Result<(), DbError> {
        let bytes = bincode::serialize(data).map_err(|e| DbError::Codec(e.to_string()))?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write = async {
            fs::write(&tmp, bytes).await?;
            fs::rename(&tmp, path).await
        };

        match time::timeout(SAVE_TIMEOUT, write).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                error!("Database save operation timed out");
                Err(DbError::Custom("Save operation timed out".into()))
            }
        }
    }

    pub async fn get_data(&self) -> T {
        let guard = self.inner.read().await;
        guard.data.clone()
    }

    /// Runs `f` against a copy of the data under the write lock.
    ///
    /// On `Ok` the copy replaces the in-memory value and is written to disk. A failed
    /// write is logged and not returned: memory stays authoritative and the next
    /// successful save catches the file up. On `Err` nothing is changed or written.
    pub async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
    {
        let mut guard = self.inner.write().await;
        let mut data = guard.data.clone();
        let result = f(&mut data)?;

        guard.data = data;
        if let Err(e) = Self::save(&guard.path, &guard.data).await {
            error!("Failed to save database {}: {}", guard.path.display(), e);
        }

        Ok(result)
    }

    /// Writes the current in-memory value to disk.
    pub async fn flush(&self) -> Result<(), DbError> {
        let guard = self.inner.read().await;
        Self::save(&guard.path, &guard.data).await
    }

    pub async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let guard = self.inner.read().await;
        f(&guard.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        values: Vec<u32>,
    }

    #[tokio::test]
    async fn missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let db = Database::<Counter>::new(dir.path().join("nested/counter.db"))
            .await
            .unwrap();
        assert_eq!(db.get_data().await, Counter::default());
    }

    #[tokio::test]
    async fn transaction_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.db");

        let db = Database::<Counter>::new(&path).await.unwrap();
        db.transaction(|c| {
            c.values.push(7);
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();
        assert!(path.exists());

        let reopened = Database::<Counter>::new(&path).await.unwrap();
        assert_eq!(reopened.get_data().await.values, vec![7]);
    }

    #[tokio::test]
    async fn failed_transaction_leaves_memory_and_disk_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.db");

        let db = Database::<Counter>::new(&path).await.unwrap();
        db.transaction(|c| {
            c.values.push(1);
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();
        let before = std::fs::read(&path).unwrap();

        let result: Result<(), String> = db
            .transaction(|c| {
                c.values.push(2);
                Err("nope".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(db.get_data().await.values, vec![1]);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn corrupt_file_loads_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.db");
        std::fs::write(&path, b"\xff\xff\xff\xff\xff\xff\xff\xff\xff").unwrap();

        let db = Database::<Counter>::new(&path).await.unwrap();
        assert_eq!(db.get_data().await, Counter::default());
    }

    #[tokio::test]
    async fn unwritable_path_keeps_memory_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counter.db");
        let db = Database::<Counter>::new(&path).await.unwrap();

        // A directory where the file should go makes every rename fail.
        std::fs::create_dir(&path).unwrap();

        db.transaction(|c| {
            c.values.push(3);
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();
        assert_eq!(db.get_data().await.values, vec![3]);
        assert!(db.flush().await.is_err());
    }
}
