//! File backed key/value storage with an exclusive access discipline.
//!
//! Every key is persisted as its own JSON file below the storage root. Single reads
//! and writes are atomic, but a read-modify-write sequence is only safe inside
//! [`StorageController::with_exclusive_access`].

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use en_ingest_agent_core::{PENDING_LAB_UPLOAD_REQUESTS, PendingUploadRequest, StorageKey};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::util::write_atomically;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed creating storage directory `{}`", .0.display())]
    CreateRoot(PathBuf, #[source] io::Error),
    #[error("failed serializing value for `{key}`")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed writing `{key}` to disk")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed removing `{key}` from disk")]
    Remove {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Handle to the store. Clones share the same exclusive access lock.
#[derive(Debug, Clone)]
pub struct StorageController {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    exclusive: Mutex<()>,
}

impl StorageController {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|err| StorageError::CreateRoot(root.clone(), err))?;
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                exclusive: Mutex::new(()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn path_for<T>(&self, key: &StorageKey<T>) -> PathBuf {
        self.inner.root.join(key.file_name())
    }

    /// Reads the value stored under `key`.
    ///
    /// A missing value and a value that fails to deserialize both read as `None`, the
    /// latter is logged.
    pub fn retrieve<T: DeserializeOwned>(&self, key: &StorageKey<T>) -> Option<T> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                error!(?key, path = %path.display(), %err, "failed reading stored value");
                return None;
            }
        };
        serde_json::from_slice(&bytes)
            .inspect_err(|err| {
                error!(?key, %err, "stored value is corrupt, treating it as absent");
            })
            .ok()
    }

    /// Atomically replaces the value stored under `key`.
    pub fn store<T: Serialize>(
        &self,
        key: &StorageKey<T>,
        value: &T,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_vec(value).map_err(|source| StorageError::Serialize {
            key: format!("{key:?}"),
            source,
        })?;
        write_atomically(&self.inner.root, &self.path_for(key), &json).map_err(
            |source| StorageError::Write {
                key: format!("{key:?}"),
                source,
            },
        )?;
        debug!(?key, bytes = json.len(), "stored value");

        Ok(())
    }

    /// Removes the value stored under `key`. Removing an absent value succeeds.
    pub fn remove<T>(&self, key: &StorageKey<T>) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Remove {
                key: format!("{key:?}"),
                source,
            }),
        }
    }

    /// Runs `body` while holding the store-wide exclusive lock.
    ///
    /// Callers are queued in the order they asked for access. The lock is released
    /// when `body` returns, whatever it returns, and when it panics.
    ///
    /// The lock is not re-entrant: calling this again from within `body` (e.g. via
    /// `block_on`) deadlocks.
    pub async fn with_exclusive_access<R>(
        &self,
        body: impl FnOnce(&StorageController) -> R,
    ) -> R {
        let _guard = self.inner.exclusive.lock().await;
        body(self)
    }

    /// Adds `request` to the pending lab upload requests. Returns `false`, leaving the
    /// stored request untouched, if one with the same identifier is already pending:
    /// an expiry date is fixed when the request is first scheduled.
    pub async fn schedule_pending_upload(
        &self,
        request: PendingUploadRequest,
    ) -> Result<bool, StorageError> {
        self.with_exclusive_access(|storage| {
            let mut pending = storage
                .retrieve(&PENDING_LAB_UPLOAD_REQUESTS)
                .unwrap_or_default();
            if let Some(existing) = pending.iter().find(|existing| **existing == request) {
                warn!(
                    identifier = %existing.identifier,
                    expiry_date = %existing.expiry_date(),
                    "upload already pending, keeping its expiry date"
                );
                return Ok(false);
            }
            info!(
                identifier = %request.identifier,
                expiry_date = %request.expiry_date(),
                "scheduling pending upload"
            );
            pending.push(request);
            storage.store(&PENDING_LAB_UPLOAD_REQUESTS, &pending)?;
            Ok(true)
        })
        .await
    }

    /// Removes the pending lab upload request with `identifier`. Returns whether one
    /// was pending.
    pub async fn complete_pending_upload(
        &self,
        identifier: &str,
    ) -> Result<bool, StorageError> {
        self.with_exclusive_access(|storage| {
            let mut pending = storage
                .retrieve(&PENDING_LAB_UPLOAD_REQUESTS)
                .unwrap_or_default();
            let before = pending.len();
            pending.retain(|request| request.identifier != identifier);
            if pending.len() == before {
                return Ok(false);
            }
            info!(identifier, "completed pending upload");
            storage.store(&PENDING_LAB_UPLOAD_REQUESTS, &pending)?;
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Value {
        n: u32,
    }

    const KEY: StorageKey<Value> = StorageKey::new("test", "value");

    #[test]
    fn store_retrieve_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageController::new(dir.path()).unwrap();

        assert_eq!(storage.retrieve(&KEY), None);
        storage.store(&KEY, &Value { n: 1 }).unwrap();
        storage.store(&KEY, &Value { n: 2 }).unwrap();
        assert_eq!(storage.retrieve(&KEY), Some(Value { n: 2 }));
        assert!(dir.path().join("test.value.json").exists());

        storage.remove(&KEY).unwrap();
        assert_eq!(storage.retrieve(&KEY), None);
        storage.remove(&KEY).unwrap();
    }

    #[test]
    fn corrupt_value_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageController::new(dir.path()).unwrap();
        fs::write(dir.path().join(KEY.file_name()), b"{not json").unwrap();

        assert_eq!(storage.retrieve(&KEY), None);
    }

    #[test]
    fn store_fails_when_root_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let storage = StorageController::new(&root).unwrap();
        fs::remove_dir(&root).unwrap();

        let err = storage.store(&KEY, &Value { n: 1 }).unwrap_err();
        assert!(matches!(err, StorageError::Write { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn schedule_and_complete_pending_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageController::new(dir.path()).unwrap();
        let now = Utc::now();

        for id in ["A", "B"] {
            let request = PendingUploadRequest::valid_for(id, now, Duration::days(1));
            assert!(storage.schedule_pending_upload(request).await.unwrap());
        }

        let pending = storage.retrieve(&PENDING_LAB_UPLOAD_REQUESTS).unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, ["A", "B"]);

        assert!(storage.complete_pending_upload("A").await.unwrap());
        assert!(!storage.complete_pending_upload("A").await.unwrap());
        let pending = storage.retrieve(&PENDING_LAB_UPLOAD_REQUESTS).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn rescheduling_keeps_the_original_expiry_date() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageController::new(dir.path()).unwrap();
        let created = Utc::now() - Duration::days(10);
        let original = PendingUploadRequest::valid_for("A", created, Duration::days(1));
        let expiry = original.expiry_date();
        assert!(storage.schedule_pending_upload(original).await.unwrap());

        let extended = PendingUploadRequest::valid_for("A", Utc::now(), Duration::days(30));
        let scheduled = storage.schedule_pending_upload(extended).await.unwrap();

        assert!(!scheduled);
        let pending = storage.retrieve(&PENDING_LAB_UPLOAD_REQUESTS).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].expiry_date(), expiry);
        assert_eq!(pending[0].creation_date, created);
    }

    #[tokio::test]
    async fn lock_is_released_after_a_panicking_body() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageController::new(dir.path()).unwrap();

        let panicking = storage.clone();
        let result = tokio::spawn(async move {
            panicking
                .with_exclusive_access::<()>(|_| panic!("body panicked"))
                .await
        })
        .await;
        assert!(result.is_err());

        let n = storage.with_exclusive_access(|_| 42).await;
        assert_eq!(n, 42);
    }
}
