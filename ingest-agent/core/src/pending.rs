use std::{fmt, marker::PhantomData};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A lab confirmation upload that has been requested but not yet completed.
///
/// Two requests are the same request if their identifiers match, regardless of their
/// dates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUploadRequest {
    pub identifier: String,
    pub creation_date: DateTime<Utc>,
    expiry_date: DateTime<Utc>,
}

impl PendingUploadRequest {
    pub fn new(
        identifier: impl Into<String>,
        creation_date: DateTime<Utc>,
        expiry_date: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            creation_date,
            expiry_date,
        }
    }

    /// A request created at `now` that expires after `valid_for`.
    pub fn valid_for(
        identifier: impl Into<String>,
        now: DateTime<Utc>,
        valid_for: Duration,
    ) -> Self {
        Self::new(identifier, now, now + valid_for)
    }

    pub fn expiry_date(&self) -> DateTime<Utc> {
        self.expiry_date
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date < now
    }
}

impl PartialEq for PendingUploadRequest {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for PendingUploadRequest {}

/// A typed, namespaced key into the storage controller.
pub struct StorageKey<T> {
    pub namespace: &'static str,
    pub name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> StorageKey<T> {
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self {
            namespace,
            name,
            _value: PhantomData,
        }
    }

    /// The file name the value is persisted under.
    pub fn file_name(&self) -> String {
        format!("{}.{}.json", self.namespace, self.name)
    }
}

impl<T> Clone for StorageKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StorageKey<T> {}

impl<T> fmt::Debug for StorageKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub const PENDING_LAB_UPLOAD_REQUESTS: StorageKey<Vec<PendingUploadRequest>> =
    StorageKey::new("exposureData", "pendingLabUploadRequests");
