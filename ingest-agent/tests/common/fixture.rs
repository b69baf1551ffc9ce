#![allow(dead_code)]
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, TimeZone as _, Utc};
use en_ingest_agent::{
    notifications::{FixedClock, UserNotificationCenter},
    operations::ExpiredLabConfirmationNotification,
    storage::StorageController,
};
use en_ingest_agent_core::{PENDING_LAB_UPLOAD_REQUESTS, PendingUploadRequest};
use tempfile::TempDir;

pub const MESSAGE: &str = "Your test result could not be shared.";

/// A storage controller in a fresh directory, and the clock the operations run at.
pub struct ExpiryFixture {
    pub storage: StorageController,
    pub now: DateTime<FixedOffset>,
    _tempdir: TempDir,
}

impl ExpiryFixture {
    /// Local time 2020-06-01 12:00 at UTC+2.
    pub fn new() -> Self {
        Self::at(12, 0)
    }

    pub fn at(hour: u32, minute: u32) -> Self {
        let tempdir = tempfile::tempdir().unwrap();
        let storage = StorageController::new(tempdir.path().join("storage")).unwrap();
        let now = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2020, 6, 1, hour, minute, 0)
            .unwrap();
        Self {
            storage,
            now,
            _tempdir: tempdir,
        }
    }

    pub fn store_pending(&self, requests: &[(&str, DateTime<Utc>)]) {
        let pending: Vec<_> = requests
            .iter()
            .map(|(identifier, expiry)| {
                let created = *expiry - Duration::days(14);
                PendingUploadRequest::new(*identifier, created, *expiry)
            })
            .collect();
        self.storage
            .store(&PENDING_LAB_UPLOAD_REQUESTS, &pending)
            .unwrap();
    }

    pub fn pending_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .storage
            .retrieve(&PENDING_LAB_UPLOAD_REQUESTS)
            .unwrap_or_default()
            .into_iter()
            .map(|request| request.identifier)
            .collect();
        ids.sort();
        ids
    }

    pub fn operation(
        &self,
        center: impl UserNotificationCenter + 'static,
    ) -> ExpiredLabConfirmationNotification {
        ExpiredLabConfirmationNotification::new(
            self.storage.clone(),
            Arc::new(center),
            Arc::new(FixedClock(self.now)),
            MESSAGE,
        )
    }
}

pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}
