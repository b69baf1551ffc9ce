use std::{collections::HashSet, sync::Arc};

use en_ingest_agent_core::{NotificationRequest, PENDING_LAB_UPLOAD_REQUESTS};
use tracing::{debug, error, info, warn};

use crate::{
    notifications::{AuthorizationStatus, Clock, UserNotificationCenter},
    storage::{StorageController, StorageError},
};

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("failed removing expired pending upload requests")]
    Storage(#[from] StorageError),
}

/// What a run of [`ExpiredLabConfirmationNotification`] did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExpiryReport {
    /// Identifiers of the requests that were found expired and removed.
    pub expired: Vec<String>,
    /// Whether a notification was handed to the notification center successfully.
    pub notified: bool,
}

/// Removes expired pending lab upload requests, telling the user about them once.
///
/// The notification is best effort: a missing authorization or a delivery error is
/// logged and the expired requests are removed anyway.
pub struct ExpiredLabConfirmationNotification {
    storage: StorageController,
    notification_center: Arc<dyn UserNotificationCenter>,
    clock: Arc<dyn Clock>,
    message: String,
}

impl ExpiredLabConfirmationNotification {
    pub fn new(
        storage: StorageController,
        notification_center: Arc<dyn UserNotificationCenter>,
        clock: Arc<dyn Clock>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            notification_center,
            clock,
            message: message.into(),
        }
    }

    /// Runs the operation. It can only run once.
    pub async fn execute(self) -> Result<ExpiryReport, OperationError> {
        let now = self.clock.now();
        let pending = self
            .storage
            .retrieve(&PENDING_LAB_UPLOAD_REQUESTS)
            .unwrap_or_default();
        let expired: Vec<String> = pending
            .iter()
            .filter(|request| request.is_expired(now))
            .map(|request| request.identifier.clone())
            .collect();
        debug!(?expired, pending = pending.len(), "expired requests");

        let notified = if expired.is_empty() {
            false
        } else {
            self.notify_user().await
        };

        let to_remove: HashSet<&str> = expired.iter().map(String::as_str).collect();
        self.storage
            .with_exclusive_access(|storage| {
                // Re-read, the set may have changed since the snapshot.
                let previous = storage
                    .retrieve(&PENDING_LAB_UPLOAD_REQUESTS)
                    .unwrap_or_default();
                let remaining: Vec<_> = previous
                    .into_iter()
                    .filter(|request| !to_remove.contains(request.identifier.as_str()))
                    .collect();
                debug!(remaining = remaining.len(), "storing pending requests");
                storage.store(&PENDING_LAB_UPLOAD_REQUESTS, &remaining)
            })
            .await
            .inspect_err(|err| error!(%err, "failed storing pending requests"))?;

        if !expired.is_empty() {
            info!(count = expired.len(), "removed expired pending upload requests");
        }

        Ok(ExpiryReport { expired, notified })
    }

    async fn notify_user(&self) -> bool {
        let status = self.notification_center.authorization_status().await;
        if status != AuthorizationStatus::Authorized {
            warn!(?status, "cannot notify user, not authorized");
            return false;
        }

        let request = NotificationRequest::upload_failed(
            self.message.as_str(),
            &self.clock.local_now(),
        );
        debug!(trigger = ?request.trigger, "adding notification");
        match self.notification_center.add(request).await {
            Ok(()) => true,
            Err(err) => {
                error!(%err, "failed adding notification");
                false
            }
        }
    }
}
