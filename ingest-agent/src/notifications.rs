//! Seams to the outside world: where notifications go and what time it is.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use en_ingest_agent_core::{NotificationRequest, NotificationTrigger};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    NotDetermined,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification `{identifier}` could not be delivered: {reason}")]
    Delivery { identifier: String, reason: String },
}

/// Schedules local notifications for the user.
#[async_trait]
pub trait UserNotificationCenter: Send + Sync {
    async fn authorization_status(&self) -> AuthorizationStatus;

    async fn add(&self, request: NotificationRequest) -> Result<(), NotificationError>;
}

/// Notification center for headless deployments: notifications are written to the
/// log, and authorization is fixed by configuration.
#[derive(Debug, Clone)]
pub struct TracingNotificationCenter {
    authorized: bool,
}

impl TracingNotificationCenter {
    pub fn new(authorized: bool) -> Self {
        Self { authorized }
    }
}

#[async_trait]
impl UserNotificationCenter for TracingNotificationCenter {
    async fn authorization_status(&self) -> AuthorizationStatus {
        if self.authorized {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        }
    }

    async fn add(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        match &request.trigger {
            NotificationTrigger::Immediate => info!(
                identifier = %request.identifier,
                body = %request.content.body,
                "notification delivered"
            ),
            NotificationTrigger::Calendar(trigger) => info!(
                identifier = %request.identifier,
                body = %request.content.body,
                fire_date = ?trigger.next_fire_date(Utc::now()),
                "notification scheduled"
            ),
        }
        Ok(())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc> {
        self.local_now().with_timezone(&Utc)
    }

    /// Wall clock time in the device's time zone.
    fn local_now(&self) -> DateTime<FixedOffset>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// A clock that is stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn local_now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}
