#![allow(dead_code)]
use async_trait::async_trait;
use en_ingest_agent::notifications::{
    AuthorizationStatus, NotificationError, UserNotificationCenter,
};
use en_ingest_agent_core::NotificationRequest;
use mockall::mock;

mock! {
    pub NotificationCenter {}

    #[async_trait]
    impl UserNotificationCenter for NotificationCenter {
        async fn authorization_status(&self) -> AuthorizationStatus;
        async fn add(&self, request: NotificationRequest) -> Result<(), NotificationError>;
    }
}
