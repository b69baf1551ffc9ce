pub mod bundle;
pub mod fake_notification_center;
pub mod fixture;
