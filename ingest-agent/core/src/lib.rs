#![forbid(unsafe_code)]
#![warn(unreachable_pub)]

pub mod artifact;
pub mod handler;
pub mod notification;
pub mod pending;
pub mod pubkeys;
pub mod signatures;

pub use artifact::{ArchiveContents, Artifact, VerifiedExport};
pub use handler::{ChainOutcome, HandlerChain, HandlerError, ResponseHandler};
pub use notification::{
    CalendarTrigger, NotificationContent, NotificationRequest, NotificationSound,
    NotificationTrigger,
};
pub use pending::{PENDING_LAB_UPLOAD_REQUESTS, PendingUploadRequest, StorageKey};
pub use pubkeys::{KeyLoadError, TrustedKeys};
pub use signatures::SignatureError;

/// Crates reexported for use
pub mod reexports {
    pub use chrono;
    pub use ed25519_dalek;
}
