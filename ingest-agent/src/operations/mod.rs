//! Single-shot operations over the stored exposure data.

pub mod expired_lab_confirmation;

pub use expired_lab_confirmation::{
    ExpiredLabConfirmationNotification, ExpiryReport, OperationError,
};
