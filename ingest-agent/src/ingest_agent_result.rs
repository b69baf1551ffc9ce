use std::process::{ExitCode, Termination};

use en_ingest_agent::{
    fetch::FetchError, operations::OperationError, storage::StorageError,
};
use en_security_utils::reqwest::TransportError;

/// Exit codes returned by the ingest agent. Custom exit codes are taken in accordance with the
/// Linux Standard Base Core Specification and are in the range 150-199.
#[repr(u8)]
pub(crate) enum IngestAgentResult {
    Success = 0,
    Failure = 1,
    DownloadFailed = 150,
    CertificatePinningFailed = 151,
    VerificationFailed = 152,
    StorageFailed = 153,
}

impl Termination for IngestAgentResult {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}

impl From<eyre::Report> for IngestAgentResult {
    fn from(err: eyre::Report) -> Self {
        use IngestAgentResult::{
            CertificatePinningFailed, DownloadFailed, Failure, StorageFailed,
            VerificationFailed,
        };
        if let Some(err) = err.downcast_ref::<FetchError>() {
            return match err {
                FetchError::Transport(TransportError::CertificatePinningFailed {
                    ..
                }) => CertificatePinningFailed,
                FetchError::Transport(_) => DownloadFailed,
                FetchError::Handler { .. } => VerificationFailed,
                _ => StorageFailed,
            };
        }
        if err.downcast_ref::<OperationError>().is_some()
            || err.downcast_ref::<StorageError>().is_some()
        {
            return StorageFailed;
        }
        Failure
    }
}
