//! A composable chain of response handlers.
//!
//! Each handler decides for itself whether it applies to a response and the current
//! value. The chain runs them in order, threading the output of one handler into the
//! next, and stops at the first error.

use std::io;

use en_security_utils::NetworkResponse;
use tracing::{debug, warn};

use crate::SignatureError;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("failed reading cached response for `{url}`")]
    CacheRead {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to decompress archive")]
    Decompression(#[source] io::Error),
    #[error("unpacked archive exceeds the limit of {limit} bytes")]
    ArchiveTooLarge { limit: u64 },
    #[error("archive is missing member `{0}`")]
    MissingMember(&'static str),
    #[error("signature verification failed")]
    Signature(#[from] SignatureError),
    #[error("unsupported export header `{0}`")]
    UnsupportedHeader(String),
    #[error("chain finished with an unverified `{0}` value")]
    Unverified(&'static str),
}

/// A single step of a [`HandlerChain`].
pub trait ResponseHandler {
    type Input;
    type Output;

    /// Used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Whether this handler should run for `response` and the current value.
    fn is_applicable(&self, response: &NetworkResponse, input: &Self::Input) -> bool;

    fn process(
        &self,
        response: &NetworkResponse,
        input: Self::Input,
    ) -> Result<Self::Output, HandlerError>;
}

/// An ordered list of handlers over a single value type.
///
/// The order is owned by the chain, handlers are not aware of each other.
#[derive(Debug, Clone)]
pub struct HandlerChain<H> {
    handlers: Vec<H>,
}

impl<T, H> HandlerChain<H>
where
    H: ResponseHandler<Input = T, Output = T>,
{
    pub fn new(handlers: Vec<H>) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &[H] {
        &self.handlers
    }

    /// Runs `initial` through every applicable handler.
    ///
    /// Handlers that are not applicable leave the value unchanged. The first error is
    /// returned as-is and no further handler runs.
    pub fn run(&self, response: &NetworkResponse, initial: T) -> Result<T, HandlerError> {
        self.run_traced(response, initial).map(|outcome| outcome.value)
    }

    /// Like [`Self::run`], also reporting which handlers were applicable and ran.
    pub fn run_traced(
        &self,
        response: &NetworkResponse,
        initial: T,
    ) -> Result<ChainOutcome<T>, HandlerError> {
        let mut value = initial;
        let mut applied = Vec::new();
        for handler in &self.handlers {
            if !handler.is_applicable(response, &value) {
                debug!(handler = handler.name(), "handler not applicable, skipping");
                continue;
            }
            debug!(handler = handler.name(), "running handler");
            value = handler.process(response, value).inspect_err(|err| {
                warn!(handler = handler.name(), %err, "handler failed");
            })?;
            applied.push(handler.name());
        }
        Ok(ChainOutcome { value, applied })
    }
}

/// The final value of a chain run, and the names of the handlers that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome<T> {
    pub value: T,
    /// In the order they ran.
    pub applied: Vec<&'static str>,
}

impl<T> ChainOutcome<T> {
    pub fn ran(&self, handler: &str) -> bool {
        self.applied.contains(&handler)
    }
}
