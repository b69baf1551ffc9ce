//! The exposure key export ingest agent.
//!
//! Exports are fetched over certificate pinned connections, run through a chain of
//! response handlers that ends in signature verification, and only then written to
//! disk. Alongside, pending lab confirmation uploads are expired and the user is told
//! about them.

pub mod cache;
pub mod fetch;
pub mod handlers;
pub mod notifications;
pub mod operations;
pub mod settings;
pub mod storage;
mod util;

pub use settings::{Args, Command, Settings};
