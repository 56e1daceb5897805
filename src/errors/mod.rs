//! # Error Handling
//!
//! Error types for the secrets cache client, defined with `thiserror`.

pub mod remote;
pub mod types;

pub use remote::{RemoteError, RemoteErrorKind};
pub use types::{EndpointFailure, Error, Result};
