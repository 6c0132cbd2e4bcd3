//! ---
//! exu_section: "05-networking-external-interfaces"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Extension repository protocol and client."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Request/response contract of the extension repository and an HTTP
//! implementation of it.

use thiserror::Error;

/// Result alias used throughout the repository crate.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Transport-level failures. None of these are surfaced to the user; callers
/// reschedule instead.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The request could not be sent or the body could not be read.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The repository answered with a non-success status.
    #[error("repository returned HTTP {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
    /// The response body did not match the protocol.
    #[error("malformed repository response: {0}")]
    Decode(#[from] serde_json::Error),
    /// A URL could not be built from configuration.
    #[error("invalid repository url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub mod client;
pub mod protocol;

pub use client::{HttpRepositoryClient, RepositoryClient};
pub use protocol::{FetchRequest, OperationDescriptor, UpdateInfo, UpdateQuery, UPGRADE_OPERATION};
