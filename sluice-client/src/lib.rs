//! Edge-side client for the sluice transcoding service.
//!
//! Keeps transcoded HLS fragments in an on-disk cache, rebuilt by a
//! startup scan, and knows how to compose and validate upstream fragment
//! URLs. The one hard rule on the URL path is that the sd-hash embedded
//! in the upstream playlist URL must equal the hash the caller expects;
//! serving a stream under the wrong identity is worse than serving
//! nothing.

pub mod cache;
pub mod client;

pub use cache::{Fragment, FragmentCache};
pub use client::{CdnResolver, Client, StreamResolver};

/// Errors surfaced by the fragment cache and client.
#[derive(Debug, thiserror::Error)]
pub enum FragmentError {
    /// Upstream playlist URL does not carry the expected sd-hash.
    #[error("remote sd hash mismatch: {url:?} does not embed {expected}")]
    SdHashMismatch {
        /// Hash the caller expected.
        expected: String,
        /// Upstream URL that failed validation.
        url: String,
    },

    /// Upstream has no playable stream for this identifier.
    #[error("stream {uri} not available upstream: {reason}")]
    NotAvailable {
        /// Stream identifier that was asked for.
        uri: String,
        /// What the upstream said.
        reason: String,
    },

    /// Filesystem failure in the cache.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Transfer failure talking to the service or CDN.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
