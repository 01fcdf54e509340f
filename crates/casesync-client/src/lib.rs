//! REST client for the casesync workflow backend.
//!
//! [`HttpCaseBackend`] implements [`casesync_engine::CaseBackend`] over JSON
//! endpoints rooted at a base URL.

pub mod error;
pub mod http;

pub use error::ClientError;
pub use http::HttpCaseBackend;
