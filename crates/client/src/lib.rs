//! Download pipeline for the HTTP response cache.
//!
//! This crate provides the network transport and the downloader that puts the
//! cache middleware in front of it. Shared by the CLI and tests.

pub mod downloader;
pub mod transport;

pub use downloader::Downloader;
pub use transport::{FetchConfig, ReqwestTransport, Transport};
