//! Invigil-Storage: Recording Upload Transport
//!
//! This crate moves finalised recordings to external storage. It knows about
//! packages, receipts and HTTP; it does not decide when to upload or whether to
//! retry.
//!
//! ## Layer 1 - Transport
//!
//! Focus: One request per call, categorised failures, no hidden retries.
//!
//! ## Key Components
//!
//! - `StorageEndpoint`: upload bytes or register an externally hosted URL
//! - `HttpStorageClient`: multipart/JSON client over `reqwest`
//! - `MemoryStorageEndpoint`: in-memory fake for tests

pub mod endpoint;
mod error;
pub mod fakes;
mod http;

pub use endpoint::{MediaRegistration, StorageEndpoint, StorageReceipt, UploadPackage};
pub use error::StorageError;
pub use http::{HttpStorageClient, StorageConfig};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
