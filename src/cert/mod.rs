// src/cert/mod.rs
mod ca;
pub mod catalog;
pub mod identity;
mod openssl;
pub mod operations;
mod service_account;
pub mod types;
pub mod verification;

pub use catalog::CatalogBuilder;
pub use identity::materialize;
pub use operations::{CertOperationError, CertificateOperations};
pub use service_account::ServiceAccountGenerator;
