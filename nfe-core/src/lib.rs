//! Rust toolkit for validating Brazilian NF-e documents (XSD, parsing, access key and SEFAZ status).
//!
//! # Examples
//! ```rust
//! use nfe_core::document::AccessKey;
//!
//! let key = AccessKey::from_identifier("NFe35250732409620000175550010000037471011544648")
//!     .expect("44-digit key");
//! assert!(key.validate().is_ok());
//! assert_eq!(key.jurisdiction(), "35");
//! ```
pub mod api;
pub mod config;
pub mod document;
pub mod pipeline;
pub mod tls;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Parse(#[from] document::parse::ParseError),
    #[error(transparent)]
    AccessKey(#[from] document::KeyError),
    #[error(transparent)]
    Schema(#[from] document::schema::SchemaError),
    #[error(transparent)]
    Trust(#[from] tls::TrustError),
    #[error(transparent)]
    Api(#[from] api::SefazError),
    #[error(transparent)]
    Pipeline(#[from] pipeline::PhaseError),
}
