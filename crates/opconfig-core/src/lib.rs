//! Core types for opconfig
//!
//! This crate provides the building blocks shared by the secret and loader
//! crates:
//! - Error types
//! - Environment settings
//! - Cache encryption
//! - Template rendering with secret lookups
//! - The resolved configuration document

pub mod crypto;
pub mod document;
pub mod error;
pub mod secure;
pub mod settings;
pub mod template;

pub use crypto::CryptoBox;
pub use document::ResolvedConfig;
pub use error::{Error, Result};
pub use secure::SecureString;
pub use settings::Settings;
pub use template::{SecretLookup, TemplateRenderer, VariableBindings};
