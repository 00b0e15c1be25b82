//! rag-core - Core types and traits for the hybrid retrieval engine
//!
//! This crate provides the data model, capability traits, configuration and
//! error handling shared by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use traits::*;
pub use types::*;
