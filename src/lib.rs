//! quill: a client-side resource cache for novel authoring tools.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod query;

pub use error::{ResourceError, ResourceResult};
