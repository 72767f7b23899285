//! Chitter shared library — domain types, ids, error taxonomy, the content
//! sanitizer, the credential registry, and the `ChatService` contract
//! implemented by both storage backends.

pub mod credentials;
pub mod error;
pub mod ids;
pub mod model;
pub mod sanitize;
pub mod service;

pub use error::ChitterError;
pub use service::{ChatService, NewRoom};
