//! Domain layer types and invariants.

pub mod error;
pub mod payload;

pub use error::FetchError;
pub use payload::Payload;
