//! Governance kernel core primitives.
//!
//! Shared value types, identifiers, canonicalization, and schema validation
//! used by every crate in the governance kernel workspace. Nothing in this
//! crate talks to the registry, the cache, or any transport — it is the
//! vocabulary the rest of the workspace is built from.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Version of the kernel-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod clock;
pub mod error;
pub mod events;
pub mod fieldpath;
pub mod hash;
pub mod ids;
pub mod model;
pub mod request;
pub mod schema;

pub use error::ValidationError;
