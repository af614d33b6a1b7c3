//! # wildmesh-core
//!
//! Shared vocabulary for the wildmesh workspace: node identities, roles,
//! capability flags, millisecond timestamps and the unified error type.

pub mod error;
pub mod types;

pub use error::{Result, WildError};
pub use types::*;
