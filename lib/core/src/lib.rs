//! Core types for the agency-portal workspace.
//!
//! Provides the shared `Result` alias and the principal identifier used to
//! join identity-provider sessions with application profiles.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, PrincipalId};
