//! Core types for FlexHub.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod money;
pub mod status;

pub use email::{Email, EmailError, canonical_email, generate_email_variations, same_mailbox};
pub use id::*;
pub use money::Cents;
pub use status::*;
