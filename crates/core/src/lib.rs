//! FlexHub Core - Shared domain types and rules.
//!
//! This crate provides the types and business rules used across the FlexHub
//! back office:
//! - `server` - HTTP API, webhook ingestion, and the payout scheduler
//! - `cli` - Command-line tools for migrations and operations
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database
//! access, no HTTP clients. The server loads state, asks these functions what
//! to do, and performs the writes.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, money, emails, and statuses
//! - [`code`] - Ambassador code normalization and usability checks
//! - [`commission`] - Commission calculation, clawback and payout planning
//! - [`application`] - Application approval state machine

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod application;
pub mod code;
pub mod commission;
pub mod types;

pub use application::{ApplicationEvent, ApplicationStatus, DocumentDisposition, TransitionError};
pub use code::{CodeError, CodeTerms, CodeValue};
pub use commission::{CommissionError, CommissionStatus};
pub use types::*;
