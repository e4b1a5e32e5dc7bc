//! Domain models for the back office.
//!
//! Rows decode straight into these types; ids, emails, money and statuses
//! use the typed wrappers from `flexhub-core`.

pub mod ambassador;
pub mod application;
pub mod support;
pub mod user;

pub use ambassador::{AmbassadorCode, Commission, EarningsSummary, Payout};
pub use application::Application;
pub use support::{SupportTicket, TicketMessage, TicketThread};
pub use user::User;
