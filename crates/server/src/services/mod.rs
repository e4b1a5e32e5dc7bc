//! Business logic services.
//!
//! # Services
//!
//! - `applications` - Application intake, documents and decisions
//! - `commission` - Ambassador codes, commission ledger, Connect onboarding
//! - `email` - Outbound email via Brevo and Resend
//! - `inbound` - Routing Mailgun inbound email to tickets and applications
//! - `payouts` - Weekly Stripe Connect payout runs and their schedule
//! - `storage` - Signed documents in Supabase Storage
//! - `stripe` - Stripe Connect API client
//! - `support` - Support tickets

pub mod applications;
pub mod commission;
pub mod email;
pub mod inbound;
pub mod payouts;
pub mod storage;
pub mod stripe;
pub mod support;

pub use applications::{ApplicationService, ApplicationUpdate, DocumentUpload, SubmitApplication};
pub use commission::{
    CodeValidation, CommissionInput, CommissionService, CreateCodeInput, RenewalInput,
    RenewalOutcome,
};
pub use email::{EmailError, EmailService};
pub use inbound::{InboundMailService, WebhookOutcome};
pub use payouts::{PayoutBatchSummary, PayoutService, next_weekly_run};
pub use storage::{StorageError, StorageService};
pub use stripe::{StripeClient, StripeError};
pub use support::{CreateTicket, SupportService};
