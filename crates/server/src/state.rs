//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::config::ServerConfig;
use crate::mailgun::MailgunClient;
use crate::services::{
    ApplicationService, CommissionService, EmailService, InboundMailService, PayoutService,
    StorageService, StripeClient, SupportService,
};

/// Timeout for calls to Stripe, email providers, Supabase and Mailgun.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    pool: PgPool,
    commissions: CommissionService,
    payouts: PayoutService,
    applications: ApplicationService,
    support: SupportService,
    inbound: InboundMailService,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Server configuration
    /// * `pool` - `PostgreSQL` connection pool (may be lazily connected)
    #[must_use]
    pub fn new(config: ServerConfig, pool: PgPool) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let stripe = StripeClient::new(&config.stripe, http.clone());
        let email = EmailService::new(&config.email, http.clone());
        let storage = config
            .storage()
            .map(|storage| StorageService::new(storage, http.clone()));
        let mailgun = MailgunClient::new(&config.mailgun, http);

        let commissions = CommissionService::new(pool.clone(), stripe.clone(), &config.base_url);
        let payouts = PayoutService::new(pool.clone(), stripe, config.payouts);
        let applications = ApplicationService::new(
            pool.clone(),
            email.clone(),
            storage,
            config.email.agreement_path.clone(),
        );
        let support = SupportService::new(pool.clone(), email);
        let inbound = InboundMailService::new(mailgun, applications.clone(), support.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                commissions,
                payouts,
                applications,
                support,
                inbound,
            }),
        }
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Commission ledger and ambassador codes.
    #[must_use]
    pub fn commissions(&self) -> &CommissionService {
        &self.inner.commissions
    }

    /// Payout runs.
    #[must_use]
    pub fn payouts(&self) -> &PayoutService {
        &self.inner.payouts
    }

    /// Application workflow.
    #[must_use]
    pub fn applications(&self) -> &ApplicationService {
        &self.inner.applications
    }

    /// Support tickets.
    #[must_use]
    pub fn support(&self) -> &SupportService {
        &self.inner.support
    }

    /// Inbound email routing.
    #[must_use]
    pub fn inbound(&self) -> &InboundMailService {
        &self.inner.inbound
    }
}
