use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    db::DbPool,
    email::{DynEmailSender, SmtpMailer},
    payments::{PayPalClient, PaymentProvider},
    push::{FcmClient, PushProvider},
    services::{
        cart::CartService, checkout::CheckoutService, notifications::NotificationService,
        orders::OrderService,
    },
};

/// External collaborators. `None` means the integration is unavailable and
/// the dependent feature runs degraded.
#[derive(Clone, Default)]
pub struct Providers {
    pub payments: Option<Arc<dyn PaymentProvider>>,
    pub push: Option<Arc<dyn PushProvider>>,
    pub email: Option<DynEmailSender>,
}

impl Providers {
    /// Builds every client whose configuration section is present. A client
    /// that fails to initialise is logged and left out.
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = config.provider_timeout();

        let payments = config.paypal.clone().and_then(|paypal| {
            match PayPalClient::new(paypal, timeout) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn PaymentProvider>),
                Err(e) => {
                    warn!(error = %e, "PayPal client unavailable; gateway checkout disabled");
                    None
                }
            }
        });
        if config.paypal.is_none() {
            info!("PayPal not configured; gateway checkout disabled");
        }

        let push = config.fcm.clone().and_then(|fcm| match FcmClient::new(fcm, timeout) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn PushProvider>),
            Err(e) => {
                warn!(error = %e, "FCM client unavailable; push notifications disabled");
                None
            }
        });
        if config.fcm.is_none() {
            info!("FCM not configured; push notifications disabled");
        }

        let email = config.smtp.as_ref().and_then(|smtp| match SmtpMailer::new(smtp) {
            Ok(mailer) => Some(Arc::new(mailer) as DynEmailSender),
            Err(e) => {
                warn!(error = %e, "SMTP mailer unavailable; confirmation emails disabled");
                None
            }
        });

        Self {
            payments,
            push,
            email,
        }
    }
}

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    config: AppConfig,
    providers: Providers,
}

impl ServiceFactory {
    pub fn new(db_pool: Arc<DbPool>, config: AppConfig, providers: Providers) -> Self {
        Self {
            db_pool,
            config,
            providers,
        }
    }

    pub fn cart_service(&self) -> CartService {
        CartService::new(self.db_pool.clone())
    }

    pub fn checkout_service(&self) -> CheckoutService {
        CheckoutService::new(self.db_pool.clone(), self.config.base_currency.clone())
    }

    pub fn notification_service(&self) -> NotificationService {
        NotificationService::new(self.db_pool.clone(), self.providers.push.clone())
            .with_token_selection(self.config.push_token_selection)
            .with_batch_size(self.config.push_batch_size)
            .with_timeout(self.config.provider_timeout())
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(
            self.db_pool.clone(),
            self.checkout_service(),
            self.config.currency_policy(),
            self.notification_service(),
        )
        .with_payment_provider(self.providers.payments.clone())
        .with_email_sender(self.providers.email.clone())
        .with_store_name(self.config.store_name.clone())
        .with_provider_timeout(self.config.provider_timeout())
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub notifications: Arc<NotificationService>,
}

impl ServiceContainer {
    /// Creates a new service container with all services initialized
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            cart: Arc::new(factory.cart_service()),
            checkout: Arc::new(factory.checkout_service()),
            orders: Arc::new(factory.order_service()),
            notifications: Arc::new(factory.notification_service()),
        }
    }
}
