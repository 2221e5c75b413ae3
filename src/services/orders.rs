//! Order creation and payment settlement.
//!
//! Gateway orders move `pending -> completed/processing` or
//! `pending -> failed` exactly once. A capture first claims the order with a
//! conditional update, so concurrent captures of one order never reach the
//! gateway twice.

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::email::{templates, DynEmailSender, EmailMessage};
use crate::entities::order::{
    self, Address, CardDetails, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
};
use crate::entities::user;
use crate::errors::ServiceError;
use crate::handlers::coerce::lenient_opt_decimal;
use crate::payments::{PaymentError, PaymentLine, PaymentOrderRequest, PaymentProvider};
use crate::services::cart::clear_cart_lines;
use crate::services::checkout::{CheckoutService, DraftOrder};
use crate::services::currency::{convert_order, Conversion, CurrencyPolicy};
use crate::services::notifications::{NotificationContent, NotificationService};

pub const ORDER_UPDATE_KIND: &str = "order_update";

/// A capture claim is abandoned after this many provider timeouts
const CLAIM_STALE_FACTOR: u32 = 4;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate]
    pub shipping_address: Address,
    /// Defaults to the shipping address
    #[serde(default)]
    #[validate]
    pub billing_address: Option<Address>,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    pub payment_method: PaymentMethod,
    /// Currency the buyer pays in; the catalog currency when absent
    #[serde(default)]
    pub currency: Option<String>,
    /// Multiplier from the catalog currency to the currency the gateway
    /// settles in: `currency` itself, or the settlement currency when
    /// `currency` cannot be charged directly (0.012 for INR settled in USD)
    #[serde(default, deserialize_with = "lenient_opt_decimal")]
    #[schema(value_type = Option<String>)]
    pub exchange_rate: Option<Decimal>,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CapturePaymentRequest {
    /// The PayPal order id returned by the approval redirect
    #[serde(alias = "orderID", alias = "orderId")]
    #[validate(length(min = 1, max = 64))]
    pub provider_order_id: String,
}

/// Order as returned by the API, with the JSON columns decoded
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub exchange_rate: Option<Decimal>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub phone: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub external_payment_order_id: Option<String>,
    pub external_transaction_id: Option<String>,
    pub card_details: Option<CardDetails>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<order::Model> for OrderView {
    type Error = ServiceError;

    fn try_from(model: order::Model) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, e: serde_json::Error| {
            ServiceError::InternalError(format!(
                "order {} has an unreadable {}: {}",
                model.id, field, e
            ))
        };
        let items = model.items().map_err(|e| corrupt("items", e))?;
        let card_details = model.card_details();
        let shipping_address = serde_json::from_value(model.shipping_address.clone())
            .map_err(|e| corrupt("shipping address", e))?;
        let billing_address = serde_json::from_value(model.billing_address.clone())
            .map_err(|e| corrupt("billing address", e))?;

        Ok(Self {
            id: model.id,
            order_number: model.order_number,
            user_id: model.user_id,
            items,
            subtotal: model.subtotal,
            total: model.total,
            currency: model.currency,
            exchange_rate: model.exchange_rate,
            shipping_address,
            billing_address,
            phone: model.phone,
            payment_method: model.payment_method,
            payment_status: model.payment_status,
            status: model.status,
            external_payment_order_id: model.external_payment_order_id,
            external_transaction_id: model.external_transaction_id,
            card_details,
            notes: model.notes,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Result of `create_order`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderPlacement {
    pub order: OrderView,
    /// Where to send the buyer to approve a gateway payment
    pub approval_url: Option<String>,
    /// True when a foreign currency was charged without a rate (1:1)
    pub exchange_rate_defaulted: bool,
}

/// Result of a capture attempt that found its pending order
#[derive(Debug, Clone)]
pub enum CaptureResult {
    Completed(OrderView),
    /// The order is now `failed`; the buyer may retry with a new checkout
    Failed { order: OrderView, reason: String },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderPage {
    pub orders: Vec<OrderView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// `ORD-<yyyymmdd>-<8 hex>`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", now.format("%Y%m%d"), &suffix[..8])
}

fn payment_lines(draft: &DraftOrder) -> Vec<PaymentLine> {
    draft
        .items
        .iter()
        .map(|item| PaymentLine {
            name: format!(
                "{} ({} {})",
                item.product_name, item.purity_level, item.metal_name
            ),
            quantity: item.quantity,
            unit_amount: item.unit_price,
        })
        .collect()
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::InternalError(e.to_string()))
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    checkout: CheckoutService,
    currency: CurrencyPolicy,
    notifications: NotificationService,
    payments: Option<Arc<dyn PaymentProvider>>,
    email: Option<DynEmailSender>,
    store_name: String,
    provider_timeout: Duration,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        checkout: CheckoutService,
        currency: CurrencyPolicy,
        notifications: NotificationService,
    ) -> Self {
        Self {
            db,
            checkout,
            currency,
            notifications,
            payments: None,
            email: None,
            store_name: "Jewelry Store".to_string(),
            provider_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_payment_provider(mut self, provider: Option<Arc<dyn PaymentProvider>>) -> Self {
        self.payments = provider;
        self
    }

    pub fn with_email_sender(mut self, sender: Option<DynEmailSender>) -> Self {
        self.email = sender;
        self
    }

    pub fn with_store_name(mut self, store_name: impl Into<String>) -> Self {
        self.store_name = store_name.into();
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn payments_enabled(&self) -> bool {
        self.payments.is_some()
    }

    pub fn email_enabled(&self) -> bool {
        self.email.is_some()
    }

    /// Places an order from the user's cart.
    ///
    /// Gateway methods create the provider order before anything is stored
    /// and leave the cart alone until capture. Other methods commit the
    /// order and empty the cart in one transaction.
    #[instrument(skip(self, request), fields(method = ?request.payment_method))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderPlacement, ServiceError> {
        request.validate()?;

        if request.payment_method.is_gateway() {
            self.create_gateway_order(user_id, request).await
        } else {
            self.create_direct_order(user_id, request).await
        }
    }

    async fn create_gateway_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderPlacement, ServiceError> {
        let provider = self.payments.as_ref().ok_or_else(|| {
            ServiceError::PaymentProviderError(PaymentError::NotConfigured.to_string())
        })?;

        let draft = self.checkout.materialize(user_id).await?;
        let conversion = self
            .currency
            .resolve(request.currency.as_deref(), request.exchange_rate)?;
        let settled = convert_order(&draft, &conversion)?;

        let now = Utc::now();
        let order_number = generate_order_number(now);
        let payment_request = PaymentOrderRequest {
            reference_id: order_number.clone(),
            currency: settled.currency.clone(),
            items: payment_lines(&settled),
            total: settled.totals.total,
        };

        let provider_order =
            match tokio::time::timeout(self.provider_timeout, provider.create_order(&payment_request))
                .await
            {
                Ok(Ok(order)) => order,
                Ok(Err(err)) => {
                    warn!(error = %err, %order_number, "payment provider rejected order creation");
                    return Err(ServiceError::PaymentProviderError(err.to_string()));
                }
                Err(_) => {
                    warn!(%order_number, "payment provider timed out creating order");
                    return Err(ServiceError::PaymentProviderError(
                        PaymentError::Timeout.to_string(),
                    ));
                }
            };

        let approval_url = provider_order.approval_url.clone().ok_or_else(|| {
            warn!(provider_order_id = %provider_order.id, "provider order has no approval link");
            ServiceError::PaymentProviderError("approval link missing".to_string())
        })?;

        let model = self
            .new_order(
                user_id,
                order_number,
                &request,
                &settled,
                Some(&conversion),
                PaymentStatus::Pending,
                Some(provider_order.id.clone()),
                now,
            )?
            .insert(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, provider_order_id = %provider_order.id, "failed to store pending order");
                ServiceError::db_error(e)
            })?;

        counter!("storefront_orders.created", 1);
        info!(
            order_number = %model.order_number,
            provider_order_id = %provider_order.id,
            total = %model.total,
            currency = %model.currency,
            "gateway order awaiting approval"
        );

        Ok(OrderPlacement {
            order: OrderView::try_from(model)?,
            approval_url: Some(approval_url),
            exchange_rate_defaulted: conversion.rate_defaulted,
        })
    }

    async fn create_direct_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderPlacement, ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let draft = self.checkout.materialize_on(&txn, user_id).await?;
        let model = self
            .new_order(
                user_id,
                generate_order_number(now),
                &request,
                &draft,
                None,
                PaymentStatus::Completed,
                None,
                now,
            )?
            .insert(&txn)
            .await?;
        let cleared = clear_cart_lines(&txn, user_id).await?;
        txn.commit().await?;

        counter!("storefront_orders.created", 1);
        info!(order_number = %model.order_number, cleared, "direct order placed");

        self.spawn_confirmation_email(model.clone());

        Ok(OrderPlacement {
            order: OrderView::try_from(model)?,
            approval_url: None,
            exchange_rate_defaulted: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn new_order(
        &self,
        user_id: Uuid,
        order_number: String,
        request: &CreateOrderRequest,
        draft: &DraftOrder,
        conversion: Option<&Conversion>,
        payment_status: PaymentStatus,
        external_payment_order_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<order::ActiveModel, ServiceError> {
        let billing = request
            .billing_address
            .as_ref()
            .unwrap_or(&request.shipping_address);

        Ok(order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number),
            user_id: Set(user_id),
            items: Set(to_json(&draft.items)?),
            subtotal: Set(draft.totals.subtotal),
            total: Set(draft.totals.total),
            currency: Set(draft.currency.clone()),
            exchange_rate: Set(conversion.filter(|c| !c.is_identity()).map(|c| c.rate)),
            shipping_address: Set(to_json(&request.shipping_address)?),
            billing_address: Set(to_json(billing)?),
            phone: Set(request.phone.clone()),
            payment_method: Set(request.payment_method),
            payment_status: Set(payment_status),
            status: Set(OrderStatus::Pending),
            external_payment_order_id: Set(external_payment_order_id),
            external_transaction_id: Set(None),
            card_details: Set(None),
            capture_started_at: Set(None),
            notes: Set(request.notes.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        })
    }

    /// Finalizes a gateway payment the buyer approved.
    ///
    /// `OrderNotFound` when no pending order of this user carries the
    /// provider id, including when an earlier capture already settled it or
    /// another capture of the same order is still talking to the gateway.
    #[instrument(skip(self))]
    pub async fn capture_payment(
        &self,
        user_id: Uuid,
        provider_order_id: &str,
    ) -> Result<CaptureResult, ServiceError> {
        let pending = order::Entity::find()
            .filter(order::Column::ExternalPaymentOrderId.eq(provider_order_id))
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::OrderNotFound(format!(
                    "no pending order for payment {}",
                    provider_order_id
                ))
            })?;

        let provider = self.payments.as_ref().ok_or_else(|| {
            ServiceError::PaymentProviderError(PaymentError::NotConfigured.to_string())
        })?;

        self.claim_capture(&pending, provider_order_id).await?;

        let outcome =
            tokio::time::timeout(self.provider_timeout, provider.capture_order(provider_order_id))
                .await
                .unwrap_or(Err(PaymentError::Timeout));

        let captured = match outcome {
            Ok(capture) if capture.is_completed() => capture,
            Ok(capture) => {
                warn!(order_number = %pending.order_number, status = %capture.status, "capture not completed");
                return self
                    .fail_payment(&pending, provider_order_id, "payment was not completed")
                    .await;
            }
            Err(err) if err.is_already_captured() => {
                // funds are taken; leave the order pending for reconciliation
                error!(order_number = %pending.order_number, error = %err, "gateway reports an earlier capture");
                return Err(ServiceError::PaymentProviderError(err.to_string()));
            }
            Err(err) => {
                warn!(order_number = %pending.order_number, error = %err, "capture call failed");
                return self
                    .fail_payment(&pending, provider_order_id, "payment could not be captured")
                    .await;
            }
        };

        let card_details = match captured.card.as_ref() {
            Some(card) => Some(to_json(card)?),
            None => None,
        };
        let result = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Completed))
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Processing))
            .col_expr(
                order::Column::ExternalTransactionId,
                Expr::value(captured.transaction_id.clone()),
            )
            .col_expr(order::Column::CardDetails, Expr::value(card_details))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(pending.id))
            .filter(order::Column::ExternalPaymentOrderId.eq(provider_order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(order_number = %pending.order_number, "capture lost the race to another request");
            return Err(ServiceError::OrderNotFound(format!(
                "order for payment {} was already finalized",
                provider_order_id
            )));
        }

        counter!("storefront_payments.captured", 1);
        info!(
            order_number = %pending.order_number,
            transaction_id = ?captured.transaction_id,
            "payment captured"
        );

        let order = self.reload(pending.id).await?;
        self.after_capture(&order).await;
        Ok(CaptureResult::Completed(OrderView::try_from(order)?))
    }

    /// Marks the order as being captured. Only one request wins the claim;
    /// a claim older than a few provider timeouts belongs to a request that
    /// died mid-capture and may be taken over.
    async fn claim_capture(
        &self,
        pending: &order::Model,
        provider_order_id: &str,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(self.provider_timeout * CLAIM_STALE_FACTOR)
                .unwrap_or_else(|_| chrono::Duration::minutes(5));

        let claimed = order::Entity::update_many()
            .col_expr(order::Column::CaptureStartedAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(pending.id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(
                Condition::any()
                    .add(order::Column::CaptureStartedAt.is_null())
                    .add(order::Column::CaptureStartedAt.lt(stale_before)),
            )
            .exec(&*self.db)
            .await?;

        if claimed.rows_affected == 0 {
            warn!(order_number = %pending.order_number, "capture already in progress");
            return Err(ServiceError::OrderNotFound(format!(
                "order for payment {} is already being captured",
                provider_order_id
            )));
        }
        Ok(())
    }

    async fn fail_payment(
        &self,
        pending: &order::Model,
        provider_order_id: &str,
        reason: &str,
    ) -> Result<CaptureResult, ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Failed))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(pending.id))
            .filter(order::Column::ExternalPaymentOrderId.eq(provider_order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::OrderNotFound(format!(
                "order for payment {} was already finalized",
                provider_order_id
            )));
        }

        counter!("storefront_payments.failed", 1);
        let order = self.reload(pending.id).await?;
        Ok(CaptureResult::Failed {
            order: OrderView::try_from(order)?,
            reason: reason.to_string(),
        })
    }

    /// Cart cleanup, confirmation email and push. Each step only logs on
    /// failure; the payment is already settled.
    async fn after_capture(&self, order: &order::Model) {
        match clear_cart_lines(&*self.db, order.user_id).await {
            Ok(removed) => info!(order_number = %order.order_number, removed, "cart cleared after capture"),
            Err(e) => error!(order_number = %order.order_number, error = %e, "failed to clear cart after capture"),
        }

        self.spawn_confirmation_email(order.clone());

        let content = NotificationContent::new(
            "Payment received",
            format!("We received your payment for order {}", order.order_number),
        )
        .with_kind(ORDER_UPDATE_KIND)
        .with_data("order_id", order.id.to_string())
        .with_data("order_number", order.order_number.clone());
        if let Err(e) = self.notifications.notify_user(order.user_id, &content).await {
            warn!(order_number = %order.order_number, error = %e, "payment push failed");
        }
    }

    fn spawn_confirmation_email(&self, order: order::Model) {
        let Some(sender) = self.email.clone() else {
            info!(order_number = %order.order_number, "email disabled; skipping confirmation");
            return;
        };
        let db = self.db.clone();
        let store_name = self.store_name.clone();

        tokio::spawn(async move {
            let customer = match user::Entity::find_by_id(order.user_id).one(&*db).await {
                Ok(Some(customer)) => customer,
                Ok(None) => {
                    warn!(order_number = %order.order_number, "order owner not found; no confirmation sent");
                    return;
                }
                Err(e) => {
                    error!(order_number = %order.order_number, error = %e, "failed to load order owner");
                    return;
                }
            };
            let items = order.items().unwrap_or_default();
            let (subject, html, text) =
                templates::order_confirmation(&store_name, &customer.name, &order, &items);

            let message = EmailMessage {
                to: customer.email,
                subject,
                body_html: html,
                body_text: Some(text),
            };
            match sender.send(message).await {
                Ok(()) => info!(order_number = %order.order_number, "confirmation email sent"),
                Err(e) => error!(order_number = %order.order_number, error = %e, "confirmation email failed"),
            }
        });
    }

    async fn reload(&self, id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", id)))
    }

    /// Newest first
    #[instrument(skip(self))]
    pub async fn list_my_orders(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        self.page_of(
            order::Entity::find().filter(order::Column::UserId.eq(user_id)),
            page,
            per_page,
        )
        .await
    }

    /// Owners and admins only; anyone else gets `NotFound`
    #[instrument(skip(self, requester), fields(requester = %requester.user_id))]
    pub async fn get_order(
        &self,
        requester: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let order = self
            .reload(order_id)
            .await?;
        if order.user_id != requester.user_id && !requester.is_admin() {
            return Err(ServiceError::NotFound(format!("order {}", order_id)));
        }
        OrderView::try_from(order)
    }

    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let mut query = order::Entity::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        self.page_of(query, page, per_page).await
    }

    async fn page_of(
        &self,
        query: sea_orm::Select<order::Entity>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let counts = paginator.num_items_and_pages().await?;
        let orders = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(OrderView::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderPage {
            orders,
            total: counts.number_of_items,
            page,
            per_page,
            total_pages: counts.number_of_pages,
        })
    }

    /// Moves fulfillment forward and tells the owner about it
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<OrderView, ServiceError> {
        let current = self.reload(order_id).await?;
        if !current.status.can_transition_to(next) {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot move order {} from {} to {}",
                current.order_number, current.status, next
            )));
        }
        if !current.can_move_to(next) {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} cannot be {} before its payment is completed",
                current.order_number, next
            )));
        }

        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(next))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current.status))
            .filter(order::Column::PaymentStatus.eq(current.payment_status))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidStatus(format!(
                "order {} changed while updating",
                current.order_number
            )));
        }

        let updated = self.reload(order_id).await?;
        info!(order_number = %updated.order_number, from = %current.status, to = %next, "order status updated");

        let content = NotificationContent::new(
            "Order update",
            format!("Your order {} is now {}", updated.order_number, next),
        )
        .with_kind(ORDER_UPDATE_KIND)
        .with_data("order_id", updated.id.to_string())
        .with_data("status", next.to_string());
        if let Err(e) = self.notifications.notify_user(updated.user_id, &content).await {
            warn!(order_number = %updated.order_number, error = %e, "status notification failed");
        }

        OrderView::try_from(updated)
    }
}
