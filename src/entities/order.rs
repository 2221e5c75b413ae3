use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub user_id: Uuid,
    /// JSON array of [`OrderItem`]; written once at creation
    #[sea_orm(column_type = "Json")]
    pub items: Json,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total: Decimal,
    pub currency: String,
    /// Rate applied when the amounts were converted for settlement
    #[sea_orm(column_type = "Decimal(Some((19, 8)))", nullable)]
    pub exchange_rate: Option<Decimal>,
    #[sea_orm(column_type = "Json")]
    pub shipping_address: Json,
    #[sea_orm(column_type = "Json")]
    pub billing_address: Json,
    pub phone: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    #[sea_orm(nullable)]
    pub external_payment_order_id: Option<String>,
    #[sea_orm(nullable)]
    pub external_transaction_id: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub card_details: Option<Json>,
    /// Set when a capture request claims the order; at most one capture
    /// talks to the gateway at a time
    #[sea_orm(nullable)]
    pub capture_started_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn items(&self) -> Result<Vec<OrderItem>, serde_json::Error> {
        serde_json::from_value(self.items.clone())
    }

    /// Fulfillment needs settled funds; an unpaid order can only be cancelled
    pub fn can_move_to(&self, next: OrderStatus) -> bool {
        self.status.can_transition_to(next)
            && (next == OrderStatus::Cancelled || self.payment_status == PaymentStatus::Completed)
    }

    pub fn card_details(&self) -> Option<CardDetails> {
        self.card_details
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// Denormalized, immutable snapshot of one purchased line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    pub metal_id: Uuid,
    pub metal_name: String,
    pub purity_level: String,
    pub stone_id: Option<Uuid>,
    pub stone_name: Option<String>,
    pub stone_price: Decimal,
    pub ring_size: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// Card used for a captured payment, as reported by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CardDetails {
    pub last4: String,
    pub brand: String,
    pub expiry: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(length(min = 1, max = 300))]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 1, max = 100))]
    pub country: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "paypal")]
    Paypal,
    #[sea_orm(string_value = "cash_on_delivery")]
    CashOnDelivery,
    #[sea_orm(string_value = "bank_transfer")]
    BankTransfer,
}

impl PaymentMethod {
    /// Gateway methods settle through the payment provider's approve/capture flow
    pub fn is_gateway(&self) -> bool {
        matches!(self, PaymentMethod::Paypal)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Shipped => 2,
            OrderStatus::Delivered => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    /// Fulfillment only moves forward; cancelling is possible until the order ships
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::Pending | OrderStatus::Processing, OrderStatus::Cancelled) => true,
            (OrderStatus::Cancelled, _) | (_, OrderStatus::Cancelled) => false,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_only_move_forward() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Processing));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Delivered));
    }

    #[test]
    fn cancellation_only_before_shipping() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Processing));
    }

    fn order_in(status: OrderStatus, payment_status: PaymentStatus) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            order_number: "ORD-20260301-0a1b2c3d".into(),
            user_id: Uuid::new_v4(),
            items: serde_json::json!([]),
            subtotal: Decimal::ZERO,
            total: Decimal::ZERO,
            currency: "INR".into(),
            exchange_rate: None,
            shipping_address: serde_json::json!({}),
            billing_address: serde_json::json!({}),
            phone: "+911234567890".into(),
            payment_method: PaymentMethod::Paypal,
            payment_status,
            status,
            external_payment_order_id: Some("PAY-1".into()),
            external_transaction_id: None,
            card_details: None,
            capture_started_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unpaid_orders_can_only_be_cancelled() {
        for payment in [PaymentStatus::Pending, PaymentStatus::Failed] {
            let order = order_in(OrderStatus::Pending, payment);
            assert!(!order.can_move_to(OrderStatus::Processing));
            assert!(!order.can_move_to(OrderStatus::Shipped));
            assert!(order.can_move_to(OrderStatus::Cancelled));
        }

        let paid = order_in(OrderStatus::Pending, PaymentStatus::Completed);
        assert!(paid.can_move_to(OrderStatus::Shipped));
    }

    #[test]
    fn payment_method_wire_names() {
        let method: PaymentMethod = serde_json::from_str("\"cash_on_delivery\"").unwrap();
        assert_eq!(method, PaymentMethod::CashOnDelivery);
        assert!(!method.is_gateway());
        assert!(PaymentMethod::Paypal.is_gateway());
    }
}
