//! Turns a user's cart into an immutable order snapshot.

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::OrderItem;
use crate::entities::{cart_item, metal, product, stone_type};
use crate::errors::ServiceError;
use crate::services::pricing::{compute_line_total, compute_order_totals, OrderTotals};

/// Priced order contents, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DraftOrder {
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub currency: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    base_currency: String,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, base_currency: impl Into<String>) -> Self {
        Self {
            db,
            base_currency: base_currency.into(),
        }
    }

    /// Snapshot the user's cart at current catalog prices
    #[instrument(skip(self))]
    pub async fn materialize(&self, user_id: Uuid) -> Result<DraftOrder, ServiceError> {
        self.materialize_on(&*self.db, user_id).await
    }

    /// Same as [`Self::materialize`] but reads through the given connection,
    /// so it can run inside the transaction that writes the order
    pub async fn materialize_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<DraftOrder, ServiceError> {
        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?;

        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let metal_ids: Vec<Uuid> = lines.iter().map(|l| l.metal_id).collect();
        let stone_ids: Vec<Uuid> = lines.iter().filter_map(|l| l.stone_id).collect();

        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let metals: HashMap<Uuid, metal::Model> = metal::Entity::find()
            .filter(metal::Column::Id.is_in(metal_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();
        let stones: HashMap<Uuid, stone_type::Model> = if stone_ids.is_empty() {
            HashMap::new()
        } else {
            stone_type::Entity::find()
                .filter(stone_type::Column::Id.is_in(stone_ids))
                .all(conn)
                .await?
                .into_iter()
                .map(|s| (s.id, s))
                .collect()
        };

        let items = lines
            .iter()
            .map(|line| snapshot_line(line, &products, &metals, &stones))
            .collect::<Result<Vec<_>, _>>()?;
        let totals = compute_order_totals(&items)?;

        info!(%user_id, lines = items.len(), subtotal = %totals.subtotal, "cart materialized");
        Ok(DraftOrder {
            items,
            totals,
            currency: self.base_currency.clone(),
        })
    }
}

fn snapshot_line(
    line: &cart_item::Model,
    products: &HashMap<Uuid, product::Model>,
    metals: &HashMap<Uuid, metal::Model>,
    stones: &HashMap<Uuid, stone_type::Model>,
) -> Result<OrderItem, ServiceError> {
    let product = products
        .get(&line.product_id)
        .filter(|p| p.is_active)
        .ok_or(ServiceError::ProductNotFound(line.product_id))?;

    let metal = metals
        .get(&line.metal_id)
        .ok_or_else(|| ServiceError::ReferenceNotFound(format!("metal {}", line.metal_id)))?;

    let purity = metal.purity_level(&line.purity_karat).ok_or_else(|| {
        ServiceError::ReferenceNotFound(format!(
            "purity {} for metal {}",
            line.purity_karat, metal.name
        ))
    })?;

    let stone = match line.stone_id {
        Some(stone_id) => Some(
            stones
                .get(&stone_id)
                .ok_or_else(|| ServiceError::ReferenceNotFound(format!("stone {}", stone_id)))?,
        ),
        None => None,
    };
    let stone_price = stone.map(|s| s.price).unwrap_or(Decimal::ZERO);

    let price = compute_line_total(
        product.base_price,
        purity.price_multiplier,
        Some(stone_price),
        line.quantity,
    )?
    .rounded(line.quantity)?;

    Ok(OrderItem {
        product_id: product.id,
        product_name: product.name.clone(),
        product_image: product.primary_image(),
        metal_id: metal.id,
        metal_name: metal.name.clone(),
        purity_level: purity.karat,
        stone_id: stone.map(|s| s.id),
        stone_name: stone.map(|s| s.name.clone()),
        stone_price,
        ring_size: line.ring_size.clone(),
        quantity: line.quantity,
        unit_price: price.unit_price,
        total_price: price.total_price,
    })
}
