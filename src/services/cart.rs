use chrono::Utc;
use sea_orm::{
    sea_query::SimpleExpr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{cart_item, metal, product, stone_type};
use crate::errors::ServiceError;

pub const MAX_LINE_QUANTITY: i32 = 100;

/// Input for adding a configured product to the cart
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddCartLineInput {
    pub product_id: Uuid,
    pub metal_id: Uuid,
    #[validate(length(min = 1, max = 20))]
    pub purity_karat: String,
    #[serde(default)]
    pub stone_id: Option<Uuid>,
    #[serde(default)]
    #[validate(length(min = 1, max = 10))]
    pub ring_size: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

/// Deletes every cart line of a user on the given connection or transaction
pub async fn clear_cart_lines<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<u64, DbErr> {
    let result = cart_item::Entity::delete_many()
        .filter(cart_item::Column::UserId.eq(user_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

fn optional_eq<T>(column: cart_item::Column, value: Option<T>) -> SimpleExpr
where
    T: Into<sea_orm::Value>,
{
    match value {
        Some(v) => column.eq(v),
        None => column.is_null(),
    }
}

/// Per-user shopping cart
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lines in the order they were added
    #[instrument(skip(self))]
    pub async fn list_lines(&self, user_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, %user_id, "failed to load cart");
                ServiceError::db_error(e)
            })
    }

    /// Adds a line, or bumps the quantity of an identical configuration already in the cart
    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn add_line(
        &self,
        user_id: Uuid,
        input: AddCartLineInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db;

        let product = product::Entity::find_by_id(input.product_id)
            .one(db)
            .await?
            .filter(|p| p.is_active)
            .ok_or(ServiceError::ProductNotFound(input.product_id))?;

        let metal = metal::Entity::find_by_id(input.metal_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::ReferenceNotFound(format!("metal {}", input.metal_id)))?;

        let purity = metal.purity_level(&input.purity_karat).ok_or_else(|| {
            ServiceError::ReferenceNotFound(format!(
                "purity {} for metal {}",
                input.purity_karat, metal.name
            ))
        })?;

        if let Some(stone_id) = input.stone_id {
            stone_type::Entity::find_by_id(stone_id)
                .one(db)
                .await?
                .ok_or_else(|| ServiceError::ReferenceNotFound(format!("stone {}", stone_id)))?;
        }

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .filter(cart_item::Column::MetalId.eq(metal.id))
            .filter(cart_item::Column::PurityKarat.eq(purity.karat.clone()))
            .filter(optional_eq(cart_item::Column::StoneId, input.stone_id))
            .filter(optional_eq(
                cart_item::Column::RingSize,
                input.ring_size.clone(),
            ))
            .one(db)
            .await?;

        let now = Utc::now();
        let line = match existing {
            Some(line) => {
                let quantity = (line.quantity + input.quantity).min(MAX_LINE_QUANTITY);
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(quantity);
                active.purity_multiplier = Set(purity.price_multiplier);
                active.updated_at = Set(now);
                active.update(db).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(product.id),
                    metal_id: Set(metal.id),
                    purity_karat: Set(purity.karat),
                    purity_multiplier: Set(purity.price_multiplier),
                    stone_id: Set(input.stone_id),
                    ring_size: Set(input.ring_size),
                    quantity: Set(input.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(db)
                .await?
            }
        };

        info!(line_id = %line.id, quantity = line.quantity, "cart line saved");
        Ok(line)
    }

    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        line_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be between 1 and {}",
                MAX_LINE_QUANTITY
            )));
        }

        let line = self.find_owned(user_id, line_id).await?;
        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn remove_line(&self, user_id: Uuid, line_id: Uuid) -> Result<(), ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.eq(line_id))
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("cart line {}", line_id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn clear_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let removed = clear_cart_lines(&*self.db, user_id).await?;
        info!(%user_id, removed, "cart cleared");
        Ok(removed)
    }

    async fn find_owned(
        &self,
        user_id: Uuid,
        line_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        cart_item::Entity::find_by_id(line_id)
            .filter(cart_item::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart line {}", line_id)))
    }
}
