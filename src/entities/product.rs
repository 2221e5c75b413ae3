use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    /// JSON array of image URLs, first one is the primary image
    #[sea_orm(column_type = "Json")]
    pub images: Json,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub base_price: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn primary_image(&self) -> Option<String> {
        self.images
            .as_array()
            .and_then(|images| images.first())
            .and_then(|image| image.as_str())
            .map(str::to_string)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
