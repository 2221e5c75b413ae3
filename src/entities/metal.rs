use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    /// JSON array of [`PurityLevel`]
    #[sea_orm(column_type = "Json")]
    pub purity_levels: Json,
}

/// Fineness option of a metal, e.g. 18K gold priced at 0.75 of the base
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PurityLevel {
    pub karat: String,
    pub price_multiplier: Decimal,
}

impl Model {
    pub fn purity_levels(&self) -> Result<Vec<PurityLevel>, serde_json::Error> {
        serde_json::from_value(self.purity_levels.clone())
    }

    /// Looks up a purity level by karat label, ignoring case
    pub fn purity_level(&self, karat: &str) -> Option<PurityLevel> {
        self.purity_levels()
            .ok()?
            .into_iter()
            .find(|level| level.karat.eq_ignore_ascii_case(karat.trim()))
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
