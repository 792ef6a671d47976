use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use uuid::Uuid;

use crate::{
    entity::Products,
    error::{AppError, AppResult},
};

/// Price lookups against the product catalog, which lives outside this service.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Current unit price in minor units; `NotFound` for unknown products.
    async fn unit_price(&self, product_id: Uuid) -> AppResult<i64>;
}

/// Reads prices from the shared `products` table.
#[derive(Clone)]
pub struct DbCatalog {
    db: DatabaseConnection,
}

impl DbCatalog {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for DbCatalog {
    async fn unit_price(&self, product_id: Uuid) -> AppResult<i64> {
        Products::find_by_id(product_id)
            .one(&self.db)
            .await?
            .map(|product| product.price)
            .ok_or(AppError::NotFound)
    }
}
