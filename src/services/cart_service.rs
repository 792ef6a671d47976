use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    sea_query::OnConflict,
};
use uuid::Uuid;

use crate::{
    entity::carts::{
        ActiveModel as CartActive, CartLine, CartLines, Column as CartCol, Entity as Carts,
        Model as CartModel,
    },
    error::{AppError, AppResult},
    models::Cart,
    services::catalog::Catalog,
};

/// Attempts at a compare-and-swap before a racing writer wins outright.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Per-user carts. Every mutation re-reads the row, applies the change and
/// writes it back only if `version` is unchanged.
#[derive(Clone)]
pub struct CartStore {
    db: DatabaseConnection,
    catalog: Arc<dyn Catalog>,
}

impl CartStore {
    pub fn new(db: DatabaseConnection, catalog: Arc<dyn Catalog>) -> Self {
        Self { db, catalog }
    }

    pub async fn get(&self, user_id: Uuid) -> AppResult<Option<Cart>> {
        Ok(self.find(user_id).await?.map(Cart::from))
    }

    pub async fn get_or_create(&self, user_id: Uuid) -> AppResult<Cart> {
        if let Some(cart) = self.find(user_id).await? {
            return Ok(cart.into());
        }

        let now = Utc::now();
        let empty = CartActive {
            user_id: Set(user_id),
            items: Set(CartLines::default()),
            total_price: Set(0),
            version: Set(0),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        // a concurrent first add may have created it already
        match Carts::insert(empty)
            .on_conflict(OnConflict::column(CartCol::UserId).do_nothing().to_owned())
            .exec_without_returning(&self.db)
            .await
        {
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(err) => return Err(err.into()),
        }

        self.find(user_id)
            .await?
            .map(Cart::from)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cart vanished after insert")))
    }

    pub async fn add_item(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> AppResult<Cart> {
        if quantity <= 0 {
            return Err(AppError::InvalidArgument(
                "quantity must be greater than 0".to_string(),
            ));
        }
        self.catalog.unit_price(product_id).await?;
        self.get_or_create(user_id).await?;

        let cart = self
            .mutate(user_id, |lines| {
                match lines.iter_mut().find(|line| line.product_id == product_id) {
                    Some(line) => {
                        line.quantity = line.quantity.checked_add(quantity).ok_or_else(|| {
                            AppError::InvalidArgument("quantity is too large".to_string())
                        })?;
                    }
                    None => lines.push(CartLine {
                        product_id,
                        quantity,
                    }),
                }
                Ok(true)
            })
            .await?;

        cart.ok_or(AppError::NotFound)
    }

    /// Absolute set; zero removes the line.
    pub async fn set_item_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> AppResult<Cart> {
        if quantity < 0 {
            return Err(AppError::InvalidArgument(
                "quantity must not be negative".to_string(),
            ));
        }
        if quantity > 0 {
            self.catalog.unit_price(product_id).await?;
        }

        let cart = self
            .mutate(user_id, |lines| {
                let position = lines.iter().position(|line| line.product_id == product_id);
                match (position, quantity) {
                    (Some(index), 0) => {
                        lines.remove(index);
                        Ok(true)
                    }
                    (None, 0) => Err(AppError::NotFound),
                    (Some(index), _) if lines[index].quantity == quantity => Ok(false),
                    (Some(index), _) => {
                        lines[index].quantity = quantity;
                        Ok(true)
                    }
                    (None, _) => {
                        lines.push(CartLine {
                            product_id,
                            quantity,
                        });
                        Ok(true)
                    }
                }
            })
            .await?;

        cart.ok_or(AppError::NotFound)
    }

    /// Removing a product that is not in the cart is a no-op.
    pub async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> AppResult<Cart> {
        let cart = self
            .mutate(user_id, |lines| {
                let before = lines.len();
                lines.retain(|line| line.product_id != product_id);
                Ok(lines.len() != before)
            })
            .await?;

        Ok(cart.unwrap_or_else(|| Cart::empty(user_id)))
    }

    /// Deletes the cart. Returns whether there was one.
    pub async fn clear(&self, user_id: Uuid) -> AppResult<bool> {
        let result = Carts::delete_many()
            .filter(CartCol::UserId.eq(user_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Deletes the cart only if nobody touched it since `version` was read.
    pub async fn clear_snapshot(&self, user_id: Uuid, version: i32) -> AppResult<bool> {
        let result = Carts::delete_many()
            .filter(CartCol::UserId.eq(user_id))
            .filter(CartCol::Version.eq(version))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn find(&self, user_id: Uuid) -> AppResult<Option<CartModel>> {
        Ok(Carts::find_by_id(user_id).one(&self.db).await?)
    }

    /// Read-modify-write with a version guard. `apply` returns whether it
    /// changed anything; `None` means the user has no cart.
    async fn mutate<F>(&self, user_id: Uuid, mut apply: F) -> AppResult<Option<Cart>>
    where
        F: FnMut(&mut Vec<CartLine>) -> AppResult<bool>,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(current) = self.find(user_id).await? else {
                return Ok(None);
            };

            let mut lines = current.items.0.clone();
            if !apply(&mut lines)? {
                return Ok(Some(current.into()));
            }

            let total_price = self.total_for(&lines).await?;
            let now = Utc::now();
            let version = current.version + 1;
            let result = Carts::update_many()
                .set(CartActive {
                    items: Set(CartLines(lines.clone())),
                    total_price: Set(total_price),
                    version: Set(version),
                    updated_at: Set(now.into()),
                    ..Default::default()
                })
                .filter(CartCol::UserId.eq(user_id))
                .filter(CartCol::Version.eq(current.version))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 1 {
                tracing::debug!(%user_id, version, total_price, "cart updated");
                return Ok(Some(Cart {
                    user_id,
                    items: lines,
                    total_price,
                    version,
                    updated_at: now,
                }));
            }
            tracing::debug!(%user_id, attempt, "cart version moved, retrying");
        }

        Err(AppError::Conflict(
            "cart is being modified concurrently, please retry".to_string(),
        ))
    }

    /// Sum of current catalog price times quantity. Products that left the
    /// catalog count as zero.
    async fn total_for(&self, lines: &[CartLine]) -> AppResult<i64> {
        let mut total: i64 = 0;
        for line in lines {
            let price = match self.catalog.unit_price(line.product_id).await {
                Ok(price) => price,
                Err(AppError::NotFound) => {
                    tracing::warn!(product_id = %line.product_id, "product missing from catalog");
                    0
                }
                Err(err) => return Err(err),
            };
            total = price
                .checked_mul(i64::from(line.quantity))
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or_else(|| AppError::InvalidArgument("cart total is too large".to_string()))?;
        }
        Ok(total)
    }
}
