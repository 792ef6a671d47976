use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, Role},
    models::{Cart, CartLine, Order, OrderItem, OrderStatus, OrderWithItems},
};

pub const DEFAULT_RECENT_LIMIT: u64 = 10;
pub const MAX_RECENT_LIMIT: u64 = 100;

/// Who may drive a given status edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionActor {
    /// Only the checkout flow itself; never a caller of `update_status`.
    System,
    /// Sellers and admins.
    Fulfilment,
    /// The user who placed the order, or an admin.
    OwnerOrAdmin,
}

/// The order state machine. `None` means the edge does not exist.
pub fn transition_rule(from: OrderStatus, to: OrderStatus) -> Option<TransitionActor> {
    use OrderStatus::*;

    match (from, to) {
        (Pending, Completed) => Some(TransitionActor::System),
        (Pending | Completed, Shipped) => Some(TransitionActor::Fulfilment),
        (Shipped, Delivered) => Some(TransitionActor::Fulfilment),
        (Pending | Completed | Shipped, Cancelled) => Some(TransitionActor::OwnerOrAdmin),
        _ => None,
    }
}

fn authorize(rule: TransitionActor, order: &OrderModel, actor: &AuthUser) -> AppResult<()> {
    let allowed = match rule {
        TransitionActor::System => false,
        TransitionActor::Fulfilment => matches!(actor.role, Role::Seller | Role::Admin),
        TransitionActor::OwnerOrAdmin => actor.is_admin() || order.user_id == actor.user_id,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

pub fn build_invoice_number(order_id: Uuid) -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = order_id.simple().to_string();
    format!("INV-{}-{}", date, &suffix[..8])
}

#[derive(Clone)]
pub struct OrderLedger {
    db: DatabaseConnection,
}

impl OrderLedger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        items: &[CartLine],
        total_price: i64,
        shipping_address: Option<String>,
    ) -> AppResult<OrderWithItems> {
        if items.is_empty() {
            return Err(AppError::InvalidArgument(
                "order must contain at least one item".to_string(),
            ));
        }
        if items.iter().any(|line| line.quantity <= 0) {
            return Err(AppError::InvalidArgument(
                "order has an invalid quantity".to_string(),
            ));
        }
        if total_price < 0 {
            return Err(AppError::InvalidArgument(
                "order total must not be negative".to_string(),
            ));
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let order = OrderActive {
            id: Set(order_id),
            user_id: Set(user_id),
            total_price: Set(total_price),
            status: Set(OrderStatus::Pending),
            shipping_address: Set(shipping_address),
            payment_id: Set(None),
            invoice_number: Set(build_invoice_number(order_id)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        let mut order_items = Vec::with_capacity(items.len());
        for line in items {
            let item = OrderItemActive {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                created_at: Set(now.into()),
            }
            .insert(&txn)
            .await?;
            order_items.push(OrderItem::from(item));
        }

        txn.commit().await?;

        tracing::info!(order_id = %order.id, %user_id, total_price, "order created");
        Ok(OrderWithItems {
            order: order.into(),
            items: order_items,
        })
    }

    /// Opens a pending order from the cart as it is now. The cart is left alone.
    pub async fn initiate(&self, user_id: Uuid, cart: &Cart) -> AppResult<OrderWithItems> {
        if cart.is_empty() {
            return Err(AppError::EmptyCart);
        }
        self.create(user_id, &cart.items, cart.total_price, None).await
    }

    pub async fn complete(
        &self,
        order_id: Uuid,
        shipping_address: &str,
        payment_id: Uuid,
    ) -> AppResult<Order> {
        self.complete_in(&self.db, order_id, shipping_address, payment_id)
            .await
    }

    /// `complete` on a caller-supplied connection, so the status flip can
    /// commit or roll back together with the payment link.
    pub async fn complete_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        shipping_address: &str,
        payment_id: Uuid,
    ) -> AppResult<Order> {
        let shipping_address = shipping_address.trim();
        if shipping_address.is_empty() {
            return Err(AppError::InvalidArgument(
                "shipping address is required".to_string(),
            ));
        }

        let result = Orders::update_many()
            .set(OrderActive {
                status: Set(OrderStatus::Completed),
                shipping_address: Set(Some(shipping_address.to_string())),
                payment_id: Set(Some(payment_id)),
                updated_at: Set(Utc::now().into()),
                ..Default::default()
            })
            .filter(OrderCol::Id.eq(order_id))
            .filter(OrderCol::Status.eq(OrderStatus::Pending))
            .exec(conn)
            .await?;

        let order = Orders::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or(AppError::NotFound)?;
        if result.rows_affected == 0 {
            return Err(AppError::Conflict(format!(
                "order is {:?}, only pending orders can be completed",
                order.status
            )));
        }

        tracing::info!(%order_id, %payment_id, "order completed");
        Ok(order.into())
    }

    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &AuthUser,
    ) -> AppResult<Order> {
        let order = self.find_model(order_id).await?.ok_or(AppError::NotFound)?;
        let from = order.status;

        let rule = transition_rule(from, new_status).ok_or_else(|| {
            AppError::Conflict(format!("cannot move order from {from:?} to {new_status:?}"))
        })?;
        authorize(rule, &order, actor)?;

        let now = Utc::now();
        let result = Orders::update_many()
            .set(OrderActive {
                status: Set(new_status),
                updated_at: Set(now.into()),
                ..Default::default()
            })
            .filter(OrderCol::Id.eq(order_id))
            .filter(OrderCol::Status.eq(from))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::Conflict(
                "order status changed concurrently".to_string(),
            ));
        }

        tracing::info!(%order_id, ?from, to = ?new_status, actor = %actor.user_id, "order status changed");
        let mut order = Order::from(order);
        order.status = new_status;
        order.updated_at = now;
        Ok(order)
    }

    pub async fn find_by_id(&self, order_id: Uuid) -> AppResult<Option<OrderWithItems>> {
        let Some(order) = self.find_model(order_id).await? else {
            return Ok(None);
        };
        let items = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(order.id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(OrderItem::from)
            .collect();

        Ok(Some(OrderWithItems {
            order: order.into(),
            items,
        }))
    }

    pub async fn find_by_user(
        &self,
        user_id: Uuid,
        status: Option<OrderStatus>,
    ) -> AppResult<Vec<Order>> {
        let mut condition = Condition::all().add(OrderCol::UserId.eq(user_id));
        if let Some(status) = status {
            condition = condition.add(OrderCol::Status.eq(status));
        }
        self.select(condition).await
    }

    /// Everything the user has not cancelled.
    pub async fn find_active_by_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        self.select(
            Condition::all()
                .add(OrderCol::UserId.eq(user_id))
                .add(OrderCol::Status.ne(OrderStatus::Cancelled)),
        )
        .await
    }

    pub async fn find_by_status(&self, status: OrderStatus) -> AppResult<Vec<Order>> {
        self.select(Condition::all().add(OrderCol::Status.eq(status)))
            .await
    }

    pub async fn find_all(&self) -> AppResult<Vec<Order>> {
        self.select(Condition::all()).await
    }

    /// Newest first. `None` means the default of ten.
    pub async fn find_recent(&self, limit: Option<u64>) -> AppResult<Vec<Order>> {
        let limit = limit
            .unwrap_or(DEFAULT_RECENT_LIMIT)
            .clamp(1, MAX_RECENT_LIMIT);
        let orders = Orders::find()
            .order_by_desc(OrderCol::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(orders.into_iter().map(Order::from).collect())
    }

    /// One page of all orders, optionally narrowed to a status. Returns the
    /// page and the total number of matching orders.
    pub async fn page(
        &self,
        status: Option<OrderStatus>,
        limit: u64,
        offset: u64,
        newest_first: bool,
    ) -> AppResult<(Vec<Order>, u64)> {
        let mut finder = Orders::find();
        if let Some(status) = status {
            finder = finder.filter(OrderCol::Status.eq(status));
        }
        finder = if newest_first {
            finder.order_by_desc(OrderCol::CreatedAt)
        } else {
            finder.order_by_asc(OrderCol::CreatedAt)
        };

        let total = finder.clone().count(&self.db).await?;
        let orders = finder
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Order::from)
            .collect();
        Ok((orders, total))
    }

    /// Admins delete anything; everybody else only their own orders.
    pub async fn delete(&self, order_id: Uuid, actor: &AuthUser) -> AppResult<()> {
        let order = self.find_model(order_id).await?.ok_or(AppError::NotFound)?;
        if !actor.is_admin() && order.user_id != actor.user_id {
            return Err(AppError::Forbidden);
        }

        let txn = self.db.begin().await?;
        OrderItems::delete_many()
            .filter(OrderItemCol::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        Orders::delete_by_id(order_id).exec(&txn).await?;
        txn.commit().await?;

        tracing::info!(%order_id, actor = %actor.user_id, "order deleted");
        Ok(())
    }

    async fn find_model(&self, order_id: Uuid) -> AppResult<Option<OrderModel>> {
        Ok(Orders::find_by_id(order_id).one(&self.db).await?)
    }

    async fn select(&self, condition: Condition) -> AppResult<Vec<Order>> {
        let orders = Orders::find()
            .filter(condition)
            .order_by_desc(OrderCol::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(orders.into_iter().map(Order::from).collect())
    }
}
