use sea_orm::{DatabaseConnection, TransactionTrait};
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderStatus, OrderWithItems, PaymentStatus},
    services::{cart_service::CartStore, order_service::OrderLedger, payment_service::PaymentService},
};

/// Runs the multi-step flows that touch more than one store. Each step goes
/// through the owning service; nothing here writes a table directly.
#[derive(Clone)]
pub struct CheckoutCoordinator {
    db: DatabaseConnection,
    carts: CartStore,
    orders: OrderLedger,
    payments: PaymentService,
}

impl CheckoutCoordinator {
    pub fn new(
        db: DatabaseConnection,
        carts: CartStore,
        orders: OrderLedger,
        payments: PaymentService,
    ) -> Self {
        Self {
            db,
            carts,
            orders,
            payments,
        }
    }

    /// Turns the cart into a pending order and empties it.
    pub async fn checkout(
        &self,
        user_id: Uuid,
        shipping_address: Option<String>,
    ) -> AppResult<OrderWithItems> {
        let cart = match self.carts.get(user_id).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => return Err(AppError::EmptyCart),
        };

        let shipping_address = shipping_address
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty());
        let order = self
            .orders
            .create(user_id, &cart.items, cart.total_price, shipping_address)
            .await?;

        // items added after the snapshot stay in the cart
        match self.carts.clear_snapshot(user_id, cart.version).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%user_id, order_id = %order.order.id, "cart changed during checkout, kept")
            }
            Err(err) => {
                tracing::warn!(error = %err, %user_id, "cart cleanup after checkout failed")
            }
        }

        audit::record(
            &self.db,
            Some(user_id),
            "checkout",
            "orders",
            json!({ "order_id": order.order.id, "total_price": order.order.total_price }),
        )
        .await;

        Ok(order)
    }

    /// Opens a pending order from the cart and leaves the cart as it is.
    pub async fn initiate(&self, user_id: Uuid) -> AppResult<OrderWithItems> {
        let cart = self.carts.get(user_id).await?.ok_or(AppError::EmptyCart)?;
        let order = self.orders.initiate(user_id, &cart).await?;

        audit::record(
            &self.db,
            Some(user_id),
            "order_initiated",
            "orders",
            json!({ "order_id": order.order.id }),
        )
        .await;

        Ok(order)
    }

    pub async fn complete_order(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        shipping_address: &str,
        payment_id: Uuid,
    ) -> AppResult<Order> {
        if shipping_address.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "shipping address is required".to_string(),
            ));
        }
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .filter(|found| found.order.user_id == user_id)
            .ok_or(AppError::NotFound)?;

        let payment = self.payments.status(payment_id, user_id).await?;
        if payment.order_id.is_some_and(|linked| linked != order_id) {
            return Err(AppError::Conflict(
                "payment belongs to another order".to_string(),
            ));
        }
        if matches!(
            payment.status,
            PaymentStatus::Failed | PaymentStatus::Refunded
        ) {
            return Err(AppError::Conflict(
                "payment can no longer settle an order".to_string(),
            ));
        }
        if order.order.status != OrderStatus::Pending {
            return Err(AppError::Conflict(
                "only pending orders can be completed".to_string(),
            ));
        }

        // the link and the status flip commit together: a completion that
        // loses the race leaves its payment unlinked
        let txn = self.db.begin().await?;
        let completed = self
            .orders
            .complete_in(&txn, order_id, shipping_address, payment_id)
            .await?;
        self.payments
            .attach_to_order_in(&txn, payment_id, order_id)
            .await?;
        txn.commit().await?;

        if let Err(err) = self.carts.clear(user_id).await {
            tracing::warn!(error = %err, %user_id, "cart cleanup after completion failed");
        }

        audit::record(
            &self.db,
            Some(user_id),
            "order_completed",
            "orders",
            json!({ "order_id": order_id, "payment_id": payment_id }),
        )
        .await;

        Ok(completed)
    }

    pub async fn cancel_order(&self, order_id: Uuid, actor: &AuthUser) -> AppResult<Order> {
        let order = self
            .orders
            .update_status(order_id, OrderStatus::Cancelled, actor)
            .await?;

        audit::record(
            &self.db,
            Some(actor.user_id),
            "order_cancelled",
            "orders",
            json!({ "order_id": order_id }),
        )
        .await;

        Ok(order)
    }

    /// Owners may not delete an order they have already paid for.
    pub async fn delete_order(&self, order_id: Uuid, actor: &AuthUser) -> AppResult<()> {
        if !actor.is_admin() {
            let order = self
                .orders
                .find_by_id(order_id)
                .await?
                .ok_or(AppError::NotFound)?
                .order;
            if order.user_id != actor.user_id {
                return Err(AppError::Forbidden);
            }
            if self.payments.order_has_capture(order_id, None).await? {
                return Err(AppError::Conflict(
                    "order has a captured payment".to_string(),
                ));
            }
        }

        self.orders.delete(order_id, actor).await?;

        audit::record(
            &self.db,
            Some(actor.user_id),
            "order_deleted",
            "orders",
            json!({ "order_id": order_id }),
        )
        .await;

        Ok(())
    }
}
