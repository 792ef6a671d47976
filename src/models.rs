use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::{carts, order_items, orders, payments};

pub use crate::entity::{carts::CartLine, orders::OrderStatus, payments::PaymentStatus};

pub const METHOD_PAYPAL: &str = "paypal";
pub const METHOD_CASH_ON_DELIVERY: &str = "cash_on_delivery";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Cart {
    pub user_id: Uuid,
    pub items: Vec<CartLine>,
    pub total_price: i64,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// View of a cart that has never been stored.
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            items: Vec::new(),
            total_price: 0,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn quantity_of(&self, product_id: Uuid) -> Option<i32> {
        self.items
            .iter()
            .find(|line| line.product_id == product_id)
            .map(|line| line.quantity)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<carts::Model> for Cart {
    fn from(model: carts::Model) -> Self {
        Self {
            user_id: model.user_id,
            items: model.items.0,
            total_price: model.total_price,
            version: model.version,
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_price: i64,
    pub status: OrderStatus,
    pub shipping_address: Option<String>,
    pub payment_id: Option<Uuid>,
    pub invoice_number: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<orders::Model> for Order {
    fn from(model: orders::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            total_price: model.total_price,
            status: model.status,
            shipping_address: model.shipping_address,
            payment_id: model.payment_id,
            invoice_number: model.invoice_number,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

impl From<order_items::Model> for OrderItem {
    fn from(model: order_items::Model) -> Self {
        Self {
            product_id: model.product_id,
            quantity: model.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub transaction_id: String,
    pub amount: i64,
    pub currency: String,
    pub payment_method: String,
    pub status: PaymentStatus,
    pub refunded_amount: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<payments::Model> for Payment {
    fn from(model: payments::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            order_id: model.order_id,
            transaction_id: model.transaction_id,
            amount: model.amount,
            currency: model.currency,
            payment_method: model.payment_method,
            status: model.status,
            refunded_amount: model.refunded_amount,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}
