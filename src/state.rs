use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::GatewayConfig,
    gateway::PaymentGateway,
    middleware::auth::JwtKeys,
    services::{
        cart_service::CartStore, catalog::Catalog, checkout_service::CheckoutCoordinator,
        order_service::OrderLedger, payment_service::PaymentService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub jwt: JwtKeys,
    pub carts: CartStore,
    pub orders: OrderLedger,
    pub payments: PaymentService,
    pub checkout: CheckoutCoordinator,
}

impl AppState {
    pub fn new(
        orm: DatabaseConnection,
        jwt: JwtKeys,
        catalog: Arc<dyn Catalog>,
        gateway: Arc<dyn PaymentGateway>,
        gateway_config: GatewayConfig,
    ) -> Self {
        let carts = CartStore::new(orm.clone(), catalog);
        let orders = OrderLedger::new(orm.clone());
        let payments = PaymentService::new(orm.clone(), gateway, gateway_config);
        let checkout =
            CheckoutCoordinator::new(orm.clone(), carts.clone(), orders.clone(), payments.clone());
        Self {
            orm,
            jwt,
            carts,
            orders,
            payments,
            checkout,
        }
    }
}
