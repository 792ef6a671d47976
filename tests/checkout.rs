mod common;

use common::{TestApp, actor};
use marketplace_checkout::{
    error::AppError,
    middleware::auth::Role,
    models::{CartLine, OrderStatus, PaymentStatus},
};
use uuid::Uuid;

#[tokio::test]
async fn checkout_snapshots_the_cart_and_clears_it() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let p1 = app.catalog.product(10);
    let p2 = app.catalog.product(5);
    app.state.carts.add_item(user, p1, 2).await.unwrap();
    app.state.carts.add_item(user, p2, 1).await.unwrap();

    let placed = app
        .state
        .checkout
        .checkout(user, Some("  1 Ferris Lane  ".into()))
        .await
        .unwrap();

    assert_eq!(placed.order.total_price, 25);
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.user_id, user);
    assert_eq!(placed.order.shipping_address.as_deref(), Some("1 Ferris Lane"));
    assert!(placed.order.invoice_number.starts_with("INV-"));
    assert_eq!(placed.items.len(), 2);
    assert!(app.state.carts.get(user).await.unwrap().is_none());

    let stored = app
        .state
        .orders
        .find_by_id(placed.order.id)
        .await
        .unwrap()
        .unwrap();
    let quantity_of = |product| {
        stored
            .items
            .iter()
            .find(|item| item.product_id == product)
            .map(|item| item.quantity)
    };
    assert_eq!(quantity_of(p1), Some(2));
    assert_eq!(quantity_of(p2), Some(1));
}

#[tokio::test]
async fn order_total_is_frozen_at_checkout() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.catalog.product(10);
    app.state.carts.add_item(user, product, 3).await.unwrap();

    let placed = app.state.checkout.checkout(user, None).await.unwrap();
    app.catalog.set(product, 1_000);

    let stored = app
        .state
        .orders
        .find_by_id(placed.order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.order.total_price, 30);
}

#[tokio::test]
async fn checkout_of_an_empty_or_missing_cart_is_rejected() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();

    assert!(matches!(
        app.state.checkout.checkout(user, None).await,
        Err(AppError::EmptyCart)
    ));

    app.state.carts.get_or_create(user).await.unwrap();
    assert!(matches!(
        app.state.checkout.checkout(user, None).await,
        Err(AppError::EmptyCart)
    ));
    // the empty cart is left alone
    assert!(app.state.carts.get(user).await.unwrap().is_some());
    assert!(app.state.orders.find_by_user(user, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn ledger_refuses_orders_without_items() {
    let app = TestApp::new().await;
    let err = app
        .state
        .orders
        .create(Uuid::new_v4(), &[], 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));

    let bad_line = [CartLine {
        product_id: Uuid::new_v4(),
        quantity: 0,
    }];
    let err = app
        .state
        .orders
        .create(Uuid::new_v4(), &bad_line, 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));
}

#[tokio::test]
async fn initiate_keeps_the_cart() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.catalog.product(8);
    app.state.carts.add_item(user, product, 2).await.unwrap();

    let opened = app.state.checkout.initiate(user).await.unwrap();

    assert_eq!(opened.order.total_price, 16);
    assert_eq!(opened.order.shipping_address, None);
    assert_eq!(opened.order.payment_id, None);
    let cart = app.state.carts.get(user).await.unwrap().unwrap();
    assert_eq!(cart.quantity_of(product), Some(2));

    assert!(matches!(
        app.state.checkout.initiate(Uuid::new_v4()).await,
        Err(AppError::EmptyCart)
    ));
}

#[tokio::test]
async fn complete_order_links_payment_and_empties_cart() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.catalog.product(12);
    app.state.carts.add_item(user, product, 1).await.unwrap();
    let opened = app.state.checkout.initiate(user).await.unwrap();
    let payment = app
        .state
        .payments
        .cash_on_delivery(user, 12, "usd")
        .await
        .unwrap();

    let completed = app
        .state
        .checkout
        .complete_order(opened.order.id, user, "221B Baker Street", payment.id)
        .await
        .unwrap();

    assert_eq!(completed.status, OrderStatus::Completed);
    assert_eq!(completed.payment_id, Some(payment.id));
    assert_eq!(completed.shipping_address.as_deref(), Some("221B Baker Street"));
    let linked = app.state.payments.status(payment.id, user).await.unwrap();
    assert_eq!(linked.order_id, Some(opened.order.id));
    assert!(app.state.carts.get(user).await.unwrap().is_none());

    // a second completion hits the state machine
    assert!(matches!(
        app.state
            .checkout
            .complete_order(opened.order.id, user, "elsewhere", payment.id)
            .await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn complete_order_checks_both_owners() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let product = app.catalog.product(5);
    app.state.carts.add_item(owner, product, 1).await.unwrap();
    let order = app.state.checkout.checkout(owner, None).await.unwrap().order;
    let owners_payment = app
        .state
        .payments
        .cash_on_delivery(owner, 5, "USD")
        .await
        .unwrap();
    let strangers_payment = app
        .state
        .payments
        .cash_on_delivery(stranger, 5, "USD")
        .await
        .unwrap();

    assert!(matches!(
        app.state
            .checkout
            .complete_order(order.id, stranger, "addr", strangers_payment.id)
            .await,
        Err(AppError::NotFound)
    ));
    assert!(matches!(
        app.state
            .checkout
            .complete_order(order.id, owner, "addr", strangers_payment.id)
            .await,
        Err(AppError::NotFoundOrUnauthorized)
    ));
    assert!(matches!(
        app.state
            .checkout
            .complete_order(order.id, owner, "   ", owners_payment.id)
            .await,
        Err(AppError::InvalidArgument(_))
    ));

    let untouched = app.state.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(untouched.order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn owner_cannot_delete_a_paid_order_but_admin_can() {
    let app = TestApp::new().await;
    let owner = actor(Role::User);
    let admin = actor(Role::Admin);
    let product = app.catalog.product(40);
    app.state.carts.add_item(owner.user_id, product, 1).await.unwrap();
    let order = app.state.checkout.initiate(owner.user_id).await.unwrap().order;

    let created = app
        .state
        .payments
        .create(owner.user_id, 40, "USD", None)
        .await
        .unwrap();
    let captured = app
        .state
        .payments
        .capture(&created.payment.transaction_id, owner.user_id)
        .await
        .unwrap();
    assert_eq!(captured.status, PaymentStatus::Completed);
    app.state
        .checkout
        .complete_order(order.id, owner.user_id, "addr", captured.id)
        .await
        .unwrap();

    assert!(matches!(
        app.state.checkout.delete_order(order.id, &owner).await,
        Err(AppError::Conflict(_))
    ));
    app.state.checkout.delete_order(order.id, &admin).await.unwrap();
    assert!(app.state.orders.find_by_id(order.id).await.unwrap().is_none());
}

#[tokio::test]
async fn racing_completions_link_only_the_winning_payment() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.catalog.product(30);
    app.state.carts.add_item(user, product, 1).await.unwrap();
    let order = app.state.checkout.initiate(user).await.unwrap().order;
    let mut payments = Vec::new();
    for _ in 0..2 {
        payments.push(
            app.state
                .payments
                .create(user, 30, "USD", None)
                .await
                .unwrap()
                .payment,
        );
    }

    let (first, second) = tokio::join!(
        app.state
            .checkout
            .complete_order(order.id, user, "1 Ferris Lane", payments[0].id),
        app.state
            .checkout
            .complete_order(order.id, user, "1 Ferris Lane", payments[1].id),
    );
    let (winner, loser) = match (first, second) {
        (Ok(_), Err(AppError::Conflict(_))) => (&payments[0], &payments[1]),
        (Err(AppError::Conflict(_)), Ok(_)) => (&payments[1], &payments[0]),
        other => panic!("expected exactly one completion, got {other:?}"),
    };

    let stored = app.state.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.order.status, OrderStatus::Completed);
    assert_eq!(stored.order.payment_id, Some(winner.id));
    let winner = app.state.payments.status(winner.id, user).await.unwrap();
    let loser = app.state.payments.status(loser.id, user).await.unwrap();
    assert_eq!(winner.order_id, Some(order.id));
    assert_eq!(loser.order_id, None);
}
