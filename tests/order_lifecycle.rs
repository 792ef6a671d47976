mod common;

use common::{TestApp, actor};
use marketplace_checkout::{
    error::AppError,
    middleware::auth::{AuthUser, Role},
    models::{Order, OrderStatus},
};
use uuid::Uuid;

async fn place_order(app: &TestApp, owner: &AuthUser) -> Order {
    let product = app.catalog.product(10);
    app.state
        .carts
        .add_item(owner.user_id, product, 1)
        .await
        .unwrap();
    app.state
        .checkout
        .checkout(owner.user_id, None)
        .await
        .unwrap()
        .order
}

#[tokio::test]
async fn seller_ships_and_delivers() {
    let app = TestApp::new().await;
    let owner = actor(Role::User);
    let seller = actor(Role::Seller);
    let order = place_order(&app, &owner).await;

    let shipped = app
        .state
        .orders
        .update_status(order.id, OrderStatus::Shipped, &seller)
        .await
        .unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);

    let delivered = app
        .state
        .orders
        .update_status(order.id, OrderStatus::Delivered, &seller)
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);

    // terminal: nothing leaves delivered
    let err = app
        .state
        .orders
        .update_status(order.id, OrderStatus::Shipped, &seller)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    let err = app
        .state
        .checkout
        .cancel_order(order.id, &owner)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn plain_users_cannot_drive_fulfilment() {
    let app = TestApp::new().await;
    let owner = actor(Role::User);
    let order = place_order(&app, &owner).await;

    let err = app
        .state
        .orders
        .update_status(order.id, OrderStatus::Shipped, &owner)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let stored = app.state.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn completed_is_not_reachable_by_hand() {
    let app = TestApp::new().await;
    let owner = actor(Role::User);
    let admin = actor(Role::Admin);
    let order = place_order(&app, &owner).await;

    let err = app
        .state
        .orders
        .update_status(order.id, OrderStatus::Completed, &admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[tokio::test]
async fn undefined_edges_conflict_before_roles_are_checked() {
    let app = TestApp::new().await;
    let owner = actor(Role::User);
    let order = place_order(&app, &owner).await;

    let err = app
        .state
        .orders
        .update_status(order.id, OrderStatus::Delivered, &owner)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = app
        .state
        .orders
        .update_status(Uuid::new_v4(), OrderStatus::Shipped, &actor(Role::Admin))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[tokio::test]
async fn only_the_owner_or_an_admin_may_cancel() {
    let app = TestApp::new().await;
    let owner = actor(Role::User);
    let order = place_order(&app, &owner).await;

    for outsider in [actor(Role::User), actor(Role::Seller)] {
        let err = app
            .state
            .checkout
            .cancel_order(order.id, &outsider)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    let cancelled = app
        .state
        .checkout
        .cancel_order(order.id, &owner)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let other = place_order(&app, &owner).await;
    let cancelled = app
        .state
        .checkout
        .cancel_order(other.id, &actor(Role::Admin))
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn delete_requires_ownership_unless_admin() {
    let app = TestApp::new().await;
    let owner = actor(Role::User);
    let first = place_order(&app, &owner).await;
    let second = place_order(&app, &owner).await;

    let err = app
        .state
        .checkout
        .delete_order(first.id, &actor(Role::User))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
    let err = app
        .state
        .orders
        .delete(first.id, &actor(Role::Seller))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    app.state.checkout.delete_order(first.id, &owner).await.unwrap();
    app.state
        .checkout
        .delete_order(second.id, &actor(Role::Admin))
        .await
        .unwrap();

    assert!(app.state.orders.find_by_id(first.id).await.unwrap().is_none());
    assert!(app.state.orders.find_by_id(second.id).await.unwrap().is_none());
    assert!(matches!(
        app.state.checkout.delete_order(first.id, &owner).await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn queries_filter_by_user_and_status() {
    let app = TestApp::new().await;
    let alice = actor(Role::User);
    let bob = actor(Role::User);
    let seller = actor(Role::Seller);

    let a1 = place_order(&app, &alice).await;
    let a2 = place_order(&app, &alice).await;
    let b1 = place_order(&app, &bob).await;
    app.state
        .checkout
        .cancel_order(a1.id, &alice)
        .await
        .unwrap();
    app.state
        .orders
        .update_status(b1.id, OrderStatus::Shipped, &seller)
        .await
        .unwrap();

    let orders = &app.state.orders;
    assert_eq!(orders.find_by_user(alice.user_id, None).await.unwrap().len(), 2);

    let cancelled = orders
        .find_by_user(alice.user_id, Some(OrderStatus::Cancelled))
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, a1.id);

    let active = orders.find_active_by_user(alice.user_id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, a2.id);

    let shipped = orders.find_by_status(OrderStatus::Shipped).await.unwrap();
    assert_eq!(shipped.len(), 1);
    assert_eq!(shipped[0].id, b1.id);

    assert_eq!(orders.find_all().await.unwrap().len(), 3);
    assert_eq!(orders.find_recent(Some(2)).await.unwrap().len(), 2);
    assert_eq!(orders.find_recent(None).await.unwrap().len(), 3);

    let (page, total) = orders.page(None, 2, 0, true).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(total, 3);
    let (page, total) = orders
        .page(Some(OrderStatus::Pending), 10, 0, false)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].id, a2.id);
}
