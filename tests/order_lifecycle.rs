mod common;

use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use shop_orders::domain::coupon::{CouponError, CouponKind, CouponSnapshot, CouponStatus};
use shop_orders::domain::order::{
    CreateOrder, OrderAction, OrderError, OrderEvent, OrderLineRequest, OrderStatus, PaymentWindow,
};
use shop_orders::store::KvStore;

use common::{receiver, yuan, Harness};

fn coupon_for(owner_id: Uuid, kind: CouponKind, min_amount: Option<Decimal>) -> CouponSnapshot {
    let now = Utc::now();
    CouponSnapshot {
        id: Uuid::new_v4(),
        owner_id,
        name: "spring sale".to_string(),
        kind,
        min_amount,
        valid_from: now - chrono::Duration::days(1),
        valid_until: now + chrono::Duration::days(1),
        status: CouponStatus::Unused,
    }
}

#[tokio::test]
async fn checkout_prices_lines_and_deducts_stock() {
    let h = Harness::new();
    let pen = h.add_product(yuan(350), 10);
    let book = h.add_product(yuan(4200), 3);
    let buyer = Uuid::new_v4();

    let order = h
        .services
        .orders
        .create(
            CreateOrder::new(
                buyer,
                vec![OrderLineRequest::new(pen, 4), OrderLineRequest::new(book, 1)],
                receiver(),
            )
            .with_remark("leave at the door"),
        )
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert!(order.order_no.starts_with("ORD"));
    assert_eq!(order.lines.len(), 2);
    assert_eq!(order.lines[0].unit_price, yuan(350));
    assert_eq!(order.original_amount, yuan(5600));
    assert_eq!(order.discount, Decimal::ZERO);
    assert_eq!(order.payable_amount, yuan(5600));
    assert_eq!(order.remark.as_deref(), Some("leave at the door"));
    assert_eq!(h.stock.stock_of(pen), Some(6));
    let by_no = h.services.orders.get_order_by_no(&order.order_no).await.unwrap();
    assert_eq!(by_no.map(|o| o.id), Some(order.id));
    assert_eq!(h.stock.stock_of(book), Some(2));

    let events = h.notifier.wait_for(1, Duration::from_secs(1)).await;
    assert!(matches!(&events[0], OrderEvent::Created(data) if data.order_id == order.id));
}

#[tokio::test]
async fn checkout_rejects_bad_requests_before_touching_stock() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 5);
    let buyer = Uuid::new_v4();
    let orders = &h.services.orders;

    let empty = orders.create(CreateOrder::new(buyer, vec![], receiver())).await;
    assert!(matches!(empty, Err(OrderError::EmptyLines)));

    let zero = orders
        .create(CreateOrder::new(buyer, vec![OrderLineRequest::new(product, 0)], receiver()))
        .await;
    assert!(matches!(zero, Err(OrderError::InvalidQuantity { quantity: 0, .. })));

    let missing = Uuid::new_v4();
    let unknown = orders
        .create(CreateOrder::new(buyer, vec![OrderLineRequest::new(missing, 1)], receiver()))
        .await;
    assert!(matches!(unknown, Err(OrderError::ProductUnavailable(id)) if id == missing));

    assert_eq!(h.stock.stock_of(product), Some(5));
    assert!(h.orders.is_empty());
}

#[tokio::test]
async fn off_sale_product_is_unavailable() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 5);
    let mut snapshot = shop_orders::store::StockRepository::find_product(h.stock.as_ref(), product)
        .await
        .unwrap()
        .unwrap();
    snapshot.on_sale = false;
    h.stock.add_product(snapshot, 5);

    let result = h
        .services
        .orders
        .create(CreateOrder::new(Uuid::new_v4(), vec![OrderLineRequest::new(product, 1)], receiver()))
        .await;

    assert!(matches!(result, Err(OrderError::ProductUnavailable(_))));
}

#[tokio::test]
async fn coupon_discount_applied_and_coupon_marked_used() {
    let h = Harness::new();
    let product = h.add_product(yuan(10000), 5);
    let buyer = Uuid::new_v4();
    let coupon = coupon_for(buyer, CouponKind::FlatAmount { amount: yuan(1500) }, Some(yuan(5000)));
    h.coupons.add_coupon(coupon.clone());

    let order = h
        .services
        .orders
        .create(CreateOrder::new(buyer, vec![OrderLineRequest::new(product, 1)], receiver()).with_coupon(coupon.id))
        .await
        .unwrap();

    assert_eq!(order.discount, yuan(1500));
    assert_eq!(order.payable_amount, yuan(8500));
    assert_eq!(order.coupon_id, Some(coupon.id));
    assert_eq!(h.coupons.coupon(coupon.id).unwrap().status, CouponStatus::Used);
    assert_eq!(h.coupons.redeemed_by(coupon.id), Some(order.id));
}

#[tokio::test]
async fn coupon_violations_reject_checkout_without_side_effects() {
    let h = Harness::new();
    let product = h.add_product(yuan(3000), 5);
    let buyer = Uuid::new_v4();

    let someone_elses = coupon_for(Uuid::new_v4(), CouponKind::FreeShipping, None);
    let minimum_not_met = coupon_for(buyer, CouponKind::FlatAmount { amount: yuan(500) }, Some(yuan(5000)));
    let too_large = coupon_for(buyer, CouponKind::FlatAmount { amount: yuan(3000) }, None);
    for coupon in [&someone_elses, &minimum_not_met, &too_large] {
        h.coupons.add_coupon(coupon.clone());
    }

    let attempt = |coupon_id: Uuid| {
        h.services.orders.create(
            CreateOrder::new(buyer, vec![OrderLineRequest::new(product, 1)], receiver()).with_coupon(coupon_id),
        )
    };

    assert!(matches!(
        attempt(someone_elses.id).await,
        Err(OrderError::Coupon(CouponError::NotOwner(_)))
    ));
    assert!(matches!(
        attempt(minimum_not_met.id).await,
        Err(OrderError::Coupon(CouponError::BelowMinimum { .. }))
    ));
    assert!(matches!(
        attempt(too_large.id).await,
        Err(OrderError::Coupon(CouponError::DiscountTooLarge { .. }))
    ));
    assert!(matches!(
        attempt(Uuid::new_v4()).await,
        Err(OrderError::Coupon(CouponError::NotFound(_)))
    ));

    assert_eq!(h.stock.stock_of(product), Some(5));
    assert!(h.orders.is_empty());
}

#[tokio::test]
async fn coupon_mark_failure_after_commit_keeps_the_order() {
    let h = Harness::new();
    let product = h.add_product(yuan(10000), 5);
    let buyer = Uuid::new_v4();
    let coupon = coupon_for(buyer, CouponKind::FreeShipping, None);
    h.coupons.add_coupon(coupon.clone());
    h.coupons.fail_mark_used(true);

    let order = h
        .services
        .orders
        .create(CreateOrder::new(buyer, vec![OrderLineRequest::new(product, 1)], receiver()).with_coupon(coupon.id))
        .await
        .unwrap();

    assert_eq!(order.discount, yuan(1000));
    assert_eq!(h.orders.len(), 1);
    assert_eq!(h.coupons.coupon(coupon.id).unwrap().status, CouponStatus::Unused);
}

#[tokio::test]
async fn commit_failure_restores_all_stock() {
    let h = Harness::new();
    let a = h.add_product(yuan(100), 5);
    let b = h.add_product(yuan(100), 5);
    h.orders.fail_next_commit();

    let result = h
        .services
        .orders
        .create(CreateOrder::new(
            Uuid::new_v4(),
            vec![OrderLineRequest::new(a, 2), OrderLineRequest::new(b, 3)],
            receiver(),
        ))
        .await;

    assert!(matches!(result, Err(OrderError::Internal(_))));
    assert_eq!(h.stock.stock_of(a), Some(5));
    assert_eq!(h.stock.stock_of(b), Some(5));
    assert!(h.orders.is_empty());
}

#[tokio::test]
async fn happy_path_status_sequence() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 5);
    let orders = &h.services.orders;
    let order = orders
        .create(CreateOrder::new(Uuid::new_v4(), vec![OrderLineRequest::new(product, 1)], receiver()))
        .await
        .unwrap();

    let paid = orders.pay(order.id).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert!(paid.paid_at.is_some());

    let shipped = orders.ship(order.id).await.unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert!(shipped.shipped_at.is_some());

    let completed = orders.complete(order.id).await.unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert!(completed.finished_at.is_some());

    let stored = h.services.orders.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Completed);

    let events = h.notifier.wait_for(4, Duration::from_secs(1)).await;
    let mut types: Vec<&str> = events.iter().map(OrderEvent::event_type).collect();
    types.sort_unstable();
    assert_eq!(types, vec!["OrderCompleted", "OrderCreated", "OrderPaid", "OrderShipped"]);
    assert!(events.iter().all(|e| e.data().order_id == order.id));
}

#[tokio::test]
async fn out_of_order_transitions_are_rejected() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 5);
    let orders = &h.services.orders;
    let order = orders
        .create(CreateOrder::new(Uuid::new_v4(), vec![OrderLineRequest::new(product, 1)], receiver()))
        .await
        .unwrap();

    assert!(matches!(
        orders.ship(order.id).await,
        Err(OrderError::InvalidState { status: OrderStatus::PendingPayment, action: OrderAction::Ship, .. })
    ));
    assert!(matches!(
        orders.complete(order.id).await,
        Err(OrderError::InvalidState { action: OrderAction::Complete, .. })
    ));

    orders.pay(order.id).await.unwrap();
    assert!(matches!(
        orders.pay(order.id).await,
        Err(OrderError::InvalidState { status: OrderStatus::Paid, .. })
    ));
    assert!(matches!(
        orders.cancel(order.id).await,
        Err(OrderError::InvalidState { status: OrderStatus::Paid, action: OrderAction::Cancel, .. })
    ));

    // Stock stays taken by a paid order
    assert_eq!(h.stock.stock_of(product), Some(4));
    assert!(matches!(orders.pay(Uuid::new_v4()).await, Err(OrderError::NotFound(_))));
}

#[tokio::test]
async fn cancel_restores_stock_and_is_terminal() {
    let h = Harness::new();
    let a = h.add_product(yuan(100), 5);
    let b = h.add_product(yuan(100), 5);
    let orders = &h.services.orders;
    let order = orders
        .create(CreateOrder::new(
            Uuid::new_v4(),
            vec![OrderLineRequest::new(a, 2), OrderLineRequest::new(b, 1)],
            receiver(),
        ))
        .await
        .unwrap();

    let cancelled = orders.cancel(order.id).await.unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(h.stock.stock_of(a), Some(5));
    assert_eq!(h.stock.stock_of(b), Some(5));
    assert!(matches!(orders.pay(order.id).await, Err(OrderError::InvalidState { .. })));
    assert!(matches!(orders.cancel(order.id).await, Err(OrderError::InvalidState { .. })));
    assert_eq!(h.stock.stock_of(a), Some(5));
}

#[tokio::test]
async fn concurrent_cancels_restore_stock_once() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 10);
    let order = h
        .services
        .orders
        .create(CreateOrder::new(Uuid::new_v4(), vec![OrderLineRequest::new(product, 3)], receiver()))
        .await
        .unwrap();
    assert_eq!(h.stock.stock_of(product), Some(7));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let orders = h.services.orders.clone();
        handles.push(tokio::spawn(async move { orders.cancel(order.id).await }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(OrderError::InvalidState { status, .. }) => assert_eq!(status, OrderStatus::Cancelled),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(h.stock.stock_of(product), Some(10));
}

#[tokio::test]
async fn pay_and_cancel_race_has_one_winner() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 10);
    let order = h
        .services
        .orders
        .create(CreateOrder::new(Uuid::new_v4(), vec![OrderLineRequest::new(product, 2)], receiver()))
        .await
        .unwrap();

    let payer = h.services.orders.clone();
    let canceller = h.services.orders.clone();
    let (paid, cancelled) = tokio::join!(
        tokio::spawn(async move { payer.pay(order.id).await }),
        tokio::spawn(async move { canceller.cancel(order.id).await }),
    );
    let paid = paid.unwrap();
    let cancelled = cancelled.unwrap();

    assert!(paid.is_ok() != cancelled.is_ok());
    let final_stock = h.stock.stock_of(product).unwrap();
    if paid.is_ok() {
        assert_eq!(final_stock, 8);
    } else {
        assert_eq!(final_stock, 10);
    }
}

#[tokio::test]
async fn failed_restore_is_reported_but_order_stays_cancelled() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 5);
    let order = h
        .services
        .orders
        .create(CreateOrder::new(Uuid::new_v4(), vec![OrderLineRequest::new(product, 2)], receiver()))
        .await
        .unwrap();
    h.stock.fail_increments(true);

    let result = h.services.orders.cancel(order.id).await;

    assert!(matches!(
        result,
        Err(OrderError::StockRestoreIncomplete { ref products, .. }) if products == &vec![product]
    ));
    let stored = h.services.orders.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert_eq!(h.stock.stock_of(product), Some(3));
}

#[tokio::test]
async fn order_reads_are_invalidated_by_transitions() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 5);
    let buyer = Uuid::new_v4();
    let orders = &h.services.orders;
    let order = orders
        .create(CreateOrder::new(buyer, vec![OrderLineRequest::new(product, 1)], receiver()))
        .await
        .unwrap();

    // Warm both caches
    assert_eq!(orders.get_order(order.id).await.unwrap().status, OrderStatus::PendingPayment);
    assert_eq!(orders.list_orders(buyer).await.unwrap().len(), 1);
    assert!(h.kv.get(&format!("order:{}", order.id)).await.unwrap().is_some());

    orders.pay(order.id).await.unwrap();

    assert_eq!(orders.get_order(order.id).await.unwrap().status, OrderStatus::Paid);
    assert_eq!(orders.list_orders(buyer).await.unwrap()[0].status, OrderStatus::Paid);

    // A second order shows up in the list, newest first
    let second = orders
        .create(CreateOrder::new(buyer, vec![OrderLineRequest::new(product, 1)], receiver()))
        .await
        .unwrap();
    let listed = orders.list_orders(buyer).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
}

#[tokio::test]
async fn unknown_order_is_not_found_and_tombstoned() {
    let h = Harness::new();
    let missing = Uuid::new_v4();

    assert!(matches!(
        h.services.orders.get_order(missing).await,
        Err(OrderError::NotFound(id)) if id == missing
    ));
    assert!(h.kv.get(&format!("null_cache:order:{missing}")).await.unwrap().is_some());
}

#[tokio::test]
async fn payment_window_counts_down_then_closes() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 5);
    let buyer = Uuid::new_v4();
    let orders = &h.services.orders;

    let order = orders
        .create(CreateOrder::new(buyer, vec![OrderLineRequest::new(product, 1)], receiver()))
        .await
        .unwrap();
    match orders.payment_window(order.id).await.unwrap() {
        PaymentWindow::Remaining(left) => {
            assert!(left <= Duration::from_secs(15 * 60));
            assert!(left > Duration::from_secs(14 * 60));
        }
        other => panic!("expected remaining time, got {other:?}"),
    }

    let stale = h.seed_pending_order(buyer, &[(product, 1)], Utc::now() - chrono::Duration::minutes(20));
    assert_eq!(orders.payment_window(stale.id).await.unwrap(), PaymentWindow::Expired);

    orders.pay(order.id).await.unwrap();
    assert_eq!(orders.payment_window(order.id).await.unwrap(), PaymentWindow::NotPayable);
}

#[tokio::test]
async fn checkout_waits_for_stock_without_an_open_order_transaction() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 5);

    let holder = shop_orders::lock::LockToken::generate();
    let stock_lock = format!("stock_lock:{product}");
    assert!(h
        .services
        .lock
        .acquire(&stock_lock, &holder, Duration::from_secs(10))
        .await
        .unwrap());

    let orders = h.services.orders.clone();
    let checkout = tokio::spawn(async move {
        orders
            .create(CreateOrder::new(Uuid::new_v4(), vec![OrderLineRequest::new(product, 2)], receiver()))
            .await
    });

    // Checkout is now parked on the stock lock
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!checkout.is_finished());
    assert_eq!(h.orders.open_transactions(), 0);
    assert!(h.orders.is_empty());

    h.services.lock.release(&stock_lock, &holder).await.unwrap();
    let order = checkout.await.unwrap().unwrap();

    assert_eq!(h.orders.open_transactions(), 0);
    assert_eq!(h.orders.len(), 1);
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(h.stock.stock_of(product), Some(3));
}

#[tokio::test]
async fn timestamps_are_stored_at_microsecond_precision() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 5);
    let orders = &h.services.orders;

    let order = orders
        .create(CreateOrder::new(Uuid::new_v4(), vec![OrderLineRequest::new(product, 1)], receiver()))
        .await
        .unwrap();
    assert_eq!(order.created_at.timestamp_subsec_nanos() % 1_000, 0);
    assert_eq!(order.updated_at, order.created_at);

    let paid = orders.pay(order.id).await.unwrap();
    let paid_at = paid.paid_at.unwrap();
    assert_eq!(paid_at.timestamp_subsec_nanos() % 1_000, 0);

    // What was returned is exactly what a later read sees
    let stored = orders.get_order(order.id).await.unwrap();
    assert_eq!(stored, paid);
}
