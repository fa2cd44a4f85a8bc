mod common;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use shop_orders::domain::order::{CreateOrder, OrderError, OrderLineRequest};
use shop_orders::domain::stock::{BatchOutcome, DeductOutcome, StockItem};
use uuid::Uuid;

use common::{receiver, yuan, Harness};

#[tokio::test]
async fn concurrent_single_unit_deducts_never_oversell() {
    let h = Harness::new();
    let product = h.add_product(yuan(999), 10);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = h.services.stock.clone();
        handles.push(tokio::spawn(async move { ledger.deduct(product, 1).await }));
    }

    let mut deducted = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            DeductOutcome::Deducted => deducted += 1,
            DeductOutcome::InsufficientStock => insufficient += 1,
        }
    }

    assert_eq!(deducted, 10);
    assert_eq!(insufficient, 10);
    assert_eq!(h.stock.stock_of(product), Some(0));
}

#[tokio::test]
async fn mixed_quantity_stress_keeps_ledger_consistent() {
    let h = Harness::new();
    let initial = 50;
    let product = h.add_product(yuan(500), initial);
    let taken = Arc::new(AtomicI32::new(0));

    let mut handles = Vec::new();
    for i in 0..60 {
        let ledger = h.services.stock.clone();
        let taken = taken.clone();
        let quantity = (i % 3) + 1;
        handles.push(tokio::spawn(async move {
            if ledger.deduct(product, quantity).await.unwrap() == DeductOutcome::Deducted {
                taken.fetch_add(quantity, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let remaining = h.stock.stock_of(product).unwrap();
    assert!(remaining >= 0);
    assert_eq!(remaining + taken.load(Ordering::SeqCst), initial);
    // Demand (120) exceeds supply, and 3 is the largest request, so at most 2 can be left.
    assert!(remaining < 3);
}

#[tokio::test]
async fn cached_read_follows_deduct_and_increase() {
    let h = Harness::new();
    let product = h.add_product(yuan(100), 8);
    let ledger = &h.services.stock;

    assert_eq!(ledger.get_available(product).await.unwrap(), Some(8));
    ledger.deduct(product, 5).await.unwrap();
    assert_eq!(ledger.get_available(product).await.unwrap(), Some(3));
    ledger.increase(product, 2).await.unwrap();
    assert_eq!(ledger.get_available(product).await.unwrap(), Some(5));
}

#[tokio::test]
async fn partial_batch_then_compensate_restores_prefix() {
    let h = Harness::new();
    let a = h.add_product(yuan(100), 5);
    let b = h.add_product(yuan(100), 1);
    let items = vec![StockItem::new(a, 2), StockItem::new(b, 2)];

    let outcome = h.services.stock.batch_deduct(&items).await;
    assert!(matches!(outcome, BatchOutcome::PartialFailure { failed_index: 1, .. }));
    assert_eq!(h.stock.stock_of(a), Some(3));

    let report = h.services.stock.compensate(outcome.applied(&items)).await;

    assert!(report.is_complete());
    assert_eq!(report.restored, 1);
    assert_eq!(h.stock.stock_of(a), Some(5));
    assert_eq!(h.stock.stock_of(b), Some(1));
}

#[tokio::test]
async fn checkout_failing_on_second_line_puts_first_line_back() {
    let h = Harness::new();
    let a = h.add_product(yuan(1000), 5);
    let b = h.add_product(yuan(2000), 1);

    let result = h
        .services
        .orders
        .create(CreateOrder::new(
            Uuid::new_v4(),
            vec![OrderLineRequest::new(a, 2), OrderLineRequest::new(b, 2)],
            receiver(),
        ))
        .await;

    assert!(matches!(
        result,
        Err(OrderError::InsufficientStock { product_id }) if product_id == b
    ));
    assert_eq!(h.stock.stock_of(a), Some(5));
    assert_eq!(h.stock.stock_of(b), Some(1));
    assert!(h.orders.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_large_deducts_racing_for_scarce_stock() {
    let h = Harness::new();
    let product = h.add_product(yuan(2500), 7);

    let first = h.services.stock.clone();
    let second = h.services.stock.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.deduct(product, 5).await }),
        tokio::spawn(async move { second.deduct(product, 5).await }),
    );
    let mut outcomes = vec![a.unwrap().unwrap(), b.unwrap().unwrap()];
    outcomes.sort_by_key(|o| *o != DeductOutcome::Deducted);

    assert_eq!(outcomes, vec![DeductOutcome::Deducted, DeductOutcome::InsufficientStock]);
    assert_eq!(h.stock.stock_of(product), Some(2));
}
