mod common;

use common::shopper;
use rust_decimal_macros::dec;
use uuid::Uuid;

use storefront_api::services::carts::{CartStore, InMemoryCartStore};

#[tokio::test]
async fn adding_the_same_product_merges_into_one_line() {
    let store = InMemoryCartStore::new("USD");
    let shopper = shopper();
    let product = Uuid::new_v4();

    store.add(&shopper, product, 2, dec!(9.99)).await.unwrap();
    let cart = store.add(&shopper, product, 3, dec!(9.99)).await.unwrap();

    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.lines[0].quantity, 5);
    assert_eq!(cart.lines[0].unit_price, dec!(9.99));
    assert_eq!(cart.total_price(), dec!(49.95));
}

#[tokio::test]
async fn non_positive_add_quantity_is_a_no_op() {
    let store = InMemoryCartStore::new("USD");
    let shopper = shopper();
    let product = Uuid::new_v4();

    store.add(&shopper, product, 1, dec!(5.00)).await.unwrap();
    let cart = store.add(&shopper, product, 0, dec!(5.00)).await.unwrap();
    assert_eq!(cart.lines[0].quantity, 1);

    let cart = store.add(&shopper, product, -4, dec!(5.00)).await.unwrap();
    assert_eq!(cart.lines[0].quantity, 1);

    // Nor does it create a line for a product not yet in the cart.
    let cart = store
        .add(&shopper, Uuid::new_v4(), 0, dec!(5.00))
        .await
        .unwrap();
    assert_eq!(cart.lines.len(), 1);
}

#[tokio::test]
async fn set_quantity_replaces_and_zero_removes() {
    let store = InMemoryCartStore::new("USD");
    let shopper = shopper();
    let product = Uuid::new_v4();

    store.add(&shopper, product, 2, dec!(7.50)).await.unwrap();

    let cart = store.set_quantity(&shopper, product, 6).await.unwrap();
    assert_eq!(cart.lines[0].quantity, 6);

    let cart = store.set_quantity(&shopper, product, 0).await.unwrap();
    assert!(cart.is_empty());

    // Setting a quantity on an absent line does not create it.
    let cart = store
        .set_quantity(&shopper, Uuid::new_v4(), 3)
        .await
        .unwrap();
    assert!(cart.is_empty());
}

#[tokio::test]
async fn remove_and_clear() {
    let store = InMemoryCartStore::new("USD");
    let shopper = shopper();
    let keep = Uuid::new_v4();
    let drop = Uuid::new_v4();

    store.add(&shopper, keep, 1, dec!(3.00)).await.unwrap();
    store.add(&shopper, drop, 1, dec!(4.00)).await.unwrap();

    let cart = store.remove(&shopper, drop).await.unwrap();
    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.lines[0].product_id, keep);

    store.clear(&shopper).await.unwrap();
    assert!(store.snapshot(&shopper).await.unwrap().is_empty());

    // Clearing an already-empty cart is fine.
    store.clear(&shopper).await.unwrap();
}

#[tokio::test]
async fn lines_keep_insertion_order() {
    let store = InMemoryCartStore::new("USD");
    let shopper = shopper();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let third = Uuid::new_v4();

    store.add(&shopper, first, 1, dec!(1.00)).await.unwrap();
    store.add(&shopper, second, 1, dec!(2.00)).await.unwrap();
    store.add(&shopper, third, 1, dec!(3.00)).await.unwrap();
    // Merging into the middle line must not reorder it.
    store.add(&shopper, second, 1, dec!(2.00)).await.unwrap();

    let cart = store.snapshot(&shopper).await.unwrap();
    let order: Vec<Uuid> = cart.lines.iter().map(|l| l.product_id).collect();
    assert_eq!(order, vec![first, second, third]);
}

#[tokio::test]
async fn carts_are_isolated_per_shopper() {
    let store = InMemoryCartStore::new("USD");
    let alice = shopper();
    let bob = shopper();
    let product = Uuid::new_v4();

    store.add(&alice, product, 2, dec!(10.00)).await.unwrap();
    store.add(&bob, product, 7, dec!(10.00)).await.unwrap();

    assert_eq!(store.snapshot(&alice).await.unwrap().total_items(), 2);
    assert_eq!(store.snapshot(&bob).await.unwrap().total_items(), 7);

    store.clear(&alice).await.unwrap();
    assert_eq!(store.snapshot(&bob).await.unwrap().total_items(), 7);
}
