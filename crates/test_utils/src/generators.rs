//! Property-Based Test Generators
//!
//! proptest strategies producing valid billing inputs.

use core_kernel::Money;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

use domain_billing::NewLineItem;

/// Positive prices between 0.01 and 10,000.00
pub fn price_strategy() -> impl Strategy<Value = Money> {
    (1i64..1_000_000i64).prop_map(Money::from_minor)
}

/// Quantities 1 to 10
pub fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=10i64).prop_map(Decimal::from)
}

/// A valid line item
pub fn line_item_strategy() -> impl Strategy<Value = NewLineItem> {
    ("[A-Z][a-z]{2,12}", price_strategy(), quantity_strategy())
        .prop_map(|(name, price, quantity)| NewLineItem::new(name, price).with_quantity(quantity))
}

/// Between 1 and `max` line items
pub fn line_items_strategy(max: usize) -> impl Strategy<Value = Vec<NewLineItem>> {
    prop::collection::vec(line_item_strategy(), 1..=max.max(1))
}

/// A subset of `0..item_count`
pub fn index_subset_strategy(item_count: usize) -> impl Strategy<Value = BTreeSet<usize>> {
    prop::collection::btree_set(0..item_count.max(1), 0..=item_count)
        .prop_map(move |set| set.into_iter().filter(|i| *i < item_count).collect())
}
