//! Property-based tests for batch partitioning and result assembly

use proptest::prelude::*;
use tamer::batch::{partition, ResultSlots};
use tamer::types::InputItem;

fn items_strategy() -> impl Strategy<Value = Vec<InputItem>> {
    prop::collection::vec(".{0,12}", 0..120)
        .prop_map(|texts| texts.into_iter().map(InputItem::from).collect())
}

/// Concatenating batches in index order reproduces the input
#[test]
fn test_partition_concatenation_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(items_strategy(), 1usize..40), |(items, batch_size)| {
            let batches = partition(&items, batch_size).unwrap();
            let rejoined: Vec<InputItem> = batches
                .iter()
                .flat_map(|batch| batch.items.iter().cloned())
                .collect();
            prop_assert_eq!(rejoined, items.clone());

            for (position, batch) in batches.iter().enumerate() {
                prop_assert_eq!(batch.index, position);
                prop_assert!(!batch.is_empty());
                prop_assert!(batch.len() <= batch_size);
            }
            Ok(())
        })
        .unwrap();
}

/// Batch count is ceil(len / batch_size)
#[test]
fn test_partition_count_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(0usize..500, 1usize..64), |(len, batch_size)| {
            let items: Vec<InputItem> = (0..len).map(|i| InputItem::from(i.to_string())).collect();
            let batches = partition(&items, batch_size).unwrap();
            prop_assert_eq!(batches.len(), (len + batch_size - 1) / batch_size);
            Ok(())
        })
        .unwrap();
}

/// Slots filled in any completion order flatten in batch-index order
#[test]
fn test_slots_flatten_by_index_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    let strategy = prop::collection::vec(0usize..5, 1..30).prop_flat_map(|sizes| {
        let order: Vec<usize> = (0..sizes.len()).collect();
        (Just(sizes), Just(order).prop_shuffle())
    });

    runner
        .run(&strategy, |(sizes, completion_order)| {
            let slots = ResultSlots::new(sizes.len());
            for &batch_index in &completion_order {
                let result: Vec<(usize, usize)> =
                    (0..sizes[batch_index]).map(|i| (batch_index, i)).collect();
                slots.fill(batch_index, result).unwrap();
            }

            let expected: Vec<(usize, usize)> = sizes
                .iter()
                .enumerate()
                .flat_map(|(batch_index, &size)| (0..size).map(move |i| (batch_index, i)))
                .collect();
            prop_assert_eq!(slots.flatten(), expected);
            Ok(())
        })
        .unwrap();
}
