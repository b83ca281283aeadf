//! Property-based tests for the bounded blocking handoff queue
//!
//! The queue's inverted (last-in-first-out) drain order is a load-bearing
//! property, not an implementation accident; these tests pin it down for
//! arbitrary contents alongside the capacity bound.

use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rustadmin_core::handoff::HandoffQueue;

proptest! {
    /// Pushing a sequence and draining it yields the exact reverse.
    #[test]
    fn prop_drain_order_is_reverse_of_push_order(items in prop::collection::vec(any::<u32>(), 0..20)) {
        let queue = HandoffQueue::with_capacity(items.len().max(1));
        for item in &items {
            queue.push(*item).unwrap();
        }
        let mut drained = Vec::new();
        while let Some(item) = queue.try_pop() {
            drained.push(item);
        }
        let mut expected = items;
        expected.reverse();
        prop_assert_eq!(drained, expected);
    }

    /// The stored count never exceeds capacity and try_pop observes every
    /// element exactly once under interleaved operations.
    #[test]
    fn prop_len_bounded_by_capacity(
        capacity in 1usize..8,
        ops in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        let queue = HandoffQueue::with_capacity(capacity);
        let mut pushed = 0u32;
        let mut popped = 0u32;
        for push in ops {
            if push {
                if queue.len() < capacity {
                    queue.push(pushed).unwrap();
                    pushed += 1;
                }
            } else if queue.try_pop().is_some() {
                popped += 1;
            }
            prop_assert!(queue.len() <= capacity);
        }
        prop_assert_eq!(queue.len() as u32, pushed - popped);
    }

    /// Closing hands out buffered items before reporting emptiness.
    #[test]
    fn prop_close_drains_remaining_items(items in prop::collection::vec(any::<u8>(), 1..10)) {
        let queue = HandoffQueue::with_capacity(items.len());
        for item in &items {
            queue.push(*item).unwrap();
        }
        queue.close();
        let mut seen = 0;
        while queue.pop().is_some() {
            seen += 1;
        }
        prop_assert_eq!(seen, items.len());
    }
}

#[test]
fn test_pop_blocks_until_concurrent_push() {
    let queue: Arc<HandoffQueue<u32>> = Arc::new(HandoffQueue::with_capacity(2));
    let popper = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.pop())
    };
    thread::sleep(Duration::from_millis(50));
    queue.push(7).unwrap();
    assert_eq!(popper.join().unwrap(), Some(7));
}

#[test]
fn test_push_blocks_at_capacity_until_concurrent_pop() {
    let queue: Arc<HandoffQueue<u32>> = Arc::new(HandoffQueue::with_capacity(1));
    queue.push(1).unwrap();
    let pusher = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.push(2))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(queue.pop(), Some(1));
    pusher.join().unwrap().unwrap();
    assert_eq!(queue.pop(), Some(2));
}
