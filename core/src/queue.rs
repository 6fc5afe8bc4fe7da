//! Priority Order Queue and its consumer (spec §4.3). Orders admitted by
//! the Router wait here ordered by `(priority asc, sequence asc)` so a
//! KILL_SWITCH cancel always drains before a StrategyEntry placed moments
//! earlier, while orders of equal priority preserve admission order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::domain::PrioritizedOrder;

pub struct OrderQueue {
    heap: Mutex<BinaryHeap<Reverse<PrioritizedOrder>>>,
    not_empty: Condvar,
    next_sequence: AtomicU64,
    shutting_down: AtomicBool,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            next_sequence: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn push(&self, order: PrioritizedOrder) {
        let mut heap = self.heap.lock();
        heap.push(Reverse(order));
        self.not_empty.notify_one();
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Blocks until an order is available or the queue is shut down, in
    /// which case it returns `None` once fully drained.
    pub fn pop_blocking(&self) -> Option<PrioritizedOrder> {
        let mut heap = self.heap.lock();
        loop {
            if let Some(Reverse(order)) = heap.pop() {
                return Some(order);
            }
            if self.shutting_down.load(Ordering::Acquire) {
                return None;
            }
            self.not_empty.wait_for(&mut heap, Duration::from_millis(250));
        }
    }

    /// Signals the consumer to exit once the queue has drained. Does not
    /// discard orders already enqueued (graceful shutdown per spec §5).
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }
}

impl Default for OrderQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains the queue on a dedicated thread, invoking `handle` for each order
/// in priority order. Returns the join handle so the supervisor can wait
/// for a clean shutdown.
pub fn spawn_consumer<F>(queue: Arc<OrderQueue>, mut handle: F) -> std::thread::JoinHandle<()>
where
    F: FnMut(PrioritizedOrder) + Send + 'static,
{
    std::thread::spawn(move || {
        info!("order queue consumer started");
        while let Some(order) = queue.pop_blocking() {
            debug!(priority = ?order.priority, sequence = order.sequence, "dequeued order");
            handle(order);
        }
        info!("order queue consumer drained and stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderRequest, OrderType, Priority, Product, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(priority: Priority, sequence: u64) -> PrioritizedOrder {
        PrioritizedOrder {
            request: OrderRequest {
                instrument_token: 1,
                trading_symbol: "X".into(),
                exchange: "NFO".into(),
                side: Side::Buy,
                order_type: OrderType::Market,
                product: Product("MIS".into()),
                quantity: dec!(1),
                limit_price: None,
                trigger_price: None,
                strategy_id: None,
                correlation_id: None,
            },
            priority,
            sequence,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn pops_in_priority_then_sequence_order() {
        let queue = OrderQueue::new();
        queue.push(order(Priority::Manual, 0));
        queue.push(order(Priority::KillSwitch, 1));
        queue.push(order(Priority::StrategyEntry, 2));

        assert_eq!(queue.pop_blocking().unwrap().priority, Priority::KillSwitch);
        assert_eq!(queue.pop_blocking().unwrap().priority, Priority::StrategyEntry);
        assert_eq!(queue.pop_blocking().unwrap().priority, Priority::Manual);
    }

    #[test]
    fn equal_priority_preserves_admission_sequence() {
        let queue = OrderQueue::new();
        queue.push(order(Priority::Manual, 5));
        queue.push(order(Priority::Manual, 2));
        queue.push(order(Priority::Manual, 8));

        assert_eq!(queue.pop_blocking().unwrap().sequence, 2);
        assert_eq!(queue.pop_blocking().unwrap().sequence, 5);
        assert_eq!(queue.pop_blocking().unwrap().sequence, 8);
    }

    #[test]
    fn shutdown_drains_remaining_orders_then_returns_none() {
        let queue = Arc::new(OrderQueue::new());
        queue.push(order(Priority::Manual, 0));
        queue.begin_shutdown();
        assert!(queue.pop_blocking().is_some());
        assert!(queue.pop_blocking().is_none());
    }

    #[test]
    fn consumer_thread_processes_every_pushed_order() {
        let queue = Arc::new(OrderQueue::new());
        for i in 0..5 {
            queue.push(order(Priority::Manual, i));
        }
        let processed = Arc::new(Mutex::new(Vec::new()));
        let processed_clone = Arc::clone(&processed);
        let queue_clone = Arc::clone(&queue);
        queue.begin_shutdown();
        let handle = spawn_consumer(queue_clone, move |o| {
            processed_clone.lock().push(o.sequence);
        });
        handle.join().unwrap();
        assert_eq!(processed.lock().len(), 5);
    }
}
