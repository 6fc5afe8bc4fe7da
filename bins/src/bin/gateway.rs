//! Runs the execution core against a broker (live or simulated, per config)
//! with the order queue consumer, timeout monitor, and (in live mode)
//! session coordinator all running until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use chrono::Utc;
use optex_bins::common::{init_logging, shutdown_channel, CommonArgs};
use optex_core::config::Config;
use optex_core::domain::{Order, OrderId, OrderStatus};
use optex_core::queue::spawn_consumer;
use optex_core::supervisor::Supervisor;

fn main() -> Result<()> {
    let args = CommonArgs::parse();
    init_logging(&args.log_level)?;

    let config = Config::load(&args.config).with_context(|| format!("loading config from {}", args.config))?;
    tracing::info!(mode = config.trading.mode.as_str(), "starting gateway");

    let supervisor = Arc::new(Supervisor::bootstrap(config).context("bootstrapping supervisor")?);
    supervisor.install_signal_handlers().context("installing kill switch signal handlers")?;

    let shutdown = shutdown_channel()?;

    let consumer_gateway = Arc::clone(&supervisor.gateway);
    let consumer_queue = Arc::clone(&supervisor.queue);
    let consumer_order_store = Arc::clone(&supervisor.order_store);
    let consumer_fill_tracker = Arc::clone(&supervisor.fill_tracker);
    let consumer_handle = spawn_consumer(consumer_queue, move |prioritized| {
        let client_request_id = OrderId::generate().0.to_string();
        let now = Utc::now();
        let mut order = Order::new(prioritized.request.clone(), client_request_id.clone(), now);

        match consumer_gateway.place_order(&order.request, &client_request_id) {
            Ok(ack) => {
                order.broker_order_id = Some(ack.broker_order_id.clone());
                order.status = OrderStatus::Open;
                order.placed_at = Some(now);

                // The simulator fills MARKET orders synchronously inside
                // place_order, so the order may already be terminal by the
                // time this returns; reconcile against the adapter's own
                // record rather than assuming it is still OPEN.
                if let Ok(mut history) = consumer_gateway.get_order_history(&ack.broker_order_id) {
                    if let Some(current) = history.pop() {
                        order.status = current.status;
                        order.filled_quantity = current.filled_quantity;
                        order.avg_fill_price = current.avg_fill_price;
                        order.exchange_order_id = current.exchange_order_id;
                    }
                }

                tracing::info!(
                    client_request_id,
                    broker_order_id = ack.broker_order_id.as_str(),
                    instrument = order.request.instrument_token,
                    status = ?order.status,
                    "order placed"
                );

                if let Some(correlation_id) = order.request.correlation_id.clone() {
                    match order.status {
                        OrderStatus::Complete => consumer_fill_tracker.on_fill(&correlation_id),
                        OrderStatus::Rejected => {
                            let reason = order.rejection_reason.clone().unwrap_or_else(|| "rejected".into());
                            consumer_fill_tracker.on_reject(&correlation_id, reason);
                        }
                        _ => {}
                    }
                }

                consumer_order_store.upsert(order);
            }
            Err(e) => {
                tracing::warn!(client_request_id, error = %e, "order placement failed");
                order.status = OrderStatus::Rejected;
                order.rejection_reason = Some(e.to_string());

                if let Some(correlation_id) = order.request.correlation_id.clone() {
                    consumer_fill_tracker.on_reject(&correlation_id, e.to_string());
                }

                consumer_order_store.upsert(order);
            }
        }
    });

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(supervisor.run(shutdown));

    supervisor.queue.begin_shutdown();
    consumer_handle.join().expect("queue consumer thread panicked");

    tracing::info!("gateway shut down cleanly");
    Ok(())
}
