//! Live broker adapter. Talks to the configured options brokerage over its
//! REST API. Kite-style quirks (string-typed numeric fields, per-endpoint
//! rate limits already folded into the Gateway's buckets, auth header
//! naming) are absorbed entirely in this file so the rest of the core never
//! sees broker-specific vocabulary (spec §9).

use std::sync::RwLock;

use chrono::TimeZone;
use reqwest::blocking::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::{
    BrokerOrderUpdate, MarginSnapshot, Order, OrderAmendment, OrderRequest, OrderStatus,
    PlacedOrderAck, Position, PositionLabel,
};
use crate::errors::{CoreError, CoreResult};

use super::BrokerAdapter;

/// Capacity of the postback broadcast channel. Generous enough that a
/// consumer briefly lagging (e.g. mid-reconnect) does not immediately start
/// dropping updates; a consumer that falls behind by more than this many
/// pushes is better off doing a full `get_orders()` reconciliation anyway.
const POSTBACK_CHANNEL_CAPACITY: usize = 1_024;

pub struct LiveBrokerConfig {
    pub base_url: String,
    pub api_key: String,
}

/// A real broker connection. The access token is refreshed out-of-band by
/// the Session Coordinator and swapped in here via [`set_access_token`].
///
/// Order placement/modification/cancellation is synchronous REST, matching
/// [`BrokerAdapter`]'s contract, but order *status* notifications arrive
/// asynchronously from the broker's postback webhook, which may run on any
/// thread (spec §4.5). [`Self::ingest_postback`] is the landing point for
/// that webhook; [`Self::subscribe_updates`] lets the rest of the core
/// consume the resulting [`BrokerOrderUpdate`] stream without caring which
/// thread produced it.
pub struct LiveBroker {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
    postback_tx: tokio::sync::broadcast::Sender<BrokerOrderUpdate>,
}

impl LiveBroker {
    pub fn new(config: LiveBrokerConfig) -> Self {
        let (postback_tx, _) = tokio::sync::broadcast::channel(POSTBACK_CHANNEL_CAPACITY);
        Self {
            client: Client::new(),
            base_url: config.base_url,
            api_key: config.api_key,
            access_token: RwLock::new(None),
            postback_tx,
        }
    }

    /// Subscribes to the stream of broker order-status postbacks. Each
    /// subscriber gets its own independent receiver; pushes made before a
    /// given call are never delivered to that receiver.
    pub fn subscribe_updates(&self) -> tokio::sync::broadcast::Receiver<BrokerOrderUpdate> {
        self.postback_tx.subscribe()
    }

    /// Parses one postback webhook payload and fans it out to every
    /// subscriber. Callable from whatever thread the webhook handler runs
    /// on (an HTTP server worker thread, typically, not the async runtime
    /// the rest of the core uses).
    pub fn ingest_postback(&self, raw_json: &str) -> CoreResult<()> {
        let dto: BrokerPostbackDto =
            serde_json::from_str(raw_json).map_err(|e| CoreError::BrokerRejected(format!("malformed postback: {e}")))?;
        let update = postback_to_update(dto);
        // No receivers yet (e.g. during startup) is not an error.
        let _ = self.postback_tx.send(update);
        Ok(())
    }

    pub fn set_access_token(&self, token: String) {
        *self.access_token.write().expect("access token lock poisoned") = Some(token);
    }

    pub fn clear_access_token(&self) {
        *self.access_token.write().expect("access token lock poisoned") = None;
    }

    pub(crate) fn auth_header(&self) -> CoreResult<String> {
        let token = self
            .access_token
            .read()
            .expect("access token lock poisoned")
            .clone()
            .ok_or(CoreError::SessionExpired)?;
        Ok(format!("token {}:{}", self.api_key, token))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> CoreResult<reqwest::blocking::RequestBuilder> {
        let auth = self.auth_header()?;
        let url = format!("{}{}", self.base_url, path);
        Ok(self.client.request(method, url).header("Authorization", auth))
    }

    fn handle_transport_error(&self, err: reqwest::Error) -> CoreError {
        warn!(error = %err, "live broker transport error");
        CoreError::BrokerUnavailable(err.to_string())
    }
}

/// Minimal broker wire shapes. Real brokers return many more fields; this
/// core only parses what it acts on, exactly as it would for an actual
/// external contract it does not control.
#[derive(Debug, Deserialize)]
struct BrokerOrderDto {
    order_id: String,
    exchange_order_id: Option<String>,
    status: String,
    instrument_token: u64,
    tradingsymbol: String,
    exchange: String,
    transaction_type: String,
    order_type: String,
    product: String,
    quantity: Decimal,
    filled_quantity: Decimal,
    price: Option<Decimal>,
    trigger_price: Option<Decimal>,
    average_price: Option<Decimal>,
    status_message: Option<String>,
    tag: Option<String>,
    order_timestamp: Option<String>,
}

/// Shape of the broker's order-update postback webhook. Distinct from
/// [`BrokerOrderDto`] (the REST list/history response) since the two wire
/// payloads carry different fields in practice even though they describe
/// the same underlying order.
#[derive(Debug, Deserialize)]
struct BrokerPostbackDto {
    order_id: String,
    exchange_order_id: Option<String>,
    status: String,
    filled_quantity: Decimal,
    average_price: Option<Decimal>,
    status_message: Option<String>,
    order_timestamp: Option<String>,
}

fn postback_to_update(dto: BrokerPostbackDto) -> BrokerOrderUpdate {
    let updated_at = dto
        .order_timestamp
        .as_deref()
        .and_then(parse_order_timestamp)
        .unwrap_or_else(chrono::Utc::now);
    BrokerOrderUpdate {
        broker_order_id: dto.order_id,
        exchange_order_id: dto.exchange_order_id,
        status: map_status(&dto.status),
        filled_quantity: dto.filled_quantity,
        avg_fill_price: dto.average_price,
        rejection_reason: dto.status_message,
        updated_at,
    }
}

fn map_status(raw: &str) -> OrderStatus {
    match raw.to_uppercase().as_str() {
        "OPEN" => OrderStatus::Open,
        "TRIGGER PENDING" => OrderStatus::TriggerPending,
        "COMPLETE" => OrderStatus::Complete,
        "CANCELLED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::Pending,
    }
}

impl BrokerAdapter for LiveBroker {
    fn place_order(&self, request: &OrderRequest, client_request_id: &str) -> CoreResult<PlacedOrderAck> {
        debug!(client_request_id, instrument = request.instrument_token, "placing live order");
        let req = self.request(reqwest::Method::POST, "/orders/regular")?;
        let resp = req
            .form(&[
                ("tradingsymbol", request.trading_symbol.as_str()),
                ("exchange", request.exchange.as_str()),
                ("transaction_type", if matches!(request.side, crate::domain::Side::Buy) { "BUY" } else { "SELL" }),
                ("quantity", &request.quantity.to_string()),
                ("order_type", order_type_code(request.order_type)),
                ("product", request.product.0.as_str()),
                ("tag", client_request_id),
            ])
            .send()
            .map_err(|e| self.handle_transport_error(e))?;

        if !resp.status().is_success() {
            return Err(CoreError::BrokerRejected(format!("http {}", resp.status())));
        }
        #[derive(Deserialize)]
        struct PlaceResponse {
            order_id: String,
        }
        let body: PlaceResponse = resp.json().map_err(|e| self.handle_transport_error(e))?;
        Ok(PlacedOrderAck { broker_order_id: body.order_id })
    }

    fn modify_order(&self, broker_order_id: &str, amendment: &OrderAmendment) -> CoreResult<()> {
        let req = self.request(reqwest::Method::PUT, &format!("/orders/regular/{broker_order_id}"))?;
        let mut form = Vec::new();
        if let Some(qty) = amendment.quantity {
            form.push(("quantity".to_string(), qty.to_string()));
        }
        if let Some(price) = amendment.limit_price {
            form.push(("price".to_string(), price.to_string()));
        }
        if let Some(trigger) = amendment.trigger_price {
            form.push(("trigger_price".to_string(), trigger.to_string()));
        }
        let resp = req.form(&form).send().map_err(|e| self.handle_transport_error(e))?;
        if !resp.status().is_success() {
            return Err(CoreError::BrokerRejected(format!("http {}", resp.status())));
        }
        Ok(())
    }

    fn cancel_order(&self, broker_order_id: &str) -> CoreResult<()> {
        let req = self.request(reqwest::Method::DELETE, &format!("/orders/regular/{broker_order_id}"))?;
        let resp = req.send().map_err(|e| self.handle_transport_error(e))?;
        if !resp.status().is_success() {
            return Err(CoreError::BrokerRejected(format!("http {}", resp.status())));
        }
        Ok(())
    }

    fn get_orders(&self) -> CoreResult<Vec<Order>> {
        // The broker's order list is reconciled against local state by the
        // update handler; this adapter only fetches the raw DTOs.
        let req = self.request(reqwest::Method::GET, "/orders")?;
        let resp = req.send().map_err(|e| self.handle_transport_error(e))?;
        let dtos: Vec<BrokerOrderDto> = resp.json().map_err(|e| self.handle_transport_error(e))?;
        Ok(dtos.into_iter().map(dto_to_order).collect())
    }

    fn get_order_history(&self, broker_order_id: &str) -> CoreResult<Vec<Order>> {
        let req = self.request(reqwest::Method::GET, &format!("/orders/{broker_order_id}"))?;
        let resp = req.send().map_err(|e| self.handle_transport_error(e))?;
        let dtos: Vec<BrokerOrderDto> = resp.json().map_err(|e| self.handle_transport_error(e))?;
        Ok(dtos.into_iter().map(dto_to_order).collect())
    }

    fn get_positions(&self) -> CoreResult<Vec<Position>> {
        #[derive(Deserialize)]
        struct PositionDto {
            instrument_token: u64,
            tradingsymbol: String,
            quantity: Decimal,
            average_price: Decimal,
            realised: Decimal,
            unrealised: Decimal,
            last_price: Decimal,
        }
        let req = self.request(reqwest::Method::GET, "/portfolio/positions")?;
        let resp = req.send().map_err(|e| self.handle_transport_error(e))?;
        let dtos: Vec<PositionDto> = resp.json().map_err(|e| self.handle_transport_error(e))?;
        Ok(dtos
            .into_iter()
            .map(|d| Position {
                instrument_token: d.instrument_token,
                symbol: d.tradingsymbol,
                label: PositionLabel::Day,
                quantity: d.quantity,
                avg_price: d.average_price,
                realized_pnl: d.realised,
                unrealized_pnl: d.unrealised,
                last_price: Some(d.last_price),
            })
            .collect())
    }

    fn get_margins(&self) -> CoreResult<MarginSnapshot> {
        #[derive(Deserialize)]
        struct MarginsDto {
            required: Decimal,
            available: Decimal,
            span: Decimal,
            exposure: Decimal,
        }
        let req = self.request(reqwest::Method::GET, "/margins")?;
        let resp = req.send().map_err(|e| self.handle_transport_error(e))?;
        let dto: MarginsDto = resp.json().map_err(|e| self.handle_transport_error(e))?;
        Ok(MarginSnapshot {
            required: dto.required,
            available: dto.available,
            span: dto.span,
            exposure: dto.exposure,
        })
    }

    fn get_order_margin(&self, request: &OrderRequest) -> CoreResult<MarginSnapshot> {
        self.get_basket_margin(std::slice::from_ref(request))
    }

    fn get_basket_margin(&self, requests: &[OrderRequest]) -> CoreResult<MarginSnapshot> {
        #[derive(Deserialize)]
        struct BasketMarginDto {
            total: Decimal,
            available: Decimal,
            span: Decimal,
            exposure: Decimal,
        }
        let payload = serde_json::to_string(
            &requests
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "tradingsymbol": r.trading_symbol,
                        "exchange": r.exchange,
                        "quantity": r.quantity,
                        "transaction_type": if matches!(r.side, crate::domain::Side::Buy) { "BUY" } else { "SELL" },
                    })
                })
                .collect::<Vec<_>>(),
        )
        .expect("order requests always serialize");
        let req = self.request(reqwest::Method::POST, "/margins/basket")?;
        let resp = req
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .map_err(|e| self.handle_transport_error(e))?;
        let dto: BasketMarginDto = resp.json().map_err(|e| self.handle_transport_error(e))?;
        Ok(MarginSnapshot {
            required: dto.total,
            available: dto.available,
            span: dto.span,
            exposure: dto.exposure,
        })
    }

    fn kill_switch(&self) -> CoreResult<()> {
        let req = self.request(reqwest::Method::POST, "/orders/cancel_all")?;
        let resp = req.send().map_err(|e| self.handle_transport_error(e))?;
        if !resp.status().is_success() {
            return Err(CoreError::BrokerRejected(format!("http {}", resp.status())));
        }
        Ok(())
    }
}

fn parse_order_type(raw: &str) -> crate::domain::OrderType {
    use crate::domain::OrderType;
    match raw.to_uppercase().as_str() {
        "LIMIT" => OrderType::Limit,
        "SL" => OrderType::Sl,
        "SL-M" | "SL_M" => OrderType::SlM,
        _ => OrderType::Market,
    }
}

/// Parses a Kite-style `"YYYY-MM-DD HH:MM:SS"` broker timestamp, which is
/// always in the exchange's local time, into a UTC instant (spec §9: "store
/// and compare all timestamps in UTC").
fn parse_order_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok()?;
    chrono_tz::Asia::Kolkata
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&chrono::Utc))
}

fn dto_to_order(dto: BrokerOrderDto) -> Order {
    use crate::domain::{AmendmentStatus, OrderId, Product, Side};
    use chrono::Utc;

    let side = if dto.transaction_type.eq_ignore_ascii_case("SELL") { Side::Sell } else { Side::Buy };
    let placed_at = dto.order_timestamp.as_deref().and_then(parse_order_timestamp);

    Order {
        id: OrderId::generate(),
        request: OrderRequest {
            instrument_token: dto.instrument_token,
            trading_symbol: dto.tradingsymbol,
            exchange: dto.exchange,
            side,
            order_type: parse_order_type(&dto.order_type),
            product: Product(dto.product),
            quantity: dto.quantity,
            limit_price: dto.price,
            trigger_price: dto.trigger_price,
            strategy_id: None,
            correlation_id: dto.tag,
        },
        client_request_id: String::new(),
        broker_order_id: Some(dto.order_id),
        exchange_order_id: dto.exchange_order_id,
        status: map_status(&dto.status),
        filled_quantity: dto.filled_quantity,
        avg_fill_price: dto.average_price,
        rejection_reason: dto.status_message,
        amendment_status: AmendmentStatus::None,
        placed_at,
        updated_at: placed_at.unwrap_or_else(Utc::now),
    }
}

fn order_type_code(order_type: crate::domain::OrderType) -> &'static str {
    use crate::domain::OrderType;
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::Sl => "SL",
        OrderType::SlM => "SL-M",
    }
}
