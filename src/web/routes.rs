//! HTTP route handlers. Every response uses the `{success, message, data}`
//! envelope.

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::auction::engine::{self, advance};
use crate::auction::model::HourlyAuction;
use crate::auction::round::place_bid;
use crate::auction::views::{history_entry, leaderboard, AuctionSummary};
use crate::db::store::decode_all;
use crate::db::{pool, queries};
use crate::error::{AuctionError, Result};
use crate::events::bus::AuctionEvent;
use crate::payments::service::{CreateOrderRequest, VerifyRequest};

use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::server::AppState;

const ADMIN_KEY_HEADER: &str = "x-admin-key";
const HISTORY_LIMIT: i64 = 50;

/// Public routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/server-time", get(server_time))
        .route("/api/scheduler/live-auction", get(live_auction))
        .route("/api/scheduler/daily-auction", get(daily_auction))
        .route("/api/scheduler/auctions/:id", get(auction))
        .route("/api/scheduler/auctions/:id/leaderboard", get(auction_leaderboard))
        .route("/api/scheduler/auctions/:id/bids", post(bid))
        .route("/api/scheduler/history/:player_id", get(history))
        .route("/api/payments/entry/order", post(entry_order))
        .route("/api/payments/claim/order", post(claim_order))
        .route("/api/payments/verify", post(verify_payment))
}

/// Routes guarded by the `x-admin-key` header.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/daily-auctions", post(admin_create_day))
        .route("/api/admin/auctions/:id/cancel", post(admin_cancel))
        .route("/api/admin/scheduler/tick", post(admin_tick))
}

fn envelope<T: Serialize>(message: &str, data: T) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": message,
        "data": data,
    }))
}

fn check_admin_key(headers: &HeaderMap, configured: Option<&str>) -> Result<()> {
    let Some(expected) = configured.filter(|k| !k.is_empty()) else {
        return Err(AuctionError::Unauthorized);
    };
    match headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(given) if given == expected => Ok(()),
        _ => Err(AuctionError::Unauthorized),
    }
}

/// Load an auction and replay anything due, without writing it back.
async fn load_current(state: &AppState, id: i64) -> Result<HourlyAuction> {
    let mut auction = state.store.load(id).await?;
    advance(&mut auction, state.clock.now());
    Ok(auction)
}

/// GET /health — database reachability.
async fn health(State(state): State<AppState>) -> Result<Json<Value>> {
    pool::health_check(state.store.pool()).await?;
    Ok(envelope("ok", json!({ "database": "up" })))
}

/// GET /api/status — scheduler state.
async fn status(State(state): State<AppState>) -> Json<Value> {
    envelope(
        "running",
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "scheduler": state.scheduler.status(),
            "event_subscribers": state.event_bus.subscriber_count(),
        }),
    )
}

/// GET /api/server-time — the clock clients should sync countdowns to.
async fn server_time(State(state): State<AppState>) -> Json<Value> {
    let now = state.clock.now();
    envelope(
        "server time",
        json!({
            "server_time": now,
            "timestamp_ms": now.timestamp_millis(),
            "local_date": state.clock.local_date(now),
            "timezone_offset_minutes": state.clock.tz().local_minus_utc() / 60,
            "offset_ms": state.clock.offset_ms(),
        }),
    )
}

/// GET /api/scheduler/live-auction — the live auction, else the next one.
async fn live_auction(State(state): State<AppState>) -> Result<Json<Value>> {
    let now = state.clock.now();
    let row = queries::get_live_or_next_auction(state.store.pool(), now)
        .await?
        .ok_or_else(|| AuctionError::NotFound("no live or upcoming auction".into()))?;
    let mut auction = HourlyAuction::try_from(row)?;
    advance(&mut auction, now);
    Ok(envelope("live auction", AuctionSummary::from(&auction)))
}

#[derive(Debug, Deserialize)]
struct DailyQuery {
    date: Option<NaiveDate>,
    code: Option<String>,
}

/// GET /api/scheduler/daily-auction?date=YYYY-MM-DD or ?code=DA000001
///
/// The day's replica. Defaults to today.
async fn daily_auction(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<DailyQuery>,
) -> Result<Json<Value>> {
    let daily = match (q.code, q.date) {
        (Some(code), _) => state
            .scheduler
            .daily_auction_by_code(&code)
            .await?
            .ok_or_else(|| AuctionError::NotFound(format!("daily auction {code}")))?,
        (None, date) => {
            let date = date.unwrap_or_else(|| state.clock.local_date(state.clock.now()));
            state
                .scheduler
                .daily_auction(date)
                .await?
                .ok_or_else(|| AuctionError::NotFound(format!("daily auction for {date}")))?
        }
    };
    Ok(envelope("daily auction", daily))
}

/// GET /api/scheduler/auctions/:id
async fn auction(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> Result<Json<Value>> {
    let auction = load_current(&state, id).await?;
    Ok(envelope("auction", AuctionSummary::from(&auction)))
}

#[derive(Debug, Deserialize)]
struct RoundQuery {
    round: Option<u32>,
}

/// GET /api/scheduler/auctions/:id/leaderboard?round=N
async fn auction_leaderboard(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<RoundQuery>,
) -> Result<Json<Value>> {
    let auction = load_current(&state, id).await?;
    Ok(envelope("leaderboard", leaderboard(&auction, q.round)?))
}

#[derive(Debug, Deserialize)]
struct BidRequest {
    player_id: String,
    amount: i64,
}

/// POST /api/scheduler/auctions/:id/bids
async fn bid(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<BidRequest>,
) -> Result<Json<Value>> {
    let now = state.clock.now();
    let (auction, (transitions, receipt)) = state
        .store
        .mutate(id, |auction| {
            let transitions = advance(auction, now);
            let receipt = place_bid(auction, &req.player_id, req.amount, now)?;
            Ok(((transitions, receipt), true))
        })
        .await?;

    info!(
        auction_id = id,
        round = receipt.round_number,
        player_id = %receipt.player_id,
        amount = receipt.amount,
        "bid placed"
    );
    state
        .event_bus
        .publish_transitions(auction.id, &auction.auction_code, transitions);
    state.event_bus.publish(AuctionEvent::BidPlaced {
        auction_id: auction.id,
        round_number: receipt.round_number,
        player_id: receipt.player_id.clone(),
        amount: receipt.amount,
    });
    Ok(envelope("bid placed", receipt))
}

/// GET /api/scheduler/history/:player_id — the player's recent auctions.
async fn history(
    State(state): State<AppState>,
    ApiPath(player_id): ApiPath<String>,
) -> Result<Json<Value>> {
    let rows = queries::list_player_auctions(state.store.pool(), &player_id, HISTORY_LIMIT).await?;
    let now = state.clock.now();
    let entries: Vec<_> = decode_all(rows)?
        .into_iter()
        .filter_map(|mut a| {
            advance(&mut a, now);
            history_entry(&a, &player_id)
        })
        .collect();
    Ok(envelope("history", entries))
}

/// POST /api/payments/entry/order
async fn entry_order(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateOrderRequest>,
) -> Result<Json<Value>> {
    let order = state.payments.create_entry_order(&req).await?;
    Ok(envelope("order created", order))
}

/// POST /api/payments/claim/order
async fn claim_order(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateOrderRequest>,
) -> Result<Json<Value>> {
    let order = state.payments.create_claim_order(&req).await?;
    Ok(envelope("order created", order))
}

/// POST /api/payments/verify
async fn verify_payment(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> Result<Json<Value>> {
    let outcome = state.payments.verify(&req).await?;
    let message = if outcome.already_verified {
        "payment already verified"
    } else {
        "payment verified"
    };
    Ok(envelope(message, outcome))
}

#[derive(Debug, Default, Deserialize)]
struct CreateDayRequest {
    date: Option<NaiveDate>,
}

/// POST /api/admin/daily-auctions — create (or top up) a day's auctions.
async fn admin_create_day(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<ApiJson<CreateDayRequest>>,
) -> Result<Json<Value>> {
    check_admin_key(&headers, state.config.web.admin_api_key.as_deref())?;
    let now = state.clock.now();
    let date = body
        .and_then(|ApiJson(b)| b.date)
        .unwrap_or_else(|| state.clock.local_date(now));

    let ensured = state.scheduler.ensure_day(date, now).await?;
    let daily = state
        .scheduler
        .sync_day(date, now)
        .await?
        .ok_or_else(|| AuctionError::NotFound(format!("daily auction for {date}")))?;
    info!(
        date = %date,
        day_created = ensured.day_created,
        created = ensured.auctions_created,
        "daily auction created by admin"
    );
    Ok(envelope(
        "daily auction ready",
        json!({
            "day_created": ensured.day_created,
            "created": ensured.auctions_created,
            "daily_auction": daily,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    reason: Option<String>,
}

/// POST /api/admin/auctions/:id/cancel
async fn admin_cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
    body: Option<ApiJson<CancelRequest>>,
) -> Result<Json<Value>> {
    check_admin_key(&headers, state.config.web.admin_api_key.as_deref())?;
    let reason = body
        .and_then(|ApiJson(b)| b.reason)
        .unwrap_or_else(|| "cancelled by admin".to_string());
    let now = state.clock.now();

    let (auction, transitions) = state
        .store
        .mutate(id, |auction| {
            let mut transitions = advance(auction, now);
            transitions.push(engine::cancel(auction, &reason, now)?);
            Ok((transitions, true))
        })
        .await?;

    info!(auction_id = id, reason = %reason, "auction cancelled by admin");
    state
        .event_bus
        .publish_transitions(auction.id, &auction.auction_code, transitions);
    Ok(envelope("auction cancelled", AuctionSummary::from(&auction)))
}

/// POST /api/admin/scheduler/tick — run a scheduler pass now.
async fn admin_tick(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>> {
    check_admin_key(&headers, state.config.web.admin_api_key.as_deref())?;
    let report = state.scheduler.tick().await?;
    Ok(envelope("tick complete", report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_envelope_shape() {
        let Json(body) = envelope("ok", json!({ "n": 1 }));
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "ok");
        assert_eq!(body["data"]["n"], 1);
    }

    #[test]
    fn test_admin_key_required() {
        let mut headers = HeaderMap::new();
        assert!(check_admin_key(&headers, Some("k")).is_err());

        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static("wrong"));
        assert!(check_admin_key(&headers, Some("k")).is_err());

        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static("k"));
        assert!(check_admin_key(&headers, Some("k")).is_ok());
    }

    #[test]
    fn test_admin_routes_disabled_without_key() {
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static(""));
        assert!(matches!(
            check_admin_key(&headers, None),
            Err(AuctionError::Unauthorized)
        ));
        assert!(check_admin_key(&headers, Some("")).is_err());
    }

    #[tokio::test]
    async fn test_bid_without_amount_gets_a_400_envelope() {
        use axum::body::{to_bytes, Body};
        use axum::extract::{FromRequest, Request};
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let req = Request::builder()
            .method("POST")
            .uri("/api/scheduler/auctions/7/bids")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"player_id":"p1"}"#))
            .unwrap();
        let response = ApiJson::<BidRequest>::from_request(req, &())
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().starts_with("invalid request"));
        assert!(body["data"].is_null());
    }

    #[test]
    fn test_bid_request_parses() {
        let req: BidRequest = serde_json::from_str(r#"{"player_id":"p1","amount":250}"#).unwrap();
        assert_eq!(req.player_id, "p1");
        assert_eq!(req.amount, 250);
    }
}
