//! SQL query functions for all tables.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use sqlx::types::Json;
use sqlx::PgPool;

use super::models::*;
use crate::auction::model::{HourlyAuction, NewHourlyAuction};
use crate::daily::code::format_daily_code;
use crate::daily::DailySlot;
use crate::error::Result;

// ── Daily auctions ───────────────────────────────────────────────

/// Next code from the daily sequence. Values are never reused, so codes
/// only ever grow even if an insert loses a race.
pub async fn next_daily_code(pool: &PgPool) -> Result<String> {
    let seq = sqlx::query_scalar::<_, i64>("SELECT nextval('daily_auction_code_seq')")
        .fetch_one(pool)
        .await?;
    Ok(format_daily_code(seq))
}

pub async fn get_daily_auction_by_code(
    pool: &PgPool,
    daily_code: &str,
) -> Result<Option<DbDailyAuction>> {
    let row = sqlx::query_as::<_, DbDailyAuction>(
        "SELECT * FROM daily_auctions WHERE daily_code = $1"
    )
    .bind(daily_code)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_daily_auction_by_date(
    pool: &PgPool,
    date: NaiveDate,
) -> Result<Option<DbDailyAuction>> {
    let row = sqlx::query_as::<_, DbDailyAuction>(
        "SELECT * FROM daily_auctions WHERE auction_date = $1"
    )
    .bind(date)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Insert a day. Returns `None` when the date already exists.
pub async fn insert_daily_auction(
    pool: &PgPool,
    daily_code: &str,
    date: NaiveDate,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO daily_auctions (daily_code, auction_date)
         VALUES ($1, $2)
         ON CONFLICT (auction_date) DO NOTHING
         RETURNING id"
    )
    .bind(daily_code)
    .bind(date)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

pub async fn list_daily_slots(pool: &PgPool, daily_auction_id: i64) -> Result<Vec<DbDailySlot>> {
    let rows = sqlx::query_as::<_, DbDailySlot>(
        "SELECT * FROM daily_auction_slots WHERE daily_auction_id = $1 ORDER BY time_slot"
    )
    .bind(daily_auction_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn upsert_daily_slot(pool: &PgPool, slot: &DailySlot) -> Result<()> {
    sqlx::query(
        "INSERT INTO daily_auction_slots (daily_auction_id, hourly_auction_id, time_slot,
         auction_code, settings, status, current_round, participant_count, remaining_players,
         top_bid, winner_ids, synced_version, synced_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         ON CONFLICT (daily_auction_id, hourly_auction_id)
         DO UPDATE SET time_slot = EXCLUDED.time_slot, auction_code = EXCLUDED.auction_code,
         settings = EXCLUDED.settings, status = EXCLUDED.status,
         current_round = EXCLUDED.current_round, participant_count = EXCLUDED.participant_count,
         remaining_players = EXCLUDED.remaining_players, top_bid = EXCLUDED.top_bid,
         winner_ids = EXCLUDED.winner_ids, synced_version = EXCLUDED.synced_version,
         synced_at = EXCLUDED.synced_at
         WHERE daily_auction_slots.synced_version <= EXCLUDED.synced_version"
    )
    .bind(slot.daily_auction_id)
    .bind(slot.hourly_auction_id)
    .bind(&slot.time_slot)
    .bind(&slot.auction_code)
    .bind(Json(&slot.settings))
    .bind(slot.status.as_str())
    .bind(slot.current_round as i32)
    .bind(slot.participant_count as i32)
    .bind(slot.remaining_players as i32)
    .bind(slot.top_bid)
    .bind(Json(&slot.winner_ids))
    .bind(slot.synced_version)
    .bind(slot.synced_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn touch_daily_synced(pool: &PgPool, daily_auction_id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE daily_auctions SET last_synced_at = $1 WHERE id = $2")
        .bind(at)
        .bind(daily_auction_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ── Hourly auctions ──────────────────────────────────────────────

/// Insert a planned auction. Returns `None` if the slot already exists.
pub async fn insert_hourly_auction(
    pool: &PgPool,
    daily_auction_id: i64,
    planned: &NewHourlyAuction,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO hourly_auctions (auction_code, daily_auction_id, auction_date, time_slot,
         starts_at, ends_at, status, settings, rounds)
         VALUES ($1, $2, $3, $4, $5, $6, 'UPCOMING', $7, $8)
         ON CONFLICT (auction_date, time_slot) DO NOTHING
         RETURNING id"
    )
    .bind(&planned.auction_code)
    .bind(daily_auction_id)
    .bind(planned.auction_date)
    .bind(&planned.time_slot)
    .bind(planned.starts_at)
    .bind(planned.ends_at)
    .bind(Json(&planned.settings))
    .bind(Json(&planned.rounds))
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

pub async fn get_hourly_auction(pool: &PgPool, id: i64) -> Result<Option<DbHourlyAuction>> {
    let row = sqlx::query_as::<_, DbHourlyAuction>("SELECT * FROM hourly_auctions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_hourly_for_day(pool: &PgPool, daily_auction_id: i64) -> Result<Vec<DbHourlyAuction>> {
    let rows = sqlx::query_as::<_, DbHourlyAuction>(
        "SELECT * FROM hourly_auctions WHERE daily_auction_id = $1 ORDER BY starts_at"
    )
    .bind(daily_auction_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Auctions the scheduler still has work to do on.
pub async fn list_schedulable_auctions(pool: &PgPool) -> Result<Vec<DbHourlyAuction>> {
    let rows = sqlx::query_as::<_, DbHourlyAuction>(
        "SELECT * FROM hourly_auctions
         WHERE status IN ('UPCOMING', 'LIVE') OR claims_open
         ORDER BY starts_at"
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// The live auction, or failing that the next one to start.
pub async fn get_live_or_next_auction(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Option<DbHourlyAuction>> {
    let row = sqlx::query_as::<_, DbHourlyAuction>(
        "SELECT * FROM hourly_auctions
         WHERE status = 'LIVE' OR (status = 'UPCOMING' AND ends_at > $1)
         ORDER BY (status = 'LIVE') DESC, starts_at
         LIMIT 1"
    )
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Write an auction back if nobody else touched it since it was loaded.
/// Returns the new version, or `None` on a version conflict.
pub async fn update_hourly_auction(pool: &PgPool, auction: &HourlyAuction) -> Result<Option<i64>> {
    let version = sqlx::query_scalar::<_, i64>(
        "UPDATE hourly_auctions SET status = $1, rounds = $2, participants = $3, winners = $4,
         claims_open = $5, cancel_reason = $6, completed_at = $7,
         version = version + 1, updated_at = now()
         WHERE id = $8 AND version = $9
         RETURNING version"
    )
    .bind(auction.status.as_str())
    .bind(Json(&auction.rounds))
    .bind(Json(&auction.participants))
    .bind(Json(&auction.winners))
    .bind(auction.claims_open())
    .bind(&auction.cancel_reason)
    .bind(auction.completed_at)
    .bind(auction.id)
    .bind(auction.version)
    .fetch_optional(pool)
    .await?;
    Ok(version)
}

pub async fn list_player_auctions(
    pool: &PgPool,
    player_id: &str,
    limit: i64,
) -> Result<Vec<DbHourlyAuction>> {
    let rows = sqlx::query_as::<_, DbHourlyAuction>(
        "SELECT * FROM hourly_auctions WHERE participants @> $1
         ORDER BY starts_at DESC LIMIT $2"
    )
    .bind(Json(json!([{ "player_id": player_id }])))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ── Payment orders ───────────────────────────────────────────────

pub async fn insert_payment_order(
    pool: &PgPool,
    gateway: &str,
    purpose: &str,
    gateway_order_id: &str,
    auction_id: i64,
    player_id: &str,
    username: &str,
    amount: i64,
    currency: &str,
) -> Result<DbPaymentOrder> {
    let row = sqlx::query_as::<_, DbPaymentOrder>(
        "INSERT INTO payment_orders (gateway, purpose, gateway_order_id, auction_id,
         player_id, username, amount, currency)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *"
    )
    .bind(gateway)
    .bind(purpose)
    .bind(gateway_order_id)
    .bind(auction_id)
    .bind(player_id)
    .bind(username)
    .bind(amount)
    .bind(currency)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_payment_order(
    pool: &PgPool,
    gateway_order_id: &str,
) -> Result<Option<DbPaymentOrder>> {
    let row = sqlx::query_as::<_, DbPaymentOrder>(
        "SELECT * FROM payment_orders WHERE gateway_order_id = $1"
    )
    .bind(gateway_order_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Move an order from `from` to `to`. Returns false if it was no longer in `from`.
pub async fn transition_payment_order(
    pool: &PgPool,
    id: i64,
    from: &str,
    to: &str,
    gateway_payment_id: Option<&str>,
    failure_reason: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE payment_orders SET status = $1,
         gateway_payment_id = COALESCE($2, gateway_payment_id),
         failure_reason = $3, verified_at = $4
         WHERE id = $5 AND status = $6"
    )
    .bind(to)
    .bind(gateway_payment_id)
    .bind(failure_reason)
    .bind(at)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
