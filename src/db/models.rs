//! Database row types for all tables.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use crate::auction::model::{AuctionSettings, HourlyAuction, Participant, Round, Winner};
use crate::daily::{DailyAuction, DailySlot};
use crate::error::AuctionError;

#[derive(Debug, Clone, FromRow)]
pub struct DbHourlyAuction {
    pub id: i64,
    pub auction_code: String,
    pub daily_auction_id: i64,
    pub auction_date: NaiveDate,
    pub time_slot: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: String,
    pub settings: Json<AuctionSettings>,
    pub rounds: Json<Vec<Round>>,
    pub participants: Json<Vec<Participant>>,
    pub winners: Json<Vec<Winner>>,
    pub claims_open: bool,
    pub cancel_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbHourlyAuction> for HourlyAuction {
    type Error = AuctionError;

    fn try_from(row: DbHourlyAuction) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| AuctionError::Corrupt(format!("auction {}: {e}", row.id)))?;
        Ok(HourlyAuction {
            id: row.id,
            auction_code: row.auction_code,
            daily_auction_id: row.daily_auction_id,
            auction_date: row.auction_date,
            time_slot: row.time_slot,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            status,
            settings: row.settings.0,
            rounds: row.rounds.0,
            participants: row.participants.0,
            winners: row.winners.0,
            cancel_reason: row.cancel_reason,
            completed_at: row.completed_at,
            version: row.version,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbDailyAuction {
    pub id: i64,
    pub daily_code: String,
    pub auction_date: NaiveDate,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl DbDailyAuction {
    pub fn with_slots(self, slots: Vec<DailySlot>) -> DailyAuction {
        DailyAuction {
            id: self.id,
            daily_code: self.daily_code,
            auction_date: self.auction_date,
            is_active: self.is_active,
            created_at: self.created_at,
            last_synced_at: self.last_synced_at,
            slots,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbDailySlot {
    pub daily_auction_id: i64,
    pub hourly_auction_id: i64,
    pub time_slot: String,
    pub auction_code: String,
    pub settings: Json<AuctionSettings>,
    pub status: String,
    pub current_round: i32,
    pub participant_count: i32,
    pub remaining_players: i32,
    pub top_bid: Option<i64>,
    pub winner_ids: Json<Vec<String>>,
    pub synced_version: i64,
    pub synced_at: DateTime<Utc>,
}

impl TryFrom<DbDailySlot> for DailySlot {
    type Error = AuctionError;

    fn try_from(row: DbDailySlot) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|e| {
            AuctionError::Corrupt(format!(
                "daily slot {}/{}: {e}",
                row.daily_auction_id, row.hourly_auction_id
            ))
        })?;
        Ok(DailySlot {
            daily_auction_id: row.daily_auction_id,
            hourly_auction_id: row.hourly_auction_id,
            time_slot: row.time_slot,
            auction_code: row.auction_code,
            settings: row.settings.0,
            status,
            current_round: row.current_round.max(0) as u32,
            participant_count: row.participant_count.max(0) as u32,
            remaining_players: row.remaining_players.max(0) as u32,
            top_bid: row.top_bid,
            winner_ids: row.winner_ids.0,
            synced_version: row.synced_version,
            synced_at: row.synced_at,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DbPaymentOrder {
    pub id: i64,
    pub gateway: String,
    pub purpose: String,
    pub gateway_order_id: String,
    pub auction_id: i64,
    pub player_id: String,
    pub username: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub gateway_payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}
