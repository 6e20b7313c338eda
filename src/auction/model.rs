//! Hourly auction document and its embedded rounds, participants and winners.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::AuctionConfig;

/// Auction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionStatus {
    Upcoming,
    Live,
    Completed,
    Cancelled,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Upcoming => "UPCOMING",
            AuctionStatus::Live => "LIVE",
            AuctionStatus::Completed => "COMPLETED",
            AuctionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AuctionStatus::Completed | AuctionStatus::Cancelled)
    }
}

impl fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuctionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPCOMING" => Ok(AuctionStatus::Upcoming),
            "LIVE" => Ok(AuctionStatus::Live),
            "COMPLETED" => Ok(AuctionStatus::Completed),
            "CANCELLED" => Ok(AuctionStatus::Cancelled),
            other => Err(format!("unknown auction status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    Pending,
    Active,
    Completed,
}

/// Prize claim progress of a single winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    /// Queued behind a higher-ranked winner.
    Waiting,
    /// Entitled to claim until the deadline.
    Pending,
    Claimed,
    Expired,
    /// Another winner claimed the prize first.
    Closed,
}

/// Game parameters frozen into an auction when it is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionSettings {
    pub round_count: u32,
    pub round_duration_minutes: u32,
    pub entry_fee: i64,
    pub prize_value: i64,
    pub min_bid: i64,
    pub max_bid: i64,
    pub qualifiers_per_round: u32,
    pub winners_count: u32,
    pub max_participants: u32,
    pub claim_window_minutes: u32,
}

impl AuctionSettings {
    pub fn from_config(cfg: &AuctionConfig) -> Self {
        Self {
            round_count: cfg.round_count,
            round_duration_minutes: cfg.round_duration_minutes,
            entry_fee: cfg.entry_fee,
            prize_value: cfg.prize_value,
            min_bid: cfg.min_bid,
            max_bid: cfg.max_bid,
            qualifiers_per_round: cfg.qualifiers_per_round,
            winners_count: cfg.winners_count,
            max_participants: cfg.max_participants,
            claim_window_minutes: cfg.claim_window_minutes,
        }
    }

    pub fn round_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.round_duration_minutes))
    }

    pub fn claim_window(&self) -> Duration {
        Duration::minutes(i64::from(self.claim_window_minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidRecord {
    pub player_id: String,
    pub username: String,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub round_number: u32,
    pub status: RoundStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub bids: Vec<BidRecord>,
    /// Filled in rank order when the round completes.
    #[serde(default)]
    pub qualified_player_ids: Vec<String>,
}

impl Round {
    pub fn accepts_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RoundStatus::Active && now >= self.starts_at && now < self.ends_at
    }

    pub fn bid_of(&self, player_id: &str) -> Option<&BidRecord> {
        self.bids.iter().find(|b| b.player_id == player_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub player_id: String,
    pub username: String,
    pub entry_fee_paid: i64,
    pub payment_order_id: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub current_round: u32,
    pub is_eliminated: bool,
    pub eliminated_in_round: Option<u32>,
    pub bids_placed: u32,
    pub total_bid_amount: i64,
    pub highest_bid: i64,
    pub last_bid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub rank: u32,
    pub player_id: String,
    pub username: String,
    /// Amount the winner pays to claim the prize.
    pub final_bid: i64,
    pub claim_status: ClaimStatus,
    pub claim_deadline: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub payment_order_id: Option<String>,
}

/// Canonical per-time-slot auction document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAuction {
    pub id: i64,
    pub auction_code: String,
    pub daily_auction_id: i64,
    pub auction_date: NaiveDate,
    pub time_slot: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AuctionStatus,
    pub settings: AuctionSettings,
    pub rounds: Vec<Round>,
    pub participants: Vec<Participant>,
    pub winners: Vec<Winner>,
    pub cancel_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// An auction that has been planned but not yet inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewHourlyAuction {
    pub auction_code: String,
    pub auction_date: NaiveDate,
    pub time_slot: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub settings: AuctionSettings,
    pub rounds: Vec<Round>,
}

impl NewHourlyAuction {
    /// Lay out `round_count` back-to-back rounds starting at `starts_at`.
    pub fn schedule(
        auction_code: String,
        auction_date: NaiveDate,
        time_slot: String,
        starts_at: DateTime<Utc>,
        settings: AuctionSettings,
    ) -> Self {
        let duration = settings.round_duration();
        let rounds: Vec<Round> = (1..=settings.round_count)
            .map(|n| {
                let offset = duration * (n as i32 - 1);
                Round {
                    round_number: n,
                    status: RoundStatus::Pending,
                    starts_at: starts_at + offset,
                    ends_at: starts_at + offset + duration,
                    bids: Vec::new(),
                    qualified_player_ids: Vec::new(),
                }
            })
            .collect();
        let ends_at = rounds.last().map(|r| r.ends_at).unwrap_or(starts_at);

        Self {
            auction_code,
            auction_date,
            time_slot,
            starts_at,
            ends_at,
            settings,
            rounds,
        }
    }
}

impl HourlyAuction {
    pub fn active_round_index(&self) -> Option<usize> {
        self.rounds
            .iter()
            .position(|r| r.status == RoundStatus::Active)
    }

    pub fn active_round(&self) -> Option<&Round> {
        self.active_round_index().map(|i| &self.rounds[i])
    }

    pub fn round(&self, round_number: u32) -> Option<&Round> {
        self.rounds.iter().find(|r| r.round_number == round_number)
    }

    /// Number of the active round, else the last completed one, else 0.
    pub fn current_round_number(&self) -> u32 {
        if let Some(r) = self.active_round() {
            return r.round_number;
        }
        self.rounds
            .iter()
            .filter(|r| r.status == RoundStatus::Completed)
            .map(|r| r.round_number)
            .max()
            .unwrap_or(0)
    }

    pub fn participant(&self, player_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.player_id == player_id)
    }

    pub fn participant_mut(&mut self, player_id: &str) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.player_id == player_id)
    }

    pub fn remaining_players(&self) -> usize {
        self.participants.iter().filter(|p| !p.is_eliminated).count()
    }

    pub fn winner(&self, player_id: &str) -> Option<&Winner> {
        self.winners.iter().find(|w| w.player_id == player_id)
    }

    /// Highest bid placed in any round.
    pub fn top_bid(&self) -> Option<i64> {
        self.rounds
            .iter()
            .flat_map(|r| r.bids.iter())
            .map(|b| b.amount)
            .max()
    }

    /// True while some winner may still claim the prize.
    pub fn claims_open(&self) -> bool {
        self.winners
            .iter()
            .any(|w| matches!(w.claim_status, ClaimStatus::Pending | ClaimStatus::Waiting))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 0).unwrap()
    }

    pub fn settings() -> AuctionSettings {
        AuctionSettings {
            round_count: 4,
            round_duration_minutes: 15,
            entry_fee: 60,
            prize_value: 10_000,
            min_bid: 10,
            max_bid: 10_000,
            qualifiers_per_round: 3,
            winners_count: 3,
            max_participants: 100,
            claim_window_minutes: 30,
        }
    }

    pub fn auction_with(settings: AuctionSettings) -> HourlyAuction {
        let planned = NewHourlyAuction::schedule(
            "HA20261017-1400".into(),
            t0().date_naive(),
            "14:00".into(),
            t0(),
            settings,
        );
        HourlyAuction {
            id: 7,
            auction_code: planned.auction_code,
            daily_auction_id: 1,
            auction_date: planned.auction_date,
            time_slot: planned.time_slot,
            starts_at: planned.starts_at,
            ends_at: planned.ends_at,
            status: AuctionStatus::Upcoming,
            settings: planned.settings,
            rounds: planned.rounds,
            participants: Vec::new(),
            winners: Vec::new(),
            cancel_reason: None,
            completed_at: None,
            version: 0,
            updated_at: t0(),
        }
    }

    pub fn auction() -> HourlyAuction {
        auction_with(settings())
    }

    pub fn participant(player_id: &str) -> Participant {
        Participant {
            player_id: player_id.into(),
            username: format!("user_{player_id}"),
            entry_fee_paid: 60,
            payment_order_id: None,
            joined_at: t0() - Duration::minutes(5),
            current_round: 1,
            is_eliminated: false,
            eliminated_in_round: None,
            bids_placed: 0,
            total_bid_amount: 0,
            highest_bid: 0,
            last_bid_at: None,
        }
    }

    pub fn bid(player_id: &str, amount: i64, at: DateTime<Utc>) -> BidRecord {
        BidRecord {
            player_id: player_id.into(),
            username: format!("user_{player_id}"),
            amount,
            placed_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_schedule_lays_out_contiguous_rounds() {
        let a = auction();
        assert_eq!(a.rounds.len(), 4);
        for (i, r) in a.rounds.iter().enumerate() {
            assert_eq!(r.round_number, i as u32 + 1);
            assert_eq!(r.status, RoundStatus::Pending);
        }
        for pair in a.rounds.windows(2) {
            assert_eq!(pair[0].ends_at, pair[1].starts_at);
        }
        assert_eq!(a.ends_at, t0() + Duration::minutes(60));
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for s in [
            AuctionStatus::Upcoming,
            AuctionStatus::Live,
            AuctionStatus::Completed,
            AuctionStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<AuctionStatus>().unwrap(), s);
        }
        assert!("PAUSED".parse::<AuctionStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_screaming() {
        let v = serde_json::to_value(AuctionStatus::Live).unwrap();
        assert_eq!(v, serde_json::json!("LIVE"));
    }

    #[test]
    fn test_current_round_number() {
        let mut a = auction();
        assert_eq!(a.current_round_number(), 0);
        a.rounds[0].status = RoundStatus::Completed;
        a.rounds[1].status = RoundStatus::Active;
        assert_eq!(a.current_round_number(), 2);
        a.rounds[1].status = RoundStatus::Completed;
        assert_eq!(a.current_round_number(), 2);
    }
}
