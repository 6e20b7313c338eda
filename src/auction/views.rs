//! Read-side projections of an auction served by the API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{AuctionError, Result};

use super::model::{
    AuctionSettings, AuctionStatus, ClaimStatus, HourlyAuction, RoundStatus, Winner,
};
use super::round::rank_bids;

#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    pub round_number: u32,
    pub status: RoundStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub bid_count: usize,
    pub qualified_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuctionSummary {
    pub id: i64,
    pub auction_code: String,
    pub auction_date: NaiveDate,
    pub time_slot: String,
    pub status: AuctionStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub current_round: u32,
    pub participant_count: usize,
    pub remaining_players: usize,
    pub settings: AuctionSettings,
    pub rounds: Vec<RoundSummary>,
    pub winners: Vec<Winner>,
    pub cancel_reason: Option<String>,
}

impl From<&HourlyAuction> for AuctionSummary {
    fn from(a: &HourlyAuction) -> Self {
        Self {
            id: a.id,
            auction_code: a.auction_code.clone(),
            auction_date: a.auction_date,
            time_slot: a.time_slot.clone(),
            status: a.status,
            starts_at: a.starts_at,
            ends_at: a.ends_at,
            current_round: a.current_round_number(),
            participant_count: a.participants.len(),
            remaining_players: a.remaining_players(),
            settings: a.settings.clone(),
            rounds: a
                .rounds
                .iter()
                .map(|r| RoundSummary {
                    round_number: r.round_number,
                    status: r.status,
                    starts_at: r.starts_at,
                    ends_at: r.ends_at,
                    bid_count: r.bids.len(),
                    qualified_count: r.qualified_player_ids.len(),
                })
                .collect(),
            winners: a.winners.clone(),
            cancel_reason: a.cancel_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub player_id: String,
    pub username: String,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
    pub qualified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Leaderboard {
    pub auction_id: i64,
    pub round_number: u32,
    pub status: RoundStatus,
    /// True while the round is still open and the cut line can move.
    pub provisional: bool,
    pub entries: Vec<LeaderboardEntry>,
}

/// Ranked bids of a round. Defaults to the current round.
pub fn leaderboard(auction: &HourlyAuction, round_number: Option<u32>) -> Result<Leaderboard> {
    let number = round_number.unwrap_or_else(|| auction.current_round_number().max(1));
    let round = auction
        .round(number)
        .ok_or_else(|| AuctionError::NotFound(format!("round {number}")))?;

    let is_final = number == auction.settings.round_count;
    let cut = if is_final {
        auction.settings.winners_count as usize
    } else {
        auction.settings.qualifiers_per_round as usize
    };
    let completed = round.status == RoundStatus::Completed;

    let entries = rank_bids(&round.bids)
        .into_iter()
        .enumerate()
        .map(|(i, b)| LeaderboardEntry {
            rank: i as u32 + 1,
            player_id: b.player_id.clone(),
            username: b.username.clone(),
            amount: b.amount,
            placed_at: b.placed_at,
            qualified: if completed {
                round.qualified_player_ids.contains(&b.player_id)
            } else {
                i < cut
            },
        })
        .collect();

    Ok(Leaderboard {
        auction_id: auction.id,
        round_number: number,
        status: round.status,
        provisional: !completed,
        entries,
    })
}

/// One line of a player's auction history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub auction_id: i64,
    pub auction_code: String,
    pub auction_date: NaiveDate,
    pub time_slot: String,
    pub status: AuctionStatus,
    pub entry_fee_paid: i64,
    pub rounds_played: u32,
    pub is_eliminated: bool,
    pub eliminated_in_round: Option<u32>,
    pub bids_placed: u32,
    pub total_bid_amount: i64,
    pub highest_bid: i64,
    pub winner_rank: Option<u32>,
    pub claim_status: Option<ClaimStatus>,
    pub final_bid: Option<i64>,
}

pub fn history_entry(auction: &HourlyAuction, player_id: &str) -> Option<HistoryEntry> {
    let p = auction.participant(player_id)?;
    let winner = auction.winner(player_id);
    Some(HistoryEntry {
        auction_id: auction.id,
        auction_code: auction.auction_code.clone(),
        auction_date: auction.auction_date,
        time_slot: auction.time_slot.clone(),
        status: auction.status,
        entry_fee_paid: p.entry_fee_paid,
        rounds_played: p.eliminated_in_round.unwrap_or(p.current_round),
        is_eliminated: p.is_eliminated,
        eliminated_in_round: p.eliminated_in_round,
        bids_placed: p.bids_placed,
        total_bid_amount: p.total_bid_amount,
        highest_bid: p.highest_bid,
        winner_rank: winner.map(|w| w.rank),
        claim_status: winner.map(|w| w.claim_status),
        final_bid: winner.map(|w| w.final_bid),
    })
}
