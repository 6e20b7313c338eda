//! Bid ranking, qualification and bid placement checks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::error::{BidRejection, Result};

use super::model::{AuctionStatus, BidRecord, HourlyAuction, Round};

/// Acknowledgement returned to the bidder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BidReceipt {
    pub auction_id: i64,
    pub round_number: u32,
    pub player_id: String,
    pub amount: i64,
    pub placed_at: DateTime<Utc>,
}

/// Bids in rank order: highest amount first, then earliest, then player id.
/// Only the best bid of each player is kept.
pub fn rank_bids(bids: &[BidRecord]) -> Vec<&BidRecord> {
    let mut ranked: Vec<&BidRecord> = bids.iter().collect();
    ranked.sort_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then(a.placed_at.cmp(&b.placed_at))
            .then_with(|| a.player_id.cmp(&b.player_id))
    });

    let mut seen = HashSet::new();
    ranked.retain(|&b| seen.insert(b.player_id.as_str()));
    ranked
}

/// Top-`k` ranked players of a round. Players without a bid never qualify.
pub fn select_qualifiers(round: &Round, k: usize) -> Vec<String> {
    rank_bids(&round.bids)
        .into_iter()
        .take(k)
        .map(|b| b.player_id.clone())
        .collect()
}

/// Check whether `player_id` may bid `amount` at `now`.
/// Returns the index of the round the bid belongs to.
pub fn validate_bid(
    auction: &HourlyAuction,
    player_id: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> std::result::Result<usize, BidRejection> {
    if auction.status != AuctionStatus::Live {
        return Err(BidRejection::AuctionNotLive);
    }

    let idx = auction
        .active_round_index()
        .ok_or(BidRejection::NoActiveRound)?;
    let round = &auction.rounds[idx];
    if !round.accepts_at(now) {
        return Err(BidRejection::OutsideRoundWindow {
            round: round.round_number,
        });
    }

    let participant = auction
        .participant(player_id)
        .ok_or(BidRejection::NotParticipant)?;
    if participant.is_eliminated {
        return Err(BidRejection::Eliminated {
            round: participant.eliminated_in_round.unwrap_or(0),
        });
    }
    if round.bid_of(player_id).is_some() {
        return Err(BidRejection::AlreadyBid {
            round: round.round_number,
        });
    }

    let s = &auction.settings;
    if amount < s.min_bid || amount > s.max_bid {
        return Err(BidRejection::AmountOutOfRange {
            min: s.min_bid,
            max: s.max_bid,
        });
    }

    Ok(idx)
}

/// Validate and record a bid, updating the bidder's aggregate stats.
pub fn place_bid(
    auction: &mut HourlyAuction,
    player_id: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<BidReceipt> {
    let idx = validate_bid(auction, player_id, amount, now)?;
    let auction_id = auction.id;

    let participant = auction
        .participant_mut(player_id)
        .ok_or(BidRejection::NotParticipant)?;
    participant.bids_placed += 1;
    participant.total_bid_amount += amount;
    participant.highest_bid = participant.highest_bid.max(amount);
    participant.last_bid_at = Some(now);
    let username = participant.username.clone();

    let round = &mut auction.rounds[idx];
    round.bids.push(BidRecord {
        player_id: player_id.to_string(),
        username,
        amount,
        placed_at: now,
    });

    Ok(BidReceipt {
        auction_id,
        round_number: round.round_number,
        player_id: player_id.to_string(),
        amount,
        placed_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::model::fixtures::*;
    use crate::auction::model::RoundStatus;
    use crate::error::AuctionError;
    use chrono::Duration;

    fn live_auction(players: &[&str]) -> HourlyAuction {
        let mut a = auction();
        a.status = AuctionStatus::Live;
        a.rounds[0].status = RoundStatus::Active;
        a.participants = players.iter().map(|p| participant(p)).collect();
        a
    }

    #[test]
    fn test_rank_by_amount_then_earliest() {
        let t = t0();
        let bids = vec![
            bid("a", 100, t + Duration::seconds(30)),
            bid("b", 300, t + Duration::seconds(50)),
            bid("c", 100, t + Duration::seconds(10)),
            bid("d", 200, t + Duration::seconds(5)),
        ];
        let order: Vec<_> = rank_bids(&bids).iter().map(|b| b.player_id.as_str()).collect();
        assert_eq!(order, vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn test_rank_full_tie_falls_back_to_player_id() {
        let t = t0();
        let bids = vec![bid("z", 50, t), bid("m", 50, t)];
        let order: Vec<_> = rank_bids(&bids).iter().map(|b| b.player_id.as_str()).collect();
        assert_eq!(order, vec!["m", "z"]);
    }

    #[test]
    fn test_rank_keeps_best_bid_per_player() {
        let t = t0();
        let bids = vec![bid("a", 10, t), bid("a", 90, t), bid("b", 50, t)];
        let ranked = rank_bids(&bids);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].amount, 90);
    }

    #[test]
    fn test_top_k_qualifiers_with_ties() {
        // Entry fee 60, six bids, top three qualify.
        let t = t0();
        let mut a = live_auction(&["p1", "p2", "p3", "p4", "p5", "p6"]);
        a.rounds[0].bids = vec![
            bid("p1", 500, t + Duration::seconds(40)),
            bid("p2", 750, t + Duration::seconds(20)),
            bid("p3", 500, t + Duration::seconds(10)),
            bid("p4", 120, t + Duration::seconds(1)),
            bid("p5", 750, t + Duration::seconds(25)),
            bid("p6", 499, t + Duration::seconds(2)),
        ];
        let q = select_qualifiers(&a.rounds[0], 3);
        assert_eq!(q, vec!["p2", "p5", "p3"]);
    }

    #[test]
    fn test_fewer_bidders_than_k_all_qualify() {
        let t = t0();
        let mut a = live_auction(&["p1", "p2", "p3"]);
        a.rounds[0].bids = vec![bid("p2", 40, t)];
        assert_eq!(select_qualifiers(&a.rounds[0], 3), vec!["p2"]);
    }

    #[test]
    fn test_place_bid_updates_stats() {
        let mut a = live_auction(&["p1"]);
        let now = t0() + Duration::minutes(3);
        let receipt = place_bid(&mut a, "p1", 250, now).unwrap();
        assert_eq!(receipt.round_number, 1);
        assert_eq!(a.rounds[0].bids.len(), 1);
        let p = a.participant("p1").unwrap();
        assert_eq!(p.bids_placed, 1);
        assert_eq!(p.total_bid_amount, 250);
        assert_eq!(p.highest_bid, 250);
        assert_eq!(p.last_bid_at, Some(now));
    }

    #[test]
    fn test_rejects_second_bid_in_round() {
        let mut a = live_auction(&["p1"]);
        let now = t0() + Duration::minutes(1);
        place_bid(&mut a, "p1", 100, now).unwrap();
        let err = place_bid(&mut a, "p1", 200, now).unwrap_err();
        assert!(matches!(
            err,
            AuctionError::BidRejected(BidRejection::AlreadyBid { round: 1 })
        ));
    }

    #[test]
    fn test_rejects_outside_window() {
        let a = live_auction(&["p1"]);
        let late = a.rounds[0].ends_at;
        assert_eq!(
            validate_bid(&a, "p1", 100, late),
            Err(BidRejection::OutsideRoundWindow { round: 1 })
        );
        let early = t0() - Duration::seconds(1);
        assert!(validate_bid(&a, "p1", 100, early).is_err());
    }

    #[test]
    fn test_rejects_non_participant_and_eliminated() {
        let mut a = live_auction(&["p1", "p2"]);
        let now = t0() + Duration::minutes(1);
        assert_eq!(
            validate_bid(&a, "ghost", 100, now),
            Err(BidRejection::NotParticipant)
        );

        let p2 = a.participant_mut("p2").unwrap();
        p2.is_eliminated = true;
        p2.eliminated_in_round = Some(1);
        assert_eq!(
            validate_bid(&a, "p2", 100, now),
            Err(BidRejection::Eliminated { round: 1 })
        );
    }

    #[test]
    fn test_rejects_amount_out_of_range() {
        let a = live_auction(&["p1"]);
        let now = t0() + Duration::minutes(1);
        let expected = Err(BidRejection::AmountOutOfRange { min: 10, max: 10_000 });
        assert_eq!(validate_bid(&a, "p1", 9, now), expected);
        assert_eq!(validate_bid(&a, "p1", 10_001, now), expected);
        assert!(validate_bid(&a, "p1", 10, now).is_ok());
    }

    #[test]
    fn test_rejects_when_not_live() {
        let mut a = live_auction(&["p1"]);
        a.status = AuctionStatus::Upcoming;
        assert_eq!(
            validate_bid(&a, "p1", 100, t0()),
            Err(BidRejection::AuctionNotLive)
        );
        a.status = AuctionStatus::Live;
        a.rounds[0].status = RoundStatus::Completed;
        assert_eq!(
            validate_bid(&a, "p1", 100, t0()),
            Err(BidRejection::NoActiveRound)
        );
    }
}
