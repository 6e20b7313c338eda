//! Auction engine — the per-auction round state machine.
//!
//! Every function here is a pure mutation of an `HourlyAuction` given `now`,
//! so the scheduler and request handlers can replay it on a freshly loaded
//! document before writing it back with a version check.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AuctionError, Result};

use super::model::{
    AuctionStatus, ClaimStatus, HourlyAuction, Participant, Round, RoundStatus, Winner,
};
use super::round::{rank_bids, select_qualifiers};

/// A state change produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    AuctionStarted,
    AuctionCancelled {
        reason: String,
    },
    RoundStarted {
        round_number: u32,
        ends_at: DateTime<Utc>,
    },
    RoundCompleted {
        round_number: u32,
        qualified: Vec<String>,
        eliminated: Vec<String>,
    },
    AuctionCompleted {
        winner_ids: Vec<String>,
    },
    ParticipantJoined {
        player_id: String,
        participant_count: usize,
    },
    ClaimOpened {
        player_id: String,
        rank: u32,
        deadline: DateTime<Utc>,
    },
    ClaimExpired {
        player_id: String,
        rank: u32,
    },
    PrizeClaimed {
        player_id: String,
        rank: u32,
        amount: i64,
    },
}

pub const REASON_NO_PARTICIPANTS: &str = "no participants";

/// Player details captured when an entry payment is verified.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub player_id: String,
    pub username: String,
    pub entry_fee_paid: i64,
    pub payment_order_id: Option<String>,
}

/// Bring an auction up to date with `now`, replaying every state change
/// that is due. Calling it twice with the same `now` is a no-op.
pub fn advance(auction: &mut HourlyAuction, now: DateTime<Utc>) -> Vec<Transition> {
    let mut transitions = Vec::new();
    // Start, one step per round, and a possible resume or finish.
    let max_steps = auction.rounds.len() + 2;
    for _ in 0..max_steps {
        let step = step(auction, now);
        if step.is_empty() {
            break;
        }
        transitions.extend(step);
    }
    transitions
}

fn step(auction: &mut HourlyAuction, now: DateTime<Utc>) -> Vec<Transition> {
    match auction.status {
        AuctionStatus::Upcoming => {
            if now < auction.starts_at {
                return Vec::new();
            }
            if auction.participants.is_empty() {
                auction.status = AuctionStatus::Cancelled;
                auction.cancel_reason = Some(REASON_NO_PARTICIPANTS.to_string());
                auction.completed_at = Some(now);
                return vec![Transition::AuctionCancelled {
                    reason: REASON_NO_PARTICIPANTS.to_string(),
                }];
            }

            auction.status = AuctionStatus::Live;
            let mut out = vec![Transition::AuctionStarted];
            out.extend(activate_round(auction, 0));
            out
        }
        AuctionStatus::Live => {
            let Some(idx) = auction.active_round_index() else {
                // Live without an active round: resume at the first pending one.
                return match auction
                    .rounds
                    .iter()
                    .position(|r| r.status == RoundStatus::Pending)
                {
                    Some(next) => activate_round(auction, next),
                    None => finish(auction, now),
                };
            };
            if now < auction.rounds[idx].ends_at {
                return Vec::new();
            }
            complete_round(auction, idx, now)
        }
        AuctionStatus::Completed | AuctionStatus::Cancelled => Vec::new(),
    }
}

fn activate_round(auction: &mut HourlyAuction, idx: usize) -> Vec<Transition> {
    let round = &mut auction.rounds[idx];
    round.status = RoundStatus::Active;
    vec![Transition::RoundStarted {
        round_number: round.round_number,
        ends_at: round.ends_at,
    }]
}

fn complete_round(auction: &mut HourlyAuction, idx: usize, now: DateTime<Utc>) -> Vec<Transition> {
    let round_count = auction.settings.round_count;
    let is_final = idx + 1 >= auction.rounds.len();
    let k = if is_final {
        auction.settings.winners_count as usize
    } else {
        auction.settings.qualifiers_per_round as usize
    };

    let round = &mut auction.rounds[idx];
    let round_number = round.round_number;
    let qualified = select_qualifiers(round, k);
    round.status = RoundStatus::Completed;
    round.qualified_player_ids = qualified.clone();

    let eliminated = apply_qualification(
        &mut auction.participants,
        &qualified,
        round_number,
        round_count,
        is_final,
    );

    let mut out = vec![Transition::RoundCompleted {
        round_number,
        qualified: qualified.clone(),
        eliminated,
    }];

    if is_final || qualified.is_empty() {
        out.extend(finish(auction, now));
    } else {
        out.extend(activate_round(auction, idx + 1));
    }
    out
}

/// Eliminate every still-active participant outside `qualified`; move the
/// qualifiers to the next round. Returns the newly eliminated player ids.
fn apply_qualification(
    participants: &mut [Participant],
    qualified: &[String],
    round_number: u32,
    round_count: u32,
    is_final: bool,
) -> Vec<String> {
    let mut eliminated = Vec::new();
    for p in participants.iter_mut().filter(|p| !p.is_eliminated) {
        if qualified.contains(&p.player_id) {
            if !is_final {
                p.current_round = (round_number + 1).min(round_count);
            }
        } else {
            p.is_eliminated = true;
            p.eliminated_in_round = Some(round_number);
            eliminated.push(p.player_id.clone());
        }
    }
    eliminated
}

/// Close the auction: rank winners from the last completed round and open
/// the first prize claim.
fn finish(auction: &mut HourlyAuction, now: DateTime<Utc>) -> Vec<Transition> {
    // Pending rounds left behind by an early finish are closed out empty.
    for r in auction
        .rounds
        .iter_mut()
        .filter(|r| r.status != RoundStatus::Completed)
    {
        r.status = RoundStatus::Completed;
    }

    let winners = auction
        .rounds
        .iter()
        .rev()
        .find(|r| !r.qualified_player_ids.is_empty())
        .filter(|r| r.round_number == auction.settings.round_count)
        .map(|r| {
            rank_winners(
                r,
                auction.settings.winners_count as usize,
                now,
                auction.settings.claim_window(),
            )
        })
        .unwrap_or_default();

    // Anyone still standing who did not place among the winners is out.
    for p in auction.participants.iter_mut().filter(|p| !p.is_eliminated) {
        if !winners.iter().any(|w| w.player_id == p.player_id) {
            p.is_eliminated = true;
            p.eliminated_in_round = Some(p.current_round);
        }
    }

    auction.status = AuctionStatus::Completed;
    auction.completed_at = Some(now);

    let mut out = vec![Transition::AuctionCompleted {
        winner_ids: winners.iter().map(|w| w.player_id.clone()).collect(),
    }];
    if let Some(first) = winners.first() {
        if let Some(deadline) = first.claim_deadline {
            out.push(Transition::ClaimOpened {
                player_id: first.player_id.clone(),
                rank: first.rank,
                deadline,
            });
        }
    }
    auction.winners = winners;
    out
}

/// Ranked winners of the final round. Rank 1 may claim straight away; the
/// rest wait their turn.
pub fn rank_winners(
    final_round: &Round,
    winners_count: usize,
    now: DateTime<Utc>,
    claim_window: chrono::Duration,
) -> Vec<Winner> {
    rank_bids(&final_round.bids)
        .into_iter()
        .take(winners_count)
        .enumerate()
        .map(|(i, b)| {
            let first = i == 0;
            Winner {
                rank: i as u32 + 1,
                player_id: b.player_id.clone(),
                username: b.username.clone(),
                final_bid: b.amount,
                claim_status: if first {
                    ClaimStatus::Pending
                } else {
                    ClaimStatus::Waiting
                },
                claim_deadline: first.then(|| now + claim_window),
                claimed_at: None,
                payment_order_id: None,
            }
        })
        .collect()
}

/// Roll the prize-claim queue forward: an expired claim passes to the next
/// waiting winner.
pub fn advance_claims(auction: &mut HourlyAuction, now: DateTime<Utc>) -> Vec<Transition> {
    if auction.status != AuctionStatus::Completed {
        return Vec::new();
    }
    if auction
        .winners
        .iter()
        .any(|w| w.claim_status == ClaimStatus::Claimed)
    {
        return Vec::new();
    }

    let window = auction.settings.claim_window();
    let mut out = Vec::new();

    let Some(idx) = auction
        .winners
        .iter()
        .position(|w| w.claim_status == ClaimStatus::Pending)
    else {
        return out;
    };

    let expired = auction.winners[idx]
        .claim_deadline
        .map(|d| now >= d)
        .unwrap_or(true);
    if !expired {
        return out;
    }

    let w = &mut auction.winners[idx];
    w.claim_status = ClaimStatus::Expired;
    out.push(Transition::ClaimExpired {
        player_id: w.player_id.clone(),
        rank: w.rank,
    });

    if let Some(next) = auction
        .winners
        .iter_mut()
        .find(|w| w.claim_status == ClaimStatus::Waiting)
    {
        let deadline = now + window;
        next.claim_status = ClaimStatus::Pending;
        next.claim_deadline = Some(deadline);
        out.push(Transition::ClaimOpened {
            player_id: next.player_id.clone(),
            rank: next.rank,
            deadline,
        });
    }
    out
}

/// The winner entry `player_id` may pay for right now.
pub fn claimable_winner<'a>(
    auction: &'a HourlyAuction,
    player_id: &str,
    now: DateTime<Utc>,
) -> Result<&'a Winner> {
    if auction.status != AuctionStatus::Completed {
        return Err(AuctionError::ClaimRejected("auction has not finished".into()));
    }
    let winner = auction
        .winner(player_id)
        .ok_or_else(|| AuctionError::ClaimRejected("player is not a winner".into()))?;
    match winner.claim_status {
        ClaimStatus::Pending => {}
        ClaimStatus::Waiting => {
            return Err(AuctionError::ClaimRejected(
                "a higher-ranked winner is still claiming".into(),
            ))
        }
        ClaimStatus::Claimed => {
            return Err(AuctionError::ClaimRejected("prize already claimed".into()))
        }
        ClaimStatus::Expired | ClaimStatus::Closed => {
            return Err(AuctionError::ClaimRejected("claim window has closed".into()))
        }
    }
    if winner.claim_deadline.is_some_and(|d| now >= d) {
        return Err(AuctionError::ClaimRejected("claim window has closed".into()));
    }
    Ok(winner)
}

/// Record a paid prize claim and close the queue behind it.
pub fn mark_claimed(
    auction: &mut HourlyAuction,
    player_id: &str,
    payment_order_id: &str,
    now: DateTime<Utc>,
) -> Result<Transition> {
    claimable_winner(auction, player_id, now)?;

    let mut claimed = None;
    for w in auction.winners.iter_mut() {
        if w.player_id == player_id {
            w.claim_status = ClaimStatus::Claimed;
            w.claimed_at = Some(now);
            w.payment_order_id = Some(payment_order_id.to_string());
            claimed = Some(Transition::PrizeClaimed {
                player_id: w.player_id.clone(),
                rank: w.rank,
                amount: w.final_bid,
            });
        } else if w.claim_status == ClaimStatus::Waiting {
            w.claim_status = ClaimStatus::Closed;
        }
    }
    claimed.ok_or_else(|| AuctionError::ClaimRejected("player is not a winner".into()))
}

/// Whether `player_id` could join right now. Entry is open while the auction
/// is upcoming and during the first round.
pub fn can_join(auction: &HourlyAuction, player_id: &str, now: DateTime<Utc>) -> Result<()> {
    match auction.status {
        AuctionStatus::Upcoming => {}
        AuctionStatus::Live => {
            let in_first_round = auction
                .active_round()
                .map(|r| r.round_number == 1 && r.accepts_at(now))
                .unwrap_or(false);
            if !in_first_round {
                return Err(AuctionError::InvalidState(
                    "entry closes when round 1 ends".into(),
                ));
            }
        }
        AuctionStatus::Completed | AuctionStatus::Cancelled => {
            return Err(AuctionError::InvalidState(format!(
                "auction is {}",
                auction.status
            )))
        }
    }
    if auction.participant(player_id).is_some() {
        return Err(AuctionError::InvalidState("player already joined".into()));
    }
    if auction.participants.len() >= auction.settings.max_participants as usize {
        return Err(AuctionError::InvalidState("auction is full".into()));
    }
    Ok(())
}

/// Add a paid participant.
pub fn join(auction: &mut HourlyAuction, req: JoinRequest, now: DateTime<Utc>) -> Result<Transition> {
    can_join(auction, &req.player_id, now)?;

    auction.participants.push(Participant {
        player_id: req.player_id.clone(),
        username: req.username,
        entry_fee_paid: req.entry_fee_paid,
        payment_order_id: req.payment_order_id,
        joined_at: now,
        current_round: 1,
        is_eliminated: false,
        eliminated_in_round: None,
        bids_placed: 0,
        total_bid_amount: 0,
        highest_bid: 0,
        last_bid_at: None,
    });

    Ok(Transition::ParticipantJoined {
        player_id: req.player_id,
        participant_count: auction.participants.len(),
    })
}

/// Admin cancel of an auction that has not finished yet.
pub fn cancel(auction: &mut HourlyAuction, reason: &str, now: DateTime<Utc>) -> Result<Transition> {
    if auction.status.is_terminal() {
        return Err(AuctionError::InvalidState(format!(
            "auction is already {}",
            auction.status
        )));
    }
    for r in auction
        .rounds
        .iter_mut()
        .filter(|r| r.status == RoundStatus::Active)
    {
        r.status = RoundStatus::Completed;
    }
    auction.status = AuctionStatus::Cancelled;
    auction.cancel_reason = Some(reason.to_string());
    auction.completed_at = Some(now);
    Ok(Transition::AuctionCancelled {
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::model::fixtures::*;
    use crate::auction::model::BidRecord;
    use crate::auction::round::place_bid;
    use chrono::Duration;

    fn mins(m: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(m)
    }

    fn joined(players: &[&str]) -> HourlyAuction {
        let mut a = auction();
        a.participants = players.iter().map(|p| participant(p)).collect();
        a
    }

    #[test]
    fn test_waits_until_start() {
        let mut a = joined(&["p1"]);
        assert!(advance(&mut a, mins(-1)).is_empty());
        assert_eq!(a.status, AuctionStatus::Upcoming);
    }

    #[test]
    fn test_start_activates_round_one() {
        let mut a = joined(&["p1"]);
        let t = advance(&mut a, mins(0));
        assert_eq!(a.status, AuctionStatus::Live);
        assert_eq!(a.rounds[0].status, RoundStatus::Active);
        assert_eq!(t[0], Transition::AuctionStarted);
        assert!(matches!(t[1], Transition::RoundStarted { round_number: 1, .. }));
    }

    #[test]
    fn test_cancels_without_participants() {
        let mut a = auction();
        let t = advance(&mut a, mins(0));
        assert_eq!(a.status, AuctionStatus::Cancelled);
        assert_eq!(a.cancel_reason.as_deref(), Some(REASON_NO_PARTICIPANTS));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_advance_is_idempotent() {
        let mut a = joined(&["p1", "p2"]);
        advance(&mut a, mins(5));
        let snapshot = a.clone();
        assert!(advance(&mut a, mins(5)).is_empty());
        assert_eq!(a, snapshot);
    }

    #[test]
    fn test_round_completion_eliminates_non_qualifiers() {
        let mut a = joined(&["p1", "p2", "p3", "p4", "p5"]);
        advance(&mut a, mins(0));
        place_bid(&mut a, "p1", 100, mins(1)).unwrap();
        place_bid(&mut a, "p2", 400, mins(2)).unwrap();
        place_bid(&mut a, "p3", 300, mins(3)).unwrap();
        place_bid(&mut a, "p4", 200, mins(4)).unwrap();
        // p5 never bids

        let t = advance(&mut a, mins(15));
        assert_eq!(
            t[0],
            Transition::RoundCompleted {
                round_number: 1,
                qualified: vec!["p2".into(), "p3".into(), "p4".into()],
                eliminated: vec!["p1".into(), "p5".into()],
            }
        );
        assert!(matches!(t[1], Transition::RoundStarted { round_number: 2, .. }));
        assert_eq!(a.rounds[1].status, RoundStatus::Active);

        let p1 = a.participant("p1").unwrap();
        assert!(p1.is_eliminated);
        assert_eq!(p1.eliminated_in_round, Some(1));
        assert_eq!(a.participant("p2").unwrap().current_round, 2);
        assert_eq!(a.remaining_players(), 3);
    }

    #[test]
    fn test_full_auction_ranks_winners() {
        let mut a = joined(&["p1", "p2", "p3", "p4"]);
        advance(&mut a, mins(0));
        for (round_start, bids) in [
            (0, vec![("p1", 100), ("p2", 200), ("p3", 300), ("p4", 400)]),
            (15, vec![("p2", 250), ("p3", 350), ("p4", 450)]),
            (30, vec![("p2", 500), ("p3", 600), ("p4", 700)]),
            (45, vec![("p2", 900), ("p3", 800), ("p4", 1000)]),
        ] {
            advance(&mut a, mins(round_start));
            for (i, (p, amt)) in bids.into_iter().enumerate() {
                place_bid(&mut a, p, amt, mins(round_start + 1 + i as i64)).unwrap();
            }
        }

        let t = advance(&mut a, mins(60));
        assert_eq!(a.status, AuctionStatus::Completed);
        let ids: Vec<_> = a.winners.iter().map(|w| w.player_id.as_str()).collect();
        assert_eq!(ids, vec!["p4", "p2", "p3"]);
        assert_eq!(a.winners[0].final_bid, 1000);
        assert_eq!(a.winners[0].claim_status, ClaimStatus::Pending);
        assert_eq!(a.winners[0].claim_deadline, Some(mins(90)));
        assert_eq!(a.winners[1].claim_status, ClaimStatus::Waiting);
        assert!(t.iter().any(|t| matches!(t, Transition::ClaimOpened { rank: 1, .. })));
        assert!(a.participant("p1").unwrap().is_eliminated);
        assert!(!a.participant("p4").unwrap().is_eliminated);
    }

    #[test]
    fn test_no_participant_exceeds_round_count() {
        let mut a = joined(&["p1", "p2"]);
        advance(&mut a, mins(0));
        for round_start in [0, 15, 30, 45] {
            advance(&mut a, mins(round_start));
            place_bid(&mut a, "p1", 100, mins(round_start + 1)).unwrap();
            place_bid(&mut a, "p2", 50, mins(round_start + 2)).unwrap();
        }
        advance(&mut a, mins(60));
        for p in &a.participants {
            assert!(p.current_round <= a.settings.round_count);
        }
    }

    #[test]
    fn test_catch_up_after_downtime() {
        let mut a = joined(&["p1", "p2"]);
        // Scheduler was down for the whole hour.
        let t = advance(&mut a, mins(75));
        assert_eq!(a.status, AuctionStatus::Completed);
        assert!(a.winners.is_empty());
        assert!(a.participants.iter().all(|p| p.is_eliminated));
        assert!(a.rounds.iter().all(|r| r.status == RoundStatus::Completed));
        assert!(matches!(t.last(), Some(Transition::AuctionCompleted { .. })));
    }

    #[test]
    fn test_catch_up_runs_every_round_of_a_long_auction() {
        let mut s = settings();
        s.round_count = 80;
        s.round_duration_minutes = 1;
        let mut a = auction_with(s);
        a.participants = ["p1", "p2"].iter().map(|p| participant(p)).collect();
        for round in &mut a.rounds {
            for (player_id, amount) in [("p1", 200), ("p2", 100)] {
                round.bids.push(BidRecord {
                    player_id: player_id.into(),
                    username: format!("user_{player_id}"),
                    amount,
                    placed_at: round.starts_at,
                });
            }
        }

        let t = advance(&mut a, mins(90));
        assert_eq!(a.status, AuctionStatus::Completed);
        assert!(a.rounds.iter().all(|r| r.status == RoundStatus::Completed));
        assert_eq!(a.winners.len(), 2);
        assert!(matches!(t.last(), Some(Transition::AuctionCompleted { .. })));
    }

    #[test]
    fn test_early_finish_when_nobody_qualifies() {
        let mut a = joined(&["p1"]);
        advance(&mut a, mins(0));
        let t = advance(&mut a, mins(15));
        assert_eq!(a.status, AuctionStatus::Completed);
        assert!(t
            .iter()
            .any(|t| matches!(t, Transition::AuctionCompleted { winner_ids } if winner_ids.is_empty())));
    }

    fn completed_with_winners() -> HourlyAuction {
        let mut a = joined(&["p1", "p2", "p3"]);
        advance(&mut a, mins(0));
        for round_start in [0, 15, 30, 45] {
            advance(&mut a, mins(round_start));
            place_bid(&mut a, "p1", 300, mins(round_start + 1)).unwrap();
            place_bid(&mut a, "p2", 200, mins(round_start + 2)).unwrap();
            place_bid(&mut a, "p3", 100, mins(round_start + 3)).unwrap();
        }
        advance(&mut a, mins(60));
        a
    }

    #[test]
    fn test_expired_claim_passes_to_next_rank() {
        let mut a = completed_with_winners();
        assert!(advance_claims(&mut a, mins(80)).is_empty());

        let t = advance_claims(&mut a, mins(90));
        assert_eq!(
            t,
            vec![
                Transition::ClaimExpired {
                    player_id: "p1".into(),
                    rank: 1
                },
                Transition::ClaimOpened {
                    player_id: "p2".into(),
                    rank: 2,
                    deadline: mins(120)
                },
            ]
        );
        assert_eq!(a.winners[0].claim_status, ClaimStatus::Expired);
        assert_eq!(a.winners[1].claim_status, ClaimStatus::Pending);
        assert!(a.claims_open());
    }

    #[test]
    fn test_last_expiry_closes_queue() {
        let mut a = completed_with_winners();
        advance_claims(&mut a, mins(90));
        advance_claims(&mut a, mins(120));
        let t = advance_claims(&mut a, mins(150));
        assert_eq!(t.len(), 1);
        assert!(!a.claims_open());
    }

    #[test]
    fn test_claim_closes_waiting_winners() {
        let mut a = completed_with_winners();
        let t = mark_claimed(&mut a, "p1", "order_1", mins(70)).unwrap();
        assert_eq!(
            t,
            Transition::PrizeClaimed {
                player_id: "p1".into(),
                rank: 1,
                amount: 300
            }
        );
        assert_eq!(a.winners[1].claim_status, ClaimStatus::Closed);
        assert!(!a.claims_open());
        assert!(advance_claims(&mut a, mins(500)).is_empty());
    }

    #[test]
    fn test_claim_rejected_out_of_turn_or_late() {
        let mut a = completed_with_winners();
        assert!(mark_claimed(&mut a, "p2", "o", mins(70)).is_err());
        assert!(mark_claimed(&mut a, "p1", "o", mins(90)).is_err());
        assert!(mark_claimed(&mut a, "nobody", "o", mins(70)).is_err());
    }

    #[test]
    fn test_join_rules() {
        let mut a = auction();
        let req = |id: &str| JoinRequest {
            player_id: id.into(),
            username: id.into(),
            entry_fee_paid: 60,
            payment_order_id: None,
        };
        join(&mut a, req("p1"), mins(-10)).unwrap();
        assert!(matches!(
            join(&mut a, req("p1"), mins(-9)),
            Err(AuctionError::InvalidState(_))
        ));

        advance(&mut a, mins(0));
        join(&mut a, req("p2"), mins(5)).unwrap();
        assert_eq!(a.participant("p2").unwrap().current_round, 1);

        advance(&mut a, mins(15));
        assert!(join(&mut a, req("p3"), mins(16)).is_err());
    }

    #[test]
    fn test_join_respects_capacity() {
        let mut s = settings();
        s.max_participants = 1;
        let mut a = auction_with(s);
        a.participants.push(participant("p1"));
        assert!(can_join(&a, "p2", mins(-1)).is_err());
    }

    #[test]
    fn test_cancel_live_auction() {
        let mut a = joined(&["p1"]);
        advance(&mut a, mins(0));
        cancel(&mut a, "maintenance", mins(3)).unwrap();
        assert_eq!(a.status, AuctionStatus::Cancelled);
        assert!(a.active_round().is_none());
        assert!(cancel(&mut a, "again", mins(4)).is_err());
        assert!(advance(&mut a, mins(100)).is_empty());
    }
}
