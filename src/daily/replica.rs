//! Daily replica — a per-day snapshot of every hourly auction's
//! configuration and live-tracking fields.
//!
//! The hourly auction is the master. The replica only ever copies from it;
//! `plan_sync` works out which slots are missing or stale and the scheduler
//! writes the result back.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::auction::model::{AuctionSettings, AuctionStatus, HourlyAuction};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySlot {
    pub daily_auction_id: i64,
    pub hourly_auction_id: i64,
    pub time_slot: String,
    pub auction_code: String,
    pub settings: AuctionSettings,
    pub status: AuctionStatus,
    pub current_round: u32,
    pub participant_count: u32,
    pub remaining_players: u32,
    pub top_bid: Option<i64>,
    pub winner_ids: Vec<String>,
    pub synced_version: i64,
    pub synced_at: DateTime<Utc>,
}

impl DailySlot {
    /// Compare everything copied from the master, ignoring sync bookkeeping.
    fn tracks_same_as(&self, other: &DailySlot) -> bool {
        self.time_slot == other.time_slot
            && self.auction_code == other.auction_code
            && self.settings == other.settings
            && self.status == other.status
            && self.current_round == other.current_round
            && self.participant_count == other.participant_count
            && self.remaining_players == other.remaining_players
            && self.top_bid == other.top_bid
            && self.winner_ids == other.winner_ids
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyAuction {
    pub id: i64,
    pub daily_code: String,
    pub auction_date: NaiveDate,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub slots: Vec<DailySlot>,
}

/// Copy of an hourly auction as the replica stores it.
pub fn snapshot_slot(daily_auction_id: i64, hourly: &HourlyAuction, now: DateTime<Utc>) -> DailySlot {
    DailySlot {
        daily_auction_id,
        hourly_auction_id: hourly.id,
        time_slot: hourly.time_slot.clone(),
        auction_code: hourly.auction_code.clone(),
        settings: hourly.settings.clone(),
        status: hourly.status,
        current_round: hourly.current_round_number(),
        participant_count: hourly.participants.len() as u32,
        remaining_players: hourly.remaining_players() as u32,
        top_bid: hourly.top_bid(),
        winner_ids: hourly.winners.iter().map(|w| w.player_id.clone()).collect(),
        synced_version: hourly.version,
        synced_at: now,
    }
}

/// Writes needed to bring a daily replica in line with its masters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPlan {
    pub upserts: Vec<DailySlot>,
    pub added: usize,
    pub refreshed: usize,
    pub unchanged: usize,
    /// Masters that belong to another day and were ignored.
    pub foreign: Vec<i64>,
    /// Replica slots whose master was not in the batch.
    pub orphaned: Vec<i64>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
    }
}

/// Diff the replica against the hourly masters.
pub fn plan_sync(daily: &DailyAuction, hourlies: &[HourlyAuction], now: DateTime<Utc>) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for hourly in hourlies {
        if hourly.daily_auction_id != daily.id {
            plan.foreign.push(hourly.id);
            continue;
        }

        let fresh = snapshot_slot(daily.id, hourly, now);
        match daily
            .slots
            .iter()
            .find(|s| s.hourly_auction_id == hourly.id)
        {
            None => {
                plan.added += 1;
                plan.upserts.push(fresh);
            }
            Some(existing)
                if existing.synced_version < hourly.version
                    || !existing.tracks_same_as(&fresh) =>
            {
                plan.refreshed += 1;
                plan.upserts.push(fresh);
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    plan.orphaned = daily
        .slots
        .iter()
        .filter(|s| !hourlies.iter().any(|h| h.id == s.hourly_auction_id))
        .map(|s| s.hourly_auction_id)
        .collect();

    plan
}

/// Apply a plan to an in-memory replica.
pub fn apply_sync(daily: &mut DailyAuction, plan: &SyncPlan, now: DateTime<Utc>) {
    for slot in &plan.upserts {
        match daily
            .slots
            .iter_mut()
            .find(|s| s.hourly_auction_id == slot.hourly_auction_id)
        {
            Some(existing) => *existing = slot.clone(),
            None => daily.slots.push(slot.clone()),
        }
    }
    daily.slots.sort_by(|a, b| a.time_slot.cmp(&b.time_slot));
    daily.last_synced_at = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::engine::advance;
    use crate::auction::model::fixtures::*;
    use chrono::Duration;

    fn daily() -> DailyAuction {
        DailyAuction {
            id: 1,
            daily_code: "DA000001".into(),
            auction_date: t0().date_naive(),
            is_active: true,
            created_at: t0(),
            last_synced_at: None,
            slots: Vec::new(),
        }
    }

    fn hourly(id: i64, slot: &str) -> HourlyAuction {
        let mut a = auction();
        a.id = id;
        a.time_slot = slot.into();
        a.auction_code = format!("HA-{slot}");
        a
    }

    #[test]
    fn test_missing_slots_are_added() {
        let d = daily();
        let masters = vec![hourly(10, "14:00"), hourly(11, "15:00")];
        let plan = plan_sync(&d, &masters, t0());
        assert_eq!(plan.added, 2);
        assert_eq!(plan.upserts.len(), 2);
        assert_eq!(plan.upserts[0].status, AuctionStatus::Upcoming);
    }

    #[test]
    fn test_sync_converges() {
        let mut d = daily();
        let masters = vec![hourly(10, "14:00")];
        let plan = plan_sync(&d, &masters, t0());
        apply_sync(&mut d, &plan, t0());

        let again = plan_sync(&d, &masters, t0() + Duration::seconds(5));
        assert!(again.is_empty());
        assert_eq!(again.unchanged, 1);
        assert_eq!(d.last_synced_at, Some(t0()));
    }

    #[test]
    fn test_master_changes_refresh_slot() {
        let mut d = daily();
        let mut master = hourly(10, "14:00");
        master.participants.push(participant("p1"));
        let plan = plan_sync(&d, std::slice::from_ref(&master), t0());
        apply_sync(&mut d, &plan, t0());

        advance(&mut master, t0());
        master.version += 1;

        let plan = plan_sync(&d, std::slice::from_ref(&master), t0() + Duration::minutes(1));
        assert_eq!(plan.refreshed, 1);
        apply_sync(&mut d, &plan, t0() + Duration::minutes(1));
        let slot = &d.slots[0];
        assert_eq!(slot.status, AuctionStatus::Live);
        assert_eq!(slot.current_round, 1);
        assert_eq!(slot.participant_count, 1);
        assert_eq!(slot.synced_version, 1);
    }

    #[test]
    fn test_version_bump_alone_refreshes() {
        let mut d = daily();
        let mut master = hourly(10, "14:00");
        let plan = plan_sync(&d, std::slice::from_ref(&master), t0());
        apply_sync(&mut d, &plan, t0());
        master.version = 3;
        let plan = plan_sync(&d, std::slice::from_ref(&master), t0());
        assert_eq!(plan.refreshed, 1);
    }

    #[test]
    fn test_foreign_masters_ignored() {
        let d = daily();
        let mut other = hourly(20, "14:00");
        other.daily_auction_id = 2;
        let plan = plan_sync(&d, &[other], t0());
        assert!(plan.is_empty());
        assert_eq!(plan.foreign, vec![20]);
    }

    #[test]
    fn test_orphaned_slots_reported() {
        let mut d = daily();
        let masters = vec![hourly(10, "14:00"), hourly(11, "15:00")];
        let plan = plan_sync(&d, &masters, t0());
        apply_sync(&mut d, &plan, t0());

        let plan = plan_sync(&d, &masters[..1], t0());
        assert_eq!(plan.orphaned, vec![11]);
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_slots_kept_in_time_order() {
        let mut d = daily();
        let masters = vec![hourly(11, "15:00"), hourly(10, "09:00")];
        let plan = plan_sync(&d, &masters, t0());
        apply_sync(&mut d, &plan, t0());
        let order: Vec<_> = d.slots.iter().map(|s| s.time_slot.as_str()).collect();
        assert_eq!(order, vec!["09:00", "15:00"]);
    }
}
