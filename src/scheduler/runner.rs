//! Scheduler — creates each day's auctions, drives every open auction
//! through its rounds and claim window, and keeps the daily replica in sync.

use chrono::{DateTime, Days, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::auction::engine::{advance, advance_claims, Transition};
use crate::auction::model::HourlyAuction;
use crate::clock::Clock;
use crate::config::Config;
use crate::daily::code::parse_daily_code;
use crate::daily::plan::{missing_slots, plan_day};
use crate::daily::replica::{apply_sync, plan_sync};
use crate::daily::{DailyAuction, DailySlot};
use crate::db::models::DbDailyAuction;
use crate::db::queries;
use crate::db::store::{decode_all, AuctionStore};
use crate::error::{AuctionError, Result};
use crate::events::bus::{AuctionEvent, EventBus};

/// What a single tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub started_at: Option<DateTime<Utc>>,
    pub days_created: usize,
    pub auctions_created: usize,
    pub auctions_checked: usize,
    pub auctions_advanced: usize,
    pub transitions: usize,
    pub replicas_synced: usize,
    pub failures: usize,
}

/// Result of `Scheduler::ensure_day`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EnsuredDay {
    pub daily_id: i64,
    pub day_created: bool,
    pub auctions_created: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub ticks: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<TickReport>,
}

pub struct Scheduler {
    config: Arc<Config>,
    store: Arc<AuctionStore>,
    clock: Clock,
    event_bus: Arc<EventBus>,
    status: RwLock<SchedulerStatus>,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        store: Arc<AuctionStore>,
        clock: Clock,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            event_bus,
            status: RwLock::new(SchedulerStatus::default()),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.read().clone()
    }

    /// Make sure `date` has its daily auction and one hourly auction per
    /// remaining slot. Safe to call repeatedly; slots lost to an earlier
    /// partial run are filled in.
    pub async fn ensure_day(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<EnsuredDay> {
        let pool = self.store.pool();

        let (daily_id, daily_code, day_created) =
            match queries::get_daily_auction_by_date(pool, date).await? {
                Some(row) => (row.id, row.daily_code, false),
                None => {
                    let code = queries::next_daily_code(pool).await?;
                    match queries::insert_daily_auction(pool, &code, date).await? {
                        Some(id) => (id, code, true),
                        None => {
                            // Lost the race to another writer; its code wins.
                            let row = queries::get_daily_auction_by_date(pool, date)
                                .await?
                                .ok_or_else(|| {
                                    AuctionError::Conflict(format!("daily auction {date} vanished"))
                                })?;
                            (row.id, row.daily_code, false)
                        }
                    }
                }
            };

        let planned = plan_day(date, &self.config.auction, &self.clock, now)?;
        let existing: Vec<String> = queries::list_hourly_for_day(pool, daily_id)
            .await?
            .into_iter()
            .map(|row| row.time_slot)
            .collect();
        let mut created = 0;
        for auction in missing_slots(&planned, &existing) {
            if queries::insert_hourly_auction(pool, daily_id, auction)
                .await?
                .is_some()
            {
                created += 1;
            }
        }

        if day_created || created > 0 {
            info!(
                daily_code = %daily_code,
                date = %date,
                auctions = created,
                "daily auction scheduled"
            );
            self.event_bus.publish(AuctionEvent::DailyAuctionCreated {
                daily_code,
                auction_date: date,
                auctions: created,
            });
        }

        Ok(EnsuredDay {
            daily_id,
            day_created,
            auctions_created: created,
        })
    }

    /// The replica of `date`, as last synced.
    pub async fn daily_auction(&self, date: NaiveDate) -> Result<Option<DailyAuction>> {
        let row = queries::get_daily_auction_by_date(self.store.pool(), date).await?;
        self.with_slots(row).await
    }

    /// The replica carrying `daily_code`.
    pub async fn daily_auction_by_code(&self, daily_code: &str) -> Result<Option<DailyAuction>> {
        if parse_daily_code(daily_code).is_none() {
            return Err(AuctionError::Validation(format!(
                "malformed daily code {daily_code:?}"
            )));
        }
        let row = queries::get_daily_auction_by_code(self.store.pool(), daily_code).await?;
        self.with_slots(row).await
    }

    async fn with_slots(&self, row: Option<DbDailyAuction>) -> Result<Option<DailyAuction>> {
        let pool = self.store.pool();
        let Some(row) = row else {
            return Ok(None);
        };
        let slots = queries::list_daily_slots(pool, row.id)
            .await?
            .into_iter()
            .map(DailySlot::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(row.with_slots(slots)))
    }

    /// Bring the replica of `date` in line with its hourly auctions.
    pub async fn sync_day(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<Option<DailyAuction>> {
        let Some(mut daily) = self.daily_auction(date).await? else {
            return Ok(None);
        };
        let pool = self.store.pool();
        let hourlies = decode_all(queries::list_hourly_for_day(pool, daily.id).await?)?;

        let plan = plan_sync(&daily, &hourlies, now);
        if !plan.orphaned.is_empty() {
            warn!(
                daily_code = %daily.daily_code,
                orphaned = ?plan.orphaned,
                "replica slots without a master"
            );
        }
        if plan.is_empty() {
            return Ok(Some(daily));
        }

        for slot in &plan.upserts {
            queries::upsert_daily_slot(pool, slot).await?;
        }
        queries::touch_daily_synced(pool, daily.id, now).await?;
        apply_sync(&mut daily, &plan, now);

        debug!(
            daily_code = %daily.daily_code,
            added = plan.added,
            refreshed = plan.refreshed,
            "replica synced"
        );
        self.event_bus.publish(AuctionEvent::ReplicaSynced {
            daily_code: daily.daily_code.clone(),
            added: plan.added,
            refreshed: plan.refreshed,
        });
        Ok(Some(daily))
    }

    /// One pass over everything that is due.
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let mut report = TickReport {
            started_at: Some(now),
            ..TickReport::default()
        };
        let mut dirty_days = BTreeSet::new();

        for date in days_to_ensure(self.clock.local_date(now), self.config.scheduler.days_ahead) {
            let outcome = self.ensure_day(date, now).await;
            tally_day(&mut report, &mut dirty_days, date, &outcome);
        }

        let rows = queries::list_schedulable_auctions(self.store.pool()).await?;
        report.auctions_checked = rows.len();

        for row in rows {
            let (id, date) = (row.id, row.auction_date);
            let outcome = self
                .store
                .mutate(id, |auction| {
                    let transitions = due_transitions(auction, now);
                    let dirty = !transitions.is_empty();
                    Ok((transitions, dirty))
                })
                .await;

            match outcome {
                Ok((auction, transitions)) if !transitions.is_empty() => {
                    log_transitions(&auction, &transitions);
                    report.auctions_advanced += 1;
                    report.transitions += transitions.len();
                    dirty_days.insert(date);
                    self.event_bus
                        .publish_transitions(auction.id, &auction.auction_code, transitions);
                }
                Ok(_) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(auction_id = id, error = %e, "failed to advance auction");
                }
            }
        }

        for date in dirty_days {
            match self.sync_day(date, now).await {
                Ok(Some(_)) => report.replicas_synced += 1,
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(date = %date, error = %e, "replica sync failed");
                }
            }
        }

        self.store.prune_locks();
        self.record(Ok(&report));
        Ok(report)
    }

    fn record(&self, outcome: std::result::Result<&TickReport, &AuctionError>) {
        let mut status = self.status.write();
        status.ticks += 1;
        status.last_tick_at = Some(self.clock.now());
        match outcome {
            Ok(report) => {
                status.last_error = None;
                status.last_report = Some(report.clone());
            }
            Err(e) => status.last_error = Some(e.to_string()),
        }
    }
}

/// Everything `auction` owes at `now`: round progress, then the claim queue.
pub fn due_transitions(auction: &mut HourlyAuction, now: DateTime<Utc>) -> Vec<Transition> {
    let mut transitions = advance(auction, now);
    transitions.extend(advance_claims(auction, now));
    transitions
}

/// Fold one `ensure_day` outcome into the tick report. A failed day is
/// counted and the tick goes on.
fn tally_day(
    report: &mut TickReport,
    dirty_days: &mut BTreeSet<NaiveDate>,
    date: NaiveDate,
    outcome: &Result<EnsuredDay>,
) {
    match outcome {
        Ok(ensured) => {
            if ensured.day_created {
                report.days_created += 1;
            }
            if ensured.auctions_created > 0 {
                report.auctions_created += ensured.auctions_created;
                dirty_days.insert(date);
            }
        }
        Err(e) => {
            report.failures += 1;
            warn!(date = %date, error = %e, "failed to ensure daily auctions");
        }
    }
}

/// Today plus the configured look-ahead.
pub fn days_to_ensure(today: NaiveDate, days_ahead: u32) -> Vec<NaiveDate> {
    (0..=days_ahead as u64)
        .filter_map(|d| today.checked_add_days(Days::new(d)))
        .collect()
}

fn log_transitions(auction: &HourlyAuction, transitions: &[Transition]) {
    for t in transitions {
        match t {
            Transition::AuctionStarted
            | Transition::AuctionCancelled { .. }
            | Transition::AuctionCompleted { .. } => info!(
                auction_id = auction.id,
                auction_code = %auction.auction_code,
                transition = ?t,
                "auction state changed"
            ),
            _ => debug!(
                auction_id = auction.id,
                auction_code = %auction.auction_code,
                transition = ?t,
                "auction transition"
            ),
        }
    }
}

/// Tick forever. A failed tick is logged and the loop carries on.
pub async fn run_scheduler_loop(scheduler: Arc<Scheduler>, event_bus: Arc<EventBus>) {
    let cfg = &scheduler.config.scheduler;
    if !cfg.enabled {
        info!("scheduler disabled");
        return;
    }

    let mut interval = time::interval(Duration::from_millis(cfg.tick_interval_ms));
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    info!(
        tick_interval_ms = cfg.tick_interval_ms,
        days_ahead = cfg.days_ahead,
        "scheduler loop started"
    );

    loop {
        interval.tick().await;
        match scheduler.tick().await {
            Ok(report) => {
                if report.transitions > 0 || report.auctions_created > 0 {
                    info!(
                        advanced = report.auctions_advanced,
                        transitions = report.transitions,
                        created = report.auctions_created,
                        synced = report.replicas_synced,
                        failures = report.failures,
                        "scheduler tick"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "scheduler tick failed");
                scheduler.record(Err(&e));
                event_bus.publish(AuctionEvent::SchedulerError {
                    message: e.to_string(),
                });
            }
        }
    }
}
