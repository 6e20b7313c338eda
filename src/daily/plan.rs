//! Turns the configured time slots into the hourly auctions of one day.

use chrono::{DateTime, NaiveDate, Utc};

use crate::auction::model::{AuctionSettings, NewHourlyAuction};
use crate::clock::Clock;
use crate::config::AuctionConfig;
use crate::error::Result;

use super::code::hourly_auction_code;

/// One auction per slot of `date`. Slots that end at or before `not_before`
/// are skipped so a day created late does not spawn dead auctions.
pub fn plan_day(
    date: NaiveDate,
    cfg: &AuctionConfig,
    clock: &Clock,
    not_before: DateTime<Utc>,
) -> Result<Vec<NewHourlyAuction>> {
    let settings = AuctionSettings::from_config(cfg);
    let mut planned = Vec::new();

    for slot in cfg.parsed_slots()? {
        let label = slot.format("%H:%M").to_string();
        let starts_at = clock.slot_start(date, slot)?;
        let auction = NewHourlyAuction::schedule(
            hourly_auction_code(date, &label),
            date,
            label,
            starts_at,
            settings.clone(),
        );
        if auction.ends_at <= not_before {
            continue;
        }
        planned.push(auction);
    }
    Ok(planned)
}

/// The planned auctions whose time slot has no auction yet.
pub fn missing_slots<'a>(
    planned: &'a [NewHourlyAuction],
    existing_slots: &[String],
) -> Vec<&'a NewHourlyAuction> {
    planned
        .iter()
        .filter(|p| !existing_slots.iter().any(|s| *s == p.time_slot))
        .collect()
}
