//! Load, mutate and write back hourly auction documents with a version check.
//!
//! Writers in this process are serialized per auction through an async
//! mutex; writers in other processes are caught by the version column and
//! retried.

use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auction::model::HourlyAuction;
use crate::error::{AuctionError, Result};

use super::models::DbHourlyAuction;
use super::queries;

/// Decode a batch of rows, failing on the first corrupt document.
pub fn decode_all(rows: Vec<DbHourlyAuction>) -> Result<Vec<HourlyAuction>> {
    rows.into_iter().map(HourlyAuction::try_from).collect()
}

pub struct AuctionStore {
    db: PgPool,
    max_retries: u32,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl AuctionStore {
    pub fn new(db: PgPool, max_retries: u32) -> Self {
        Self {
            db,
            max_retries,
            locks: DashMap::new(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    pub async fn load(&self, id: i64) -> Result<HourlyAuction> {
        queries::get_hourly_auction(&self.db, id)
            .await?
            .ok_or_else(|| AuctionError::NotFound(format!("auction {id}")))?
            .try_into()
    }

    /// Apply `f` to a fresh copy of the auction and persist it.
    ///
    /// `f` returns its output plus a dirty flag; clean results are not
    /// written. An error from `f` discards the mutation. On a version
    /// conflict the auction is reloaded and `f` runs again.
    pub async fn mutate<T, F>(&self, id: i64, mut f: F) -> Result<(HourlyAuction, T)>
    where
        F: FnMut(&mut HourlyAuction) -> Result<(T, bool)>,
    {
        let lock = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        for attempt in 0..=self.max_retries {
            let mut auction = self.load(id).await?;
            let (out, dirty) = f(&mut auction)?;
            if !dirty {
                return Ok((auction, out));
            }

            match queries::update_hourly_auction(&self.db, &auction).await? {
                Some(version) => {
                    auction.version = version;
                    debug!(auction_id = id, version, "auction saved");
                    return Ok((auction, out));
                }
                None => {
                    warn!(auction_id = id, attempt, "auction version conflict, retrying");
                }
            }
        }

        Err(AuctionError::Conflict(format!(
            "auction {id} kept changing after {} retries",
            self.max_retries
        )))
    }

    /// Drop lock entries for auctions nobody is writing to.
    pub fn prune_locks(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
