//! Forwards player-facing auction events to an external
//! push service.

use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auction::Transition;
use crate::config::NotifyConfig;
use crate::events::bus::AuctionEvent;

pub struct WebhookNotifier {
    url: String,
    events: broadcast::Receiver<AuctionEvent>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// `None` when no webhook is configured.
    pub fn new(
        config: &NotifyConfig,
        events: broadcast::Receiver<AuctionEvent>,
    ) -> anyhow::Result<Option<Self>> {
        let Some(url) = config.webhook_url.clone().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Some(Self {
            url,
            events,
            client,
        }))
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(url = %self.url, "webhook notifier started");

        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if let Some(body) = payload(&event) {
                        if let Err(e) = self.send(&body).await {
                            warn!(error = %e, "webhook delivery failed");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "notifier event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("event bus closed, notifier shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn send(&self, body: &Value) -> anyhow::Result<()> {
        let resp = self.client.post(&self.url).json(body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(%status, body = %text, "webhook rejected notification");
        } else {
            debug!(kind = %body["kind"], "notification delivered");
        }
        Ok(())
    }
}

/// The notification for an event, if players should hear about it.
pub fn payload(event: &AuctionEvent) -> Option<Value> {
    match event {
        AuctionEvent::Lifecycle {
            auction_id,
            auction_code,
            transition,
        } => {
            let (kind, title, body, players): (&str, String, String, Vec<String>) = match transition {
                Transition::AuctionStarted => (
                    "auction_started",
                    "Auction is live".into(),
                    format!("{auction_code} has started. Round 1 is open for bids."),
                    Vec::new(),
                ),
                Transition::AuctionCancelled { reason } => (
                    "auction_cancelled",
                    "Auction cancelled".into(),
                    format!("{auction_code} was cancelled: {reason}."),
                    Vec::new(),
                ),
                Transition::RoundCompleted {
                    round_number,
                    qualified,
                    ..
                } => (
                    "round_completed",
                    format!("Round {round_number} closed"),
                    format!("You qualified for the next round of {auction_code}."),
                    qualified.clone(),
                ),
                Transition::AuctionCompleted { winner_ids } => (
                    "auction_completed",
                    "Auction finished".into(),
                    format!("{auction_code} is over. Check the results."),
                    winner_ids.clone(),
                ),
                Transition::ClaimOpened {
                    player_id,
                    rank,
                    deadline,
                } => (
                    "claim_opened",
                    "Claim your prize".into(),
                    format!(
                        "You placed #{rank} in {auction_code}. Claim before {}.",
                        deadline.format("%H:%M UTC")
                    ),
                    vec![player_id.clone()],
                ),
                Transition::ClaimExpired { player_id, .. } => (
                    "claim_expired",
                    "Claim window closed".into(),
                    format!("Your claim window for {auction_code} has closed."),
                    vec![player_id.clone()],
                ),
                Transition::PrizeClaimed { player_id, .. } => (
                    "prize_claimed",
                    "Prize claimed".into(),
                    format!("Your prize for {auction_code} is confirmed."),
                    vec![player_id.clone()],
                ),
                Transition::RoundStarted { .. } | Transition::ParticipantJoined { .. } => {
                    return None
                }
            };
            Some(json!({
                "kind": kind,
                "auction_id": auction_id,
                "auction_code": auction_code,
                "title": title,
                "body": body,
                "player_ids": players,
                "event": event,
            }))
        }
        AuctionEvent::DailyAuctionCreated {
            daily_code,
            auction_date,
            auctions,
        } if *auctions > 0 => Some(json!({
            "kind": "daily_schedule",
            "title": "Today's auctions are ready",
            "body": format!("{auctions} auctions scheduled for {auction_date} ({daily_code})."),
            "player_ids": [],
            "event": event,
        })),
        AuctionEvent::PaymentFailed {
            gateway_order_id,
            reason,
            ..
        } => Some(json!({
            "kind": "payment_failed",
            "title": "Payment problem",
            "body": format!("Order {gateway_order_id}: {reason}"),
            "player_ids": [],
            "event": event,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn lifecycle(t: Transition) -> AuctionEvent {
        AuctionEvent::lifecycle(7, "HA20261017-1400", t)
    }

    #[test]
    fn test_claim_opened_targets_winner() {
        let deadline = Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap();
        let body = payload(&lifecycle(Transition::ClaimOpened {
            player_id: "p1".into(),
            rank: 1,
            deadline,
        }))
        .unwrap();
        assert_eq!(body["kind"], "claim_opened");
        assert_eq!(body["player_ids"], json!(["p1"]));
        assert!(body["body"].as_str().unwrap().contains("10:00 UTC"));
        assert_eq!(body["event"]["transition"]["kind"], "claim_opened");
    }

    #[test]
    fn test_quiet_events_are_dropped() {
        assert!(payload(&lifecycle(Transition::ParticipantJoined {
            player_id: "p1".into(),
            participant_count: 1,
        }))
        .is_none());
        assert!(payload(&AuctionEvent::BidPlaced {
            auction_id: 7,
            round_number: 1,
            player_id: "p1".into(),
            amount: 100,
        })
        .is_none());
        assert!(payload(&AuctionEvent::DailyAuctionCreated {
            daily_code: "DA000001".into(),
            auction_date: Utc::now().date_naive(),
            auctions: 0,
        })
        .is_none());
    }

    #[test]
    fn test_notifier_needs_url() {
        let bus = crate::events::bus::EventBus::new(8);
        let cfg = NotifyConfig {
            webhook_url: None,
            timeout_ms: 1000,
        };
        assert!(WebhookNotifier::new(&cfg, bus.subscribe()).unwrap().is_none());
    }
}
