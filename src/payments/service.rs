//! Payment reconciliation: order creation and verification for entry fees
//! and prize claims.
//!
//! An order is CREATED when the player opens checkout and moves to PAID or
//! FAILED when the client relays the gateway's proof. A PAID order whose
//! effect can no longer be applied to the auction is parked as
//! REFUND_PENDING.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auction::engine::{
    self, advance, advance_claims, can_join, claimable_winner, JoinRequest, Transition,
};
use crate::auction::model::{ClaimStatus, HourlyAuction};
use crate::clock::Clock;
use crate::db::models::DbPaymentOrder;
use crate::db::queries;
use crate::db::store::AuctionStore;
use crate::error::{AuctionError, Result};
use crate::events::bus::{AuctionEvent, EventBus};

use super::gateway::{GatewayKind, Gateways};

/// Razorpay rejects receipts longer than this.
const MAX_RECEIPT_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentPurpose {
    EntryFee,
    PrizeClaim,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::EntryFee => "ENTRY_FEE",
            PaymentPurpose::PrizeClaim => "PRIZE_CLAIM",
        }
    }
}

impl FromStr for PaymentPurpose {
    type Err = AuctionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ENTRY_FEE" => Ok(PaymentPurpose::EntryFee),
            "PRIZE_CLAIM" => Ok(PaymentPurpose::PrizeClaim),
            other => Err(AuctionError::Corrupt(format!("unknown payment purpose {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Created,
    Paid,
    Failed,
    RefundPending,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "CREATED",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::RefundPending => "REFUND_PENDING",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = AuctionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATED" => Ok(PaymentStatus::Created),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUND_PENDING" => Ok(PaymentStatus::RefundPending),
            other => Err(AuctionError::Corrupt(format!("unknown payment status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub auction_id: i64,
    pub player_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderCreated {
    pub gateway: GatewayKind,
    pub purpose: PaymentPurpose,
    pub gateway_order_id: String,
    pub auction_id: i64,
    pub amount: i64,
    pub currency: String,
    pub checkout_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub gateway_order_id: String,
    pub purpose: PaymentPurpose,
    pub status: PaymentStatus,
    pub auction_id: i64,
    pub player_id: String,
    pub amount: i64,
    /// True when this call found the order already paid.
    pub already_verified: bool,
}

pub struct PaymentService {
    gateways: Gateways,
    store: Arc<AuctionStore>,
    clock: Clock,
    event_bus: Arc<EventBus>,
    currency: String,
}

impl PaymentService {
    pub fn new(
        gateways: Gateways,
        store: Arc<AuctionStore>,
        clock: Clock,
        event_bus: Arc<EventBus>,
        currency: &str,
    ) -> Self {
        Self {
            gateways,
            store,
            clock,
            event_bus,
            currency: currency.to_string(),
        }
    }

    /// Open an entry-fee order. The auction must still accept this player.
    pub async fn create_entry_order(&self, req: &CreateOrderRequest) -> Result<OrderCreated> {
        let kind = self.gateways.resolve(req.gateway.as_deref())?;
        let now = self.clock.now();

        let mut preview = self.store.load(req.auction_id).await?;
        advance(&mut preview, now);
        can_join(&preview, &req.player_id, now)?;

        let username = req.username.clone().unwrap_or_else(|| req.player_id.clone());
        self.open_order(
            kind,
            PaymentPurpose::EntryFee,
            &preview,
            &req.player_id,
            &username,
            preview.settings.entry_fee,
        )
        .await
    }

    /// Open a prize-claim order for the winner whose turn it is.
    pub async fn create_claim_order(&self, req: &CreateOrderRequest) -> Result<OrderCreated> {
        let kind = self.gateways.resolve(req.gateway.as_deref())?;
        let now = self.clock.now();

        let mut preview = self.store.load(req.auction_id).await?;
        advance(&mut preview, now);
        advance_claims(&mut preview, now);
        let winner = claimable_winner(&preview, &req.player_id, now)?;
        let (username, amount) = (winner.username.clone(), winner.final_bid);

        self.open_order(
            kind,
            PaymentPurpose::PrizeClaim,
            &preview,
            &req.player_id,
            &username,
            amount,
        )
        .await
    }

    async fn open_order(
        &self,
        kind: GatewayKind,
        purpose: PaymentPurpose,
        auction: &HourlyAuction,
        player_id: &str,
        username: &str,
        amount: i64,
    ) -> Result<OrderCreated> {
        let receipt = receipt_for(purpose, &auction.auction_code, player_id);
        let order = self
            .gateways
            .create_order(kind, amount, &self.currency, &receipt)
            .await?;

        queries::insert_payment_order(
            self.store.pool(),
            kind.as_str(),
            purpose.as_str(),
            &order.order_id,
            auction.id,
            player_id,
            username,
            order.amount,
            &order.currency,
        )
        .await?;

        info!(
            gateway = %kind,
            purpose = purpose.as_str(),
            order_id = %order.order_id,
            auction_id = auction.id,
            player_id,
            amount = order.amount,
            "payment order created"
        );

        Ok(OrderCreated {
            gateway: kind,
            purpose,
            gateway_order_id: order.order_id,
            auction_id: auction.id,
            amount: order.amount,
            currency: order.currency,
            checkout_key: self.gateways.checkout_key(kind),
        })
    }

    /// Check the gateway's proof for an order and apply its effect.
    ///
    /// Verifying an order that is already PAID re-applies its effect, which
    /// is a no-op when it already landed.
    pub async fn verify(&self, req: &VerifyRequest) -> Result<VerifyOutcome> {
        let pool = self.store.pool();
        let mut order = queries::get_payment_order(pool, &req.gateway_order_id)
            .await?
            .ok_or_else(|| AuctionError::NotFound(format!("order {}", req.gateway_order_id)))?;
        let kind: GatewayKind = order.gateway.parse()?;
        let purpose: PaymentPurpose = order.purpose.parse()?;
        let current: PaymentStatus = order.status.parse()?;
        let now = self.clock.now();

        // Only a CREATED order still needs its proof checked.
        let valid = current != PaymentStatus::Created
            || self.gateways.verify(
                kind,
                &order.gateway_order_id,
                order.amount,
                &req.gateway_payment_id,
                &req.signature,
            )?;

        let already_verified = match next_status(current, OrderCheck::Signature { valid })? {
            OrderMove::AlreadyPaid => true,
            OrderMove::To(PaymentStatus::Paid) => {
                let moved = queries::transition_payment_order(
                    pool,
                    order.id,
                    PaymentStatus::Created.as_str(),
                    PaymentStatus::Paid.as_str(),
                    Some(&req.gateway_payment_id),
                    None,
                    now,
                )
                .await?;
                if moved {
                    info!(
                        gateway = %kind,
                        order_id = %order.gateway_order_id,
                        payment_id = %req.gateway_payment_id,
                        "payment verified"
                    );
                    self.event_bus.publish(AuctionEvent::PaymentVerified {
                        gateway_order_id: order.gateway_order_id.clone(),
                        gateway: order.gateway.clone(),
                        purpose: order.purpose.clone(),
                        player_id: order.player_id.clone(),
                        amount: order.amount,
                    });
                    false
                } else {
                    // Another verify call got there first.
                    order = queries::get_payment_order(pool, &order.gateway_order_id)
                        .await?
                        .ok_or_else(|| {
                            AuctionError::NotFound(format!("order {}", order.gateway_order_id))
                        })?;
                    let raced: PaymentStatus = order.status.parse()?;
                    match next_status(raced, OrderCheck::Signature { valid: true })? {
                        OrderMove::AlreadyPaid => true,
                        _ => {
                            return Err(AuctionError::InvalidState(format!("order is {raced}")));
                        }
                    }
                }
            }
            OrderMove::To(to) => {
                self.fail(&order, current, to, "signature mismatch", now).await?;
                return Err(AuctionError::SignatureMismatch);
            }
            OrderMove::Stay => false,
        };

        let applied = self
            .store
            .mutate(order.auction_id, |auction| {
                apply_order(auction, purpose, &order, now)
            })
            .await;

        let rejected = matches!(&applied, Err(e) if is_refundable(e));
        match applied {
            Ok((auction, transitions)) => {
                self.event_bus
                    .publish_transitions(auction.id, &auction.auction_code, transitions);
            }
            Err(e) => {
                if let OrderMove::To(to) =
                    next_status(PaymentStatus::Paid, OrderCheck::Applied { rejected })?
                {
                    warn!(
                        order_id = %order.gateway_order_id,
                        auction_id = order.auction_id,
                        error = %e,
                        "paid order could not be applied"
                    );
                    self.fail(&order, PaymentStatus::Paid, to, &e.to_string(), now)
                        .await?;
                }
                return Err(e);
            }
        }

        Ok(VerifyOutcome {
            gateway_order_id: order.gateway_order_id.clone(),
            purpose,
            status: PaymentStatus::Paid,
            auction_id: order.auction_id,
            player_id: order.player_id.clone(),
            amount: order.amount,
            already_verified,
        })
    }

    /// Park an order as FAILED (unpaid) or REFUND_PENDING (paid).
    async fn fail(
        &self,
        order: &DbPaymentOrder,
        from: PaymentStatus,
        to: PaymentStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        queries::transition_payment_order(
            self.store.pool(),
            order.id,
            from.as_str(),
            to.as_str(),
            None,
            Some(reason),
            now,
        )
        .await?;
        warn!(
            order_id = %order.gateway_order_id,
            status = %to,
            reason,
            "payment order failed"
        );
        self.event_bus.publish(AuctionEvent::PaymentFailed {
            gateway_order_id: order.gateway_order_id.clone(),
            gateway: order.gateway.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

/// A fact learned about an order during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCheck {
    /// The gateway proof was checked.
    Signature { valid: bool },
    /// The paid order was applied to its auction; `rejected` when the
    /// auction refused it.
    Applied { rejected: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMove {
    To(PaymentStatus),
    /// The order was paid by an earlier call.
    AlreadyPaid,
    Stay,
}

/// Where an order in `current` goes after `check`.
///
/// CREATED moves to PAID or FAILED on its proof; PAID moves to
/// REFUND_PENDING when its effect is rejected. FAILED and REFUND_PENDING
/// are final.
pub fn next_status(current: PaymentStatus, check: OrderCheck) -> Result<OrderMove> {
    match (current, check) {
        (PaymentStatus::Failed | PaymentStatus::RefundPending, _) => {
            Err(AuctionError::InvalidState(format!("order is {current}")))
        }
        (PaymentStatus::Created, OrderCheck::Signature { valid: true }) => {
            Ok(OrderMove::To(PaymentStatus::Paid))
        }
        (PaymentStatus::Created, OrderCheck::Signature { valid: false }) => {
            Ok(OrderMove::To(PaymentStatus::Failed))
        }
        (PaymentStatus::Created, OrderCheck::Applied { .. }) => Err(AuctionError::InvalidState(
            "order is not paid".into(),
        )),
        (PaymentStatus::Paid, OrderCheck::Signature { .. }) => Ok(OrderMove::AlreadyPaid),
        (PaymentStatus::Paid, OrderCheck::Applied { rejected: true }) => {
            Ok(OrderMove::To(PaymentStatus::RefundPending))
        }
        (PaymentStatus::Paid, OrderCheck::Applied { rejected: false }) => Ok(OrderMove::Stay),
    }
}

/// Apply a paid order to its auction. Returns the transitions and whether
/// the auction changed.
pub fn apply_order(
    auction: &mut HourlyAuction,
    purpose: PaymentPurpose,
    order: &DbPaymentOrder,
    now: DateTime<Utc>,
) -> Result<(Vec<Transition>, bool)> {
    let mut transitions = advance(auction, now);

    match purpose {
        PaymentPurpose::EntryFee => {
            if let Some(p) = auction.participant(&order.player_id) {
                if p.payment_order_id.as_deref() == Some(order.gateway_order_id.as_str()) {
                    let dirty = !transitions.is_empty();
                    return Ok((transitions, dirty));
                }
            }
            transitions.push(engine::join(
                auction,
                JoinRequest {
                    player_id: order.player_id.clone(),
                    username: order.username.clone(),
                    entry_fee_paid: order.amount,
                    payment_order_id: Some(order.gateway_order_id.clone()),
                },
                now,
            )?);
        }
        PaymentPurpose::PrizeClaim => {
            transitions.extend(advance_claims(auction, now));
            if let Some(w) = auction.winner(&order.player_id) {
                if w.claim_status == ClaimStatus::Claimed
                    && w.payment_order_id.as_deref() == Some(order.gateway_order_id.as_str())
                {
                    let dirty = !transitions.is_empty();
                    return Ok((transitions, dirty));
                }
            }
            transitions.push(engine::mark_claimed(
                auction,
                &order.player_id,
                &order.gateway_order_id,
                now,
            )?);
        }
    }

    Ok((transitions, true))
}

/// Domain rejections after payment leave money that has to go back.
fn is_refundable(err: &AuctionError) -> bool {
    matches!(
        err,
        AuctionError::InvalidState(_)
            | AuctionError::ClaimRejected(_)
            | AuctionError::Validation(_)
            | AuctionError::NotFound(_)
    )
}

fn receipt_for(purpose: PaymentPurpose, auction_code: &str, player_id: &str) -> String {
    let tag = match purpose {
        PaymentPurpose::EntryFee => "E",
        PaymentPurpose::PrizeClaim => "C",
    };
    let mut receipt = format!("{tag}-{auction_code}-{player_id}");
    if receipt.len() > MAX_RECEIPT_LEN {
        let mut cut = MAX_RECEIPT_LEN;
        while !receipt.is_char_boundary(cut) {
            cut -= 1;
        }
        receipt.truncate(cut);
    }
    receipt
}
