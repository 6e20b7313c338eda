//! Gateway selection and dispatch.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::config::PaymentsConfig;
use crate::error::{AuctionError, Result};

use super::airpay::AirpayClient;
use super::razorpay::RazorpayClient;

/// Signature the sandbox gateway accepts.
pub const SANDBOX_SIGNATURE: &str = "sandbox";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Razorpay,
    Airpay,
    Sandbox,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Razorpay => "razorpay",
            GatewayKind::Airpay => "airpay",
            GatewayKind::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = AuctionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "razorpay" => Ok(GatewayKind::Razorpay),
            "airpay" => Ok(GatewayKind::Airpay),
            "sandbox" => Ok(GatewayKind::Sandbox),
            other => Err(AuctionError::Validation(format!("unknown gateway {other:?}"))),
        }
    }
}

/// An order as the gateway knows it. `amount` is in whole currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayOrder {
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
}

/// The gateways this deployment has credentials for.
pub struct Gateways {
    default: GatewayKind,
    razorpay: Option<RazorpayClient>,
    airpay: Option<AirpayClient>,
    sandbox: bool,
}

impl Gateways {
    pub fn from_config(cfg: &PaymentsConfig) -> Result<Self> {
        let razorpay = if !cfg.razorpay_key_id.is_empty() && !cfg.razorpay_key_secret.is_empty() {
            Some(RazorpayClient::new(
                &cfg.razorpay_base_url,
                &cfg.razorpay_key_id,
                &cfg.razorpay_key_secret,
            )?)
        } else {
            None
        };
        let airpay = if !cfg.airpay_merchant_id.is_empty() && !cfg.airpay_secret.is_empty() {
            Some(AirpayClient::new(&cfg.airpay_merchant_id, &cfg.airpay_secret))
        } else {
            None
        };

        let gateways = Self {
            default: cfg.default_gateway.parse()?,
            razorpay,
            airpay,
            sandbox: cfg.sandbox_enabled,
        };
        info!(
            default = %gateways.default,
            razorpay = gateways.razorpay.is_some(),
            airpay = gateways.airpay.is_some(),
            sandbox = gateways.sandbox,
            "payment gateways configured"
        );
        Ok(gateways)
    }

    /// Pick the requested gateway, or the default, and make sure it is usable.
    pub fn resolve(&self, requested: Option<&str>) -> Result<GatewayKind> {
        let kind = match requested {
            Some(name) => name.parse()?,
            None => self.default,
        };
        let available = match kind {
            GatewayKind::Razorpay => self.razorpay.is_some(),
            GatewayKind::Airpay => self.airpay.is_some(),
            GatewayKind::Sandbox => self.sandbox,
        };
        if !available {
            return Err(AuctionError::Validation(format!("gateway {kind} is not configured")));
        }
        Ok(kind)
    }

    /// Public key the client needs to open the gateway checkout.
    pub fn checkout_key(&self, kind: GatewayKind) -> Option<String> {
        match kind {
            GatewayKind::Razorpay => self.razorpay.as_ref().map(|r| r.key_id().to_string()),
            GatewayKind::Airpay => self.airpay.as_ref().map(|a| a.merchant_id().to_string()),
            GatewayKind::Sandbox => None,
        }
    }

    pub async fn create_order(
        &self,
        kind: GatewayKind,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder> {
        match kind {
            GatewayKind::Razorpay => {
                self.razorpay_client()?
                    .create_order(amount, currency, receipt)
                    .await
            }
            GatewayKind::Airpay => Ok(self.airpay_client()?.create_order(amount, currency)),
            GatewayKind::Sandbox => {
                self.resolve(Some(GatewayKind::Sandbox.as_str()))?;
                Ok(GatewayOrder {
                    order_id: format!("sbx_{}", uuid::Uuid::new_v4().simple()),
                    amount,
                    currency: currency.to_string(),
                })
            }
        }
    }

    /// Check the proof of payment the client relays from the gateway checkout.
    pub fn verify(
        &self,
        kind: GatewayKind,
        order_id: &str,
        amount: i64,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool> {
        let ok = match kind {
            GatewayKind::Razorpay => self
                .razorpay_client()?
                .verify_signature(order_id, payment_id, signature),
            GatewayKind::Airpay => self
                .airpay_client()?
                .verify_checksum(order_id, payment_id, amount, signature),
            GatewayKind::Sandbox => self.sandbox && signature == SANDBOX_SIGNATURE,
        };
        Ok(ok)
    }

    fn razorpay_client(&self) -> Result<&RazorpayClient> {
        self.razorpay
            .as_ref()
            .ok_or_else(|| AuctionError::Payment("razorpay is not configured".into()))
    }

    fn airpay_client(&self) -> Result<&AirpayClient> {
        self.airpay
            .as_ref()
            .ok_or_else(|| AuctionError::Payment("airpay is not configured".into()))
    }
}
