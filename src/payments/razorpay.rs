//! Razorpay adapter — order creation over REST and checkout signature checks.

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AuctionError, Result};

use super::gateway::GatewayOrder;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    /// Smallest currency unit (paise).
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
    status: Option<String>,
}

pub struct RazorpayClient {
    base_url: String,
    key_id: String,
    key_secret: String,
    client: Client,
}

impl RazorpayClient {
    pub fn new(base_url: &str, key_id: &str, key_secret: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            client,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// `POST /v1/orders`. `amount` is in whole currency units.
    pub async fn create_order(&self, amount: i64, currency: &str, receipt: &str) -> Result<GatewayOrder> {
        let url = format!("{}/v1/orders", self.base_url);
        let body = CreateOrderBody {
            amount: amount * 100,
            currency,
            receipt,
        };

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, body = %text, "razorpay order creation failed");
            return Err(AuctionError::Payment(format!("razorpay returned {status}")));
        }

        let order: OrderResponse = response.json().await?;
        debug!(order_id = %order.id, status = ?order.status, "razorpay order created");
        Ok(GatewayOrder {
            order_id: order.id,
            amount: order.amount / 100,
            currency: order.currency,
        })
    }

    /// Checkout signature: hex HMAC-SHA256 of `order_id|payment_id`.
    pub fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_signature(&self.key_secret, order_id, payment_id, signature)
    }
}

pub fn verify_signature(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("{order_id}|{payment_id}").as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{order_id}|{payment_id}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_signature_round_trip() {
        let sig = sign("s3cret", "order_abc", "pay_xyz");
        assert_eq!(sig.len(), 64);
        assert!(verify_signature("s3cret", "order_abc", "pay_xyz", &sig));
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let sig = sign("s3cret", "order_abc", "pay_xyz");
        assert!(!verify_signature("other", "order_abc", "pay_xyz", &sig));
        assert!(!verify_signature("s3cret", "order_abc", "pay_other", &sig));
        assert!(!verify_signature("s3cret", "order_abc", "pay_xyz", "not-hex"));
    }

    #[test]
    fn test_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            hex::encode(mac.finalize().into_bytes()),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }
}
