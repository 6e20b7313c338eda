//! Airpay adapter. Orders are minted locally and confirmed by a SHA-256
//! checksum over the order, payment, amount and merchant secret.

use sha2::{Digest, Sha256};

use super::gateway::GatewayOrder;

pub struct AirpayClient {
    merchant_id: String,
    secret: String,
}

impl AirpayClient {
    pub fn new(merchant_id: &str, secret: &str) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            secret: secret.to_string(),
        }
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub fn create_order(&self, amount: i64, currency: &str) -> GatewayOrder {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        GatewayOrder {
            order_id: format!("AP{}", &suffix[..20]),
            amount,
            currency: currency.to_string(),
        }
    }

    pub fn verify_checksum(&self, order_id: &str, payment_id: &str, amount: i64, checksum: &str) -> bool {
        let expected = checksum_for(&self.secret, order_id, payment_id, amount);
        constant_time_eq(expected.as_bytes(), checksum.trim().to_ascii_lowercase().as_bytes())
    }
}

pub fn checksum_for(secret: &str, order_id: &str, payment_id: &str, amount: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{order_id}|{payment_id}|{amount}|{secret}").as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_ids_are_unique() {
        let client = AirpayClient::new("M1", "secret");
        let a = client.create_order(60, "INR");
        let b = client.create_order(60, "INR");
        assert!(a.order_id.starts_with("AP"));
        assert_eq!(a.order_id.len(), 22);
        assert_ne!(a.order_id, b.order_id);
        assert_eq!(a.amount, 60);
    }

    #[test]
    fn test_checksum_verification() {
        let client = AirpayClient::new("M1", "secret");
        let sum = checksum_for("secret", "AP1", "TXN9", 60);
        assert!(client.verify_checksum("AP1", "TXN9", 60, &sum));
        assert!(client.verify_checksum("AP1", "TXN9", 60, &sum.to_uppercase()));
        assert!(!client.verify_checksum("AP1", "TXN9", 61, &sum));
        assert!(!client.verify_checksum("AP1", "TXN9", 60, "short"));
    }
}
