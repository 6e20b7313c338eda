//! Configuration — TOML file defaults + environment variable overrides.
//!
//! Game parameters live in `config/default.toml`.
//! Secrets (database URL, gateway keys, admin key) come from environment variables.

use chrono::NaiveTime;
use serde::Deserialize;
use std::env;

use crate::error::{AuctionError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auction: AuctionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Game parameters copied into every hourly auction when it is scheduled.
#[derive(Debug, Clone, Deserialize)]
pub struct AuctionConfig {
    /// Local start times (`HH:MM`) of the hourly auctions.
    #[serde(default = "default_time_slots")]
    pub time_slots: Vec<String>,
    #[serde(default = "default_round_count")]
    pub round_count: u32,
    #[serde(default = "default_round_duration")]
    pub round_duration_minutes: u32,
    #[serde(default = "default_entry_fee")]
    pub entry_fee: i64,
    #[serde(default = "default_prize_value")]
    pub prize_value: i64,
    #[serde(default = "default_min_bid")]
    pub min_bid: i64,
    #[serde(default = "default_max_bid")]
    pub max_bid: i64,
    #[serde(default = "default_qualifiers")]
    pub qualifiers_per_round: u32,
    #[serde(default = "default_winners")]
    pub winners_count: u32,
    #[serde(default = "default_max_participants")]
    pub max_participants: u32,
    #[serde(default = "default_claim_window")]
    pub claim_window_minutes: u32,
    /// Offset of the local auction calendar from UTC (IST = 330).
    #[serde(default = "default_tz_offset")]
    pub timezone_offset_minutes: i32,
}

fn default_time_slots() -> Vec<String> {
    (9..=21).map(|h| format!("{:02}:00", h)).collect()
}
fn default_round_count() -> u32 {
    4
}
fn default_round_duration() -> u32 {
    15
}
fn default_entry_fee() -> i64 {
    60
}
fn default_prize_value() -> i64 {
    10_000
}
fn default_min_bid() -> i64 {
    10
}
fn default_max_bid() -> i64 {
    10_000
}
fn default_qualifiers() -> u32 {
    3
}
fn default_winners() -> u32 {
    3
}
fn default_max_participants() -> u32 {
    1000
}
fn default_claim_window() -> u32 {
    30
}
fn default_tz_offset() -> i32 {
    330
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            time_slots: default_time_slots(),
            round_count: default_round_count(),
            round_duration_minutes: default_round_duration(),
            entry_fee: default_entry_fee(),
            prize_value: default_prize_value(),
            min_bid: default_min_bid(),
            max_bid: default_max_bid(),
            qualifiers_per_round: default_qualifiers(),
            winners_count: default_winners(),
            max_participants: default_max_participants(),
            claim_window_minutes: default_claim_window(),
            timezone_offset_minutes: default_tz_offset(),
        }
    }
}

impl AuctionConfig {
    /// Parsed slot start times, sorted.
    pub fn parsed_slots(&self) -> Result<Vec<NaiveTime>> {
        let mut slots = self
            .time_slots
            .iter()
            .map(|s| {
                NaiveTime::parse_from_str(s, "%H:%M")
                    .map_err(|e| AuctionError::Config(format!("bad time slot {s:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        slots.sort();
        Ok(slots)
    }

    pub fn auction_minutes(&self) -> i64 {
        i64::from(self.round_count) * i64::from(self.round_duration_minutes)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// How many days past today get their daily auction created ahead of time.
    #[serde(default = "default_days_ahead")]
    pub days_ahead: u32,
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Shifts the service clock; used for demos and staging.
    #[serde(default)]
    pub server_time_offset_ms: i64,
}

fn default_true() -> bool {
    true
}
fn default_tick_interval() -> u64 {
    5000
}
fn default_days_ahead() -> u32 {
    1
}
fn default_conflict_retries() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: default_tick_interval(),
            days_ahead: default_days_ahead(),
            max_conflict_retries: default_conflict_retries(),
            server_time_offset_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    /// `razorpay`, `airpay` or `sandbox`.
    #[serde(default = "default_gateway")]
    pub default_gateway: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_razorpay_url")]
    pub razorpay_base_url: String,
    #[serde(default)]
    pub razorpay_key_id: String,
    #[serde(default)]
    pub razorpay_key_secret: String,
    #[serde(default)]
    pub airpay_merchant_id: String,
    #[serde(default)]
    pub airpay_secret: String,
    /// Enables the local sandbox gateway. Never turn on in production.
    #[serde(default)]
    pub sandbox_enabled: bool,
}

fn default_gateway() -> String {
    "razorpay".into()
}
fn default_currency() -> String {
    "INR".into()
}
fn default_razorpay_url() -> String {
    "https://api.razorpay.com".into()
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            default_gateway: default_gateway(),
            currency: default_currency(),
            razorpay_base_url: default_razorpay_url(),
            razorpay_key_id: String::new(),
            razorpay_key_secret: String::new(),
            airpay_merchant_id: String::new(),
            airpay_secret: String::new(),
            sandbox_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Admin routes are disabled when unset.
    pub admin_api_key: Option<String>,
}

fn default_port() -> u16 {
    8080
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            admin_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout_ms: u64,
}

fn default_notify_timeout() -> u64 {
    3000
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: default_notify_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_output: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_output: false,
        }
    }
}

impl Config {
    /// Load configuration from `config/default.toml` merged with env vars.
    /// Overrides use the `D60` prefix, e.g. `D60__AUCTION__ROUND_COUNT=5`.
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("D60")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auction.time_slots")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Config = builder.try_deserialize()?;

        // Secrets never live in TOML
        if let Ok(v) = env::var("DATABASE_URL") {
            cfg.database.url = v;
        }
        if let Ok(v) = env::var("RAZORPAY_KEY_ID") {
            cfg.payments.razorpay_key_id = v;
        }
        if let Ok(v) = env::var("RAZORPAY_KEY_SECRET") {
            cfg.payments.razorpay_key_secret = v;
        }
        if let Ok(v) = env::var("AIRPAY_MERCHANT_ID") {
            cfg.payments.airpay_merchant_id = v;
        }
        if let Ok(v) = env::var("AIRPAY_SECRET") {
            cfg.payments.airpay_secret = v;
        }
        if let Ok(v) = env::var("ADMIN_API_KEY") {
            cfg.web.admin_api_key = Some(v);
        }
        if let Ok(v) = env::var("NOTIFY_WEBHOOK_URL") {
            cfg.notify.webhook_url = Some(v);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the round state machine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let a = &self.auction;
        if a.round_count == 0 {
            return Err(AuctionError::Config("round_count must be at least 1".into()));
        }
        if a.round_duration_minutes == 0 {
            return Err(AuctionError::Config(
                "round_duration_minutes must be at least 1".into(),
            ));
        }
        if a.qualifiers_per_round == 0 || a.winners_count == 0 {
            return Err(AuctionError::Config(
                "qualifiers_per_round and winners_count must be at least 1".into(),
            ));
        }
        if a.min_bid <= 0 || a.min_bid > a.max_bid {
            return Err(AuctionError::Config(format!(
                "bid range [{}, {}] is empty",
                a.min_bid, a.max_bid
            )));
        }
        if a.entry_fee < 0 {
            return Err(AuctionError::Config("entry_fee cannot be negative".into()));
        }
        if a.timezone_offset_minutes.abs() >= 24 * 60 {
            return Err(AuctionError::Config(
                "timezone_offset_minutes out of range".into(),
            ));
        }

        let slots = a.parsed_slots()?;
        if slots.is_empty() {
            return Err(AuctionError::Config("at least one time slot is required".into()));
        }
        for pair in slots.windows(2) {
            let gap = (pair[1] - pair[0]).num_minutes();
            if gap < a.auction_minutes() {
                return Err(AuctionError::Config(format!(
                    "time slots {} and {} overlap ({} minute auctions)",
                    pair[0].format("%H:%M"),
                    pair[1].format("%H:%M"),
                    a.auction_minutes()
                )));
            }
        }

        match self.payments.default_gateway.as_str() {
            "razorpay" | "airpay" => {}
            "sandbox" if self.payments.sandbox_enabled => {}
            other => {
                return Err(AuctionError::Config(format!(
                    "unsupported default gateway {other:?}"
                )))
            }
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err(AuctionError::Config("tick_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.auction.time_slots.first().map(String::as_str), Some("09:00"));
        assert_eq!(cfg.auction.auction_minutes(), 60);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: Config = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.auction.round_count, 4);
        assert_eq!(cfg.scheduler.tick_interval_ms, 5000);
        assert_eq!(cfg.payments.currency, "INR");
    }

    #[test]
    fn test_overlapping_slots_rejected() {
        let mut cfg = Config::default();
        cfg.auction.time_slots = vec!["10:00".into(), "10:30".into()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_bad_slot_format_rejected() {
        let mut cfg = Config::default();
        cfg.auction.time_slots = vec!["25:00".into()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_sandbox_gateway_requires_flag() {
        let mut cfg = Config::default();
        cfg.payments.default_gateway = "sandbox".into();
        assert!(cfg.validate().is_err());
        cfg.payments.sandbox_enabled = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_bid_range_rejected() {
        let mut cfg = Config::default();
        cfg.auction.min_bid = 500;
        cfg.auction.max_bid = 100;
        assert!(cfg.validate().is_err());
    }
}
