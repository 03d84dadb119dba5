//! Service configuration from the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::payments::signature::DEFAULT_TOLERANCE_SECS;
use crate::payments::stripe::DEFAULT_API_BASE;
use crate::{Result, StoreError};

#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub timeout: Duration,
    pub webhook_tolerance_secs: i64,
}

#[derive(Clone, Debug)]
pub struct SweepConfig { pub max_age: chrono::Duration, pub every: Duration }

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub jwt_secret: Option<String>,
    pub currency: String,
    /// `None` unless both processor secrets are set.
    pub payments: Option<PaymentsConfig>,
    pub stale_sweep: Option<SweepConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> { Self::from_lookup(|key| std::env::var(key).ok()) }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let payments = match (var("STRIPE_SECRET_KEY"), var("STRIPE_WEBHOOK_SECRET")) {
            (Some(secret_key), Some(webhook_secret)) => Some(PaymentsConfig {
                secret_key,
                webhook_secret,
                api_base: var("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                timeout: Duration::from_secs(at_least_one(&var, "PAYMENT_TIMEOUT_SECS", 10u64)?),
                webhook_tolerance_secs: at_least_one(&var, "WEBHOOK_TOLERANCE_SECS", DEFAULT_TOLERANCE_SECS)?,
            }),
            _ => None,
        };

        let stale_sweep = match var("STALE_ORDER_TTL_HOURS") {
            Some(raw) => {
                let hours = at_least_one(&var, "STALE_ORDER_TTL_HOURS", 1i64)?;
                let max_age = chrono::Duration::try_hours(hours)
                    .ok_or_else(|| StoreError::Config(format!("STALE_ORDER_TTL_HOURS is out of range, got '{}'", raw)))?;
                Some(SweepConfig { max_age, every: Duration::from_secs(at_least_one(&var, "STALE_SWEEP_INTERVAL_SECS", 900u64)?) })
            }
            None => None,
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&var, "PORT", 8083u16)?,
            database_url: var("DATABASE_URL"),
            nats_url: var("NATS_URL"),
            jwt_secret: var("JWT_SECRET"),
            currency: var("STORE_CURRENCY").unwrap_or_else(|| "usd".to_string()).to_lowercase(),
            payments,
            stale_sweep,
        })
    }

    pub fn bind_addr(&self) -> String { format!("{}:{}", self.host, self.port) }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| StoreError::Config(format!("{} must be a number, got '{}'", key, raw))),
        None => Ok(default),
    }
}

fn at_least_one<T: FromStr + PartialOrd + From<u8>>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    let value = parse(var, key, default)?;
    if value < T::from(1u8) { return Err(StoreError::Config(format!("{} must be at least 1", key))); }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.bind_addr(), "0.0.0.0:8083");
        assert_eq!(c.currency, "usd");
        assert!(c.payments.is_none() && c.stale_sweep.is_none() && c.database_url.is_none());
    }

    #[test]
    fn test_payments_need_both_secrets() {
        assert!(config(&[("STRIPE_SECRET_KEY", "sk_test")]).unwrap().payments.is_none());
        let c = config(&[("STRIPE_SECRET_KEY", "sk_test"), ("STRIPE_WEBHOOK_SECRET", "whsec_1"), ("PAYMENT_TIMEOUT_SECS", "3")]).unwrap();
        let p = c.payments.unwrap();
        assert_eq!(p.timeout, Duration::from_secs(3));
        assert_eq!(p.api_base, DEFAULT_API_BASE);
        assert_eq!(p.webhook_tolerance_secs, 300);
    }

    #[test]
    fn test_sweeper_and_bad_numbers() {
        let c = config(&[("STALE_ORDER_TTL_HOURS", "48")]).unwrap();
        let sweep = c.stale_sweep.unwrap();
        assert_eq!(sweep.max_age, chrono::Duration::hours(48));
        assert_eq!(sweep.every, Duration::from_secs(900));
        assert!(matches!(config(&[("PORT", "eighty")]), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_sweeper_rejects_out_of_range() {
        for (ttl, every) in [("-1", "900"), ("0", "900"), ("9223372036854775807", "900"), ("24", "0"), ("24", "-5")] {
            let result = config(&[("STALE_ORDER_TTL_HOURS", ttl), ("STALE_SWEEP_INTERVAL_SECS", every)]);
            assert!(matches!(result, Err(StoreError::Config(_))), "ttl={} every={}", ttl, every);
        }
        let ok = config(&[("STALE_ORDER_TTL_HOURS", "1"), ("STALE_SWEEP_INTERVAL_SECS", "1")]).unwrap().stale_sweep.unwrap();
        assert_eq!((ok.max_age, ok.every), (chrono::Duration::hours(1), Duration::from_secs(1)));
    }

    #[test]
    fn test_payment_limits_are_positive() {
        let secrets = [("STRIPE_SECRET_KEY", "sk_test"), ("STRIPE_WEBHOOK_SECRET", "whsec_1")];
        for (key, value) in [("PAYMENT_TIMEOUT_SECS", "0"), ("WEBHOOK_TOLERANCE_SECS", "-300")] {
            let mut pairs = secrets.to_vec();
            pairs.push((key, value));
            assert!(matches!(config(&pairs), Err(StoreError::Config(_))), "{}={}", key, value);
        }
    }
}
