//! Declarative limiter configuration (feature `config`).
//!
//! ```rust
//! use std::sync::Arc;
//! use turnstile::config::LimiterConfig;
//! use turnstile::store::InMemoryCounterStore;
//!
//! let config = LimiterConfig::from_json(r#"{
//!     "rules": [
//!         { "name": "burst", "algorithm": "LeakyBucket",
//!           "permit_limit": 5, "interval_in_seconds": 1.0 },
//!         { "algorithm": "Semaphore", "permit_limit": 20, "fail_open": true }
//!     ],
//!     "allow_list": ["healthcheck"]
//! }"#).unwrap();
//!
//! let limiter = config.into_limiter(Arc::new(InMemoryCounterStore::new())).unwrap();
//! assert_eq!(limiter.rules()[1].identity(), "Semaphore(20,100)");
//! ```

use crate::error::RateLimitError;
use crate::limiter::{Limiter, Rule};
use crate::rate_limit::{semaphore, FixedWindow, LeakyBucket, Semaphore, SlidingWindow};
use crate::store::CounterStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Algorithm and its parameters, tagged by `algorithm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum MethodConfig {
    LeakyBucket {
        permit_limit: i64,
        interval_in_seconds: f64,
    },
    FixedWindow {
        permit_limit: i64,
        interval_in_seconds: f64,
    },
    SlidingWindow {
        permit_limit: i64,
        interval_in_seconds: f64,
        num_of_buckets: i64,
    },
    Semaphore {
        permit_limit: i64,
        #[serde(default = "default_timeout")]
        timeout_in_seconds: u64,
    },
}

fn default_timeout() -> u64 {
    semaphore::DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub fail_open: bool,
    #[serde(default)]
    pub ignore_allow_list: bool,
    #[serde(flatten)]
    pub method: MethodConfig,
}

impl RuleConfig {
    pub fn to_rule(&self) -> Result<Rule, RateLimitError> {
        let (fail_open, ignore) = (self.fail_open, self.ignore_allow_list);
        let rule = match self.method {
            MethodConfig::LeakyBucket { permit_limit, interval_in_seconds } => {
                check_interval(interval_in_seconds)?;
                Rule::new(
                    LeakyBucket::new(permit_limit, interval_in_seconds)
                        .fail_open(fail_open)
                        .ignore_allow_list(ignore),
                )
            }
            MethodConfig::FixedWindow { permit_limit, interval_in_seconds } => {
                check_interval(interval_in_seconds)?;
                Rule::new(
                    FixedWindow::new(permit_limit, interval_in_seconds)
                        .fail_open(fail_open)
                        .ignore_allow_list(ignore),
                )
            }
            MethodConfig::SlidingWindow { permit_limit, interval_in_seconds, num_of_buckets } => {
                check_interval(interval_in_seconds)?;
                Rule::new(
                    SlidingWindow::new(permit_limit, interval_in_seconds, num_of_buckets)
                        .fail_open(fail_open)
                        .ignore_allow_list(ignore),
                )
            }
            MethodConfig::Semaphore { permit_limit, timeout_in_seconds } => {
                if timeout_in_seconds == 0 {
                    return Err(RateLimitError::InvalidConfig(
                        "semaphore timeout_in_seconds must be > 0".into(),
                    ));
                }
                Rule::new(
                    Semaphore::new(permit_limit)
                        .timeout_in_seconds(timeout_in_seconds)
                        .fail_open(fail_open)
                        .ignore_allow_list(ignore),
                )
            }
        };
        Ok(match &self.name {
            Some(name) => rule.named(name.clone()),
            None => rule,
        })
    }
}

fn check_interval(interval_in_seconds: f64) -> Result<(), RateLimitError> {
    if interval_in_seconds.is_finite() {
        Ok(())
    } else {
        Err(RateLimitError::InvalidConfig(format!(
            "interval_in_seconds must be finite (got {})",
            interval_in_seconds
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub allow_list: Vec<String>,
}

impl LimiterConfig {
    pub fn from_json(json: &str) -> Result<Self, RateLimitError> {
        serde_json::from_str(json).map_err(|e| RateLimitError::InvalidConfig(e.to_string()))
    }

    /// Build a limiter over `store`, with rules in declaration order.
    pub fn into_limiter(self, store: Arc<dyn CounterStore>) -> Result<Limiter, RateLimitError> {
        let mut builder = Limiter::builder().shared_store(store);
        for rule in &self.rules {
            builder = builder.rule(rule.to_rule()?);
        }
        for client in self.allow_list {
            builder = builder.allow(client);
        }
        builder.build()
    }
}
