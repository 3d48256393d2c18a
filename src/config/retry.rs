use std::time::Duration;

use serde::Deserialize;

/// Basic retry policy template
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single attempt timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl BackoffPolicy {
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub(crate) fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Divide strategies by operation domain
#[derive(Debug, Deserialize, Clone)]
pub struct RetryPolicies {
    // Point reads and writes issued by bindings and tree expansion
    #[serde(default)]
    pub cluster_ops: BackoffPolicy,

    // Watch re-establishment after a dropped stream
    #[serde(default = "default_watch_reconnect")]
    pub watch_reconnect: BackoffPolicy,
}

impl RetryPolicies {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, policy) in [
            ("cluster_ops", &self.cluster_ops),
            ("watch_reconnect", &self.watch_reconnect),
        ] {
            if policy.max_retries == 0 {
                return Err(format!("retry.{name}.max_retries must be at least 1"));
            }
            if policy.timeout_ms == 0 {
                return Err(format!("retry.{name}.timeout_ms must be positive"));
            }
            if policy.base_delay_ms > policy.max_delay_ms {
                return Err(format!(
                    "retry.{name}.base_delay_ms ({}) exceeds max_delay_ms ({})",
                    policy.base_delay_ms, policy.max_delay_ms
                ));
            }
        }
        Ok(())
    }
}

// Default value implementation
impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            cluster_ops: BackoffPolicy::default(),
            watch_reconnect: default_watch_reconnect(),
        }
    }
}

fn default_watch_reconnect() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 8,
        timeout_ms: 10000,
        base_delay_ms: 500,
        max_delay_ms: 30000,
    }
}
fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    5000
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    2000
}
