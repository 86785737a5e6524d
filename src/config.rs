use crate::bus::Priority;
use crate::warn;
use std::{env, time::Duration};

/// Runtime tunables for one targeting node.
///
/// Every value has a conservative default and can be overridden through a
/// `TBUS_*` environment variable, see [`BusConfig::from_env`].
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Name of this node, used as the sender/receiver prefix in evidence entries.
    pub node_name: String,
    /// Age after which a track without a new update is evicted.
    pub staleness_window: Duration,
    /// How long an evicted track id keeps its tombstone.
    pub retired_retention: Duration,
    /// Per-hop latency budgets indexed by priority.
    pub budget_critical: Duration,
    pub budget_high: Duration,
    pub budget_normal: Duration,
    pub budget_low: Duration,
    /// Number of delivery retries after a failed attempt (never more than one).
    pub delivery_retries: u8,
    /// Maximum number of queued (non-critical) envelopes.
    pub queue_capacity: usize,
    /// Margin between a fire solution's generation and its `valid_until`.
    pub solution_validity: Duration,
    /// Minimum threat confidence before a lead is computed for a track.
    pub min_threat_confidence: f64,
    /// Minimum time between the end of an engagement and the next `arm`.
    pub engagement_cooldown: Duration,
    /// Interval between evidence anchoring attempts.
    pub anchor_interval: Duration,
    /// First backoff step after a failed anchoring attempt.
    pub anchor_backoff_base: Duration,
    /// Upper bound for the anchoring backoff.
    pub anchor_backoff_max: Duration,
    /// Interval of the supervisor's stale-track and expired-solution sweep.
    pub sweep_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            node_name: "tbus-0".to_string(),
            staleness_window: Duration::from_millis(500),
            retired_retention: Duration::from_secs(30),
            budget_critical: Duration::from_millis(5),
            budget_high: Duration::from_millis(5),
            budget_normal: Duration::from_millis(20),
            budget_low: Duration::from_millis(100),
            delivery_retries: 1,
            queue_capacity: 4096,
            solution_validity: Duration::from_millis(250),
            min_threat_confidence: 0.85,
            engagement_cooldown: Duration::from_secs(10),
            anchor_interval: Duration::from_secs(10),
            anchor_backoff_base: Duration::from_secs(1),
            anchor_backoff_max: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(50),
        }
    }
}

impl BusConfig {
    /// Upper bound on the validity margin of a fire solution.
    pub const MAX_SOLUTION_VALIDITY: Duration = Duration::from_secs(2);

    /// Builds a config from the defaults, overridden by any `TBUS_*` variables present.
    /// Unparsable values are reported and ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(name) = env::var("TBUS_NODE_NAME") {
            cfg.node_name = name;
        }
        Self::read_ms("TBUS_STALENESS_MS", &mut cfg.staleness_window);
        Self::read_ms("TBUS_RETIRED_RETENTION_MS", &mut cfg.retired_retention);
        Self::read_ms("TBUS_BUDGET_CRITICAL_MS", &mut cfg.budget_critical);
        Self::read_ms("TBUS_BUDGET_HIGH_MS", &mut cfg.budget_high);
        Self::read_ms("TBUS_BUDGET_NORMAL_MS", &mut cfg.budget_normal);
        Self::read_ms("TBUS_BUDGET_LOW_MS", &mut cfg.budget_low);
        Self::read_ms("TBUS_SOLUTION_VALIDITY_MS", &mut cfg.solution_validity);
        Self::read_ms("TBUS_COOLDOWN_MS", &mut cfg.engagement_cooldown);
        Self::read_ms("TBUS_ANCHOR_INTERVAL_MS", &mut cfg.anchor_interval);
        Self::read_ms("TBUS_ANCHOR_BACKOFF_BASE_MS", &mut cfg.anchor_backoff_base);
        Self::read_ms("TBUS_ANCHOR_BACKOFF_MAX_MS", &mut cfg.anchor_backoff_max);
        Self::read_ms("TBUS_SWEEP_MS", &mut cfg.sweep_interval);
        Self::read_parsed("TBUS_DELIVERY_RETRIES", &mut cfg.delivery_retries);
        Self::read_parsed("TBUS_QUEUE_CAPACITY", &mut cfg.queue_capacity);
        Self::read_parsed("TBUS_MIN_CONFIDENCE", &mut cfg.min_threat_confidence);
        cfg.sanitized()
    }

    /// Clamps values that would break bus or solution invariants.
    pub fn sanitized(mut self) -> Self {
        self.delivery_retries = self.delivery_retries.min(1);
        self.queue_capacity = self.queue_capacity.max(1);
        self.solution_validity =
            self.solution_validity.clamp(Duration::from_millis(1), Self::MAX_SOLUTION_VALIDITY);
        self.min_threat_confidence = self.min_threat_confidence.clamp(0.0, 1.0);
        if self.anchor_backoff_max < self.anchor_backoff_base {
            self.anchor_backoff_max = self.anchor_backoff_base;
        }
        self
    }

    /// Latency budget of one hop for the given priority class.
    pub fn budget(&self, priority: Priority) -> Duration {
        match priority {
            Priority::Critical => self.budget_critical,
            Priority::High => self.budget_high,
            Priority::Normal => self.budget_normal,
            Priority::Low => self.budget_low,
        }
    }

    fn read_ms(key: &str, target: &mut Duration) {
        let mut ms = 0u64;
        if Self::read_parsed(key, &mut ms) {
            *target = Duration::from_millis(ms);
        }
    }

    fn read_parsed<T: std::str::FromStr>(key: &str, target: &mut T) -> bool {
        let Ok(raw) = env::var(key) else { return false };
        if let Ok(val) = raw.trim().parse::<T>() {
            *target = val;
            true
        } else {
            warn!("Ignoring unparsable value {raw:?} for {key}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clamps_retry_and_validity() {
        let cfg = BusConfig {
            delivery_retries: 5,
            solution_validity: Duration::from_secs(60),
            min_threat_confidence: 1.7,
            ..BusConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.delivery_retries, 1);
        assert_eq!(cfg.solution_validity, BusConfig::MAX_SOLUTION_VALIDITY);
        assert!((cfg.min_threat_confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_budget_lookup() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.budget(Priority::Critical), Duration::from_millis(5));
        assert!(cfg.budget(Priority::Low) > cfg.budget(Priority::Normal));
    }
}
