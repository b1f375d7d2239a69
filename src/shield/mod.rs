//! Risk-scoring shield state.
//!
//! Pure IP aggregates: risk counters, blocks, alerts. No voter data ever
//! reaches this module. Scores only go up (INCR-monotonic); crossing the
//! threshold promotes an IP to a TTL'd block and appends an alert.

pub mod automanager;
pub mod proxy;

use std::time::Duration;

use crate::cache::SharedCache;

/// Penalty for a 401 from the backend.
pub const PENALTY_UNAUTHORIZED: i64 = 15;
/// Penalty for a 429 from the backend.
pub const PENALTY_RATE_LIMITED: i64 = 20;
/// Penalty for a biometric failure signal.
pub const PENALTY_BIOMETRIC_FAIL: i64 = 25;
/// Penalty for an operator flag.
pub const PENALTY_ADMIN_FLAG: i64 = 100;

/// Response header the backend sets when a liveness/face-match check fails.
pub const BIOMETRIC_FAILURE_HEADER: &str = "x-biometric-failure";

/// Risk counters idle out after an hour without new penalties.
const RISK_TTL: Duration = Duration::from_secs(3600);
/// Alert list bound.
const ALERTS_CAP: usize = 256;

#[derive(Clone)]
pub struct RiskShield {
    cache: SharedCache,
    block_threshold: i64,
    block_ttl: Duration,
}

impl RiskShield {
    pub fn new(cache: SharedCache, block_threshold: i64, block_ttl: Duration) -> Self {
        Self {
            cache,
            block_threshold,
            block_ttl,
        }
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Why an IP is blocked, if it is.
    pub fn blocked_reason(&self, ip: &str) -> Option<String> {
        self.cache.get_text(&format!("block:{ip}"))
    }

    pub fn risk(&self, ip: &str) -> i64 {
        self.cache.get_int(&format!("risk:{ip}")).unwrap_or(0)
    }

    /// Add penalty points; promotes to a block at the threshold. Returns the
    /// new score.
    pub fn penalize(&self, ip: &str, points: i64, reason: &str) -> i64 {
        let score = self
            .cache
            .incr_by(&format!("risk:{ip}"), points, Some(RISK_TTL));
        tracing::debug!(ip, points, score, reason, "risk updated");
        if score >= self.block_threshold && self.blocked_reason(ip).is_none() {
            self.block(ip, &format!("risk {score} ({reason})"));
        }
        score
    }

    fn block(&self, ip: &str, reason: &str) {
        self.cache
            .set_text(&format!("block:{ip}"), reason, Some(self.block_ttl));
        self.push_alert(&format!("blocked {ip}: {reason}"));
        tracing::warn!(ip, reason, "ip blocked");
    }

    /// Operator flag: +100 immediately.
    pub fn flag(&self, ip: &str) -> i64 {
        self.penalize(ip, PENALTY_ADMIN_FLAG, "admin flag")
    }

    pub fn push_alert(&self, message: &str) {
        self.cache.push("alerts", message, ALERTS_CAP);
    }

    pub fn alerts(&self) -> Vec<String> {
        self.cache.list("alerts")
    }

    /// Currently blocked IPs.
    pub fn blocked_ips(&self) -> Vec<String> {
        self.cache
            .scan_prefix("block:")
            .into_iter()
            .map(|(key, _)| key.trim_start_matches("block:").to_string())
            .collect()
    }

    /// IPs with any live risk score.
    pub fn scored_ips(&self) -> Vec<String> {
        self.cache
            .scan_prefix("risk:")
            .into_iter()
            .map(|(key, _)| key.trim_start_matches("risk:").to_string())
            .collect()
    }

    /// Post-filter: penalties derived from a backend response.
    pub fn observe_response(&self, ip: &str, status: u16, biometric_failure: bool) {
        match status {
            401 => {
                self.penalize(ip, PENALTY_UNAUTHORIZED, "401");
            }
            429 => {
                self.penalize(ip, PENALTY_RATE_LIMITED, "429");
            }
            _ => {}
        }
        if biometric_failure {
            self.penalize(ip, PENALTY_BIOMETRIC_FAIL, "biometric failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shield() -> RiskShield {
        RiskShield::new(SharedCache::new(), 100, Duration::from_secs(3600))
    }

    #[test]
    fn test_penalties_accumulate() {
        let s = shield();
        s.observe_response("1.2.3.4", 401, false);
        assert_eq!(s.risk("1.2.3.4"), 15);
        s.observe_response("1.2.3.4", 429, false);
        assert_eq!(s.risk("1.2.3.4"), 35);
        s.observe_response("1.2.3.4", 200, true);
        assert_eq!(s.risk("1.2.3.4"), 60);
        assert!(s.blocked_reason("1.2.3.4").is_none());
    }

    #[test]
    fn test_block_at_threshold() {
        let s = shield();
        // 5 biometric failures: 125 >= 100.
        for _ in 0..5 {
            s.observe_response("1.2.3.4", 200, true);
        }
        assert_eq!(s.risk("1.2.3.4"), 125);
        assert!(s.blocked_reason("1.2.3.4").is_some());
        assert_eq!(s.blocked_ips(), vec!["1.2.3.4".to_string()]);
        assert_eq!(s.alerts().len(), 1);
    }

    #[test]
    fn test_admin_flag_blocks_instantly() {
        let s = shield();
        s.flag("9.9.9.9");
        assert!(s.blocked_reason("9.9.9.9").is_some());
    }

    #[test]
    fn test_success_responses_harmless() {
        let s = shield();
        s.observe_response("1.2.3.4", 200, false);
        s.observe_response("1.2.3.4", 404, false);
        s.observe_response("1.2.3.4", 500, false);
        assert_eq!(s.risk("1.2.3.4"), 0);
    }

    #[test]
    fn test_ips_isolated() {
        let s = shield();
        for _ in 0..5 {
            s.observe_response("1.2.3.4", 200, true);
        }
        assert!(s.blocked_reason("1.2.3.4").is_some());
        assert!(s.blocked_reason("1.2.3.5").is_none());
    }
}
