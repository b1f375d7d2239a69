//! Shield auto-manager: subnet clustering over blocked IPs.
//!
//! Every 60 s the blocked set is grouped by /24. A subnet with 4 or more
//! blocks raises a single "subnet-attack" alert and escalates the risk of
//! the other IPs recently seen from that subnet, so the rest of a rotating
//! attacker pool trips the threshold faster.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use super::RiskShield;

/// Blocks in one /24 that constitute a subnet attack.
pub const SUBNET_ATTACK_THRESHOLD: usize = 4;
/// Escalation applied to unblocked IPs of an attacking subnet.
pub const ESCALATION_POINTS: i64 = 50;
/// Scan cadence.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// "a.b.c.d" → "a.b.c". Non-IPv4 strings are left unclustered.
pub fn subnet24(ip: &str) -> Option<String> {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.parse::<u8>().is_err()) {
        return None;
    }
    Some(format!("{}.{}.{}", parts[0], parts[1], parts[2]))
}

/// Group blocked IPs by /24.
pub fn cluster_blocks(blocked: &[String]) -> HashMap<String, Vec<String>> {
    let mut clusters: HashMap<String, Vec<String>> = HashMap::new();
    for ip in blocked {
        if let Some(subnet) = subnet24(ip) {
            clusters.entry(subnet).or_default().push(ip.clone());
        }
    }
    clusters
}

impl RiskShield {
    /// One scan pass. Returns the subnets flagged this pass.
    pub fn sweep_subnets(&self) -> Vec<String> {
        let blocked = self.blocked_ips();
        let clusters = cluster_blocks(&blocked);
        let mut flagged = Vec::new();

        for (subnet, ips) in clusters {
            if ips.len() < SUBNET_ATTACK_THRESHOLD {
                continue;
            }
            // One alert per subnet per block-TTL window.
            let marker = format!("subnet-alerted:{subnet}");
            if self.cache().get_text(&marker).is_some() {
                continue;
            }
            self.cache()
                .set_text(&marker, "1", Some(Duration::from_secs(3600)));
            self.push_alert(&format!(
                "subnet-attack {subnet}.0/24: {} blocked ips",
                ips.len()
            ));

            // Escalate the not-yet-blocked neighbours we have scores for.
            for ip in self.scored_ips() {
                if subnet24(&ip).as_deref() == Some(subnet.as_str())
                    && self.blocked_reason(&ip).is_none()
                {
                    self.penalize(&ip, ESCALATION_POINTS, "subnet escalation");
                }
            }
            flagged.push(subnet);
        }
        flagged
    }
}

/// Long-running scan loop; stops when the cancel channel flips.
pub async fn run(shield: RiskShield, mut cancel: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SCAN_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let flagged = shield.sweep_subnets();
                if !flagged.is_empty() {
                    info!(?flagged, "subnet attack alerts raised");
                }
                shield.cache().sweep();
            }
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    info!("shield auto-manager stopping");
                    break;
                }
            }
        }
    }
}
