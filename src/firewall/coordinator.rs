//! Ban coordinator: turns over-threshold notifications into block-rule
//! mutations.
//!
//! One coordinator serves every log source. It owns the rule store behind a
//! mutex, so the list-pick-append sequence is a critical section: two
//! concurrent bans can neither both squeeze into the last slot of a
//! fragment nor both create the same new fragment.
//!
//! A ban that fails (firewall down, store error) is logged and dropped.
//! No retry is scheduled; the tracker still considers the IP over
//! threshold, so the next failure from it fires a fresh trigger.

use chrono::{DateTime, Utc};
use std::net::Ipv4Addr;
use std::sync::mpsc::Receiver;
use std::sync::Mutex;

use super::{FirewallRuleStore, MAX_RULE_ADDRESSES};
use crate::{BanTrigger, FenceError, FenceResult};

pub struct BanCoordinator {
    base_rule_name: String,
    store: Mutex<Box<dyn FirewallRuleStore>>,
}

impl BanCoordinator {
    pub fn new(base_rule_name: impl Into<String>, store: Box<dyn FirewallRuleStore>) -> Self {
        Self {
            base_rule_name: base_rule_name.into(),
            store: Mutex::new(store),
        }
    }

    /// Add an address to the block list, fragmenting as needed.
    ///
    /// The address is re-validated here even though the extractor already
    /// produced it: it crossed a component boundary, and nothing but a
    /// syntactically valid IPv4 literal may reach the rule store. The first
    /// fragment with spare capacity takes the address; when every fragment
    /// is full a new one named `"<base> #<n>"` is created. Addresses
    /// already present in some fragment are appended again, not deduplicated.
    pub fn ban_address(&self, address: &str, observed_at: DateTime<Utc>) -> FenceResult<()> {
        let ip: Ipv4Addr = address
            .parse()
            .map_err(|_| FenceError::Parse(format!("not an IPv4 address: [{}]", address)))?;

        let mut store = self
            .store
            .lock()
            .map_err(|_| FenceError::Firewall("rule store lock poisoned".to_string()))?;

        if !store.is_operational() {
            return Err(FenceError::Firewall(
                "firewall service is not running, ban dropped".to_string(),
            ));
        }

        let rules = store.list_rules(&self.base_rule_name)?;

        if rules.is_empty() {
            log::info!(
                "creating block rule [{}] with [{}] (observed {})",
                self.base_rule_name,
                ip,
                observed_at,
            );
            return store.create_rule(&self.base_rule_name, &[ip.to_string()]);
        }

        for rule in &rules {
            if rule.addresses.len() < MAX_RULE_ADDRESSES {
                log::info!(
                    "adding [{}] to block rule [{}] ({} addresses)",
                    ip,
                    rule.name,
                    rule.addresses.len(),
                );
                return store.append_address(&rule.name, &ip.to_string());
            }
        }

        let next_name = format!("{} #{}", self.base_rule_name, rules.len() + 1);
        log::info!(
            "all {} block rule fragments full, creating [{}] with [{}]",
            rules.len(),
            next_name,
            ip,
        );
        store.create_rule(&next_name, &[ip.to_string()])
    }

    /// Drain ban triggers until every publisher has unsubscribed.
    ///
    /// This is the subscription side of the pipeline: sources publish on
    /// cloned senders, the coordinator consumes the one receiver. Failures
    /// are operational errors, logged and survived.
    pub fn run(&self, triggers: Receiver<BanTrigger>) {
        for trigger in triggers {
            log::debug!(
                "ban trigger from [{}] for [{}]",
                trigger.source,
                trigger.address,
            );
            if let Err(e) = self.ban_address(&trigger.address, trigger.timestamp) {
                log::error!("ban for [{}] failed: {}", trigger.address, e);
            }
        }
        log::debug!("all trigger publishers gone, ban coordinator exiting");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::{BlockRule, MemoryRuleStore};
    use chrono::TimeZone;

    const BASE: &str = "Failfence BlackList";

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn coordinator_with_store() -> (BanCoordinator, MemoryRuleStore) {
        let store = MemoryRuleStore::new();
        let coordinator = BanCoordinator::new(BASE, Box::new(store.clone()));
        (coordinator, store)
    }

    #[test]
    fn test_first_ban_creates_the_base_rule() {
        let (coordinator, store) = coordinator_with_store();
        coordinator.ban_address("203.0.113.9", at()).expect("ban");

        let rules = store.snapshot();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, BASE);
        assert_eq!(rules[0].addresses, vec!["203.0.113.9"]);
    }

    #[test]
    fn test_later_bans_append_to_the_existing_rule() {
        let (coordinator, store) = coordinator_with_store();
        coordinator.ban_address("203.0.113.9", at()).expect("ban");
        coordinator.ban_address("198.51.100.7", at()).expect("ban");

        let rules = store.snapshot();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].addresses.len(), 2);
    }

    #[test]
    fn test_full_fragment_rolls_over_to_numbered_fragment() {
        let (coordinator, store) = coordinator_with_store();
        {
            let mut seed = store.clone();
            let full: Vec<String> = (0..MAX_RULE_ADDRESSES)
                .map(|i| format!("10.{}.{}.{}", i / 65536, (i / 256) % 256, i % 256))
                .collect();
            seed.create_rule(BASE, &full).expect("seed");
        }

        coordinator.ban_address("203.0.113.9", at()).expect("ban");

        let rules = store.snapshot();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].addresses.len(), MAX_RULE_ADDRESSES, "original untouched");
        assert_eq!(rules[1].name, format!("{} #2", BASE));
        assert_eq!(rules[1].addresses, vec!["203.0.113.9"]);
    }

    #[test]
    fn test_partial_fragment_is_filled_before_rolling_over() {
        let (coordinator, store) = coordinator_with_store();
        {
            let mut seed = store.clone();
            let full: Vec<String> = (0..MAX_RULE_ADDRESSES).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
            seed.create_rule(BASE, &full).expect("seed");
            seed.create_rule(&format!("{} #2", BASE), &["203.0.113.1".to_string()])
                .expect("seed");
        }

        coordinator.ban_address("203.0.113.9", at()).expect("ban");

        let rules = store.snapshot();
        assert_eq!(rules.len(), 2, "no third fragment while #2 has room");
        assert_eq!(rules[1].addresses.len(), 2);
    }

    #[test]
    fn test_duplicate_ban_appends_without_error() {
        let (coordinator, store) = coordinator_with_store();
        coordinator.ban_address("203.0.113.9", at()).expect("ban");
        coordinator.ban_address("203.0.113.9", at()).expect("re-ban accepted");

        let rules = store.snapshot();
        assert_eq!(rules[0].addresses, vec!["203.0.113.9", "203.0.113.9"]);
    }

    #[test]
    fn test_invalid_address_is_rejected_without_mutation() {
        let (coordinator, store) = coordinator_with_store();
        assert!(coordinator.ban_address("not-an-ip", at()).is_err());
        assert!(coordinator.ban_address("999.1.2.3", at()).is_err());
        assert!(coordinator.ban_address("", at()).is_err());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_firewall_down_drops_the_ban() {
        let (coordinator, store) = coordinator_with_store();
        store.set_operational(false);
        assert!(coordinator.ban_address("203.0.113.9", at()).is_err());
        assert!(store.snapshot().is_empty());

        // Service back up: the next trigger for the same IP succeeds.
        store.set_operational(true);
        coordinator.ban_address("203.0.113.9", at()).expect("ban");
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_run_drains_until_publishers_drop() {
        let (coordinator, store) = coordinator_with_store();
        let (tx, rx) = std::sync::mpsc::channel();

        tx.send(BanTrigger {
            address: "203.0.113.9".to_string(),
            timestamp: at(),
            source: "test-source",
        })
        .expect("send");
        tx.send(BanTrigger {
            address: "not-an-ip".to_string(),
            timestamp: at(),
            source: "test-source",
        })
        .expect("send");
        drop(tx);

        // Returns once the channel closes; the bad trigger is survived.
        coordinator.run(rx);

        let rules = store.snapshot();
        assert_eq!(
            rules,
            vec![BlockRule {
                name: BASE.to_string(),
                addresses: vec!["203.0.113.9".to_string()],
            }],
        );
    }
}
