//! Per-source attempt tracking.
//!
//! One `AttemptTracker` per log source owns the map from source IP to its
//! failure history and applies the sliding-window reset and
//! threshold-crossing policy. When an IP's count exceeds the configured
//! threshold the tracker publishes a `BanTrigger` on its outbound channel;
//! it never talks to the firewall itself.
//!
//! Entries are kept for the process lifetime. Nothing evicts them, so a
//! long-running agent grows with the number of distinct offender IPs; a
//! restart starts from empty state.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Sender;

use crate::{BanTrigger, SourceSettings};

/// Failure history of one IP against one log source.
#[derive(Debug, Clone)]
pub struct AttemptEntry {
    address: String,
    identities: HashSet<String>,
    count: u32,
    last_attempt: DateTime<Utc>,
}

impl AttemptEntry {
    fn new(address: &str, identity: &str, at: DateTime<Utc>) -> Self {
        let mut identities = HashSet::new();
        identities.insert(identity.to_string());
        Self {
            address: address.to_string(),
            identities,
            count: 1,
            last_attempt: at,
        }
    }

    /// Forget the accumulated failures. Identity history survives the reset.
    fn reset(&mut self) {
        self.count = 0;
    }

    fn record(&mut self, identity: &str, at: DateTime<Utc>) {
        self.count += 1;
        self.last_attempt = at;
        if !self.identities.contains(identity) {
            self.identities.insert(identity.to_string());
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Failures recorded since the last window reset.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Distinct identity strings this IP has tried.
    pub fn identities(&self) -> &HashSet<String> {
        &self.identities
    }

    pub fn last_attempt(&self) -> DateTime<Utc> {
        self.last_attempt
    }
}

/// Applies the sliding-window failure policy for one log source.
pub struct AttemptTracker {
    source: &'static str,
    settings: SourceSettings,
    entries: HashMap<String, AttemptEntry>,
    triggers: Sender<BanTrigger>,
}

impl AttemptTracker {
    /// Settings and the outbound trigger channel are injected here; the
    /// tracker holds no ambient state.
    pub fn new(
        source: &'static str,
        settings: SourceSettings,
        triggers: Sender<BanTrigger>,
    ) -> Self {
        Self {
            source,
            settings,
            entries: HashMap::new(),
            triggers,
        }
    }

    /// Record one authentication failure.
    ///
    /// `address` is the extractor's output: `None` marks an unattributable
    /// event, which is discarded without touching any entry. A fresh address
    /// starts at count 1 and can never trigger; a known address is reset to
    /// zero first if it sat idle longer than the reset window, then
    /// incremented, and a `BanTrigger` is published on every failure that
    /// leaves the count above the threshold.
    pub fn record_failure(
        &mut self,
        address: Option<&str>,
        identity: &str,
        timestamp: DateTime<Utc>,
    ) {
        let address = match address {
            Some(a) if !a.is_empty() => a,
            _ => {
                log::debug!(
                    "[{}] unattributable failure for identity [{}] discarded",
                    self.source,
                    identity,
                );
                return;
            }
        };

        match self.entries.get_mut(address) {
            None => {
                log::info!(
                    "[{}] ip [{}] attempts to logon as [{}] x[1] time",
                    self.source,
                    address,
                    identity,
                );
                self.entries
                    .insert(address.to_string(), AttemptEntry::new(address, identity, timestamp));
            }
            Some(entry) => {
                if timestamp - entry.last_attempt() > self.settings.reset_window() {
                    log::info!(
                        "[{}] attempt count for ip [{}] reset after idle gap",
                        self.source,
                        address,
                    );
                    entry.reset();
                }
                entry.record(identity, timestamp);
                log::info!(
                    "[{}] ip [{}] attempts to logon as [{}] x[{}] times",
                    self.source,
                    address,
                    identity,
                    entry.count(),
                );
                if entry.count() > self.settings.max_failed_attempts {
                    log::warn!(
                        "[{}] ip [{}] exceeded {} failed attempts inside the window",
                        self.source,
                        address,
                        self.settings.max_failed_attempts,
                    );
                    let trigger = BanTrigger {
                        address: address.to_string(),
                        timestamp,
                        source: self.source,
                    };
                    // The coordinator may already be gone during shutdown;
                    // a dropped trigger is not an error.
                    if self.triggers.send(trigger).is_err() {
                        log::debug!(
                            "[{}] ban trigger for [{}] dropped, no subscriber",
                            self.source,
                            address,
                        );
                    }
                }
            }
        }
    }

    /// Health probe. Reserved for periodic consistency checks; currently
    /// there is nothing to inspect, so it always reports no issue.
    pub fn check(&self) -> bool {
        log::trace!("[{}] tracker check executed", self.source);
        false
    }

    /// The failure history for an address, if one exists.
    pub fn entry(&self, address: &str) -> Option<&AttemptEntry> {
        self.entries.get(address)
    }

    /// Number of distinct IPs tracked since startup.
    pub fn tracked_ips(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::mpsc;

    fn settings(threshold: u32, window_secs: u64) -> SourceSettings {
        SourceSettings {
            max_failed_attempts: threshold,
            reset_window_secs: window_secs,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_first_failure_creates_entry_without_trigger() {
        let (tx, rx) = mpsc::channel();
        let mut tracker = AttemptTracker::new("test-source", settings(3, 60), tx);

        tracker.record_failure(Some("10.0.0.5"), "sa", t0());

        let entry = tracker.entry("10.0.0.5").expect("entry created");
        assert_eq!(entry.address(), "10.0.0.5");
        assert_eq!(entry.count(), 1);
        assert_eq!(entry.last_attempt(), t0());
        assert!(entry.identities().contains("sa"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_counts_progress_and_trigger_fires_past_threshold() {
        let (tx, rx) = mpsc::channel();
        let mut tracker = AttemptTracker::new("test-source", settings(3, 60), tx);

        // Threshold 3: counts 1,2,3 stay quiet, the 4th failure triggers.
        for (i, identity) in ["a", "b", "c"].iter().enumerate() {
            tracker.record_failure(
                Some("10.0.0.5"),
                identity,
                t0() + Duration::seconds(10 * i as i64),
            );
        }
        assert_eq!(tracker.entry("10.0.0.5").unwrap().count(), 3);
        assert!(rx.try_recv().is_err(), "count == threshold must not trigger");

        let fourth = t0() + Duration::seconds(30);
        tracker.record_failure(Some("10.0.0.5"), "d", fourth);

        let entry = tracker.entry("10.0.0.5").unwrap();
        assert_eq!(entry.count(), 4);
        assert_eq!(entry.identities().len(), 4);

        let trigger = rx.try_recv().expect("trigger fired");
        assert_eq!(trigger.address, "10.0.0.5");
        assert_eq!(trigger.timestamp, fourth);
        assert_eq!(trigger.source, "test-source");
        assert!(rx.try_recv().is_err(), "exactly one trigger at the transition");
    }

    #[test]
    fn test_retriggers_on_every_over_threshold_failure() {
        let (tx, rx) = mpsc::channel();
        let mut tracker = AttemptTracker::new("test-source", settings(2, 60), tx);

        for i in 0..6 {
            tracker.record_failure(Some("192.0.2.7"), "root", t0() + Duration::seconds(i));
        }

        // Counts 3,4,5,6 each re-trigger.
        let fired: Vec<BanTrigger> = rx.try_iter().collect();
        assert_eq!(fired.len(), 4);
        assert!(fired.iter().all(|t| t.address == "192.0.2.7"));
    }

    #[test]
    fn test_idle_gap_resets_count_but_keeps_identities() {
        let (tx, rx) = mpsc::channel();
        let mut tracker = AttemptTracker::new("test-source", settings(3, 60), tx);

        tracker.record_failure(Some("10.0.0.5"), "alice", t0());
        tracker.record_failure(Some("10.0.0.5"), "bob", t0() + Duration::seconds(30));
        assert_eq!(tracker.entry("10.0.0.5").unwrap().count(), 2);

        // Gap of 61s > 60s window: pre-gap failures are forgotten.
        let post_gap = t0() + Duration::seconds(30 + 61);
        tracker.record_failure(Some("10.0.0.5"), "carol", post_gap);

        let entry = tracker.entry("10.0.0.5").unwrap();
        assert_eq!(entry.count(), 1);
        assert_eq!(entry.last_attempt(), post_gap);
        assert_eq!(entry.identities().len(), 3, "identity history survives the reset");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_gap_of_exactly_the_window_does_not_reset() {
        let (tx, _rx) = mpsc::channel();
        let mut tracker = AttemptTracker::new("test-source", settings(5, 60), tx);

        tracker.record_failure(Some("10.0.0.5"), "sa", t0());
        tracker.record_failure(Some("10.0.0.5"), "sa", t0() + Duration::seconds(60));

        // The reset requires a gap strictly greater than the window.
        assert_eq!(tracker.entry("10.0.0.5").unwrap().count(), 2);
    }

    #[test]
    fn test_unattributable_failures_create_nothing() {
        let (tx, rx) = mpsc::channel();
        let mut tracker = AttemptTracker::new("test-source", settings(3, 60), tx);

        tracker.record_failure(None, "sa", t0());
        tracker.record_failure(Some(""), "sa", t0());

        assert_eq!(tracker.tracked_ips(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_independent_ips_do_not_share_counts() {
        let (tx, rx) = mpsc::channel();
        let mut tracker = AttemptTracker::new("test-source", settings(3, 60), tx);

        for i in 0..3 {
            tracker.record_failure(Some("10.0.0.5"), "sa", t0() + Duration::seconds(i));
            tracker.record_failure(Some("10.0.0.6"), "sa", t0() + Duration::seconds(i));
        }

        assert_eq!(tracker.entry("10.0.0.5").unwrap().count(), 3);
        assert_eq!(tracker.entry("10.0.0.6").unwrap().count(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_trigger_send_failure_is_swallowed() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut tracker = AttemptTracker::new("test-source", settings(1, 60), tx);

        // Over the threshold with no subscriber; must not panic or error.
        tracker.record_failure(Some("10.0.0.5"), "sa", t0());
        tracker.record_failure(Some("10.0.0.5"), "sa", t0() + Duration::seconds(1));
        assert_eq!(tracker.entry("10.0.0.5").unwrap().count(), 2);
    }

    #[test]
    fn test_check_reports_no_issue() {
        let (tx, _rx) = mpsc::channel();
        let tracker = AttemptTracker::new("test-source", settings(3, 60), tx);
        assert!(!tracker.check());
    }
}
