//! Agent wiring: sources, trackers, and the ban coordinator as one running
//! pipeline.
//!
//! `FenceAgent::start` subscribes every log source to the coordinator by
//! handing its tracker a clone of the trigger sender; `shutdown` drops the
//! intakes, which drains the workers, which drops the trigger senders,
//! which stops the coordinator. Unsubscription is channel teardown, no
//! bookkeeping, and the in-memory trackers come back out intact.

use std::sync::mpsc;
use std::thread;

use crate::firewall::coordinator::BanCoordinator;
use crate::firewall::FirewallRuleStore;
use crate::log_sources::mssql::MssqlLogonSource;
use crate::log_sources::rdp::RdpLogonSource;
use crate::log_sources::{spawn_source, LogSource, RawRecord, SourceHandle};
use crate::tracker::AttemptTracker;
use crate::{FenceConfig, FenceResult};

pub struct FenceAgent {
    sources: Vec<SourceHandle>,
    coordinator: thread::JoinHandle<()>,
}

impl FenceAgent {
    /// Spin up the full pipeline against the given rule store.
    ///
    /// One worker thread per monitored source plus the coordinator drain
    /// thread. Per-source thresholds and windows come from `config`;
    /// unknown sources would fall back to the defaults section.
    pub fn start(config: &FenceConfig, store: Box<dyn FirewallRuleStore>) -> FenceResult<Self> {
        let (trigger_tx, trigger_rx) = mpsc::channel();

        let coordinator = BanCoordinator::new(config.firewall.base_rule_name.clone(), store);
        let coordinator = thread::Builder::new()
            .name("ban-coordinator".to_string())
            .spawn(move || coordinator.run(trigger_rx))?;

        let monitored: Vec<Box<dyn LogSource>> =
            vec![Box::new(MssqlLogonSource), Box::new(RdpLogonSource)];

        let mut sources = Vec::with_capacity(monitored.len());
        for source in monitored {
            let name = source.name();
            let settings = config.sources.settings_for(name);
            log::info!(
                "source [{}] online (threshold {}, window {}s)",
                name,
                settings.max_failed_attempts,
                settings.reset_window_secs,
            );
            let tracker = AttemptTracker::new(name, settings, trigger_tx.clone());
            sources.push(spawn_source(source, tracker)?);
        }

        // The workers hold the only remaining sender clones; once they all
        // exit, the coordinator's receiver closes and its thread returns.
        drop(trigger_tx);

        Ok(Self {
            sources,
            coordinator,
        })
    }

    /// Intake channel for a source, by name. The external transport (or the
    /// CLI's record feed) sends raw records here.
    pub fn intake(&self, source_name: &str) -> Option<mpsc::Sender<RawRecord>> {
        self.sources
            .iter()
            .find(|s| s.name() == source_name)
            .map(|s| s.intake())
    }

    /// Names of the monitored sources, in startup order.
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Tear the pipeline down and wait for every thread.
    ///
    /// Any intake handles obtained from `intake()` must be dropped by the
    /// caller first; workers keep serving until their last sender is gone.
    /// In-flight records are drained, not corrupted, and nothing of the
    /// tracker state leaks into the next run.
    pub fn shutdown(self) {
        for source in self.sources {
            let name = source.name();
            match source.shutdown() {
                Some(tracker) => {
                    log::info!("source [{}] stopped ({} ips tracked)", name, tracker.tracked_ips())
                }
                None => log::error!("source [{}] worker lost", name),
            }
        }
        if self.coordinator.join().is_err() {
            log::error!("ban coordinator panicked during shutdown");
        }
        log::info!("fence agent stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
