//! Log source abstraction layer for failfence.
//!
//! A log source is one monitored service: it knows how to pick the identity
//! and the address-bearing field out of the opaque records its external
//! audit transport delivers. Every source gets a private `AttemptTracker`
//! and a dedicated worker thread, so failures from one source are processed
//! strictly in arrival order and sources never contend with each other.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

pub mod mssql;
pub mod rdp;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Sender};
use std::thread;

use crate::extractor;
use crate::tracker::AttemptTracker;
use crate::FenceResult;

/// An audit record as delivered by an external transport: positional string
/// properties plus the event timestamp, if the transport carried one.
///
/// Which property index means what is the receiving source's knowledge;
/// the envelope itself is shape-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub properties: Vec<String>,

    /// Absent timestamps are taken as "now" at parse time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// The three logical fields a source extracts from a raw record.
///
/// `raw_address` is still the unparsed field text; the address extractor
/// runs on it afterwards and may well find nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFailure {
    pub identity: String,
    pub raw_address: String,
    pub timestamp: DateTime<Utc>,
}

/// One monitored service's failure-audit channel.
pub trait LogSource: Send {
    /// Stable name, used for settings lookup, intake routing, and logs.
    fn name(&self) -> &'static str;

    /// Extract identity, address field, and timestamp from a raw record.
    ///
    /// Errors mark a malformed record; the worker logs and discards it
    /// without disturbing the transport.
    fn parse(&self, record: &RawRecord) -> FenceResult<ParsedFailure>;

    /// Health probe. Reserved for periodic consistency checks; currently
    /// always reports no issue.
    fn check(&self) -> bool {
        false
    }
}

/// A running log source: its intake channel plus the worker thread that
/// drains it.
///
/// The worker exits when every intake sender is dropped, returning its
/// tracker so the caller can inspect final state.
pub struct SourceHandle {
    name: &'static str,
    intake: Sender<RawRecord>,
    worker: thread::JoinHandle<AttemptTracker>,
}

impl SourceHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A sender the external transport feeds raw records into. Clones are
    /// cheap; the worker keeps running until the last one is dropped.
    pub fn intake(&self) -> Sender<RawRecord> {
        self.intake.clone()
    }

    /// Drop this handle's intake and wait for the worker to drain.
    ///
    /// Blocks until every other intake clone is dropped too. Returns `None`
    /// if the worker panicked.
    pub fn shutdown(self) -> Option<AttemptTracker> {
        drop(self.intake);
        match self.worker.join() {
            Ok(tracker) => Some(tracker),
            Err(_) => {
                log::error!("[{}] source worker panicked", self.name);
                None
            }
        }
    }
}

/// Spawn the worker thread for one source.
///
/// The loop per record: parse, extract the IPv4 literal from the address
/// field, hand the result to the tracker. Malformed records and
/// unattributable addresses are logged and swallowed; nothing a transport
/// delivers can take the worker down.
pub fn spawn_source(
    source: Box<dyn LogSource>,
    mut tracker: AttemptTracker,
) -> FenceResult<SourceHandle> {
    let (intake, records) = mpsc::channel::<RawRecord>();
    let name = source.name();

    let worker = thread::Builder::new()
        .name(format!("source-{}", name))
        .spawn(move || {
            for record in records {
                let parsed = match source.parse(&record) {
                    Ok(p) => p,
                    Err(e) => {
                        log::warn!("[{}] malformed record discarded: {}", name, e);
                        continue;
                    }
                };
                let address = extractor::extract_ipv4(&parsed.raw_address);
                if address.is_none() {
                    log::info!(
                        "[{}] logon as [{}] from incorrect or local address [{}]",
                        name,
                        parsed.identity,
                        parsed.raw_address,
                    );
                }
                tracker.record_failure(address, &parsed.identity, parsed.timestamp);
            }
            log::debug!("[{}] intake closed, worker exiting", name);
            tracker
        })?;

    Ok(SourceHandle {
        name,
        intake,
        worker,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
