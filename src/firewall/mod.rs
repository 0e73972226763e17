//! Firewall rule store seam.
//!
//! The agent never talks to a packet filter directly; it goes through the
//! `FirewallRuleStore` trait, which models the handful of operations the
//! ban coordinator needs over named block rules. A production backend wraps
//! the OS firewall API behind this trait; the crate ships a memory-backed
//! store for dry-run operation and tests.

pub mod coordinator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{FenceError, FenceResult};

/// Hard cap on addresses per block-rule fragment. Once every fragment holds
/// this many, the coordinator opens a new one.
pub const MAX_RULE_ADDRESSES: usize = 500;

/// One named block rule as observed through the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRule {
    pub name: String,
    pub addresses: Vec<String>,
}

/// Operations over named inbound block rules.
///
/// Every rule created through this trait blocks inbound traffic from its
/// member addresses across all network profiles. Implementations must fail
/// cleanly (no partial mutation) when the underlying mechanism is down, and
/// should bound each call with a conservative timeout; the coordinator
/// treats any error as a dropped ban, never as a fatal condition.
pub trait FirewallRuleStore: Send {
    /// Whether the backing firewall mechanism is currently able to accept
    /// mutations.
    fn is_operational(&self) -> bool;

    /// All rules whose name starts with `name_prefix`, in the store's own
    /// order. The coordinator relies on that order being stable so fragment
    /// scans fill earlier fragments first.
    fn list_rules(&self, name_prefix: &str) -> FenceResult<Vec<BlockRule>>;

    /// Create a block rule holding `initial_addresses`.
    fn create_rule(&mut self, name: &str, initial_addresses: &[String]) -> FenceResult<()>;

    /// Append one address to an existing rule. Appending an address that is
    /// already a member is accepted; the store keeps the duplicate.
    fn append_address(&mut self, rule_name: &str, address: &str) -> FenceResult<()>;
}

/// Memory-backed rule store.
///
/// Cloneable handle over shared state, so a test or the CLI can keep a
/// handle for inspection after the coordinator takes ownership of another.
/// Rules are kept in creation order. The operational flag simulates the
/// backing service going down.
#[derive(Clone)]
pub struct MemoryRuleStore {
    rules: Arc<Mutex<Vec<BlockRule>>>,
    operational: Arc<AtomicBool>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(Mutex::new(Vec::new())),
            operational: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flip the simulated service state.
    pub fn set_operational(&self, up: bool) {
        self.operational.store(up, Ordering::SeqCst);
    }

    /// A copy of every rule, for inspection.
    pub fn snapshot(&self) -> Vec<BlockRule> {
        self.rules.lock().expect("rule store lock poisoned").clone()
    }

    fn guard(&self) -> FenceResult<std::sync::MutexGuard<'_, Vec<BlockRule>>> {
        self.rules
            .lock()
            .map_err(|_| FenceError::Firewall("rule store lock poisoned".to_string()))
    }
}

impl Default for MemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FirewallRuleStore for MemoryRuleStore {
    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    fn list_rules(&self, name_prefix: &str) -> FenceResult<Vec<BlockRule>> {
        let rules = self.guard()?;
        Ok(rules
            .iter()
            .filter(|r| r.name.starts_with(name_prefix))
            .cloned()
            .collect())
    }

    fn create_rule(&mut self, name: &str, initial_addresses: &[String]) -> FenceResult<()> {
        if !self.is_operational() {
            return Err(FenceError::Firewall(
                "firewall service is not running".to_string(),
            ));
        }
        let mut rules = self.guard()?;
        if rules.iter().any(|r| r.name == name) {
            return Err(FenceError::Firewall(format!(
                "rule [{}] already exists",
                name
            )));
        }
        rules.push(BlockRule {
            name: name.to_string(),
            addresses: initial_addresses.to_vec(),
        });
        Ok(())
    }

    fn append_address(&mut self, rule_name: &str, address: &str) -> FenceResult<()> {
        if !self.is_operational() {
            return Err(FenceError::Firewall(
                "firewall service is not running".to_string(),
            ));
        }
        let mut rules = self.guard()?;
        let rule = rules
            .iter_mut()
            .find(|r| r.name == rule_name)
            .ok_or_else(|| FenceError::Firewall(format!("no such rule [{}]", rule_name)))?;
        rule.addresses.push(address.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
